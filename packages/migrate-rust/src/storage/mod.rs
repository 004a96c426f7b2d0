//! Checkpoint-backed state of a migration run.
//!
//! - [`CheckpointStore`]: whole-file JSON reads and atomic writes under the
//!   checkpoint root
//! - [`IdentityMapStore`]: old-id to new-id tables per entity kind, persisted
//!   after every mutation
//! - [`RunLedgers`]: success/failure rows and the bookkeeping lists consumed
//!   by later stages and downstream collaborators

pub mod checkpoint;
pub mod identity_map;
pub mod ledger;

pub use checkpoint::{paths, CheckpointStore};
pub use identity_map::{IdentityMap, IdentityMapStore};
pub use ledger::{ExistingRecord, Ledger, LedgerEntry, RunLedgers};
