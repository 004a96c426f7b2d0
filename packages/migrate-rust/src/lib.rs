//! `contentshift` migration engine.
//!
//! Moves content types and records from an exported snapshot into a target
//! content repository:
//!
//! 1. **Schema relaxation** (`schema`): clear constraints that block
//!    out-of-order creation, restore them afterwards
//! 2. **Identifier rewrite** (`resolve`): map extension, asset, record and
//!    taxonomy identifiers through the run's identity maps
//! 3. **Orchestration** (`service`): stage-ordered, batch-paced record
//!    creation, reference repair, publishing and cleanup
//! 4. **Checkpoints** (`storage`): identity maps and ledgers persisted for
//!    resumption

pub mod error;
pub mod logging;
pub mod repository;
pub mod resolve;
pub mod schema;
pub mod service;
pub mod snapshot;
pub mod storage;
pub mod traits;

pub use error::{ErrorCategory, MigrationError, RepositoryError};
pub use repository::{InMemoryRepository, RetryingRepository};
pub use service::{
    BatchItem, BatchJob, BatchScheduler, LocaleEntryOrchestrator, MigrationConfig,
    MigrationContext, Progress, RunReport, Stage,
};
pub use snapshot::MemorySnapshot;
pub use traits::{ContentRepository, SnapshotSource};
