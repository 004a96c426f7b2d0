//! Temporary schema relaxation and its reversal.

pub mod relax;
pub mod restore;

pub use relax::{
    global_fields_needing_repair, prune_missing_references, referenced_content_types, relax,
    relax_with_verification, ContentTypePresence,
};
pub use restore::SchemaRestorer;
