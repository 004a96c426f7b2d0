//! Identifier rewrite passes applied before every remote write.
//!
//! - [`extensions`]: schema extension bindings, plugins, global fields, and
//!   reference target shape
//! - [`links`]: asset and record links inside record payloads
//! - [`taxonomy`]: taxonomy bindings and term references
//! - [`field_rules`]: record identifiers inside field-rule operands
//!
//! [`serialize_record`] composes the record passes for one remote call.

pub mod extensions;
pub mod field_rules;
pub mod links;
pub mod taxonomy;

use std::collections::BTreeSet;

use contentshift_core::{strip_system_keys, FieldSchema, RecordPayload};

pub use extensions::lookup_extensions;
pub use field_rules::{rewrite_field_rules, FieldRuleRewrite};
pub use links::{lookup_links, UnresolvedLinks};
pub use taxonomy::{prune_record_terms, prune_schema_taxonomies, TaxonomyCatalog};

use crate::storage::IdentityMapStore;

/// A record payload ready to send, plus the record links it could not map.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedRecord {
    /// Payload with system keys removed and identifiers rewritten.
    pub payload: RecordPayload,
    /// Record identifiers without a mapping.
    pub unresolved: BTreeSet<String>,
}

/// Prepares a snapshot record for a create or update call.
#[must_use]
pub fn serialize_record(
    record: &RecordPayload,
    schema: &[FieldSchema],
    maps: &IdentityMapStore,
    catalog: &TaxonomyCatalog,
    policy: UnresolvedLinks,
) -> SerializedRecord {
    let mut payload = record.clone();
    strip_system_keys(&mut payload);
    let unresolved = lookup_links(&mut payload, schema, maps, policy);
    prune_record_terms(&mut payload, schema, catalog);
    SerializedRecord {
        payload,
        unresolved,
    }
}
