//! Taxonomy/term pruning against the target repository's catalog.
//!
//! Taxonomy fields bind to taxonomies in the schema and carry
//! `{ "taxonomy_uid", "term_uid" }` pairs in records. Anything the target
//! does not know is dropped; a list emptied by pruning is removed outright
//! because the repository rejects empty taxonomy lists.

use std::collections::{HashMap, HashSet};

use contentshift_core::{FieldKind, FieldSchema, RecordPayload};
use serde_json::{Map, Value};

use crate::storage::{paths, CheckpointStore};

/// Authoritative taxonomies of the target repository and their terms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonomyCatalog {
    terms: HashMap<String, HashSet<String>>,
}

impl TaxonomyCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a taxonomy with the given terms, extending any existing entry.
    pub fn insert<I, S>(&mut self, taxonomy: impl Into<String>, terms: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terms
            .entry(taxonomy.into())
            .or_default()
            .extend(terms.into_iter().map(Into::into));
    }

    /// Whether the taxonomy exists on the target.
    #[must_use]
    pub fn has_taxonomy(&self, taxonomy: &str) -> bool {
        self.terms.contains_key(taxonomy)
    }

    /// Whether the term exists under the taxonomy on the target.
    #[must_use]
    pub fn has_term(&self, taxonomy: &str, term: &str) -> bool {
        self.terms
            .get(taxonomy)
            .is_some_and(|terms| terms.contains(term))
    }

    /// Builds a catalog from the `{ taxonomy: { term: {..} } }` checkpoint shape.
    #[must_use]
    pub fn from_checkpoint(value: &Map<String, Value>) -> Self {
        let mut catalog = Self::new();
        for (taxonomy, terms) in value {
            let terms = terms
                .as_object()
                .map(|terms| terms.keys().cloned().collect::<Vec<_>>())
                .unwrap_or_default();
            catalog.insert(taxonomy.clone(), terms);
        }
        catalog
    }

    /// Loads the catalog written by the taxonomy import; empty when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub async fn load(checkpoint: &CheckpointStore) -> anyhow::Result<Self> {
        let value: Option<Map<String, Value>> = checkpoint.read_json(paths::TAXONOMY_TERMS).await?;
        Ok(value.as_ref().map(Self::from_checkpoint).unwrap_or_default())
    }
}

/// Drops taxonomy bindings the catalog does not know, removing taxonomy
/// fields whose binding list was emptied. Recurses into nested schemas.
///
/// Returns true if anything was dropped.
pub fn prune_schema_taxonomies(schema: &mut Vec<FieldSchema>, catalog: &TaxonomyCatalog) -> bool {
    let mut changed = false;
    schema.retain_mut(|field| match &mut field.kind {
        FieldKind::Taxonomy { taxonomies } => {
            let before = taxonomies.len();
            taxonomies.retain(|binding| catalog.has_taxonomy(&binding.taxonomy_uid));
            if taxonomies.len() != before {
                changed = true;
            }
            !(before > 0 && taxonomies.is_empty())
        }
        FieldKind::Group { schema } | FieldKind::GlobalRef { schema, .. } => {
            changed |= prune_schema_taxonomies(schema, catalog);
            true
        }
        FieldKind::Blocks { blocks } => {
            for block in blocks {
                changed |= prune_schema_taxonomies(&mut block.schema, catalog);
            }
            true
        }
        _ => true,
    });
    changed
}

/// Drops term references of root-level taxonomy fields that point outside
/// the catalog. A field whose list was emptied is removed from the record.
pub fn prune_record_terms(
    payload: &mut RecordPayload,
    schema: &[FieldSchema],
    catalog: &TaxonomyCatalog,
) {
    for field in schema {
        if !matches!(field.kind, FieldKind::Taxonomy { .. }) {
            continue;
        }
        let Some(Value::Array(items)) = payload.get_mut(&field.uid) else {
            continue;
        };
        let before = items.len();
        items.retain(|item| term_is_known(item, catalog));
        if before > 0 && items.is_empty() {
            payload.remove(&field.uid);
        }
    }
}

fn term_is_known(item: &Value, catalog: &TaxonomyCatalog) -> bool {
    let Some(taxonomy) = item.get("taxonomy_uid").and_then(Value::as_str) else {
        return false;
    };
    match item.get("term_uid").and_then(Value::as_str) {
        Some(term) => catalog.has_term(taxonomy, term),
        None => catalog.has_taxonomy(taxonomy),
    }
}
