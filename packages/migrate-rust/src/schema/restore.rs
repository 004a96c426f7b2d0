//! Schema restoration after records exist.

use std::collections::BTreeSet;

use contentshift_core::{ConstraintFlags, ContentTypeDefinition};
use tracing::debug;

use super::relax::prune_missing_references;
use crate::error::RepositoryError;
use crate::resolve::{lookup_extensions, prune_schema_taxonomies, TaxonomyCatalog};
use crate::storage::IdentityMapStore;
use crate::traits::ContentRepository;

/// Puts original, fully constrained schemas back on the target.
///
/// Works from the snapshot captured before relaxation, so every constraint
/// the relaxer cleared comes back as it was. Field rules are left out; they
/// are pushed by the late field-rule pass.
#[derive(Debug)]
pub struct SchemaRestorer<'a> {
    maps: &'a IdentityMapStore,
    catalog: &'a TaxonomyCatalog,
    missing: BTreeSet<String>,
    preserve_shape: bool,
}

impl<'a> SchemaRestorer<'a> {
    /// Creates a restorer. `missing` lists content types absent on the
    /// target; reference fields pointing at them stay removed.
    #[must_use]
    pub fn new(
        maps: &'a IdentityMapStore,
        catalog: &'a TaxonomyCatalog,
        missing: BTreeSet<String>,
        preserve_shape: bool,
    ) -> Self {
        Self {
            maps,
            catalog,
            missing,
            preserve_shape,
        }
    }

    /// The definition to push for `original`, without field rules.
    #[must_use]
    pub fn restored(&self, original: &ContentTypeDefinition) -> ContentTypeDefinition {
        let mut definition = original.clone();
        definition.field_rules.clear();
        prune_missing_references(
            &mut definition.schema,
            &self.missing,
            &mut ConstraintFlags::default(),
        );
        prune_schema_taxonomies(&mut definition.schema, self.catalog);
        lookup_extensions(&mut definition.schema, self.maps, self.preserve_shape);
        definition
    }

    /// Pushes the restored form of `original`.
    ///
    /// # Errors
    ///
    /// Returns the repository error if the update is rejected.
    pub async fn restore(
        &self,
        repository: &dyn ContentRepository,
        original: &ContentTypeDefinition,
    ) -> Result<ContentTypeDefinition, RepositoryError> {
        let definition = self.restored(original);
        debug!(content_type = %definition.uid, "restoring content type schema");
        repository.update_content_type(&definition).await
    }
}
