//! Shared state of one migration run.
//!
//! [`MigrationContext`] owns every identity map, ledger and cache the
//! stages read and write. Components receive it by reference; nothing is
//! held in ambient global state.

use std::collections::BTreeSet;
use std::sync::Arc;

use contentshift_core::{AutoCreatedRecord, ConstraintFlags, ContentTypeDefinition, VariantEntry};
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::config::MigrationConfig;
use super::stage::{Progress, ProgressTracker};
use crate::resolve::TaxonomyCatalog;
use crate::schema::ContentTypePresence;
use crate::storage::{paths, CheckpointStore, IdentityMapStore, RunLedgers};

/// Everything a run accumulates, plus its configuration.
#[derive(Debug)]
pub struct MigrationContext {
    config: Arc<MigrationConfig>,
    checkpoint: Option<CheckpointStore>,
    /// Old-id to new-id tables.
    pub identities: IdentityMapStore,
    /// Success/failure rows and bookkeeping lists.
    pub ledgers: RunLedgers,
    /// Relaxation outcome per content type.
    pub flags: DashMap<String, ConstraintFlags>,
    /// Pre-relaxation definitions of content types altered on the target.
    pub altered: DashMap<String, ContentTypeDefinition>,
    /// Which referenced content types exist on the target.
    pub presence: ContentTypePresence,
    /// Authoritative taxonomies and terms of the target.
    pub taxonomies: TaxonomyCatalog,
    progress: ProgressTracker,
    auto_created_write: Mutex<()>,
}

impl MigrationContext {
    /// Loads identity maps, ledgers and the taxonomy catalog from the
    /// checkpoint tree under `config.checkpoint_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if a checkpoint file exists but cannot be parsed.
    pub async fn load(config: Arc<MigrationConfig>) -> anyhow::Result<Self> {
        let checkpoint = CheckpointStore::new(config.checkpoint_dir.clone());
        let identities = IdentityMapStore::load(checkpoint.clone()).await?;
        let ledgers = RunLedgers::load(&checkpoint).await?;
        let taxonomies = TaxonomyCatalog::load(&checkpoint).await?;
        Ok(Self {
            checkpoint: Some(checkpoint),
            identities,
            ledgers,
            taxonomies,
            ..Self::in_memory(config)
        })
    }

    /// Creates an empty context that never touches disk.
    #[must_use]
    pub fn in_memory(config: Arc<MigrationConfig>) -> Self {
        Self {
            config,
            checkpoint: None,
            identities: IdentityMapStore::in_memory(),
            ledgers: RunLedgers::default(),
            flags: DashMap::new(),
            altered: DashMap::new(),
            presence: ContentTypePresence::new(),
            taxonomies: TaxonomyCatalog::new(),
            progress: ProgressTracker::new(),
            auto_created_write: Mutex::new(()),
        }
    }

    /// Replaces the taxonomy catalog.
    #[must_use]
    pub fn with_taxonomies(mut self, taxonomies: TaxonomyCatalog) -> Self {
        self.taxonomies = taxonomies;
        self
    }

    /// Run configuration.
    #[must_use]
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Checkpoint store, when the context persists.
    #[must_use]
    pub fn checkpoint(&self) -> Option<&CheckpointStore> {
        self.checkpoint.as_ref()
    }

    /// Current progress of the run.
    #[must_use]
    pub fn stage(&self) -> Progress {
        self.progress.get()
    }

    pub(crate) fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Relaxation flags of a content type; default when it was never relaxed.
    #[must_use]
    pub fn flags_of(&self, content_type: &str) -> ConstraintFlags {
        self.flags
            .get(content_type)
            .map(|flags| *flags)
            .unwrap_or_default()
    }

    /// Records an incidental default-locale record and persists the whole
    /// list right away, so cleanup can revisit it after a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be written.
    pub async fn record_auto_created(&self, record: AutoCreatedRecord) -> anyhow::Result<()> {
        let _guard = self.auto_created_write.lock().await;
        let all = self.ledgers.push_auto_created(record);
        match &self.checkpoint {
            Some(checkpoint) => checkpoint.write_json(paths::AUTO_CREATED, &all).await,
            None => Ok(()),
        }
    }

    /// Rewrites the persisted auto-created list with what remains in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be written.
    pub async fn persist_auto_created(&self) -> anyhow::Result<()> {
        let _guard = self.auto_created_write.lock().await;
        let all = self.ledgers.auto_created.lock().clone();
        match &self.checkpoint {
            Some(checkpoint) => checkpoint.write_json(paths::AUTO_CREATED, &all).await,
            None => Ok(()),
        }
    }

    /// Appends a row for the variant-entry collaborator.
    pub fn record_variant(&self, content_type: &str, locale: &str, entry_uid: &str) {
        self.ledgers.variant_entries.lock().push(VariantEntry {
            content_type: content_type.to_string(),
            locale: locale.to_string(),
            entry_uid: entry_uid.to_string(),
        });
    }

    /// Notes record identifiers left unresolved by the repair pass.
    pub fn record_unmapped(&self, uids: impl IntoIterator<Item = String>) {
        self.ledgers.unmapped_uids.lock().extend(uids);
    }

    /// Notes global fields needing the deferred repair pass.
    pub fn record_pending_global_fields(&self, uids: BTreeSet<String>) {
        self.ledgers.pending_global_fields.lock().extend(uids);
    }

    /// Writes the queued replacements to the checkpoint tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn persist_existing(&self) -> anyhow::Result<()> {
        let Some(checkpoint) = &self.checkpoint else {
            return Ok(());
        };
        let existing = self.ledgers.existing.lock().clone();
        checkpoint.write_json(paths::EXISTING, &existing).await
    }

    /// Writes the variant bookkeeping if anything was recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn persist_variants(&self) -> anyhow::Result<()> {
        let Some(checkpoint) = &self.checkpoint else {
            return Ok(());
        };
        let variants = self.ledgers.variant_entries.lock().clone();
        if variants.is_empty() {
            return Ok(());
        }
        checkpoint.write_json(paths::VARIANT_ENTRIES, &variants).await
    }

    /// Writes every ledger to the checkpoint tree.
    ///
    /// # Errors
    ///
    /// Returns the first write failure.
    pub async fn flush(&self) -> anyhow::Result<()> {
        match &self.checkpoint {
            Some(checkpoint) => self.ledgers.flush(checkpoint).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use contentshift_core::EntityKind;

    use super::*;

    fn config(dir: &std::path::Path) -> Arc<MigrationConfig> {
        Arc::new(MigrationConfig {
            checkpoint_dir: dir.to_path_buf(),
            ..MigrationConfig::default()
        })
    }

    fn auto_created(uid: &str) -> AutoCreatedRecord {
        AutoCreatedRecord {
            content_type: "page".into(),
            locale: "en-us".into(),
            entry_uid: uid.into(),
            localized_locale: "fr-fr".into(),
            source_uid: format!("src-{uid}"),
        }
    }

    #[tokio::test]
    async fn auto_created_records_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = MigrationContext::load(config(dir.path())).await.unwrap();
        ctx.record_auto_created(auto_created("n1")).await.unwrap();
        ctx.record_auto_created(auto_created("n2")).await.unwrap();
        drop(ctx);

        let restarted = MigrationContext::load(config(dir.path())).await.unwrap();
        let pending = restarted.ledgers.auto_created.lock().clone();
        assert_eq!(pending, vec![auto_created("n1"), auto_created("n2")]);
    }

    #[tokio::test]
    async fn identity_maps_and_taxonomies_load_from_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointStore::new(dir.path());
        checkpoint
            .write_json(
                paths::TAXONOMY_TERMS,
                &serde_json::json!({ "colors": { "red": {} } }),
            )
            .await
            .unwrap();
        {
            let ctx = MigrationContext::load(config(dir.path())).await.unwrap();
            ctx.identities
                .record(EntityKind::Entries, "e1", "n1")
                .await
                .unwrap();
        }

        let ctx = MigrationContext::load(config(dir.path())).await.unwrap();
        assert_eq!(
            ctx.identities.resolve(EntityKind::Entries, "e1").as_deref(),
            Some("n1")
        );
        assert!(ctx.taxonomies.has_term("colors", "red"));
    }

    #[tokio::test]
    async fn variants_are_written_only_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = MigrationContext::load(config(dir.path())).await.unwrap();
        ctx.persist_variants().await.unwrap();
        assert!(!dir.path().join(paths::VARIANT_ENTRIES).exists());

        ctx.record_variant("page", "en-us", "e1");
        ctx.persist_variants().await.unwrap();
        assert!(dir.path().join(paths::VARIANT_ENTRIES).exists());
    }

    #[test]
    fn unrelaxed_content_type_has_default_flags() {
        let ctx = MigrationContext::in_memory(Arc::new(MigrationConfig::default()));
        assert_eq!(ctx.flags_of("page"), ConstraintFlags::default());
        assert_eq!(ctx.stage(), Progress::Pending);
    }
}
