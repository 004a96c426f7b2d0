use contentshift_core::AutoCreatedRecord;
use tracing::{debug, info, warn};

use super::{Counter, LocaleEntryOrchestrator};
use crate::error::MigrationError;
use crate::service::batch::{BatchItem, BatchJob};
use crate::service::stage::Stage;
use crate::storage::LedgerEntry;

impl LocaleEntryOrchestrator {
    /// CLEANUP: delete incidental master-locale records whose localized
    /// counterpart succeeded, then write the bookkeeping files.
    ///
    /// A record whose localization failed anywhere in the run is kept, and
    /// stays in the persisted list for a later run.
    pub(super) async fn cleanup(&self) -> Result<(), MigrationError> {
        let pending = self.ctx.ledgers.take_auto_created();
        if !pending.is_empty() {
            let job = BatchJob::new("cleanup", pending);
            self.scheduler.run(job, |item| self.cleanup_one(item)).await;
            let retained = self.ctx.ledgers.auto_created.lock().len();
            if retained > 0 {
                info!(retained, "auto-created records kept after failed localization");
            }
        }
        self.ctx
            .persist_auto_created()
            .await
            .map_err(MigrationError::Checkpoint)?;
        self.ctx
            .persist_variants()
            .await
            .map_err(MigrationError::Checkpoint)
    }

    async fn cleanup_one(&self, item: BatchItem<AutoCreatedRecord>) -> anyhow::Result<()> {
        let record = item.item;
        let failures = &self.ctx.ledgers.entries;
        let localization_failed = failures.has_failure(
            &record.content_type,
            &record.localized_locale,
            &record.source_uid,
        ) || failures.has_failure(
            &record.content_type,
            &record.localized_locale,
            &record.entry_uid,
        );
        if localization_failed {
            warn!(
                content_type = %record.content_type,
                uid = %record.entry_uid,
                locale = %record.localized_locale,
                "localization failed, auto-created record kept"
            );
            self.ctx.ledgers.auto_created.lock().push(record);
            return Ok(());
        }

        match self
            .repository
            .delete_entry(&record.content_type, &record.locale, &record.entry_uid)
            .await
        {
            Ok(()) => {
                debug!(content_type = %record.content_type, uid = %record.entry_uid, "auto-created record removed");
                self.counters.bump(Counter::AutoCreatedRemoved);
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                debug!(content_type = %record.content_type, uid = %record.entry_uid, "auto-created record already gone");
                Ok(())
            }
            Err(err) => {
                self.ctx.ledgers.entries.failure(
                    LedgerEntry::record(
                        Stage::Cleanup,
                        &record.content_type,
                        &record.locale,
                        &record.source_uid,
                    )
                    .with_new_uid(record.entry_uid.as_str())
                    .with_error(&err),
                );
                self.ctx.ledgers.auto_created.lock().push(record);
                Err(err.into())
            }
        }
    }
}
