use anyhow::anyhow;
use contentshift_core::{record_uid, EntityKind};
use tracing::{debug, warn};

use super::{Counter, LocaleEntryOrchestrator};
use crate::error::MigrationError;
use crate::service::batch::{BatchItem, BatchJob};
use crate::service::stage::Stage;
use crate::storage::{ExistingRecord, LedgerEntry};

/// Remote metadata an in-place replacement must not overwrite.
const PRESERVED_KEYS: &[&str] = &["uid", "_version", "url"];

impl LocaleEntryOrchestrator {
    /// ENTRIES_REPLACE_EXISTING: overwrite remote records that blocked a create.
    pub(super) async fn replace_existing(&self) -> Result<(), MigrationError> {
        let queued = self.ctx.ledgers.take_existing();
        if queued.is_empty() {
            return Ok(());
        }
        let job = BatchJob::new("replace existing", queued);
        self.scheduler
            .run(job, |item| self.replace_one(item))
            .await;
        self.ctx
            .persist_existing()
            .await
            .map_err(MigrationError::Checkpoint)
    }

    async fn replace_one(&self, item: BatchItem<ExistingRecord>) -> anyhow::Result<()> {
        let queued = item.item;
        let ct = queued.content_type.as_str();
        let locale = queued.locale.as_str();
        let row = LedgerEntry::record(Stage::EntriesReplaceExisting, ct, locale, &queued.source_uid)
            .with_title(Some(&queued.title));

        let found = self
            .repository
            .find_entries_by_title(ct, locale, &queued.title)
            .await;
        let mut merged = match found {
            Ok(matches) => match matches.into_iter().next() {
                Some(existing) => existing,
                None => {
                    self.counters.bump(Counter::Failed);
                    self.ctx
                        .ledgers
                        .entries
                        .failure(row.with_error("no remote record with this title"));
                    return Err(anyhow!("no {ct}/{locale} record titled {}", queued.title));
                }
            },
            Err(err) => {
                self.counters.bump(Counter::Failed);
                self.ctx.ledgers.entries.failure(row.with_error(&err));
                return Err(err.into());
            }
        };
        let existing_uid = record_uid(&merged)
            .ok_or_else(|| anyhow!("remote {ct}/{locale} record carries no uid"))?
            .to_string();
        for (key, value) in queued.payload {
            if !PRESERVED_KEYS.contains(&key.as_str()) {
                merged.insert(key, value);
            }
        }

        match self
            .repository
            .update_entry(ct, locale, &existing_uid, &merged)
            .await
        {
            Ok(_) => {
                if let Err(err) = self
                    .ctx
                    .identities
                    .record(EntityKind::Entries, queued.source_uid.as_str(), existing_uid.as_str())
                    .await
                {
                    warn!(error = %err, "record mapping could not be persisted");
                }
                debug!(content_type = ct, locale, uid = %queued.source_uid, "existing record replaced");
                self.counters.bump(Counter::Updated);
                self.ctx.ledgers.entries.success(row.with_new_uid(existing_uid));
                Ok(())
            }
            Err(err) => {
                self.counters.bump(Counter::Failed);
                self.ctx
                    .ledgers
                    .entries
                    .failure(row.with_new_uid(existing_uid).with_error(&err));
                Err(err.into())
            }
        }
    }
}
