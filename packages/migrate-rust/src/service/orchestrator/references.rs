use contentshift_core::{record_title, record_uid, ContentTypeDefinition, EntityKind, RecordPayload};
use tracing::{debug, info};

use super::{Counter, LocaleEntryOrchestrator, RunPlan};
use crate::error::MigrationError;
use crate::resolve::{serialize_record, UnresolvedLinks};
use crate::service::batch::{BatchItem, BatchJob};
use crate::service::stage::Stage;
use crate::storage::LedgerEntry;

impl LocaleEntryOrchestrator {
    /// REFERENCE_UPDATES: rewrite record links of reference-bearing content
    /// types now that every record has a mapping.
    pub(super) async fn update_references(&self, plan: &RunPlan) -> Result<(), MigrationError> {
        for definition in &plan.content_types {
            if !self.ctx.flags_of(&definition.uid).needs_reference_repair() {
                debug!(content_type = %definition.uid, "no record links, repair skipped");
                continue;
            }
            for locale in &plan.locales {
                for page in self
                    .pages(Stage::ReferenceUpdates, &definition.uid, locale)
                    .await?
                {
                    let records = self
                        .page(Stage::ReferenceUpdates, &definition.uid, locale, &page)
                        .await?;
                    let job = BatchJob::new(format!("references {}/{locale}/{page}", definition.uid), records);
                    self.scheduler
                        .run(job, |item| self.repair_one(definition, locale, item))
                        .await;
                }
            }
        }
        let unmapped = self.ctx.ledgers.unmapped_uids.lock().len();
        if unmapped > 0 {
            info!(unmapped, "record links left unresolved");
        }
        Ok(())
    }

    async fn repair_one(
        &self,
        definition: &ContentTypeDefinition,
        locale: &str,
        item: BatchItem<RecordPayload>,
    ) -> anyhow::Result<()> {
        let ct = definition.uid.as_str();
        let record = &item.item;
        let Some(old_uid) = record_uid(record) else {
            return Ok(());
        };
        let Some(new_uid) = self.ctx.identities.resolve(EntityKind::Entries, old_uid) else {
            debug!(content_type = ct, locale, uid = old_uid, "record was never created, repair skipped");
            return Ok(());
        };

        let serialized = serialize_record(
            record,
            &definition.schema,
            &self.ctx.identities,
            &self.ctx.taxonomies,
            UnresolvedLinks::Keep,
        );
        self.ctx.record_unmapped(serialized.unresolved);
        let row = LedgerEntry::record(Stage::ReferenceUpdates, ct, locale, old_uid)
            .with_title(record_title(record))
            .with_new_uid(new_uid.as_str());

        match self
            .repository
            .update_entry(ct, locale, &new_uid, &serialized.payload)
            .await
        {
            Ok(_) => {
                self.counters.bump(Counter::Updated);
                self.ctx.ledgers.entries.success(row);
                Ok(())
            }
            Err(err) => {
                self.counters.bump(Counter::Failed);
                self.ctx.ledgers.entries.failure(row.with_error(&err));
                Err(err.into())
            }
        }
    }
}
