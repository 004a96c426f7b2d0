use anyhow::anyhow;
use contentshift_core::{
    record_title, record_uid, AutoCreatedRecord, ContentTypeDefinition, EntityKind, RecordPayload,
};
use tracing::{debug, info, warn};

use super::{Counter, LocaleEntryOrchestrator, RunPlan};
use crate::error::MigrationError;
use crate::resolve::{serialize_record, UnresolvedLinks};
use crate::service::batch::{BatchItem, BatchJob};
use crate::service::stage::Stage;
use crate::storage::{ExistingRecord, LedgerEntry};

impl LocaleEntryOrchestrator {
    /// ENTRIES_CREATE: every content type, master locale first, page by page.
    pub(super) async fn create_entries(&self, plan: &RunPlan) -> Result<(), MigrationError> {
        for definition in &plan.content_types {
            for locale in &plan.locales {
                for page in self.pages(Stage::EntriesCreate, &definition.uid, locale).await? {
                    let records = self
                        .page(Stage::EntriesCreate, &definition.uid, locale, &page)
                        .await?;
                    let job = BatchJob::new(format!("create {}/{locale}/{page}", definition.uid), records);
                    self.scheduler
                        .run(job, |item| self.create_one(definition, locale, item))
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn create_one(
        &self,
        definition: &ContentTypeDefinition,
        locale: &str,
        item: BatchItem<RecordPayload>,
    ) -> anyhow::Result<()> {
        let outcome = self.create_record(definition, locale, &item.item).await;
        if item.is_last_request {
            if let Err(err) = self.ctx.persist_existing().await {
                warn!(error = %err, "queued replacements could not be persisted");
            }
        }
        outcome
    }

    async fn create_record(
        &self,
        definition: &ContentTypeDefinition,
        locale: &str,
        record: &RecordPayload,
    ) -> anyhow::Result<()> {
        let ct = definition.uid.as_str();
        let Some(old_uid) = record_uid(record) else {
            self.counters.bump(Counter::Failed);
            self.ctx.ledgers.entries.failure(
                LedgerEntry::record(Stage::EntriesCreate, ct, locale, "")
                    .with_title(record_title(record))
                    .with_error("record has no uid"),
            );
            return Err(anyhow!("record of {ct}/{locale} has no uid"));
        };
        let serialized = serialize_record(
            record,
            &definition.schema,
            &self.ctx.identities,
            &self.ctx.taxonomies,
            UnresolvedLinks::Strip,
        );
        let row = LedgerEntry::record(Stage::EntriesCreate, ct, locale, old_uid)
            .with_title(record_title(record));

        if let Some(new_uid) = self.ctx.identities.resolve(EntityKind::Entries, old_uid) {
            return match self
                .repository
                .update_entry(ct, locale, &new_uid, &serialized.payload)
                .await
            {
                Ok(_) => {
                    debug!(content_type = ct, locale, uid = old_uid, "record localized");
                    self.counters.bump(Counter::Updated);
                    self.ctx.ledgers.entries.success(row.with_new_uid(new_uid));
                    Ok(())
                }
                Err(err) => {
                    self.counters.bump(Counter::Failed);
                    self.ctx
                        .ledgers
                        .entries
                        .failure(row.with_new_uid(new_uid).with_error(&err));
                    Err(err.into())
                }
            };
        }

        match self
            .repository
            .create_entry(ct, locale, &serialized.payload)
            .await
        {
            Ok(created) => {
                let new_uid = record_uid(&created)
                    .ok_or_else(|| anyhow!("created record of {ct}/{locale} carries no uid"))?
                    .to_string();
                if let Err(err) = self
                    .ctx
                    .identities
                    .record(EntityKind::Entries, old_uid, &new_uid)
                    .await
                {
                    warn!(error = %err, "record mapping could not be persisted");
                }
                let master = &self.ctx.config().master_locale;
                if locale != master.as_str() {
                    let counterpart = AutoCreatedRecord {
                        content_type: ct.to_string(),
                        locale: master.clone(),
                        entry_uid: new_uid.clone(),
                        localized_locale: locale.to_string(),
                        source_uid: old_uid.to_string(),
                    };
                    if let Err(err) = self.ctx.record_auto_created(counterpart).await {
                        warn!(error = %err, "auto-created record could not be persisted");
                    }
                }
                self.ctx.record_variant(ct, locale, old_uid);
                debug!(content_type = ct, locale, uid = old_uid, new_uid = %new_uid, "record created");
                self.counters.bump(Counter::Created);
                self.ctx.ledgers.entries.success(row.with_new_uid(new_uid));
                Ok(())
            }
            Err(err) if err.is_already_exists() => {
                if self.ctx.config().replace_existing {
                    info!(content_type = ct, locale, uid = old_uid, "record exists, queued for replacement");
                    self.ctx.ledgers.existing.lock().push(ExistingRecord {
                        content_type: ct.to_string(),
                        locale: locale.to_string(),
                        source_uid: old_uid.to_string(),
                        title: record_title(record).unwrap_or_default().to_string(),
                        payload: serialized.payload,
                    });
                } else {
                    info!(content_type = ct, locale, uid = old_uid, "record exists, skipped");
                }
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
