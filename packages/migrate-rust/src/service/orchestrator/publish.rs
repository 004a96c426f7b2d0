use std::collections::{BTreeSet, HashMap};

use contentshift_core::{record_title, record_uid, EntityKind, RecordPayload};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Counter, LocaleEntryOrchestrator, RunPlan};
use crate::error::MigrationError;
use crate::service::batch::{BatchItem, BatchJob};
use crate::service::stage::Stage;
use crate::storage::LedgerEntry;

/// `(environment uid, locale)` pairs listed in a record's publish metadata.
fn publish_targets(record: &RecordPayload) -> BTreeSet<(String, String)> {
    let details = match record.get("publish_details") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => Vec::new(),
    };
    details
        .into_iter()
        .filter_map(|detail| {
            let environment = detail.get("environment")?.as_str()?;
            let locale = detail.get("locale")?.as_str()?;
            Some((environment.to_string(), locale.to_string()))
        })
        .collect()
}

impl LocaleEntryOrchestrator {
    /// ENTRIES_PUBLISH: republish records where the snapshot says they were
    /// published, one call per environment and locale.
    pub(super) async fn publish_entries(&self, plan: &RunPlan) -> Result<(), MigrationError> {
        let environments = self
            .snapshot
            .environments()
            .await
            .map_err(|err| MigrationError::fatal_io(Stage::EntriesPublish, None, None, err))?;
        for definition in &plan.content_types {
            let ct = definition.uid.as_str();
            for locale in &plan.locales {
                for page in self.pages(Stage::EntriesPublish, ct, locale).await? {
                    let records = self.page(Stage::EntriesPublish, ct, locale, &page).await?;
                    let job = BatchJob::new(format!("publish {ct}/{locale}/{page}"), records);
                    self.scheduler
                        .run(job, |item| self.publish_one(ct, locale, &environments, item))
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn publish_one(
        &self,
        ct: &str,
        locale: &str,
        environments: &HashMap<String, String>,
        item: BatchItem<RecordPayload>,
    ) -> anyhow::Result<()> {
        let record = &item.item;
        let Some(old_uid) = record_uid(record) else {
            return Ok(());
        };
        let targets = publish_targets(record);
        if targets.is_empty() {
            return Ok(());
        }
        let Some(new_uid) = self.ctx.identities.resolve(EntityKind::Entries, old_uid) else {
            debug!(content_type = ct, locale, uid = old_uid, "unmapped record not published");
            return Ok(());
        };

        let mut failed = 0;
        for (environment_uid, target_locale) in targets {
            let Some(environment) = environments.get(&environment_uid) else {
                warn!(environment = %environment_uid, uid = old_uid, "unknown environment, publish skipped");
                continue;
            };
            let row = LedgerEntry::record(Stage::EntriesPublish, ct, &target_locale, old_uid)
                .with_title(record_title(record))
                .with_new_uid(new_uid.as_str());
            match self
                .repository
                .publish_entry(
                    ct,
                    &new_uid,
                    std::slice::from_ref(environment),
                    std::slice::from_ref(&target_locale),
                )
                .await
            {
                Ok(()) => {
                    debug!(content_type = ct, uid = old_uid, environment = %environment, locale = %target_locale, "record published");
                    self.counters.bump(Counter::Published);
                }
                Err(err) => {
                    failed += 1;
                    self.counters.bump(Counter::Failed);
                    self.ctx.ledgers.entries.failure(row.with_error(&err));
                }
            }
        }
        if failed > 0 {
            anyhow::bail!("{failed} publish call(s) of {ct}/{old_uid} failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn publish_targets_accept_lists_and_single_objects() {
        let listed: RecordPayload = serde_json::from_value(json!({
            "publish_details": [
                { "environment": "env1", "locale": "en-us", "version": 2 },
                { "environment": "env1", "locale": "en-us" },
                { "environment": "env2" }
            ]
        }))
        .unwrap();
        assert_eq!(
            publish_targets(&listed),
            BTreeSet::from([("env1".to_string(), "en-us".to_string())])
        );

        let single: RecordPayload = serde_json::from_value(json!({
            "publish_details": { "environment": "env3", "locale": "fr-fr" }
        }))
        .unwrap();
        assert_eq!(publish_targets(&single).len(), 1);
        assert!(publish_targets(&RecordPayload::new()).is_empty());
    }
}
