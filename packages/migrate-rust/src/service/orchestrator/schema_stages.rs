use std::collections::BTreeMap;

use contentshift_core::{ConstraintFlags, ContentTypeDefinition, EntityKind};
use tracing::{debug, info, warn};

use super::{LocaleEntryOrchestrator, RunPlan};
use crate::error::MigrationError;
use crate::resolve::{lookup_extensions, prune_schema_taxonomies, rewrite_field_rules};
use crate::schema::{global_fields_needing_repair, relax_with_verification, SchemaRestorer};
use crate::service::batch::{BatchItem, BatchJob};
use crate::service::stage::Stage;
use crate::storage::LedgerEntry;

impl LocaleEntryOrchestrator {
    /// CT_PREPARATION: relax every content type so records can be created
    /// before their link targets exist.
    pub(super) async fn prepare_content_types(&self, plan: &RunPlan) -> Result<(), MigrationError> {
        let job = BatchJob::new("ct preparation", plan.content_types.clone());
        let summary = self.scheduler.run(job, |item| self.prepare_one(item)).await;
        info!(
            content_types = summary.invoked,
            altered = self.ctx.altered.len(),
            failed = summary.failed,
            "content types prepared"
        );
        Ok(())
    }

    async fn prepare_one(&self, item: BatchItem<ContentTypeDefinition>) -> anyhow::Result<()> {
        let original = item.item;
        let uid = original.uid.clone();
        self.ctx
            .record_pending_global_fields(global_fields_needing_repair(&original.schema));

        let mut relaxed = original.clone();
        let mut flags = ConstraintFlags::default();
        if let Err(err) = relax_with_verification(
            &mut relaxed.schema,
            &mut flags,
            self.repository.as_ref(),
            &self.ctx.presence,
        )
        .await
        {
            self.ctx.ledgers.content_types.failure(
                LedgerEntry::content_type(Stage::CtPreparation, &uid).with_error(&err),
            );
            return Err(err.into());
        }
        self.ctx.flags.insert(uid.clone(), flags);
        if !flags.suppressed {
            debug!(content_type = %uid, "no constraints to relax");
            return Ok(());
        }

        relaxed.field_rules.clear();
        prune_schema_taxonomies(&mut relaxed.schema, &self.ctx.taxonomies);
        lookup_extensions(
            &mut relaxed.schema,
            &self.ctx.identities,
            self.ctx.config().preserve_stack_version,
        );
        match self.repository.update_content_type(&relaxed).await {
            Ok(_) => {
                debug!(content_type = %uid, "content type relaxed");
                self.ctx.altered.insert(uid.clone(), original);
                self.ctx
                    .ledgers
                    .content_types
                    .success(LedgerEntry::content_type(Stage::CtPreparation, &uid));
                Ok(())
            }
            Err(err) => {
                self.ctx.ledgers.content_types.failure(
                    LedgerEntry::content_type(Stage::CtPreparation, &uid).with_error(&err),
                );
                Err(err.into())
            }
        }
    }

    fn restorer(&self) -> SchemaRestorer<'_> {
        SchemaRestorer::new(
            &self.ctx.identities,
            &self.ctx.taxonomies,
            self.ctx.presence.missing(),
            self.ctx.config().preserve_stack_version,
        )
    }

    /// CT_RESTORATION: push the original constraints back onto every
    /// content type relaxed during preparation.
    pub(super) async fn restore_content_types(&self) -> Result<(), MigrationError> {
        let originals: BTreeMap<String, ContentTypeDefinition> = self
            .ctx
            .altered
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        if originals.is_empty() {
            return Ok(());
        }
        let restorer = &self.restorer();
        let job = BatchJob::new("ct restoration", originals.into_values().collect());
        self.scheduler
            .run(job, move |item| async move {
                let original = item.item;
                let row = LedgerEntry::content_type(Stage::CtRestoration, &original.uid);
                match restorer.restore(self.repository.as_ref(), &original).await {
                    Ok(_) => {
                        self.ctx.ledgers.content_types.success(row);
                        Ok(())
                    }
                    Err(err) => {
                        self.ctx.ledgers.content_types.failure(row.with_error(&err));
                        Err(err)
                    }
                }
            })
            .await;
        Ok(())
    }

    /// FIELD_RULES_UPDATE: push field rules with record identifiers mapped.
    ///
    /// Content types relaxed during preparation had their rules cleared, so
    /// their rules are pushed even when none conditions on a reference.
    pub(super) async fn update_field_rules(&self, plan: &RunPlan) -> Result<(), MigrationError> {
        let restorer = self.restorer();
        let entries = self.ctx.identities.map(EntityKind::Entries);
        let mut updates = Vec::new();
        for original in &plan.content_types {
            if original.field_rules.is_empty() {
                continue;
            }
            let mut definition = restorer.restored(original);
            let rewrite = rewrite_field_rules(&original.field_rules, &definition.schema, entries);
            let altered = self.ctx.altered.contains_key(&original.uid);
            if !rewrite.touches_references && !altered {
                continue;
            }
            if rewrite.dropped > 0 {
                warn!(
                    content_type = %original.uid,
                    dropped = rewrite.dropped,
                    "field rules dropped"
                );
            }
            definition.field_rules = rewrite.rules;
            updates.push(definition);
        }
        if updates.is_empty() {
            return Ok(());
        }

        let job = BatchJob::new("field rules update", updates);
        self.scheduler
            .run(job, move |item| async move {
                let definition = item.item;
                let row = LedgerEntry::content_type(Stage::FieldRulesUpdate, &definition.uid);
                match self.repository.update_content_type(&definition).await {
                    Ok(_) => {
                        self.ctx.ledgers.content_types.success(row);
                        Ok(())
                    }
                    Err(err) => {
                        self.ctx.ledgers.content_types.failure(row.with_error(&err));
                        Err(err)
                    }
                }
            })
            .await;
        Ok(())
    }
}
