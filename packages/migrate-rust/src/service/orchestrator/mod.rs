//! Stage-ordered migration of content types and records.
//!
//! [`LocaleEntryOrchestrator::run`] drives the stages of [`Stage::ORDER`]
//! one after another. Each stage feeds its work through the
//! [`BatchScheduler`]; record-level failures land in the ledgers, while a
//! snapshot that cannot be read aborts the run with
//! [`MigrationError::FatalIo`].

mod cleanup;
mod create;
mod publish;
mod references;
mod replace;
mod schema_stages;


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use contentshift_core::{master_first, ContentTypeDefinition, RecordPayload};
use tracing::{info, info_span, warn, Instrument};

use super::batch::BatchScheduler;
use super::context::MigrationContext;
use super::stage::Stage;
use crate::error::MigrationError;
use crate::traits::{ContentRepository, SnapshotSource};

/// Outcome counts of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Stages that ran, in order.
    pub stages: Vec<Stage>,
    pub records_created: usize,
    pub records_updated: usize,
    pub records_failed: usize,
    pub records_published: usize,
    pub auto_created_removed: usize,
    pub content_types_failed: usize,
}

#[derive(Debug, Clone, Copy)]
enum Counter {
    Created,
    Updated,
    Failed,
    Published,
    AutoCreatedRemoved,
}

impl Counter {
    fn metric_name(self) -> &'static str {
        match self {
            Self::Created => "contentshift_records_created_total",
            Self::Updated => "contentshift_records_updated_total",
            Self::Failed => "contentshift_records_failed_total",
            Self::Published => "contentshift_records_published_total",
            Self::AutoCreatedRemoved => "contentshift_auto_created_removed_total",
        }
    }
}

#[derive(Debug, Default)]
struct RunCounters {
    created: AtomicUsize,
    updated: AtomicUsize,
    failed: AtomicUsize,
    published: AtomicUsize,
    auto_created_removed: AtomicUsize,
}

impl RunCounters {
    fn bump(&self, counter: Counter) {
        let slot = match counter {
            Counter::Created => &self.created,
            Counter::Updated => &self.updated,
            Counter::Failed => &self.failed,
            Counter::Published => &self.published,
            Counter::AutoCreatedRemoved => &self.auto_created_removed,
        };
        slot.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(counter.metric_name()).increment(1);
    }
}

/// Content types and locales a run works through.
#[derive(Debug, Clone)]
struct RunPlan {
    content_types: Vec<ContentTypeDefinition>,
    /// Master locale first, then every snapshot locale the target knows.
    locales: Vec<String>,
}

/// Migrates a snapshot into a target repository.
pub struct LocaleEntryOrchestrator {
    ctx: Arc<MigrationContext>,
    repository: Arc<dyn ContentRepository>,
    snapshot: Arc<dyn SnapshotSource>,
    scheduler: BatchScheduler,
    counters: RunCounters,
}

impl std::fmt::Debug for LocaleEntryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocaleEntryOrchestrator")
            .field("scheduler", &self.scheduler)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl LocaleEntryOrchestrator {
    /// Creates an orchestrator whose scheduler follows the context's config.
    #[must_use]
    pub fn new(
        ctx: Arc<MigrationContext>,
        repository: Arc<dyn ContentRepository>,
        snapshot: Arc<dyn SnapshotSource>,
    ) -> Self {
        let scheduler = BatchScheduler::from_config(ctx.config());
        Self {
            ctx,
            repository,
            snapshot,
            scheduler,
            counters: RunCounters::default(),
        }
    }

    /// Replaces the batch scheduler.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: BatchScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Shared run state.
    #[must_use]
    pub fn context(&self) -> &Arc<MigrationContext> {
        &self.ctx
    }

    /// Runs every enabled stage in order.
    ///
    /// On a fatal error progress moves to `Failed` and the ledgers gathered
    /// so far are still flushed before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::FatalIo`] when the snapshot cannot be read
    /// and [`MigrationError::Checkpoint`] when ledgers cannot be persisted.
    pub async fn run(&self) -> Result<RunReport, MigrationError> {
        let progress = self.ctx.progress();
        progress.enter(Stage::CtPreparation);
        let plan = match self.plan().await {
            Ok(plan) => plan,
            Err(err) => return Err(self.abort(err).await),
        };
        info!(
            content_types = plan.content_types.len(),
            locales = plan.locales.len(),
            "migration started"
        );

        let mut report = RunReport::default();
        for stage in Stage::ORDER {
            if !stage.is_enabled(self.ctx.config()) {
                info!(%stage, "stage disabled");
                continue;
            }
            progress.enter(stage);
            let span = info_span!("stage", stage = %stage);
            let outcome = async {
                info!("stage started");
                self.run_stage(stage, &plan).await?;
                self.ctx.flush().await.map_err(MigrationError::Checkpoint)?;
                info!("stage complete");
                Ok::<(), MigrationError>(())
            }
            .instrument(span)
            .await;
            if let Err(err) = outcome {
                return Err(self.abort(err).await);
            }
            report.stages.push(stage);
        }

        progress.complete();
        report.records_created = self.counters.created.load(Ordering::Relaxed);
        report.records_updated = self.counters.updated.load(Ordering::Relaxed);
        report.records_failed = self.counters.failed.load(Ordering::Relaxed);
        report.records_published = self.counters.published.load(Ordering::Relaxed);
        report.auto_created_removed = self.counters.auto_created_removed.load(Ordering::Relaxed);
        report.content_types_failed = self.ctx.ledgers.content_types.failure_count();
        info!(
            created = report.records_created,
            failed = report.records_failed,
            "migration complete"
        );
        Ok(report)
    }

    async fn run_stage(&self, stage: Stage, plan: &RunPlan) -> Result<(), MigrationError> {
        match stage {
            Stage::CtPreparation => self.prepare_content_types(plan).await,
            Stage::EntriesCreate => self.create_entries(plan).await,
            Stage::EntriesReplaceExisting => self.replace_existing().await,
            Stage::ReferenceUpdates => self.update_references(plan).await,
            Stage::CtRestoration => self.restore_content_types().await,
            Stage::FieldRulesUpdate => self.update_field_rules(plan).await,
            Stage::EntriesPublish => self.publish_entries(plan).await,
            Stage::Cleanup => self.cleanup().await,
        }
    }

    async fn abort(&self, err: MigrationError) -> MigrationError {
        self.ctx.progress().fail();
        warn!(error = %err, "migration aborted");
        if let Err(flush_err) = self.ctx.flush().await {
            warn!(error = %flush_err, "ledgers could not be flushed after abort");
        }
        err
    }

    async fn plan(&self) -> Result<RunPlan, MigrationError> {
        let fatal = |err| MigrationError::fatal_io(Stage::CtPreparation, None, None, err);
        let content_types = self.snapshot.content_types().await.map_err(fatal)?;
        let snapshot_locales = self.snapshot.locales().await.map_err(fatal)?;

        let master = &self.ctx.config().master_locale;
        let codes: Vec<String> = match self.repository.list_locales().await {
            Ok(target) => snapshot_locales
                .into_iter()
                .filter(|locale| {
                    let known = target.iter().any(|t| t.code == locale.code);
                    if !known {
                        warn!(locale = %locale.code, "locale missing on target, skipped");
                    }
                    known
                })
                .map(|locale| locale.code)
                .collect(),
            Err(err) => {
                warn!(error = %err, "target locales unavailable, using snapshot locales");
                snapshot_locales.into_iter().map(|locale| locale.code).collect()
            }
        };
        let locales = master_first(master, codes);
        Ok(RunPlan {
            content_types,
            locales,
        })
    }

    /// Page keys of a content type/locale pair.
    async fn pages(
        &self,
        stage: Stage,
        content_type: &str,
        locale: &str,
    ) -> Result<Vec<String>, MigrationError> {
        self.snapshot
            .record_pages(content_type, locale)
            .await
            .map_err(|err| MigrationError::fatal_io(stage, Some(content_type), Some(locale), err))
    }

    /// Records of one page.
    async fn page(
        &self,
        stage: Stage,
        content_type: &str,
        locale: &str,
        page: &str,
    ) -> Result<Vec<RecordPayload>, MigrationError> {
        self.snapshot
            .read_page(content_type, locale, page)
            .await
            .map_err(|err| MigrationError::fatal_io(stage, Some(content_type), Some(locale), err))
    }
}
