//! Orchestration stages and progress tracking.
//!
//! Uses `ArcSwap` for lock-free progress reads while the orchestrator moves
//! through its stages.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::config::MigrationConfig;

/// One step of the per-locale entry orchestration.
///
/// Stages run in declaration order; each starts only after the previous one
/// has fully completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Relax content type schemas so records can be created in any order.
    CtPreparation,
    /// Create records for every content type and locale.
    EntriesCreate,
    /// Overwrite records that already existed remotely (optional).
    EntriesReplaceExisting,
    /// Re-resolve record-to-record links now that every record exists.
    ReferenceUpdates,
    /// Put the original, fully constrained schemas back.
    CtRestoration,
    /// Rewrite record identifiers embedded in field rules.
    FieldRulesUpdate,
    /// Publish records to their environments (optional).
    EntriesPublish,
    /// Remove incidental default-locale records and write bookkeeping.
    Cleanup,
}

impl Stage {
    /// Every stage in execution order.
    pub const ORDER: [Stage; 8] = [
        Stage::CtPreparation,
        Stage::EntriesCreate,
        Stage::EntriesReplaceExisting,
        Stage::ReferenceUpdates,
        Stage::CtRestoration,
        Stage::FieldRulesUpdate,
        Stage::EntriesPublish,
        Stage::Cleanup,
    ];

    /// Whether the stage runs under the given configuration.
    #[must_use]
    pub fn is_enabled(self, config: &MigrationConfig) -> bool {
        match self {
            Self::EntriesReplaceExisting => config.replace_existing,
            Self::EntriesPublish => config.publish,
            _ => true,
        }
    }

    /// Stable snake-case name used in logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CtPreparation => "ct_preparation",
            Self::EntriesCreate => "entries_create",
            Self::EntriesReplaceExisting => "entries_replace_existing",
            Self::ReferenceUpdates => "reference_updates",
            Self::CtRestoration => "ct_restoration",
            Self::FieldRulesUpdate => "field_rules_update",
            Self::EntriesPublish => "entries_publish",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall progress of a run.
///
/// State machine: Pending -> Running(stage)* -> Completed | Failed(stage)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// No stage has started.
    Pending,
    /// The given stage is executing.
    Running(Stage),
    /// Every enabled stage completed.
    Completed,
    /// The given stage hit a fatal error.
    Failed(Stage),
}

/// Shared, lock-free view of a run's progress.
#[derive(Debug)]
pub struct ProgressTracker {
    state: ArcSwap<Progress>,
}

impl ProgressTracker {
    /// Creates a tracker in the `Pending` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(Progress::Pending),
        }
    }

    /// Current progress.
    #[must_use]
    pub fn get(&self) -> Progress {
        **self.state.load()
    }

    /// Marks `stage` as running.
    pub fn enter(&self, stage: Stage) {
        self.state.store(Arc::new(Progress::Running(stage)));
    }

    /// Marks the run as completed.
    pub fn complete(&self) {
        self.state.store(Arc::new(Progress::Completed));
    }

    /// Marks the run as failed in whichever stage is running.
    pub fn fail(&self) {
        let stage = match self.get() {
            Progress::Running(stage) | Progress::Failed(stage) => stage,
            Progress::Pending | Progress::Completed => Stage::CtPreparation,
        };
        self.state.store(Arc::new(Progress::Failed(stage)));
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_is_declaration_order() {
        let mut sorted = Stage::ORDER;
        sorted.sort();
        assert_eq!(sorted, Stage::ORDER);
        assert_eq!(Stage::ORDER.first(), Some(&Stage::CtPreparation));
        assert_eq!(Stage::ORDER.last(), Some(&Stage::Cleanup));
    }

    #[test]
    fn optional_stages_follow_config() {
        let mut config = MigrationConfig::default();
        assert!(!Stage::EntriesReplaceExisting.is_enabled(&config));
        assert!(Stage::EntriesPublish.is_enabled(&config));
        config.replace_existing = true;
        config.publish = false;
        assert!(Stage::EntriesReplaceExisting.is_enabled(&config));
        assert!(!Stage::EntriesPublish.is_enabled(&config));
        assert!(Stage::Cleanup.is_enabled(&config));
    }

    #[test]
    fn tracker_transitions() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.get(), Progress::Pending);
        tracker.enter(Stage::ReferenceUpdates);
        assert_eq!(tracker.get(), Progress::Running(Stage::ReferenceUpdates));
        tracker.fail();
        assert_eq!(tracker.get(), Progress::Failed(Stage::ReferenceUpdates));

        let tracker = ProgressTracker::new();
        tracker.enter(Stage::Cleanup);
        tracker.complete();
        assert_eq!(tracker.get(), Progress::Completed);
    }
}
