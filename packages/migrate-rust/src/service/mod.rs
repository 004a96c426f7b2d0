//! Migration run execution.
//!
//! 1. **Configuration** (`config`): run settings
//! 2. **Batching** (`batch`): sequential, paced batches of concurrent items
//! 3. **State** (`context`): identity maps, ledgers and caches of one run
//! 4. **Stages** (`stage`): stage order and progress tracking
//! 5. **Orchestration** (`orchestrator`): the stages themselves

pub mod batch;
pub mod config;
pub mod context;
pub mod orchestrator;
pub mod stage;

pub use batch::{BatchItem, BatchJob, BatchScheduler, BatchSummary};
pub use config::MigrationConfig;
pub use context::MigrationContext;
pub use orchestrator::{LocaleEntryOrchestrator, RunReport};
pub use stage::{Progress, ProgressTracker, Stage};
