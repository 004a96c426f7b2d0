use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Migration-level configuration for the entry orchestration pipeline.
///
/// Controls batch concurrency and pacing, optional stages, and where
/// checkpoints are written. Deserializable so an on-disk loader can fill it;
/// missing keys fall back to [`Default`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Code of the master (default) locale.
    pub master_locale: String,
    /// Default number of items a batch runs concurrently.
    pub concurrency: usize,
    /// Minimum wall-clock duration of a batch in milliseconds.
    pub batch_pacing_ms: u64,
    /// Replace records that already exist remotely instead of skipping them.
    pub replace_existing: bool,
    /// Publish records carrying publish metadata.
    pub publish: bool,
    /// Keep single-target reference fields in their original shape.
    pub preserve_stack_version: bool,
    /// Root of the checkpoint tree.
    pub checkpoint_dir: PathBuf,
    /// Maximum retries for a rate-limited remote call.
    pub retry_limit: u32,
    /// Base delay of the exponential retry backoff in milliseconds.
    pub retry_base_delay_ms: u64,
}

impl MigrationConfig {
    /// Pacing floor between batches.
    #[must_use]
    pub fn batch_pacing(&self) -> Duration {
        Duration::from_millis(self.batch_pacing_ms)
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            master_locale: "en-us".to_string(),
            concurrency: 5,
            batch_pacing_ms: 1000,
            replace_existing: false,
            publish: true,
            preserve_stack_version: false,
            checkpoint_dir: PathBuf::from("./_backup/mapper"),
            retry_limit: 5,
            retry_base_delay_ms: 1000,
        }
    }
}
