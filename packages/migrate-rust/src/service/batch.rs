//! Bounded-concurrency batch execution.
//!
//! Provides [`BatchScheduler`], which splits a [`BatchJob`] into batches of
//! at most `concurrency` items, runs each batch fully concurrently on the
//! calling task, and waits for every item of a batch to settle before the
//! next batch starts. Batches shorter than the pacing floor are padded with a
//! sleep so the remote repository never sees more than one batch per window.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::MigrationConfig;

// ---------------------------------------------------------------------------
// BatchItem / BatchJob
// ---------------------------------------------------------------------------

/// One work item as handed to the per-item handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem<T> {
    /// The work item.
    pub item: T,
    /// Position of the item in the job, starting at 0.
    pub index: usize,
    /// Position of the item's batch, starting at 0.
    pub batch_index: usize,
    /// True exactly for the final item of the final batch.
    pub is_last_request: bool,
}

/// An ordered sequence of work items with an optional concurrency override.
#[derive(Debug, Clone)]
pub struct BatchJob<T> {
    /// Name used in log output.
    pub label: String,
    /// Work items in submission order.
    pub items: Vec<T>,
    /// Concurrency for this job; the scheduler's default when `None`.
    pub concurrency: Option<usize>,
}

impl<T> BatchJob<T> {
    /// Creates a job that runs at the scheduler's default concurrency.
    pub fn new(label: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            label: label.into(),
            items,
            concurrency: None,
        }
    }

    /// Overrides the scheduler's default concurrency for this job.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }
}

/// Counts reported once a job has been consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Number of per-item invocations.
    pub invoked: usize,
    /// Number of invocations that returned an error.
    pub failed: usize,
    /// Number of batches executed.
    pub batches: usize,
}

// ---------------------------------------------------------------------------
// BatchScheduler
// ---------------------------------------------------------------------------

/// Runs batch jobs with bounded concurrency and fixed-window pacing.
#[derive(Debug, Clone)]
pub struct BatchScheduler {
    default_concurrency: usize,
    pacing: Duration,
    report_completion: bool,
}

impl BatchScheduler {
    /// Creates a scheduler. A concurrency of 0 is treated as 1.
    #[must_use]
    pub fn new(default_concurrency: usize, pacing: Duration) -> Self {
        Self {
            default_concurrency: default_concurrency.max(1),
            pacing,
            report_completion: true,
        }
    }

    /// Creates a scheduler from the migration's concurrency and pacing settings.
    #[must_use]
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new(config.concurrency, config.batch_pacing())
    }

    /// Disables per-batch completion reporting, and with it the pacing sleep.
    #[must_use]
    pub fn without_completion_reporting(mut self) -> Self {
        self.report_completion = false;
        self
    }

    /// Consumes `job`, invoking `per_item` for every item.
    ///
    /// Items of one batch run concurrently; a failing item never cancels its
    /// siblings. Errors are counted and logged, never propagated.
    pub async fn run<T, F, Fut, E>(&self, job: BatchJob<T>, per_item: F) -> BatchSummary
    where
        F: Fn(BatchItem<T>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let BatchJob {
            label,
            items,
            concurrency,
        } = job;
        let concurrency = concurrency.unwrap_or(self.default_concurrency).max(1);
        let total = items.len();
        let mut summary = BatchSummary::default();
        if total == 0 {
            return summary;
        }

        let batch_count = total.div_ceil(concurrency);
        let mut items = items.into_iter().enumerate();

        for batch_index in 0..batch_count {
            let started = Instant::now();
            let batch: Vec<BatchItem<T>> = items
                .by_ref()
                .take(concurrency)
                .map(|(index, item)| BatchItem {
                    item,
                    index,
                    batch_index,
                    is_last_request: index + 1 == total,
                })
                .collect();

            for result in join_all(batch.into_iter().map(&per_item)).await {
                summary.invoked += 1;
                if let Err(err) = result {
                    summary.failed += 1;
                    warn!(job = %label, batch = batch_index, error = %err, "batch item failed");
                }
            }
            summary.batches += 1;

            if self.report_completion {
                debug!(
                    job = %label,
                    batch = batch_index + 1,
                    of = batch_count,
                    "batch complete"
                );
                let elapsed = started.elapsed();
                if batch_index + 1 < batch_count && elapsed < self.pacing {
                    tokio::time::sleep(self.pacing - elapsed).await;
                }
            }
        }

        summary
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use proptest::prelude::*;

    use super::*;

    type Calls = Arc<Mutex<Vec<(usize, usize, bool)>>>;

    async fn record_calls(n: usize, k: usize) -> (Vec<(usize, usize, bool)>, BatchSummary) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let scheduler = BatchScheduler::new(k, Duration::ZERO);
        let job = BatchJob::new("test", (0..n).collect::<Vec<_>>());
        let summary = scheduler
            .run(job, |item| {
                let calls = calls.clone();
                async move {
                    calls
                        .lock()
                        .push((item.index, item.batch_index, item.is_last_request));
                    Ok::<(), Infallible>(())
                }
            })
            .await;
        let mut calls = calls.lock().clone();
        calls.sort_unstable();
        (calls, summary)
    }

    #[tokio::test]
    async fn five_items_two_wide_make_three_batches() {
        let (calls, summary) = record_calls(5, 2).await;

        assert_eq!(summary.invoked, 5);
        assert_eq!(summary.batches, 3);
        let batch_of: Vec<usize> = calls.iter().map(|c| c.1).collect();
        assert_eq!(batch_of, vec![0, 0, 1, 1, 2]);
        let last: Vec<usize> = calls.iter().filter(|c| c.2).map(|c| c.0).collect();
        assert_eq!(last, vec![4]);
    }

    #[tokio::test]
    async fn empty_job_resolves_immediately() {
        let (calls, summary) = record_calls(0, 3).await;
        assert!(calls.is_empty());
        assert_eq!(summary, BatchSummary::default());
    }

    #[tokio::test]
    async fn failing_item_does_not_abort_siblings() {
        let done = Arc::new(AtomicUsize::new(0));
        let scheduler = BatchScheduler::new(3, Duration::ZERO);
        let job = BatchJob::new("failing", vec![1, 2, 3, 4]);

        let summary = scheduler
            .run(job, |item| {
                let done = done.clone();
                async move {
                    if item.item == 2 {
                        return Err("boom");
                    }
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.invoked, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn items_within_a_batch_overlap() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let scheduler = BatchScheduler::new(3, Duration::ZERO);
        let job = BatchJob::new("overlap", (0..7).collect::<Vec<_>>());

        scheduler
            .run(job, |_item| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), Infallible>(())
                }
            })
            .await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn short_batches_are_padded_to_the_pacing_floor() {
        let scheduler = BatchScheduler::new(2, Duration::from_millis(1000));
        let job = BatchJob::new("paced", vec![(); 5]);
        let started = Instant::now();

        scheduler
            .run(job, |_item| async { Ok::<(), Infallible>(()) })
            .await;

        // Three batches, two gaps between them.
        assert!(started.elapsed() >= Duration::from_millis(2000));
        assert!(started.elapsed() < Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_skipped_without_completion_reporting() {
        let scheduler =
            BatchScheduler::new(1, Duration::from_millis(1000)).without_completion_reporting();
        let job = BatchJob::new("unpaced", vec![(); 4]);
        let started = Instant::now();

        scheduler
            .run(job, |_item| async { Ok::<(), Infallible>(()) })
            .await;

        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn job_concurrency_overrides_default() {
        let scheduler = BatchScheduler::new(10, Duration::ZERO);
        let job = BatchJob::new("override", vec![(); 6]).with_concurrency(4);
        let summary = scheduler
            .run(job, |_item| async { Ok::<(), Infallible>(()) })
            .await;
        assert_eq!(summary.batches, 2);
    }

    proptest! {
        #[test]
        fn batching_covers_every_item_once(n in 0usize..40, k in 1usize..8) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let (calls, summary) = runtime.block_on(record_calls(n, k));

            prop_assert_eq!(calls.len(), n);
            prop_assert_eq!(summary.batches, n.div_ceil(k));
            for (position, (index, batch, _)) in calls.iter().enumerate() {
                prop_assert_eq!(*index, position);
                prop_assert_eq!(*batch, position / k);
            }
            let flagged: Vec<usize> = calls.iter().filter(|c| c.2).map(|c| c.0).collect();
            if n == 0 {
                prop_assert!(flagged.is_empty());
            } else {
                prop_assert_eq!(flagged, vec![n - 1]);
            }
        }
    }
}
