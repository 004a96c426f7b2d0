//! Retry decorator for rate-limited repositories.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use contentshift_core::{ContentTypeDefinition, LocaleSpec, RecordPayload};
use rand::Rng;
use tracing::warn;

use crate::error::RepositoryError;
use crate::service::config::MigrationConfig;
use crate::traits::ContentRepository;

/// Wraps a [`ContentRepository`], retrying rate-limited calls with
/// exponential backoff plus jitter.
///
/// Only [`RepositoryError::is_retryable`] failures are retried; every other
/// error is returned on the first attempt.
#[derive(Debug)]
pub struct RetryingRepository<R> {
    inner: R,
    limit: u32,
    base_delay: Duration,
}

impl<R> RetryingRepository<R> {
    /// Wraps `inner`, retrying up to `limit` times.
    pub fn new(inner: R, limit: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            limit,
            base_delay,
        }
    }

    /// Wraps `inner` using the migration's retry settings.
    pub fn from_config(inner: R, config: &MigrationConfig) -> Self {
        Self::new(
            inner,
            config.retry_limit,
            Duration::from_millis(config.retry_base_delay_ms),
        )
    }

    /// The wrapped repository.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`
    /// plus up to half of `base` of jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = u64::try_from(self.base_delay.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        exponential.saturating_add(Duration::from_millis(jitter))
    }

    async fn retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, RepositoryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RepositoryError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Err(err) if err.is_retryable() && attempt < self.limit => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        limit = self.limit,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "rate limited, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl<R: ContentRepository> ContentRepository for RetryingRepository<R> {
    async fn create_entry(
        &self,
        content_type: &str,
        locale: &str,
        payload: &RecordPayload,
    ) -> Result<RecordPayload, RepositoryError> {
        self.retry("create_entry", || {
            self.inner.create_entry(content_type, locale, payload)
        })
        .await
    }

    async fn update_entry(
        &self,
        content_type: &str,
        locale: &str,
        uid: &str,
        payload: &RecordPayload,
    ) -> Result<RecordPayload, RepositoryError> {
        self.retry("update_entry", || {
            self.inner.update_entry(content_type, locale, uid, payload)
        })
        .await
    }

    async fn fetch_entry(
        &self,
        content_type: &str,
        locale: &str,
        uid: &str,
    ) -> Result<RecordPayload, RepositoryError> {
        self.retry("fetch_entry", || self.inner.fetch_entry(content_type, locale, uid))
            .await
    }

    async fn delete_entry(
        &self,
        content_type: &str,
        locale: &str,
        uid: &str,
    ) -> Result<(), RepositoryError> {
        self.retry("delete_entry", || self.inner.delete_entry(content_type, locale, uid))
            .await
    }

    async fn find_entries_by_title(
        &self,
        content_type: &str,
        locale: &str,
        title: &str,
    ) -> Result<Vec<RecordPayload>, RepositoryError> {
        self.retry("find_entries_by_title", || {
            self.inner.find_entries_by_title(content_type, locale, title)
        })
        .await
    }

    async fn publish_entry(
        &self,
        content_type: &str,
        uid: &str,
        environments: &[String],
        locales: &[String],
    ) -> Result<(), RepositoryError> {
        self.retry("publish_entry", || {
            self.inner.publish_entry(content_type, uid, environments, locales)
        })
        .await
    }

    async fn create_content_type(
        &self,
        definition: &ContentTypeDefinition,
    ) -> Result<ContentTypeDefinition, RepositoryError> {
        self.retry("create_content_type", || self.inner.create_content_type(definition))
            .await
    }

    async fn update_content_type(
        &self,
        definition: &ContentTypeDefinition,
    ) -> Result<ContentTypeDefinition, RepositoryError> {
        self.retry("update_content_type", || self.inner.update_content_type(definition))
            .await
    }

    async fn fetch_content_type(&self, uid: &str) -> Result<ContentTypeDefinition, RepositoryError> {
        self.retry("fetch_content_type", || self.inner.fetch_content_type(uid))
            .await
    }

    async fn list_locales(&self) -> Result<Vec<LocaleSpec>, RepositoryError> {
        self.retry("list_locales", || self.inner.list_locales()).await
    }
}

#[cfg(test)]
mod tests {
    use contentshift_core::{FieldKind, FieldSchema};
    use tokio::time::Instant;

    use super::*;
    use crate::error::ErrorCategory;
    use crate::repository::InMemoryRepository;

    fn repo() -> InMemoryRepository {
        let repo = InMemoryRepository::new("en-us");
        repo.seed_content_type(ContentTypeDefinition::new(
            "page",
            vec![FieldSchema::new("title", FieldKind::Plain { data_type: "text".into() })],
        ));
        repo
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_calls_are_retried_with_backoff() {
        let retrying = RetryingRepository::new(repo(), 5, Duration::from_millis(100));
        retrying.inner().throttle_next(3);
        let started = Instant::now();

        let definition = retrying.fetch_content_type("page").await.unwrap();

        assert_eq!(definition.uid, "page");
        assert_eq!(retrying.inner().calls(), 4);
        // 100 + 200 + 400 ms of backoff, jitter adds at most 50 ms per retry.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(700), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(850), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_limit() {
        let retrying = RetryingRepository::new(repo(), 2, Duration::from_millis(10));
        retrying.inner().throttle_next(10);

        let err = retrying.list_locales().await.unwrap_err();

        assert_eq!(err.category, ErrorCategory::RateLimited);
        assert_eq!(retrying.inner().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_not_retried() {
        let retrying = RetryingRepository::new(repo(), 5, Duration::from_millis(10));
        let err = retrying.fetch_content_type("ghost").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(retrying.inner().calls(), 1);
    }
}
