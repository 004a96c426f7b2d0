use std::collections::HashMap;

use async_trait::async_trait;
use contentshift_core::{ContentTypeDefinition, LocaleSpec, RecordPayload};

use crate::error::RepositoryError;

/// Remote, schema-enforcing content repository.
/// Implementations: HTTP management API (external), memory (tests, dry runs).
///
/// Every call is individually failable and may be throttled; wrap with
/// [`RetryingRepository`](crate::repository::RetryingRepository) to retry
/// rate-limited calls.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Create a record in the given locale. Returns the stored record,
    /// including its newly assigned `uid`.
    async fn create_entry(
        &self,
        content_type: &str,
        locale: &str,
        payload: &RecordPayload,
    ) -> Result<RecordPayload, RepositoryError>;

    /// Update a record in the given locale, localizing it if the record has
    /// no content in that locale yet.
    async fn update_entry(
        &self,
        content_type: &str,
        locale: &str,
        uid: &str,
        payload: &RecordPayload,
    ) -> Result<RecordPayload, RepositoryError>;

    /// Fetch a record in the given locale.
    async fn fetch_entry(
        &self,
        content_type: &str,
        locale: &str,
        uid: &str,
    ) -> Result<RecordPayload, RepositoryError>;

    /// Delete a record's content in the given locale.
    async fn delete_entry(
        &self,
        content_type: &str,
        locale: &str,
        uid: &str,
    ) -> Result<(), RepositoryError>;

    /// Find records with the given title in the given locale.
    async fn find_entries_by_title(
        &self,
        content_type: &str,
        locale: &str,
        title: &str,
    ) -> Result<Vec<RecordPayload>, RepositoryError>;

    /// Publish a record to the given environments in the given locales.
    async fn publish_entry(
        &self,
        content_type: &str,
        uid: &str,
        environments: &[String],
        locales: &[String],
    ) -> Result<(), RepositoryError>;

    /// Create a content type definition.
    async fn create_content_type(
        &self,
        definition: &ContentTypeDefinition,
    ) -> Result<ContentTypeDefinition, RepositoryError>;

    /// Replace a content type definition (schema and field rules).
    async fn update_content_type(
        &self,
        definition: &ContentTypeDefinition,
    ) -> Result<ContentTypeDefinition, RepositoryError>;

    /// Fetch a content type definition.
    async fn fetch_content_type(&self, uid: &str) -> Result<ContentTypeDefinition, RepositoryError>;

    /// List the locales configured on the repository.
    async fn list_locales(&self) -> Result<Vec<LocaleSpec>, RepositoryError>;
}

/// Read access to the backup snapshot being migrated.
///
/// Records are paged: each content type/locale pair has an ordered list of
/// page keys, and each page holds a bounded number of records. Any error
/// returned here is fatal for the stage reading it.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// All content type definitions in the snapshot, as originally defined.
    async fn content_types(&self) -> anyhow::Result<Vec<ContentTypeDefinition>>;

    /// Locales in the snapshot other than the master locale.
    async fn locales(&self) -> anyhow::Result<Vec<LocaleSpec>>;

    /// Publishing environments: old environment uid to environment name.
    async fn environments(&self) -> anyhow::Result<HashMap<String, String>>;

    /// Ordered page keys of a content type/locale pair. Empty if the pair
    /// has no records.
    async fn record_pages(&self, content_type: &str, locale: &str) -> anyhow::Result<Vec<String>>;

    /// Records of one page, in snapshot order.
    async fn read_page(
        &self,
        content_type: &str,
        locale: &str,
        page: &str,
    ) -> anyhow::Result<Vec<RecordPayload>>;
}
