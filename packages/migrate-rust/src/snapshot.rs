//! In-memory [`SnapshotSource`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use contentshift_core::{ContentTypeDefinition, LocaleSpec, RecordPayload};

use crate::traits::SnapshotSource;

/// Snapshot held entirely in memory, paged like an on-disk export.
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    content_types: Vec<ContentTypeDefinition>,
    locales: Vec<LocaleSpec>,
    environments: HashMap<String, String>,
    records: BTreeMap<(String, String), Vec<RecordPayload>>,
    page_size: usize,
    unreadable: BTreeSet<(String, String)>,
}

impl Default for MemorySnapshot {
    fn default() -> Self {
        Self {
            content_types: Vec::new(),
            locales: Vec::new(),
            environments: HashMap::new(),
            records: BTreeMap::new(),
            page_size: 100,
            unreadable: BTreeSet::new(),
        }
    }
}

impl MemorySnapshot {
    /// Creates an empty snapshot with 100 records per page.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of records per page (at least 1).
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Adds a content type definition.
    #[must_use]
    pub fn with_content_type(mut self, definition: ContentTypeDefinition) -> Self {
        self.content_types.push(definition);
        self
    }

    /// Adds a non-master locale.
    #[must_use]
    pub fn with_locale(mut self, locale: LocaleSpec) -> Self {
        self.locales.push(locale);
        self
    }

    /// Adds a publishing environment.
    #[must_use]
    pub fn with_environment(mut self, uid: impl Into<String>, name: impl Into<String>) -> Self {
        self.environments.insert(uid.into(), name.into());
        self
    }

    /// Appends a record to a content type/locale pair.
    #[must_use]
    pub fn with_record(mut self, content_type: &str, locale: &str, record: RecordPayload) -> Self {
        self.records
            .entry((content_type.to_string(), locale.to_string()))
            .or_default()
            .push(record);
        self
    }

    /// Makes page reads of a content type/locale pair fail.
    #[must_use]
    pub fn with_unreadable_pages(mut self, content_type: &str, locale: &str) -> Self {
        self.unreadable
            .insert((content_type.to_string(), locale.to_string()));
        self
    }

    fn key(content_type: &str, locale: &str) -> (String, String) {
        (content_type.to_string(), locale.to_string())
    }
}

#[async_trait]
impl SnapshotSource for MemorySnapshot {
    async fn content_types(&self) -> anyhow::Result<Vec<ContentTypeDefinition>> {
        Ok(self.content_types.clone())
    }

    async fn locales(&self) -> anyhow::Result<Vec<LocaleSpec>> {
        Ok(self.locales.clone())
    }

    async fn environments(&self) -> anyhow::Result<HashMap<String, String>> {
        Ok(self.environments.clone())
    }

    async fn record_pages(&self, content_type: &str, locale: &str) -> anyhow::Result<Vec<String>> {
        let count = self
            .records
            .get(&Self::key(content_type, locale))
            .map_or(0, |records| records.len().div_ceil(self.page_size));
        Ok((0..count).map(|page| format!("{page}.json")).collect())
    }

    async fn read_page(
        &self,
        content_type: &str,
        locale: &str,
        page: &str,
    ) -> anyhow::Result<Vec<RecordPayload>> {
        let key = Self::key(content_type, locale);
        if self.unreadable.contains(&key) {
            return Err(anyhow!("page {page} of {content_type}/{locale} is unreadable"));
        }
        let index: usize = page
            .trim_end_matches(".json")
            .parse()
            .with_context(|| format!("invalid page key {page}"))?;
        let records = self
            .records
            .get(&key)
            .with_context(|| format!("no records for {content_type}/{locale}"))?;
        let start = index * self.page_size;
        if start >= records.len() {
            return Err(anyhow!("page {page} of {content_type}/{locale} does not exist"));
        }
        let end = (start + self.page_size).min(records.len());
        Ok(records[start..end].to_vec())
    }
}
