//! Success/failure ledgers and the other run bookkeeping lists.
//!
//! Ledgers are appended to from concurrent per-item handlers and flushed to
//! the checkpoint tree as whole files.

use std::collections::BTreeSet;

use contentshift_core::{AutoCreatedRecord, RecordPayload, VariantEntry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::checkpoint::{paths, CheckpointStore};
use crate::service::stage::Stage;

/// One row of a success or failure ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Stage that produced the row.
    pub stage: String,
    /// Content type of the entity.
    pub content_type: String,
    /// Locale, for record rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Identifier in the snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Identifier on the target repository, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_uid: Option<String>,
    /// Record title, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Failure description, for failure rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LedgerEntry {
    /// A row about a content type as a whole.
    #[must_use]
    pub fn content_type(stage: Stage, content_type: &str) -> Self {
        Self {
            stage: stage.to_string(),
            content_type: content_type.to_string(),
            locale: None,
            uid: None,
            new_uid: None,
            title: None,
            error: None,
        }
    }

    /// A row about one record in one locale.
    #[must_use]
    pub fn record(stage: Stage, content_type: &str, locale: &str, uid: &str) -> Self {
        Self {
            locale: Some(locale.to_string()),
            uid: Some(uid.to_string()),
            ..Self::content_type(stage, content_type)
        }
    }

    /// Attaches the repository-assigned identifier.
    #[must_use]
    pub fn with_new_uid(mut self, new_uid: impl Into<String>) -> Self {
        self.new_uid = Some(new_uid.into());
        self
    }

    /// Attaches the record title.
    #[must_use]
    pub fn with_title(mut self, title: Option<&str>) -> Self {
        self.title = title.map(str::to_string);
        self
    }

    /// Attaches a failure description.
    #[must_use]
    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    fn concerns(&self, content_type: &str, locale: &str, uid: &str) -> bool {
        self.content_type == content_type
            && self.locale.as_deref() == Some(locale)
            && (self.uid.as_deref() == Some(uid) || self.new_uid.as_deref() == Some(uid))
    }
}

/// Success and failure rows of one module.
///
/// Rows loaded from an earlier run are kept and flushed again, but only
/// rows appended by the current run count in [`Ledger::has_failure`].
#[derive(Debug, Default)]
pub struct Ledger {
    successes: Mutex<Vec<LedgerEntry>>,
    failures: Mutex<Vec<LedgerEntry>>,
    carried_failures: usize,
}

impl Ledger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a success row.
    pub fn success(&self, entry: LedgerEntry) {
        self.successes.lock().push(entry);
    }

    /// Appends a failure row.
    pub fn failure(&self, entry: LedgerEntry) {
        self.failures.lock().push(entry);
    }

    /// Copy of the success rows.
    #[must_use]
    pub fn successes(&self) -> Vec<LedgerEntry> {
        self.successes.lock().clone()
    }

    /// Copy of the failure rows.
    #[must_use]
    pub fn failures(&self) -> Vec<LedgerEntry> {
        self.failures.lock().clone()
    }

    /// Number of failure rows.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures.lock().len()
    }

    /// Whether a failure row of the current run concerns the record `uid`
    /// (old or new identifier) of `content_type` in `locale`.
    #[must_use]
    pub fn has_failure(&self, content_type: &str, locale: &str, uid: &str) -> bool {
        self.failures
            .lock()
            .iter()
            .skip(self.carried_failures)
            .any(|entry| entry.concerns(content_type, locale, uid))
    }

    /// Loads previously flushed rows from the checkpoint tree.
    ///
    /// # Errors
    ///
    /// Returns an error if a ledger file exists but cannot be parsed.
    pub async fn load(
        checkpoint: &CheckpointStore,
        success_path: &str,
        failure_path: &str,
    ) -> anyhow::Result<Self> {
        let successes = checkpoint.read_json(success_path).await?.unwrap_or_default();
        let failures: Vec<LedgerEntry> =
            checkpoint.read_json(failure_path).await?.unwrap_or_default();
        Ok(Self {
            successes: Mutex::new(successes),
            carried_failures: failures.len(),
            failures: Mutex::new(failures),
        })
    }

    /// Writes both row lists to the checkpoint tree.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be written.
    pub async fn flush(
        &self,
        checkpoint: &CheckpointStore,
        success_path: &str,
        failure_path: &str,
    ) -> anyhow::Result<()> {
        checkpoint.write_json(success_path, &self.successes()).await?;
        checkpoint.write_json(failure_path, &self.failures()).await
    }
}

/// A record that already existed remotely, queued for replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingRecord {
    /// Content type of the record.
    pub content_type: String,
    /// Locale the creation was attempted in.
    pub locale: String,
    /// Identifier in the snapshot.
    pub source_uid: String,
    /// Title used to look up the remote record.
    pub title: String,
    /// Serialized payload that failed to create.
    pub payload: RecordPayload,
}

/// Every list a run accumulates besides the identity maps.
#[derive(Debug, Default)]
pub struct RunLedgers {
    /// Record rows.
    pub entries: Ledger,
    /// Content type rows.
    pub content_types: Ledger,
    /// Incidental default-locale records awaiting cleanup.
    pub auto_created: Mutex<Vec<AutoCreatedRecord>>,
    /// Records queued for replacement.
    pub existing: Mutex<Vec<ExistingRecord>>,
    /// Rows for the variant-entry collaborator.
    pub variant_entries: Mutex<Vec<VariantEntry>>,
    /// Record identifiers that could not be resolved.
    pub unmapped_uids: Mutex<BTreeSet<String>>,
    /// Global fields needing deferred reference repair.
    pub pending_global_fields: Mutex<BTreeSet<String>>,
}

impl RunLedgers {
    /// Loads every list from the checkpoint tree; missing files load empty.
    ///
    /// # Errors
    ///
    /// Returns an error if any file exists but cannot be parsed.
    pub async fn load(checkpoint: &CheckpointStore) -> anyhow::Result<Self> {
        Ok(Self {
            entries: Ledger::load(checkpoint, paths::ENTRIES_SUCCESS, paths::ENTRIES_FAILS).await?,
            content_types: Ledger::load(
                checkpoint,
                paths::CONTENT_TYPES_SUCCESS,
                paths::CONTENT_TYPES_FAILS,
            )
            .await?,
            auto_created: Mutex::new(
                checkpoint
                    .read_json(paths::AUTO_CREATED)
                    .await?
                    .unwrap_or_default(),
            ),
            existing: Mutex::new(checkpoint.read_json(paths::EXISTING).await?.unwrap_or_default()),
            variant_entries: Mutex::new(Vec::new()),
            unmapped_uids: Mutex::new(BTreeSet::new()),
            pending_global_fields: Mutex::new(
                checkpoint
                    .read_json(paths::PENDING_GLOBAL_FIELDS)
                    .await?
                    .unwrap_or_default(),
            ),
        })
    }

    /// Appends an auto-created record and returns a copy of the full list,
    /// ready to persist.
    pub fn push_auto_created(&self, record: AutoCreatedRecord) -> Vec<AutoCreatedRecord> {
        let mut list = self.auto_created.lock();
        if !list.contains(&record) {
            list.push(record);
        }
        list.clone()
    }

    /// Removes and returns every auto-created record.
    pub fn take_auto_created(&self) -> Vec<AutoCreatedRecord> {
        std::mem::take(&mut *self.auto_created.lock())
    }

    /// Removes and returns every record queued for replacement.
    pub fn take_existing(&self) -> Vec<ExistingRecord> {
        std::mem::take(&mut *self.existing.lock())
    }

    /// Writes the success/failure ledgers and every non-empty list.
    ///
    /// # Errors
    ///
    /// Returns the first write failure.
    pub async fn flush(&self, checkpoint: &CheckpointStore) -> anyhow::Result<()> {
        self.entries
            .flush(checkpoint, paths::ENTRIES_SUCCESS, paths::ENTRIES_FAILS)
            .await?;
        self.content_types
            .flush(
                checkpoint,
                paths::CONTENT_TYPES_SUCCESS,
                paths::CONTENT_TYPES_FAILS,
            )
            .await?;
        let unmapped: Vec<String> = self.unmapped_uids.lock().iter().cloned().collect();
        if !unmapped.is_empty() {
            checkpoint.write_json(paths::UNMAPPED_UIDS, &unmapped).await?;
        }
        let pending: Vec<String> = self.pending_global_fields.lock().iter().cloned().collect();
        if !pending.is_empty() {
            checkpoint.write_json(paths::PENDING_GLOBAL_FIELDS, &pending).await?;
        }
        Ok(())
    }
}
