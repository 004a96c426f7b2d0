//! JSON checkpoint files under a migration's checkpoint root.
//!
//! Every write replaces the whole file: the value is serialized to a
//! uniquely named sibling and renamed over the target, so concurrent writers
//! of the same file never interleave and the last rename wins.

use std::path::{Path, PathBuf};

use anyhow::Context;
use contentshift_core::EntityKind;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Relative locations of the files the engine reads and writes.
pub mod paths {
    use std::path::PathBuf;

    use contentshift_core::EntityKind;

    /// Successfully created or updated records.
    pub const ENTRIES_SUCCESS: &str = "entries/success.json";
    /// Records that failed at any stage.
    pub const ENTRIES_FAILS: &str = "entries/fails.json";
    /// Incidental default-locale records pending cleanup.
    pub const AUTO_CREATED: &str = "entries/auto-created.json";
    /// Records queued for replacement.
    pub const EXISTING: &str = "entries/existing.json";
    /// Record identifiers still unresolved after reference repair.
    pub const UNMAPPED_UIDS: &str = "entries/unmapped-uids.json";
    /// Bookkeeping for the downstream variant-entry collaborator.
    pub const VARIANT_ENTRIES: &str = "entries/data-for-variant-entry.json";
    /// Content types whose schema updates succeeded.
    pub const CONTENT_TYPES_SUCCESS: &str = "content_types/success.json";
    /// Content types whose schema updates failed.
    pub const CONTENT_TYPES_FAILS: &str = "content_types/fails.json";
    /// Global fields needing a deferred reference-repair pass.
    pub const PENDING_GLOBAL_FIELDS: &str = "global_fields/pending_global_fields.js";
    /// Authoritative taxonomy/term catalog of the target repository.
    pub const TAXONOMY_TERMS: &str = "taxonomies/terms/success.json";

    /// Identity map file of the given kind.
    #[must_use]
    pub fn identity_map(kind: EntityKind) -> PathBuf {
        PathBuf::from(kind.dir_name()).join(kind.file_name())
    }
}

/// Reads and writes JSON files relative to a checkpoint root.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    /// Creates a store rooted at `root`. Nothing is touched until first use.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The checkpoint root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a checkpoint file.
    #[must_use]
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Reads and parses a checkpoint file.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn read_json<T: DeserializeOwned>(
        &self,
        relative: impl AsRef<Path>,
    ) -> anyhow::Result<Option<T>> {
        let path = self.path(relative);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(value))
    }

    /// Serializes `value` and atomically replaces the checkpoint file.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        relative: impl AsRef<Path>,
        value: &T,
    ) -> anyhow::Result<()> {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        let staging = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&staging, bytes)
            .await
            .with_context(|| format!("writing {}", staging.display()))?;
        tokio::fs::rename(&staging, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    /// Reads an identity map file, empty when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is unreadable or malformed.
    pub async fn read_identity_map(
        &self,
        kind: EntityKind,
    ) -> anyhow::Result<std::collections::BTreeMap<String, String>> {
        Ok(self
            .read_json(paths::identity_map(kind))
            .await?
            .unwrap_or_default())
    }
}
