//! Old-identifier to new-identifier translation tables.
//!
//! One [`IdentityMap`] per [`EntityKind`], backed by [`DashMap`] so the
//! per-item handlers of a batch can write concurrently. Keys are never
//! removed; a value is only overwritten with the id the repository assigned.

use std::collections::BTreeMap;

use contentshift_core::EntityKind;
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::checkpoint::{paths, CheckpointStore};

/// A single old-id to new-id table.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: DashMap<String, String>,
}

impl IdentityMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// New identifier for `old`, if mapped.
    #[must_use]
    pub fn get(&self, old: &str) -> Option<String> {
        self.entries.get(old).map(|v| v.value().clone())
    }

    /// Whether `old` has been mapped.
    #[must_use]
    pub fn contains(&self, old: &str) -> bool {
        self.entries.contains_key(old)
    }

    /// Maps `old` to `new`, returning the previous value.
    pub fn insert(&self, old: impl Into<String>, new: impl Into<String>) -> Option<String> {
        self.entries.insert(old.into(), new.into())
    }

    /// Number of mapped identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point-in-time copy, sorted by old identifier.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Whether any mapped value equals `new`.
    #[must_use]
    pub fn has_value(&self, new: &str) -> bool {
        self.entries.iter().any(|e| e.value() == new)
    }
}

/// Identity maps for every entity kind, with optional checkpoint persistence.
#[derive(Debug)]
pub struct IdentityMapStore {
    maps: [IdentityMap; EntityKind::ALL.len()],
    /// Serializes checkpoint writes per kind; each write snapshots under the lock.
    write_locks: [Mutex<()>; EntityKind::ALL.len()],
    checkpoint: Option<CheckpointStore>,
}

impl IdentityMapStore {
    /// Creates an empty store that never touches disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            maps: Default::default(),
            write_locks: Default::default(),
            checkpoint: None,
        }
    }

    /// Loads every kind's mapping from the checkpoint tree.
    ///
    /// Missing files load as empty maps.
    ///
    /// # Errors
    ///
    /// Returns an error if a mapping file exists but cannot be parsed.
    pub async fn load(checkpoint: CheckpointStore) -> anyhow::Result<Self> {
        let store = Self {
            maps: Default::default(),
            write_locks: Default::default(),
            checkpoint: Some(checkpoint),
        };
        if let Some(checkpoint) = &store.checkpoint {
            for kind in EntityKind::ALL {
                let loaded = checkpoint.read_identity_map(kind).await?;
                let map = store.map(kind);
                for (old, new) in loaded {
                    map.insert(old, new);
                }
            }
        }
        Ok(store)
    }

    /// The map of the given kind.
    #[must_use]
    pub fn map(&self, kind: EntityKind) -> &IdentityMap {
        &self.maps[kind as usize]
    }

    /// New identifier of `old` in the given kind's map.
    #[must_use]
    pub fn resolve(&self, kind: EntityKind, old: &str) -> Option<String> {
        self.map(kind).get(old)
    }

    /// Inserts mappings without persisting them.
    pub fn seed<I, K, V>(&self, kind: EntityKind, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = self.map(kind);
        for (old, new) in pairs {
            map.insert(old, new);
        }
    }

    /// Records an authoritative mapping and persists the kind's full map.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint file cannot be written. The
    /// in-memory mapping is kept either way.
    pub async fn record(
        &self,
        kind: EntityKind,
        old: impl Into<String>,
        new: impl Into<String>,
    ) -> anyhow::Result<()> {
        self.map(kind).insert(old, new);
        self.persist(kind).await
    }

    /// Writes the kind's full map to its checkpoint file.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint file cannot be written.
    pub async fn persist(&self, kind: EntityKind) -> anyhow::Result<()> {
        let Some(checkpoint) = &self.checkpoint else {
            return Ok(());
        };
        let _guard = self.write_locks[kind as usize].lock().await;
        checkpoint
            .write_json(paths::identity_map(kind), &self.map(kind).snapshot())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_isolated() {
        let store = IdentityMapStore::in_memory();
        store.seed(EntityKind::Entries, [("a", "x")]);
        store.seed(EntityKind::Assets, [("a", "y")]);

        assert_eq!(store.resolve(EntityKind::Entries, "a").as_deref(), Some("x"));
        assert_eq!(store.resolve(EntityKind::Assets, "a").as_deref(), Some("y"));
        assert!(store.resolve(EntityKind::Locales, "a").is_none());
    }

    #[tokio::test]
    async fn record_overwrites_with_authoritative_id() {
        let store = IdentityMapStore::in_memory();
        store.record(EntityKind::Entries, "old", "first").await.unwrap();
        store.record(EntityKind::Entries, "old", "second").await.unwrap();
        assert_eq!(store.resolve(EntityKind::Entries, "old").as_deref(), Some("second"));
        assert_eq!(store.map(EntityKind::Entries).len(), 1);
        assert!(store.map(EntityKind::Entries).has_value("second"));
    }

    #[tokio::test]
    async fn recorded_mappings_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityMapStore::load(CheckpointStore::new(dir.path()))
            .await
            .unwrap();
        store.record(EntityKind::Entries, "e1", "n1").await.unwrap();
        store.record(EntityKind::AssetUrls, "http://old/a.png", "http://new/a.png")
            .await
            .unwrap();

        let reloaded = IdentityMapStore::load(CheckpointStore::new(dir.path()))
            .await
            .unwrap();
        assert_eq!(reloaded.resolve(EntityKind::Entries, "e1").as_deref(), Some("n1"));
        assert_eq!(
            reloaded
                .resolve(EntityKind::AssetUrls, "http://old/a.png")
                .as_deref(),
            Some("http://new/a.png")
        );
        assert!(dir.path().join("assets/url-mapping.json").exists());
    }

    #[tokio::test]
    async fn concurrent_records_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityMapStore::load(CheckpointStore::new(dir.path()))
            .await
            .unwrap();

        let writes =
            (0..20).map(|i| store.record(EntityKind::Entries, format!("o{i}"), format!("n{i}")));
        for result in futures_util::future::join_all(writes).await {
            result.unwrap();
        }

        let reloaded = IdentityMapStore::load(CheckpointStore::new(dir.path()))
            .await
            .unwrap();
        assert_eq!(reloaded.map(EntityKind::Entries).len(), 20);
    }
}
