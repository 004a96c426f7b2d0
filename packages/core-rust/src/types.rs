use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record's field values keyed by field identifier.
///
/// Loosely typed: the shape of each value depends on the content type's
/// schema. System keys (`uid`, `_version`, `publish_details`, ...) sit next
/// to the field values, as the repository returns them.
pub type RecordPayload = Map<String, Value>;

/// Keys the repository manages itself and rejects or ignores on write.
pub const SYSTEM_KEYS: &[&str] = &[
    "uid",
    "_version",
    "created_at",
    "updated_at",
    "created_by",
    "updated_by",
    "publish_details",
    "_in_progress",
    "ACL",
    "locale",
];

/// Returns the record's identifier, if present.
#[must_use]
pub fn record_uid(payload: &RecordPayload) -> Option<&str> {
    payload.get("uid").and_then(Value::as_str)
}

/// Returns the record's title, if present.
#[must_use]
pub fn record_title(payload: &RecordPayload) -> Option<&str> {
    payload.get("title").and_then(Value::as_str)
}

/// Removes every repository-managed key from a payload.
pub fn strip_system_keys(payload: &mut RecordPayload) {
    for key in SYSTEM_KEYS {
        payload.remove(*key);
    }
}

/// Namespace of an identity map.
///
/// Each kind is persisted under its own directory of the checkpoint tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Records (entries).
    Entries,
    /// Assets by identifier.
    Assets,
    /// Asset URLs, old URL to new URL.
    AssetUrls,
    /// Locales.
    Locales,
    /// Custom-field and widget extensions.
    Extensions,
    /// Marketplace app installations standing in for extensions.
    MarketplaceApps,
    /// Global fields.
    GlobalFields,
    /// Taxonomies.
    Taxonomies,
    /// Custom roles.
    Roles,
    /// Publishing environments.
    Environments,
}

impl EntityKind {
    /// Every identity map kind.
    pub const ALL: [EntityKind; 10] = [
        EntityKind::Entries,
        EntityKind::Assets,
        EntityKind::AssetUrls,
        EntityKind::Locales,
        EntityKind::Extensions,
        EntityKind::MarketplaceApps,
        EntityKind::GlobalFields,
        EntityKind::Taxonomies,
        EntityKind::Roles,
        EntityKind::Environments,
    ];

    /// Directory of the checkpoint tree holding this kind's mapping.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Entries => "entries",
            Self::Assets | Self::AssetUrls => "assets",
            Self::Locales => "locales",
            Self::Extensions => "extensions",
            Self::MarketplaceApps => "marketplace_apps",
            Self::GlobalFields => "global_fields",
            Self::Taxonomies => "taxonomies",
            Self::Roles => "custom-roles",
            Self::Environments => "environments",
        }
    }

    /// File name of this kind's mapping inside [`dir_name`](Self::dir_name).
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::AssetUrls => "url-mapping.json",
            _ => "uid-mapping.json",
        }
    }
}

/// A default-locale record the repository created as a side effect of
/// creating a record directly in a non-default locale.
///
/// Consumed exactly once by the cleanup stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AutoCreatedRecord {
    /// Content type of the record.
    pub content_type: String,
    /// Locale of the incidental counterpart (the default locale).
    pub locale: String,
    /// Identifier the repository assigned.
    pub entry_uid: String,
    /// Locale whose creation caused the counterpart.
    pub localized_locale: String,
    /// Identifier of the record in the snapshot.
    pub source_uid: String,
}

/// Bookkeeping row handed to the downstream variant-entry collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantEntry {
    /// Content type of the record.
    pub content_type: String,
    /// Locale the record was created in.
    pub locale: String,
    /// Identifier of the record in the snapshot.
    pub entry_uid: String,
}
