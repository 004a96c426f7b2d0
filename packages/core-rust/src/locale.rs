use serde::{Deserialize, Serialize};

/// A language/region variant records can be authored in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleSpec {
    /// Locale code, e.g. `en-us`.
    pub code: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Locale consulted when a record has no content in this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_locale: Option<String>,
}

impl LocaleSpec {
    /// Creates a locale with no fallback.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            name: code.clone(),
            code,
            fallback_locale: None,
        }
    }
}

/// Orders locale codes so `master` comes first and the rest keep their order.
///
/// Duplicates are dropped; `master` is inserted even if absent from `codes`.
#[must_use]
pub fn master_first(master: &str, codes: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut ordered = vec![master.to_string()];
    for code in codes {
        if !ordered.contains(&code) {
            ordered.push(code);
        }
    }
    ordered
}
