//! Validating in-memory [`ContentRepository`].
//!
//! [`InMemoryRepository`] enforces the constraints a real target enforces
//! (mandatory fields, duplicate titles, existing reference targets,
//! non-empty schemas) so relaxation and repair can be exercised without a
//! remote API. Creating a record in a non-master locale also creates its
//! master-locale counterpart, as the target repository does.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use contentshift_core::{
    record_title, ContentTypeDefinition, FieldKind, FieldSchema, LocaleSpec, RecordPayload,
    ASSET_TARGET,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::{ErrorCategory, RepositoryError};
use crate::traits::ContentRepository;

/// Repository operations a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOp {
    /// `create_entry`, keyed by record title.
    CreateEntry,
    /// `update_entry`, keyed by record uid or payload title.
    UpdateEntry,
    /// `delete_entry`, keyed by record uid.
    DeleteEntry,
    /// `publish_entry`, keyed by record uid.
    PublishEntry,
    /// `update_content_type`, keyed by content type uid.
    UpdateContentType,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    op: RepositoryOp,
    key: String,
    locale: Option<String>,
    error: RepositoryError,
}

#[derive(Debug)]
struct StoredEntry {
    content_type: String,
    locales: BTreeMap<String, RecordPayload>,
    published: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct State {
    content_types: HashMap<String, ContentTypeDefinition>,
    entries: BTreeMap<String, StoredEntry>,
    locales: Vec<LocaleSpec>,
    next_uid: u64,
    throttled_calls: usize,
    failures: Vec<InjectedFailure>,
}

/// In-memory content repository for tests and dry runs.
#[derive(Debug)]
pub struct InMemoryRepository {
    master_locale: String,
    state: Mutex<State>,
    calls: AtomicUsize,
}

impl InMemoryRepository {
    /// Creates an empty repository whose master locale is `master_locale`.
    #[must_use]
    pub fn new(master_locale: impl Into<String>) -> Self {
        let master_locale = master_locale.into();
        let state = State {
            locales: vec![LocaleSpec::new(master_locale.clone())],
            ..State::default()
        };
        Self {
            master_locale,
            state: Mutex::new(state),
            calls: AtomicUsize::new(0),
        }
    }

    /// Adds a locale.
    pub fn add_locale(&self, locale: LocaleSpec) {
        self.state.lock().locales.push(locale);
    }

    /// Stores a content type definition without validation.
    pub fn seed_content_type(&self, definition: ContentTypeDefinition) {
        self.state
            .lock()
            .content_types
            .insert(definition.uid.clone(), definition);
    }

    /// Stores a record under a known uid without validation.
    pub fn seed_entry(&self, content_type: &str, locale: &str, uid: &str, payload: RecordPayload) {
        let mut state = self.state.lock();
        let entry = state
            .entries
            .entry(uid.to_string())
            .or_insert_with(|| StoredEntry {
                content_type: content_type.to_string(),
                locales: BTreeMap::new(),
                published: Vec::new(),
            });
        entry
            .locales
            .insert(locale.to_string(), stamp(payload, uid, locale, 1));
    }

    /// Makes every future `op` call on `key` fail with `error`. When
    /// `locale` is set, only calls in that locale fail.
    pub fn inject_failure(
        &self,
        op: RepositoryOp,
        key: impl Into<String>,
        locale: Option<&str>,
        error: RepositoryError,
    ) {
        self.state.lock().failures.push(InjectedFailure {
            op,
            key: key.into(),
            locale: locale.map(str::to_string),
            error,
        });
    }

    /// Drops every injected failure.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Makes the next `count` calls fail as rate limited.
    pub fn throttle_next(&self, count: usize) {
        self.state.lock().throttled_calls = count;
    }

    /// Number of calls received, throttled ones included.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Stored content type definition.
    #[must_use]
    pub fn content_type(&self, uid: &str) -> Option<ContentTypeDefinition> {
        self.state.lock().content_types.get(uid).cloned()
    }

    /// Stored record content in one locale.
    #[must_use]
    pub fn entry(&self, uid: &str, locale: &str) -> Option<RecordPayload> {
        self.state
            .lock()
            .entries
            .get(uid)
            .and_then(|entry| entry.locales.get(locale).cloned())
    }

    /// Uids of every stored record of a content type.
    #[must_use]
    pub fn entry_uids(&self, content_type: &str) -> Vec<String> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| entry.content_type == content_type)
            .map(|(uid, _)| uid.clone())
            .collect()
    }

    /// Environment/locale pairs a record was published to.
    #[must_use]
    pub fn published(&self, uid: &str) -> Vec<(String, String)> {
        self.state
            .lock()
            .entries
            .get(uid)
            .map(|entry| entry.published.clone())
            .unwrap_or_default()
    }

    /// Counts the call and applies throttling and injected failures.
    fn admit(
        &self,
        op: Option<RepositoryOp>,
        keys: &[&str],
        locale: Option<&str>,
    ) -> Result<(), RepositoryError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        if state.throttled_calls > 0 {
            state.throttled_calls -= 1;
            return Err(RepositoryError::rate_limited().with_code(429));
        }
        let Some(op) = op else { return Ok(()) };
        let injected = state.failures.iter().find(|failure| {
            failure.op == op
                && keys.contains(&failure.key.as_str())
                && failure.locale.as_deref().map_or(true, |l| Some(l) == locale)
        });
        match injected {
            Some(failure) => Err(failure.error.clone()),
            None => Ok(()),
        }
    }
}

fn stamp(mut payload: RecordPayload, uid: &str, locale: &str, version: u64) -> RecordPayload {
    payload.insert("uid".to_string(), Value::String(uid.to_string()));
    payload.insert("locale".to_string(), Value::String(locale.to_string()));
    payload.insert("_version".to_string(), Value::from(version));
    payload
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

fn linked_uids(value: &Value) -> Vec<&str> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(uid) => Some(uid.as_str()),
            Value::Object(link)
                if link.get("_content_type_uid").and_then(Value::as_str) != Some(ASSET_TARGET) =>
            {
                link.get("uid").and_then(Value::as_str)
            }
            _ => None,
        })
        .collect()
}

impl State {
    fn validate_entry(
        &self,
        content_type: &str,
        locale: &str,
        own_uid: Option<&str>,
        payload: &RecordPayload,
    ) -> Result<(), RepositoryError> {
        let definition = self
            .content_types
            .get(content_type)
            .ok_or_else(|| RepositoryError::not_found(format!("content type {content_type}")))?;

        let mut err = RepositoryError::new(ErrorCategory::Validation, "entry validation failed");
        self.check_fields(&definition.schema, payload, "", &mut err);
        if !err.field_errors.is_empty() {
            return Err(err);
        }

        if let Some(title) = record_title(payload) {
            let duplicate = self.entries.iter().any(|(uid, entry)| {
                Some(uid.as_str()) != own_uid
                    && entry.content_type == content_type
                    && entry
                        .locales
                        .get(locale)
                        .and_then(record_title)
                        .is_some_and(|t| t == title)
            });
            if duplicate {
                return Err(RepositoryError::duplicate("title"));
            }
        }
        Ok(())
    }

    /// Checks mandatory values and reference targets, descending into
    /// groups, global fields and blocks. Nested errors are keyed by dotted
    /// path, e.g. `seo.canonical`.
    fn check_fields(
        &self,
        schema: &[FieldSchema],
        container: &Map<String, Value>,
        prefix: &str,
        err: &mut RepositoryError,
    ) {
        for field in schema {
            let path = format!("{prefix}{}", field.uid);
            let value = container.get(&field.uid);
            if field.mandatory && is_blank(value) {
                err.field_errors
                    .entry(path.clone())
                    .or_default()
                    .push("is required".to_string());
            }
            let Some(value) = value else { continue };
            match &field.kind {
                FieldKind::Reference { .. } => {
                    for uid in linked_uids(value) {
                        if !self.entries.contains_key(uid) {
                            err.field_errors
                                .entry(path.clone())
                                .or_default()
                                .push(format!("referenced entry {uid} not found"));
                        }
                    }
                }
                FieldKind::Group { schema } | FieldKind::GlobalRef { schema, .. } => {
                    let nested = format!("{path}.");
                    let items: Vec<&Value> = match value {
                        Value::Array(items) => items.iter().collect(),
                        single => vec![single],
                    };
                    for inner in items.into_iter().filter_map(Value::as_object) {
                        self.check_fields(schema, inner, &nested, err);
                    }
                }
                FieldKind::Blocks { blocks } => {
                    let Value::Array(items) = value else { continue };
                    for (block_uid, inner) in items.iter().filter_map(Value::as_object).flatten() {
                        let (Some(block), Some(inner)) = (
                            blocks.iter().find(|b| &b.uid == block_uid),
                            inner.as_object(),
                        ) else {
                            continue;
                        };
                        self.check_fields(&block.schema, inner, &format!("{path}.{block_uid}."), err);
                    }
                }
                _ => {}
            }
        }
    }

    fn allocate_uid(&mut self) -> String {
        self.next_uid += 1;
        format!("blt{:012x}", self.next_uid)
    }
}

#[async_trait]
impl ContentRepository for InMemoryRepository {
    async fn create_entry(
        &self,
        content_type: &str,
        locale: &str,
        payload: &RecordPayload,
    ) -> Result<RecordPayload, RepositoryError> {
        let title = record_title(payload).unwrap_or_default();
        self.admit(Some(RepositoryOp::CreateEntry), &[title], Some(locale))?;
        let mut state = self.state.lock();
        state.validate_entry(content_type, locale, None, payload)?;

        let uid = state.allocate_uid();
        let stored = stamp(payload.clone(), &uid, locale, 1);
        let mut locales = BTreeMap::new();
        if locale != self.master_locale {
            locales.insert(
                self.master_locale.clone(),
                stamp(payload.clone(), &uid, &self.master_locale, 1),
            );
        }
        locales.insert(locale.to_string(), stored.clone());
        state.entries.insert(
            uid,
            StoredEntry {
                content_type: content_type.to_string(),
                locales,
                published: Vec::new(),
            },
        );
        Ok(stored)
    }

    async fn update_entry(
        &self,
        content_type: &str,
        locale: &str,
        uid: &str,
        payload: &RecordPayload,
    ) -> Result<RecordPayload, RepositoryError> {
        let title = record_title(payload).unwrap_or_default();
        self.admit(Some(RepositoryOp::UpdateEntry), &[uid, title], Some(locale))?;
        let mut state = self.state.lock();
        match state.entries.get(uid) {
            Some(entry) if entry.content_type == content_type => {}
            _ => return Err(RepositoryError::not_found(format!("entry {uid}"))),
        }
        state.validate_entry(content_type, locale, Some(uid), payload)?;

        let entry = state
            .entries
            .get_mut(uid)
            .ok_or_else(|| RepositoryError::not_found(format!("entry {uid}")))?;
        let version = entry
            .locales
            .get(locale)
            .and_then(|existing| existing.get("_version"))
            .and_then(Value::as_u64)
            .unwrap_or(0)
            + 1;
        let stored = stamp(payload.clone(), uid, locale, version);
        entry.locales.insert(locale.to_string(), stored.clone());
        Ok(stored)
    }

    async fn fetch_entry(
        &self,
        content_type: &str,
        locale: &str,
        uid: &str,
    ) -> Result<RecordPayload, RepositoryError> {
        self.admit(None, &[uid], Some(locale))?;
        self.state
            .lock()
            .entries
            .get(uid)
            .filter(|entry| entry.content_type == content_type)
            .and_then(|entry| entry.locales.get(locale).cloned())
            .ok_or_else(|| RepositoryError::not_found(format!("entry {uid} in {locale}")))
    }

    async fn delete_entry(
        &self,
        content_type: &str,
        locale: &str,
        uid: &str,
    ) -> Result<(), RepositoryError> {
        self.admit(Some(RepositoryOp::DeleteEntry), &[uid], Some(locale))?;
        let mut state = self.state.lock();
        let entry = state
            .entries
            .get_mut(uid)
            .filter(|entry| entry.content_type == content_type)
            .ok_or_else(|| RepositoryError::not_found(format!("entry {uid}")))?;
        if entry.locales.remove(locale).is_none() {
            return Err(RepositoryError::not_found(format!("entry {uid} in {locale}")));
        }
        if entry.locales.is_empty() {
            state.entries.remove(uid);
        }
        Ok(())
    }

    async fn find_entries_by_title(
        &self,
        content_type: &str,
        locale: &str,
        title: &str,
    ) -> Result<Vec<RecordPayload>, RepositoryError> {
        self.admit(None, &[title], Some(locale))?;
        Ok(self
            .state
            .lock()
            .entries
            .values()
            .filter(|entry| entry.content_type == content_type)
            .filter_map(|entry| entry.locales.get(locale))
            .filter(|record| record_title(record) == Some(title))
            .cloned()
            .collect())
    }

    async fn publish_entry(
        &self,
        content_type: &str,
        uid: &str,
        environments: &[String],
        locales: &[String],
    ) -> Result<(), RepositoryError> {
        self.admit(Some(RepositoryOp::PublishEntry), &[uid], None)?;
        let mut state = self.state.lock();
        let entry = state
            .entries
            .get_mut(uid)
            .filter(|entry| entry.content_type == content_type)
            .ok_or_else(|| RepositoryError::not_found(format!("entry {uid}")))?;
        for environment in environments {
            for locale in locales {
                entry.published.push((environment.clone(), locale.clone()));
            }
        }
        Ok(())
    }

    async fn create_content_type(
        &self,
        definition: &ContentTypeDefinition,
    ) -> Result<ContentTypeDefinition, RepositoryError> {
        self.admit(None, &[&definition.uid], None)?;
        if definition.schema.is_empty() {
            return Err(RepositoryError::new(ErrorCategory::Validation, "schema must not be empty"));
        }
        let mut state = self.state.lock();
        if state.content_types.contains_key(&definition.uid) {
            return Err(RepositoryError::new(
                ErrorCategory::AlreadyExists,
                format!("content type {} exists", definition.uid),
            ));
        }
        state
            .content_types
            .insert(definition.uid.clone(), definition.clone());
        Ok(definition.clone())
    }

    async fn update_content_type(
        &self,
        definition: &ContentTypeDefinition,
    ) -> Result<ContentTypeDefinition, RepositoryError> {
        self.admit(Some(RepositoryOp::UpdateContentType), &[&definition.uid], None)?;
        if definition.schema.is_empty() {
            return Err(RepositoryError::new(ErrorCategory::Validation, "schema must not be empty"));
        }
        let mut state = self.state.lock();
        let stored = state
            .content_types
            .get_mut(&definition.uid)
            .ok_or_else(|| RepositoryError::not_found(format!("content type {}", definition.uid)))?;
        *stored = definition.clone();
        Ok(definition.clone())
    }

    async fn fetch_content_type(&self, uid: &str) -> Result<ContentTypeDefinition, RepositoryError> {
        self.admit(None, &[uid], None)?;
        self.content_type(uid)
            .ok_or_else(|| RepositoryError::not_found(format!("content type {uid}")))
    }

    async fn list_locales(&self) -> Result<Vec<LocaleSpec>, RepositoryError> {
        self.admit(None, &[], None)?;
        Ok(self.state.lock().locales.clone())
    }
}

#[cfg(test)]
mod tests {
    use contentshift_core::{Block, ReferenceTargets};
    use serde_json::json;

    use super::*;

    fn repo() -> InMemoryRepository {
        let repo = InMemoryRepository::new("en-us");
        repo.seed_content_type(ContentTypeDefinition::new(
            "page",
            vec![
                FieldSchema::new("title", FieldKind::Plain { data_type: "text".into() }).required(),
                FieldSchema::new(
                    "parent",
                    FieldKind::Reference {
                        reference_to: ReferenceTargets::Single("page".into()),
                    },
                ),
            ],
        ));
        repo
    }

    fn payload(value: Value) -> RecordPayload {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn mandatory_and_reference_constraints_are_enforced() {
        let repo = repo();
        let err = repo
            .create_entry("page", "en-us", &payload(json!({ "parent": ["ghost"] })))
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Validation);
        assert!(err.field_errors.contains_key("title"));
        assert!(err.field_errors.contains_key("parent"));
        assert!(!err.is_already_exists());
    }

    #[tokio::test]
    async fn nested_mandatory_fields_are_enforced() {
        let repo = repo();
        repo.seed_content_type(ContentTypeDefinition::new(
            "landing",
            vec![
                FieldSchema::new("title", FieldKind::Plain { data_type: "text".into() }).required(),
                FieldSchema::new(
                    "seo",
                    FieldKind::Group {
                        schema: vec![FieldSchema::new(
                            "canonical",
                            FieldKind::Reference {
                                reference_to: ReferenceTargets::Single("page".into()),
                            },
                        )
                        .required()],
                    },
                ),
                FieldSchema::new(
                    "sections",
                    FieldKind::Blocks {
                        blocks: vec![Block {
                            uid: "hero".into(),
                            title: "Hero".into(),
                            schema: vec![FieldSchema::new(
                                "heading",
                                FieldKind::Plain { data_type: "text".into() },
                            )
                            .required()],
                        }],
                    },
                ),
            ],
        ));

        let err = repo
            .create_entry(
                "landing",
                "en-us",
                &payload(json!({
                    "title": "Launch",
                    "seo": { "canonical": [] },
                    "sections": [{ "hero": { "heading": "" } }]
                })),
            )
            .await
            .unwrap_err();
        assert!(err.field_errors.contains_key("seo.canonical"));
        assert!(err.field_errors.contains_key("sections.hero.heading"));
        assert!(!err.is_already_exists());

        let home = repo
            .create_entry("page", "en-us", &payload(json!({ "title": "Home" })))
            .await
            .unwrap();
        repo.create_entry(
            "landing",
            "en-us",
            &payload(json!({
                "title": "Launch",
                "seo": { "canonical": [home["uid"].clone()] },
                "sections": [{ "hero": { "heading": "Welcome" } }]
            })),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn duplicate_title_reads_as_already_exists() {
        let repo = repo();
        repo.create_entry("page", "en-us", &payload(json!({ "title": "Home" })))
            .await
            .unwrap();
        let err = repo
            .create_entry("page", "en-us", &payload(json!({ "title": "Home" })))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn non_master_create_adds_master_counterpart() {
        let repo = repo();
        let created = repo
            .create_entry("page", "fr-fr", &payload(json!({ "title": "Accueil" })))
            .await
            .unwrap();
        let uid = created["uid"].as_str().unwrap();

        assert!(repo.entry(uid, "en-us").is_some());
        repo.delete_entry("page", "en-us", uid).await.unwrap();
        assert!(repo.entry(uid, "en-us").is_none());
        assert_eq!(repo.entry(uid, "fr-fr").unwrap()["title"], "Accueil");
    }

    #[tokio::test]
    async fn update_localizes_and_bumps_version() {
        let repo = repo();
        let created = repo
            .create_entry("page", "en-us", &payload(json!({ "title": "Home" })))
            .await
            .unwrap();
        let uid = created["uid"].as_str().unwrap().to_string();

        let localized = repo
            .update_entry("page", "fr-fr", &uid, &payload(json!({ "title": "Accueil" })))
            .await
            .unwrap();
        assert_eq!(localized["_version"], 1);
        let updated = repo
            .update_entry("page", "en-us", &uid, &payload(json!({ "title": "Home 2" })))
            .await
            .unwrap();
        assert_eq!(updated["_version"], 2);
        assert_eq!(
            repo.find_entries_by_title("page", "fr-fr", "Accueil")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn injected_failures_are_scoped_by_locale() {
        let repo = repo();
        repo.inject_failure(
            RepositoryOp::CreateEntry,
            "Broken",
            Some("fr-fr"),
            RepositoryError::new(ErrorCategory::Other, "boom"),
        );
        assert!(repo
            .create_entry("page", "fr-fr", &payload(json!({ "title": "Broken" })))
            .await
            .is_err());
        assert!(repo
            .create_entry("page", "en-us", &payload(json!({ "title": "Broken" })))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn empty_schema_is_rejected() {
        let repo = repo();
        let err = repo
            .update_content_type(&ContentTypeDefinition::new("page", vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Validation);
    }
}
