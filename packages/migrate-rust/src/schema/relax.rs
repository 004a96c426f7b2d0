//! Schema constraint relaxation.
//!
//! Both walkers mutate the schema tree in place and accumulate into the
//! caller's [`ConstraintFlags`]; neither returns a new tree.

use std::collections::BTreeSet;

use contentshift_core::{ConstraintFlags, FieldKind, FieldSchema, ASSET_TARGET};
use dashmap::DashMap;
use tracing::debug;

use crate::error::RepositoryError;
use crate::traits::ContentRepository;

/// Clears mandatory/unique on every field except `title` and tags the
/// reference-bearing fields.
pub fn relax(schema: &mut [FieldSchema], flags: &mut ConstraintFlags) {
    for field in schema {
        if !field.is_title() && (field.mandatory || field.unique) {
            field.mandatory = false;
            field.unique = false;
            flags.suppressed = true;
        }
        match &mut field.kind {
            FieldKind::Group { schema } | FieldKind::GlobalRef { schema, .. } => {
                relax(schema, flags);
            }
            FieldKind::Blocks { blocks } => {
                for block in blocks {
                    relax(&mut block.schema, flags);
                }
            }
            FieldKind::Reference { .. } => flags.has_references = true,
            FieldKind::JsonRte {
                rich_text,
                embed_entry,
                ..
            } => {
                if *rich_text {
                    flags.has_json_rte = true;
                    if *embed_entry {
                        flags.has_json_rte_embedded = true;
                    }
                }
            }
            FieldKind::TextRte {
                rich_text,
                embed_entry,
                ..
            } => {
                if *rich_text {
                    flags.has_rte = true;
                    if *embed_entry {
                        flags.has_rte_embedded = true;
                    }
                }
            }
            FieldKind::Plain { .. }
            | FieldKind::File
            | FieldKind::Json { .. }
            | FieldKind::Taxonomy { .. } => {}
        }
    }
}

/// Cached answers to "does this content type exist on the target?".
#[derive(Debug, Default)]
pub struct ContentTypePresence {
    known: DashMap<String, bool>,
}

impl ContentTypePresence {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `uid` exists remotely, fetching it on first ask.
    ///
    /// # Errors
    ///
    /// Returns the repository error for anything other than "not found".
    pub async fn exists(
        &self,
        repository: &dyn ContentRepository,
        uid: &str,
    ) -> Result<bool, RepositoryError> {
        if let Some(known) = self.known.get(uid) {
            return Ok(*known);
        }
        let exists = match repository.fetch_content_type(uid).await {
            Ok(_) => true,
            Err(err) if err.is_not_found() => false,
            Err(err) => return Err(err),
        };
        self.known.insert(uid.to_string(), exists);
        Ok(exists)
    }

    /// Records an answer without asking the repository.
    pub fn mark(&self, uid: impl Into<String>, exists: bool) {
        self.known.insert(uid.into(), exists);
    }

    /// Content types known to be missing.
    #[must_use]
    pub fn missing(&self) -> BTreeSet<String> {
        self.known
            .iter()
            .filter(|entry| !*entry.value())
            .map(|entry| entry.key().clone())
            .collect()
    }
}

/// [`relax`], then checks every referenced content type against the
/// target repository and removes reference fields with a missing target.
///
/// Rich-text fields allowing several embed targets, at least one of them a
/// content type, are narrowed to assets only.
///
/// # Errors
///
/// Returns the first repository error other than "not found" met while
/// checking targets. The schema is left relaxed but unpruned in that case.
pub async fn relax_with_verification(
    schema: &mut Vec<FieldSchema>,
    flags: &mut ConstraintFlags,
    repository: &dyn ContentRepository,
    presence: &ContentTypePresence,
) -> Result<(), RepositoryError> {
    relax(schema, flags);

    let mut missing = BTreeSet::new();
    for target in referenced_content_types(schema) {
        if !presence.exists(repository, &target).await? {
            debug!(content_type = %target, "reference target missing on target repository");
            missing.insert(target);
        }
    }

    prune_missing_references(schema, &missing, flags);
    narrow_rich_text_targets(schema, flags);
    Ok(())
}

/// Every content type a `reference` field anywhere in the tree points at.
#[must_use]
pub fn referenced_content_types(schema: &[FieldSchema]) -> BTreeSet<String> {
    let mut targets = BTreeSet::new();
    collect_targets(schema, &mut targets);
    targets
}

fn collect_targets(schema: &[FieldSchema], targets: &mut BTreeSet<String>) {
    for field in schema {
        match &field.kind {
            FieldKind::Reference { reference_to } => {
                targets.extend(reference_to.targets().iter().cloned());
            }
            FieldKind::Group { schema } | FieldKind::GlobalRef { schema, .. } => {
                collect_targets(schema, targets);
            }
            FieldKind::Blocks { blocks } => {
                for block in blocks {
                    collect_targets(&block.schema, targets);
                }
            }
            _ => {}
        }
    }
}

/// Removes `reference` fields pointing at any content type in `missing`.
///
/// A field list emptied by removal gets the placeholder field so the
/// content type stays creatable.
pub fn prune_missing_references(
    schema: &mut Vec<FieldSchema>,
    missing: &BTreeSet<String>,
    flags: &mut ConstraintFlags,
) {
    if missing.is_empty() {
        return;
    }
    let before = schema.len();
    let mut i = 0;
    while i < schema.len() {
        let dangling = matches!(
            &schema[i].kind,
            FieldKind::Reference { reference_to }
                if reference_to.targets().iter().any(|t| missing.contains(t))
        );
        if dangling {
            schema.remove(i);
            flags.suppressed = true;
            continue;
        }
        match &mut schema[i].kind {
            FieldKind::Group { schema: nested } | FieldKind::GlobalRef { schema: nested, .. } => {
                prune_missing_references(nested, missing, flags);
            }
            FieldKind::Blocks { blocks } => {
                for block in blocks {
                    prune_missing_references(&mut block.schema, missing, flags);
                }
            }
            _ => {}
        }
        i += 1;
    }
    if before > 0 && schema.is_empty() {
        schema.push(FieldSchema::placeholder());
    }
}

fn narrow_rich_text_targets(schema: &mut [FieldSchema], flags: &mut ConstraintFlags) {
    for field in schema {
        match &mut field.kind {
            FieldKind::JsonRte { reference_to, .. } | FieldKind::TextRte { reference_to, .. } => {
                if reference_to.len() > 1 && reference_to.iter().any(|t| t != ASSET_TARGET) {
                    *reference_to = vec![ASSET_TARGET.to_string()];
                    flags.suppressed = true;
                }
            }
            FieldKind::Group { schema } | FieldKind::GlobalRef { schema, .. } => {
                narrow_rich_text_targets(schema, flags);
            }
            FieldKind::Blocks { blocks } => {
                for block in blocks {
                    narrow_rich_text_targets(&mut block.schema, flags);
                }
            }
            _ => {}
        }
    }
}

/// Global fields whose nested schema carries constraints or references and
/// therefore needs the deferred repair pass once records exist.
#[must_use]
pub fn global_fields_needing_repair(schema: &[FieldSchema]) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    for field in schema {
        match &field.kind {
            FieldKind::GlobalRef {
                reference_to,
                schema: nested,
            } => {
                let mut flags = ConstraintFlags::default();
                let mut copy = nested.clone();
                relax(&mut copy, &mut flags);
                if flags.suppressed || flags.needs_reference_repair() {
                    found.insert(reference_to.clone());
                }
            }
            FieldKind::Group { schema } => found.extend(global_fields_needing_repair(schema)),
            FieldKind::Blocks { blocks } => {
                for block in blocks {
                    found.extend(global_fields_needing_repair(&block.schema));
                }
            }
            _ => {}
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use contentshift_core::{Block, ContentTypeDefinition, ReferenceTargets, PLACEHOLDER_FIELD_UID};

    use super::*;
    use crate::repository::InMemoryRepository;

    fn text(uid: &str) -> FieldSchema {
        FieldSchema::new(uid, FieldKind::Plain { data_type: "text".into() })
    }

    fn reference(uid: &str, targets: &[&str]) -> FieldSchema {
        FieldSchema::new(
            uid,
            FieldKind::Reference {
                reference_to: ReferenceTargets::Multiple(
                    targets.iter().map(|t| (*t).to_string()).collect(),
                ),
            },
        )
    }

    fn json_rte(uid: &str, targets: &[&str]) -> FieldSchema {
        FieldSchema::new(
            uid,
            FieldKind::JsonRte {
                rich_text: true,
                embed_entry: true,
                reference_to: targets.iter().map(|t| (*t).to_string()).collect(),
                plugins: vec![],
            },
        )
    }

    #[test]
    fn relax_keeps_title_constraints() {
        let mut title = text("title");
        title.mandatory = true;
        title.unique = true;
        let mut schema = vec![
            title,
            text("summary").required(),
            reference("author", &["person"]),
        ];
        let mut flags = ConstraintFlags::default();

        relax(&mut schema, &mut flags);

        assert!(schema[0].mandatory && schema[0].unique);
        assert!(!schema[1].mandatory);
        assert!(flags.suppressed);
        assert!(flags.has_references);
    }

    #[test]
    fn relax_walks_groups_and_blocks() {
        let mut schema = vec![
            FieldSchema::new(
                "meta",
                FieldKind::Group {
                    schema: vec![text("code").required()],
                },
            ),
            FieldSchema::new(
                "sections",
                FieldKind::Blocks {
                    blocks: vec![Block {
                        uid: "hero".into(),
                        title: "Hero".into(),
                        schema: vec![json_rte("body", &["sys_assets"])],
                    }],
                },
            ),
        ];
        let mut flags = ConstraintFlags::default();
        relax(&mut schema, &mut flags);

        assert!(!schema[0].nested().unwrap()[0].mandatory);
        assert!(flags.suppressed);
        assert!(flags.has_json_rte);
        assert!(flags.has_json_rte_embedded);
        assert!(!flags.has_references);
    }

    #[test]
    fn unconstrained_schema_is_not_suppressed() {
        let mut schema = vec![text("title"), text("body")];
        let mut flags = ConstraintFlags::default();
        relax(&mut schema, &mut flags);
        assert_eq!(flags, ConstraintFlags::default());
    }

    #[test]
    fn missing_reference_target_removes_field_in_place() {
        let mut schema = vec![
            text("a"),
            reference("gone1", &["ghost"]),
            reference("gone2", &["page", "ghost"]),
            reference("kept", &["page"]),
        ];
        let missing = BTreeSet::from(["ghost".to_string()]);
        let mut flags = ConstraintFlags::default();
        prune_missing_references(&mut schema, &missing, &mut flags);

        let uids: Vec<_> = schema.iter().map(|f| f.uid.as_str()).collect();
        assert_eq!(uids, ["a", "kept"]);
        assert!(flags.suppressed);
    }

    #[test]
    fn emptied_nested_schema_gets_placeholder() {
        let mut schema = vec![FieldSchema::new(
            "meta",
            FieldKind::Group {
                schema: vec![reference("gone", &["ghost"])],
            },
        )];
        let missing = BTreeSet::from(["ghost".to_string()]);
        prune_missing_references(&mut schema, &missing, &mut ConstraintFlags::default());
        let nested = schema[0].nested().unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].uid, PLACEHOLDER_FIELD_UID);
    }

    #[test]
    fn global_fields_with_constraints_are_reported() {
        let schema = vec![
            FieldSchema::new(
                "seo",
                FieldKind::GlobalRef {
                    reference_to: "seo_gf".into(),
                    schema: vec![text("keywords").required()],
                },
            ),
            FieldSchema::new(
                "footer",
                FieldKind::GlobalRef {
                    reference_to: "footer_gf".into(),
                    schema: vec![text("note")],
                },
            ),
        ];
        assert_eq!(
            global_fields_needing_repair(&schema),
            BTreeSet::from(["seo_gf".to_string()])
        );
    }

    #[tokio::test]
    async fn sole_missing_reference_leaves_placeholder() {
        let repo = InMemoryRepository::new("en-us");
        let mut schema = vec![reference("link", &["ghost"]).required()];
        let mut flags = ConstraintFlags::default();

        relax_with_verification(&mut schema, &mut flags, &repo, &ContentTypePresence::new())
            .await
            .unwrap();

        assert_eq!(schema.len(), 1);
        assert_eq!(schema[0].uid, PLACEHOLDER_FIELD_UID);
        assert!(flags.suppressed);
    }

    #[tokio::test]
    async fn multi_target_rich_text_is_narrowed_to_assets() {
        let repo = InMemoryRepository::new("en-us");
        repo.seed_content_type(ContentTypeDefinition::new("page", vec![text("title")]));
        let mut schema = vec![
            json_rte("body", &["page", "sys_assets"]),
            json_rte("assets_only", &["sys_assets"]),
            reference("link", &["page"]),
        ];
        let mut flags = ConstraintFlags::default();
        let presence = ContentTypePresence::new();

        relax_with_verification(&mut schema, &mut flags, &repo, &presence)
            .await
            .unwrap();

        let FieldKind::JsonRte { reference_to, .. } = &schema[0].kind else {
            panic!("expected json rte");
        };
        assert_eq!(reference_to, &["sys_assets".to_string()]);
        assert_eq!(schema.len(), 3);
        assert!(flags.suppressed);
        assert!(presence.missing().is_empty());
    }

    #[tokio::test]
    async fn presence_is_cached() {
        let repo = InMemoryRepository::new("en-us");
        let presence = ContentTypePresence::new();
        assert!(!presence.exists(&repo, "ghost").await.unwrap());
        repo.seed_content_type(ContentTypeDefinition::new("ghost", vec![text("title")]));
        assert!(!presence.exists(&repo, "ghost").await.unwrap());
        assert_eq!(presence.missing(), BTreeSet::from(["ghost".to_string()]));
    }
}
