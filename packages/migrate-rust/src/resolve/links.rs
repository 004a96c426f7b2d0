//! Asset and record link rewrite for record payloads.
//!
//! The walk is driven by the content type's schema: only values of `file`,
//! `reference`, rich-text and container fields are inspected. Asset links
//! resolve through the asset and asset-URL maps, record links through the
//! record map.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use contentshift_core::{EntityKind, FieldKind, FieldSchema, RecordPayload, ASSET_TARGET};
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::storage::IdentityMapStore;

static ASSET_UID_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(asset_uid|data-sys-asset-uid)="([^"]*)""#).expect("asset uid pattern is valid")
});

static ENTRY_UID_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(data-sys-entry-uid)="([^"]*)""#).expect("entry uid pattern is valid")
});

static URL_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(src|href)="([^"]*)""#).expect("url pattern is valid"));

/// What to do with a record link whose target has no mapping yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedLinks {
    /// Remove the link; used while records are still being created.
    Strip,
    /// Leave the link as is; used once every record should be mapped.
    Keep,
}

/// Rewrites asset and record identifiers in `payload`.
///
/// Unresolved asset identifiers are always left untouched. Unresolved record
/// links in `reference` fields and JSON rich text are handled per `policy`;
/// those in HTML rich text are always left untouched.
///
/// Returns every record identifier that had no mapping.
pub fn lookup_links(
    payload: &mut RecordPayload,
    schema: &[FieldSchema],
    maps: &IdentityMapStore,
    policy: UnresolvedLinks,
) -> BTreeSet<String> {
    let mut walker = LinkWalker {
        maps,
        policy,
        unresolved: BTreeSet::new(),
    };
    walker.fields(payload, schema);
    walker.unresolved
}

struct LinkWalker<'a> {
    maps: &'a IdentityMapStore,
    policy: UnresolvedLinks,
    unresolved: BTreeSet<String>,
}

impl LinkWalker<'_> {
    fn fields(&mut self, container: &mut Map<String, Value>, schema: &[FieldSchema]) {
        for field in schema {
            if let Some(value) = container.get_mut(&field.uid) {
                self.value(value, field);
            }
        }
    }

    fn value(&mut self, value: &mut Value, field: &FieldSchema) {
        match &field.kind {
            FieldKind::File => self.assets(value),
            FieldKind::Reference { .. } => self.references(value),
            FieldKind::Group { schema } | FieldKind::GlobalRef { schema, .. } => match value {
                Value::Object(inner) => self.fields(inner, schema),
                Value::Array(items) => {
                    for inner in items.iter_mut().filter_map(Value::as_object_mut) {
                        self.fields(inner, schema);
                    }
                }
                _ => {}
            },
            FieldKind::Blocks { blocks } => {
                let Value::Array(items) = value else { return };
                for item in items.iter_mut().filter_map(Value::as_object_mut) {
                    for (block_uid, inner) in item.iter_mut() {
                        let Some(block) = blocks.iter().find(|b| &b.uid == block_uid) else {
                            continue;
                        };
                        if let Value::Object(inner) = inner {
                            self.fields(inner, &block.schema);
                        }
                    }
                }
            }
            FieldKind::JsonRte { .. } => match value {
                Value::Array(docs) => {
                    for doc in docs {
                        self.rte_node(doc);
                    }
                }
                doc => {
                    self.rte_node(doc);
                }
            },
            FieldKind::TextRte { .. } => match value {
                Value::String(html) => *html = self.html(html),
                Value::Array(items) => {
                    for item in items {
                        if let Value::String(html) = item {
                            *html = self.html(html);
                        }
                    }
                }
                _ => {}
            },
            FieldKind::Plain { .. } | FieldKind::Json { .. } | FieldKind::Taxonomy { .. } => {}
        }
    }

    fn asset_id(&self, old: &str) -> Option<String> {
        self.maps.resolve(EntityKind::Assets, old)
    }

    fn asset_url(&self, old: &str) -> Option<String> {
        self.maps.resolve(EntityKind::AssetUrls, old)
    }

    fn assets(&mut self, value: &mut Value) {
        match value {
            Value::String(uid) => {
                if let Some(new) = self.asset_id(uid) {
                    *uid = new;
                }
            }
            Value::Object(asset) => {
                if let Some(Value::String(uid)) = asset.get_mut("uid") {
                    if let Some(new) = self.asset_id(uid) {
                        *uid = new;
                    }
                }
                if let Some(Value::String(url)) = asset.get_mut("url") {
                    if let Some(new) = self.asset_url(url) {
                        *url = new;
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.assets(item);
                }
            }
            _ => {}
        }
    }

    /// Maps a record identifier, noting it when unmapped.
    fn record_id(&mut self, old: &str) -> Option<String> {
        let mapped = self.maps.resolve(EntityKind::Entries, old);
        if mapped.is_none() {
            self.unresolved.insert(old.to_string());
        }
        mapped
    }

    /// A single unresolved link that should be dropped leaves an empty list.
    fn references(&mut self, value: &mut Value) {
        match value {
            Value::Array(items) => items.retain_mut(|item| self.reference(item)),
            single => {
                if !self.reference(single) {
                    *single = Value::Array(Vec::new());
                }
            }
        }
    }

    /// Rewrites one reference value; false when it should be dropped.
    fn reference(&mut self, item: &mut Value) -> bool {
        let uid = match item {
            Value::String(uid) => uid,
            Value::Object(link) => {
                if link.get("_content_type_uid").and_then(Value::as_str) == Some(ASSET_TARGET) {
                    if let Some(Value::String(uid)) = link.get_mut("uid") {
                        if let Some(new) = self.asset_id(uid) {
                            *uid = new;
                        }
                    }
                    return true;
                }
                match link.get_mut("uid") {
                    Some(Value::String(uid)) => uid,
                    _ => return true,
                }
            }
            _ => return true,
        };
        match self.record_id(uid) {
            Some(new) => {
                *uid = new;
                true
            }
            None => self.policy == UnresolvedLinks::Keep,
        }
    }

    /// Rewrites one JSON rich-text node and its children; false when the
    /// node is an unresolved record embed that should be dropped.
    fn rte_node(&mut self, node: &mut Value) -> bool {
        let Value::Object(node) = node else {
            return true;
        };
        if let Some(Value::Object(attrs)) = node.get_mut("attrs") {
            let embed = attrs.get("type").and_then(Value::as_str).map(str::to_owned);
            match embed.as_deref() {
                Some("asset") => {
                    if let Some(Value::String(uid)) = attrs.get_mut("asset-uid") {
                        if let Some(new) = self.asset_id(uid) {
                            *uid = new;
                        }
                    }
                    if let Some(Value::String(url)) = attrs.get_mut("asset-link") {
                        if let Some(new) = self.asset_url(url) {
                            *url = new;
                        }
                    }
                }
                Some("entry") => {
                    if let Some(Value::String(uid)) = attrs.get_mut("entry-uid") {
                        match self.record_id(uid) {
                            Some(new) => *uid = new,
                            None if self.policy == UnresolvedLinks::Strip => return false,
                            None => {}
                        }
                    }
                }
                _ => {}
            }
        }
        if let Some(Value::Array(children)) = node.get_mut("children") {
            children.retain_mut(|child| self.rte_node(child));
        }
        true
    }

    fn html(&mut self, html: &str) -> String {
        let maps = self.maps;
        let html = ASSET_UID_ATTR.replace_all(html, |caps: &Captures<'_>| {
            let new = maps.resolve(EntityKind::Assets, &caps[2]);
            format!(r#"{}="{}""#, &caps[1], new.as_deref().unwrap_or(&caps[2]))
        });
        let html = URL_ATTR.replace_all(&html, |caps: &Captures<'_>| {
            let new = maps.resolve(EntityKind::AssetUrls, &caps[2]);
            format!(r#"{}="{}""#, &caps[1], new.as_deref().unwrap_or(&caps[2]))
        });
        let unresolved = &mut self.unresolved;
        ENTRY_UID_ATTR
            .replace_all(&html, |caps: &Captures<'_>| {
                let new = maps.resolve(EntityKind::Entries, &caps[2]);
                if new.is_none() {
                    unresolved.insert(caps[2].to_string());
                }
                format!(r#"{}="{}""#, &caps[1], new.as_deref().unwrap_or(&caps[2]))
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use contentshift_core::{Block, ReferenceTargets};
    use serde_json::json;

    use super::*;

    fn maps() -> IdentityMapStore {
        let maps = IdentityMapStore::in_memory();
        maps.seed(EntityKind::Entries, [("e1", "n1"), ("e2", "n2")]);
        maps.seed(EntityKind::Assets, [("a1", "b1")]);
        maps.seed(
            EntityKind::AssetUrls,
            [("https://old.example/a1.png", "https://new.example/b1.png")],
        );
        maps
    }

    fn reference(uid: &str) -> FieldSchema {
        FieldSchema::new(
            uid,
            FieldKind::Reference {
                reference_to: ReferenceTargets::Multiple(vec!["page".into()]),
            },
        )
    }

    fn payload(value: Value) -> RecordPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn reference_links_are_mapped_or_stripped() {
        let schema = vec![reference("related")];
        let mut record = payload(json!({
            "related": [
                { "uid": "e1", "_content_type_uid": "page" },
                { "uid": "ghost", "_content_type_uid": "page" },
                "e2"
            ]
        }));

        let unresolved = lookup_links(&mut record, &schema, &maps(), UnresolvedLinks::Strip);

        assert_eq!(
            record["related"],
            json!([{ "uid": "n1", "_content_type_uid": "page" }, "n2"])
        );
        assert_eq!(unresolved, BTreeSet::from(["ghost".to_string()]));
    }

    #[test]
    fn single_valued_references_are_mapped_or_emptied() {
        let schema = vec![reference("parent"), reference("sibling")];
        let mut record = payload(json!({
            "parent": { "uid": "ghost", "_content_type_uid": "page" },
            "sibling": "e1"
        }));

        let unresolved = lookup_links(&mut record, &schema, &maps(), UnresolvedLinks::Strip);

        assert_eq!(record["parent"], json!([]));
        assert_eq!(record["sibling"], "n1");
        assert_eq!(unresolved, BTreeSet::from(["ghost".to_string()]));

        let mut kept = payload(json!({ "parent": { "uid": "ghost", "_content_type_uid": "page" } }));
        lookup_links(&mut kept, &schema, &maps(), UnresolvedLinks::Keep);
        assert_eq!(kept["parent"]["uid"], "ghost");
    }

    #[test]
    fn keep_policy_leaves_unresolved_links() {
        let schema = vec![reference("related")];
        let mut record = payload(json!({
            "related": [{ "uid": "ghost", "_content_type_uid": "page" }]
        }));
        let unresolved = lookup_links(&mut record, &schema, &maps(), UnresolvedLinks::Keep);
        assert_eq!(record["related"][0]["uid"], "ghost");
        assert!(unresolved.contains("ghost"));
    }

    #[test]
    fn file_fields_map_uid_and_url() {
        let schema = vec![
            FieldSchema::new("image", FieldKind::File),
            FieldSchema::new("raw", FieldKind::File),
        ];
        let mut record = payload(json!({
            "image": { "uid": "a1", "url": "https://old.example/a1.png" },
            "raw": ["a1", "a9"]
        }));
        lookup_links(&mut record, &schema, &maps(), UnresolvedLinks::Strip);
        assert_eq!(record["image"]["uid"], "b1");
        assert_eq!(record["image"]["url"], "https://new.example/b1.png");
        assert_eq!(record["raw"], json!(["b1", "a9"]));
    }

    #[test]
    fn groups_and_blocks_are_walked() {
        let schema = vec![
            FieldSchema::new(
                "seo",
                FieldKind::Group {
                    schema: vec![reference("canonical")],
                },
            ),
            FieldSchema::new(
                "sections",
                FieldKind::Blocks {
                    blocks: vec![Block {
                        uid: "hero".into(),
                        title: "Hero".into(),
                        schema: vec![FieldSchema::new("image", FieldKind::File)],
                    }],
                },
            ),
        ];
        let mut record = payload(json!({
            "seo": { "canonical": ["e2"] },
            "sections": [{ "hero": { "image": "a1" } }, { "other": { "image": "a1" } }]
        }));
        lookup_links(&mut record, &schema, &maps(), UnresolvedLinks::Keep);
        assert_eq!(record["seo"]["canonical"], json!(["n2"]));
        assert_eq!(record["sections"][0]["hero"]["image"], "b1");
        assert_eq!(record["sections"][1]["other"]["image"], "a1");
    }

    #[test]
    fn json_rte_embeds_are_rewritten() {
        let schema = vec![FieldSchema::new(
            "body",
            FieldKind::JsonRte {
                rich_text: true,
                embed_entry: true,
                reference_to: vec!["page".into(), "sys_assets".into()],
                plugins: vec![],
            },
        )];
        let doc = json!({
            "type": "doc",
            "children": [
                { "type": "reference", "attrs": { "type": "asset", "asset-uid": "a1",
                  "asset-link": "https://old.example/a1.png" }, "children": [] },
                { "type": "reference", "attrs": { "type": "entry", "entry-uid": "e1" }, "children": [] },
                { "type": "p", "children": [
                    { "type": "reference", "attrs": { "type": "entry", "entry-uid": "ghost" }, "children": [] },
                    { "text": "hello" }
                ]}
            ]
        });

        let mut stripped = payload(json!({ "body": doc.clone() }));
        lookup_links(&mut stripped, &schema, &maps(), UnresolvedLinks::Strip);
        let children = &stripped["body"]["children"];
        assert_eq!(children[0]["attrs"]["asset-uid"], "b1");
        assert_eq!(children[0]["attrs"]["asset-link"], "https://new.example/b1.png");
        assert_eq!(children[1]["attrs"]["entry-uid"], "n1");
        assert_eq!(children[2]["children"], json!([{ "text": "hello" }]));

        let mut kept = payload(json!({ "body": doc }));
        let unresolved = lookup_links(&mut kept, &schema, &maps(), UnresolvedLinks::Keep);
        assert_eq!(kept["body"]["children"][2]["children"][0]["attrs"]["entry-uid"], "ghost");
        assert!(unresolved.contains("ghost"));
    }

    #[test]
    fn html_rte_attributes_are_rewritten() {
        let schema = vec![FieldSchema::new(
            "body",
            FieldKind::TextRte {
                rich_text: true,
                embed_entry: true,
                reference_to: vec![],
            },
        )];
        let mut record = payload(json!({
            "body": concat!(
                r#"<img asset_uid="a1" src="https://old.example/a1.png"/>"#,
                r#"<div data-sys-entry-uid="e1"></div><div data-sys-entry-uid="ghost"></div>"#
            )
        }));
        let unresolved = lookup_links(&mut record, &schema, &maps(), UnresolvedLinks::Strip);
        assert_eq!(
            record["body"],
            concat!(
                r#"<img asset_uid="b1" src="https://new.example/b1.png"/>"#,
                r#"<div data-sys-entry-uid="n1"></div><div data-sys-entry-uid="ghost"></div>"#
            )
        );
        assert!(unresolved.contains("ghost"));
    }
}
