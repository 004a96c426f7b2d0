//! Content type schemas: field trees, field rules, and relaxation flags.
//!
//! A content type's schema is a recursive tree of [`FieldSchema`] nodes. The
//! node's shape is carried by [`FieldKind`], a sum type that the schema
//! walkers match exhaustively. Attributes the engine never interprets
//! (display hints, validation formats, editor settings) live in the opaque
//! `field_metadata` map and are preserved verbatim.
//!
//! # Wire format
//!
//! Fields serialize as flat JSON objects with a `kind` discriminator:
//!
//! ```json
//! { "uid": "category", "kind": "reference", "reference_to": ["category"], "mandatory": true }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of the field that keeps its constraints during relaxation.
pub const TITLE_FIELD: &str = "title";

/// Reference target naming the asset library rather than a content type.
pub const ASSET_TARGET: &str = "sys_assets";

/// Identifier of the field injected when a schema would otherwise be empty.
pub const PLACEHOLDER_FIELD_UID: &str = "dummy_test";

// ---------------------------------------------------------------------------
// FieldSchema
// ---------------------------------------------------------------------------

/// One node of a content type's field tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field identifier, unique among its siblings.
    pub uid: String,
    /// Human-readable label.
    #[serde(default)]
    pub display_name: String,
    /// Whether a value must be present in every record.
    #[serde(default)]
    pub mandatory: bool,
    /// Whether values must be unique across records of the content type.
    #[serde(default)]
    pub unique: bool,
    /// Whether the field holds a list of values.
    #[serde(default)]
    pub multiple: bool,
    /// Custom-field extension bound to this field, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_uid: Option<String>,
    /// Shape of the field.
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Attributes carried through untouched.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub field_metadata: Map<String, Value>,
}

impl FieldSchema {
    /// Creates an optional, non-unique, single-valued field of the given kind.
    #[must_use]
    pub fn new(uid: impl Into<String>, kind: FieldKind) -> Self {
        let uid = uid.into();
        Self {
            display_name: uid.clone(),
            uid,
            mandatory: false,
            unique: false,
            multiple: false,
            extension_uid: None,
            kind,
            field_metadata: Map::new(),
        }
    }

    /// Returns the same field marked mandatory.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Returns the same field marked as holding a list of values.
    #[must_use]
    pub fn many(mut self) -> Self {
        self.multiple = true;
        self
    }

    /// The plain-text field injected into schemas that would become empty.
    #[must_use]
    pub fn placeholder() -> Self {
        let mut field = Self::new(
            PLACEHOLDER_FIELD_UID,
            FieldKind::Plain {
                data_type: "text".to_string(),
            },
        );
        field.display_name = "dummyTest".to_string();
        field
    }

    /// Whether this is the content type's title field.
    #[must_use]
    pub fn is_title(&self) -> bool {
        self.uid == TITLE_FIELD
    }

    /// Nested field list for container kinds (`group`, `global_ref`).
    #[must_use]
    pub fn nested(&self) -> Option<&[FieldSchema]> {
        match &self.kind {
            FieldKind::Group { schema } | FieldKind::GlobalRef { schema, .. } => Some(schema),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// FieldKind
// ---------------------------------------------------------------------------

/// Shape of a schema field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Scalar value: text, number, boolean, date, link.
    Plain {
        /// Underlying scalar type name, passed through to the repository.
        #[serde(default = "default_data_type")]
        data_type: String,
    },
    /// Asset link (single asset or list of assets).
    File,
    /// Free-form JSON value, optionally edited through plugins.
    Json {
        /// Plugin extension identifiers.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        plugins: Vec<String>,
    },
    /// Inline group of nested fields.
    Group {
        /// Nested fields.
        #[serde(default)]
        schema: Vec<FieldSchema>,
    },
    /// Embedded global field; the nested schema is owned by the global field.
    GlobalRef {
        /// Identifier of the referenced global field.
        reference_to: String,
        /// Snapshot of the global field's schema.
        #[serde(default)]
        schema: Vec<FieldSchema>,
    },
    /// Modular blocks: a list of alternative nested schemas.
    Blocks {
        /// Available block shapes.
        #[serde(default)]
        blocks: Vec<Block>,
    },
    /// Link to records of one or more content types.
    Reference {
        /// Referenced content type identifiers.
        reference_to: ReferenceTargets,
    },
    /// Structured (JSON document) rich text.
    JsonRte {
        /// Whether the field is configured as a rich-text editor.
        #[serde(default)]
        rich_text: bool,
        /// Whether other records may be embedded in the document.
        #[serde(default)]
        embed_entry: bool,
        /// Allowed embedding targets (content types and/or `sys_assets`).
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        reference_to: Vec<String>,
        /// Editor plugin extension identifiers.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        plugins: Vec<String>,
    },
    /// HTML rich text.
    TextRte {
        /// Whether the field is configured as a rich-text editor.
        #[serde(default)]
        rich_text: bool,
        /// Whether other records may be embedded in the markup.
        #[serde(default)]
        embed_entry: bool,
        /// Allowed embedding targets (content types and/or `sys_assets`).
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        reference_to: Vec<String>,
    },
    /// Taxonomy terms drawn from one or more taxonomies.
    Taxonomy {
        /// Taxonomies the field draws terms from.
        #[serde(default)]
        taxonomies: Vec<TaxonomyBinding>,
    },
}

fn default_data_type() -> String {
    "text".to_string()
}

/// Target list of a reference field.
///
/// `Single` is the legacy one-target shape; `Multiple` is the multi-target
/// representation that the extension pass normalizes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReferenceTargets {
    /// One content type, stored as a bare identifier.
    Single(String),
    /// Any number of content types.
    Multiple(Vec<String>),
}

impl ReferenceTargets {
    /// The referenced content type identifiers regardless of representation.
    #[must_use]
    pub fn targets(&self) -> &[String] {
        match self {
            Self::Single(uid) => std::slice::from_ref(uid),
            Self::Multiple(uids) => uids,
        }
    }

    /// Whether this uses the multi-target representation.
    #[must_use]
    pub fn is_multiple(&self) -> bool {
        matches!(self, Self::Multiple(_))
    }
}

/// One alternative shape inside a `blocks` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block identifier; record values are keyed by it.
    pub uid: String,
    /// Human-readable label.
    #[serde(default)]
    pub title: String,
    /// Fields of this block.
    #[serde(default)]
    pub schema: Vec<FieldSchema>,
}

/// A taxonomy a taxonomy field draws from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyBinding {
    /// Taxonomy identifier.
    pub taxonomy_uid: String,
    /// Upper bound on terms per record, if configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_terms: Option<u32>,
}

// ---------------------------------------------------------------------------
// ContentTypeDefinition
// ---------------------------------------------------------------------------

/// A content type: identifier, title, field tree, and conditional field rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentTypeDefinition {
    /// Content type identifier.
    pub uid: String,
    /// Human-readable title.
    #[serde(default)]
    pub title: String,
    /// Root field list. Never empty once pushed to a repository.
    #[serde(default)]
    pub schema: Vec<FieldSchema>,
    /// Conditional visibility rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_rules: Vec<FieldRule>,
    /// Content type options carried through untouched.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl ContentTypeDefinition {
    /// Creates a content type with the given root schema and no field rules.
    #[must_use]
    pub fn new(uid: impl Into<String>, schema: Vec<FieldSchema>) -> Self {
        let uid = uid.into();
        Self {
            title: uid.clone(),
            uid,
            schema,
            field_rules: Vec::new(),
            options: Map::new(),
        }
    }

    /// Looks up a field by a `.`-delimited path through groups and global fields.
    #[must_use]
    pub fn find_field(&self, path: &str) -> Option<&FieldSchema> {
        find_field(&self.schema, path)
    }
}

/// Looks up a field by a `.`-delimited path through groups and global fields.
#[must_use]
pub fn find_field<'a>(schema: &'a [FieldSchema], path: &str) -> Option<&'a FieldSchema> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = schema.iter().find(|f| f.uid == first)?;
    for segment in segments {
        current = current.nested()?.iter().find(|f| f.uid == segment)?;
    }
    Some(current)
}

/// A conditional rule showing or hiding fields based on other fields' values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Conditions evaluated against the record.
    #[serde(default)]
    pub conditions: Vec<FieldRuleCondition>,
    /// `"all"` or `"any"`.
    #[serde(default = "default_match_type")]
    pub match_type: String,
    /// Actions applied when the conditions match.
    #[serde(default)]
    pub actions: Vec<FieldRuleAction>,
    /// Rule scope as reported by the repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_type: Option<String>,
}

fn default_match_type() -> String {
    "all".to_string()
}

/// One condition of a [`FieldRule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRuleCondition {
    /// Field the condition inspects.
    pub operand_field: String,
    /// Comparison operator (`equals`, `contains`, ...).
    pub operator: String,
    /// Operand value. For reference fields, a `.`-delimited identifier chain.
    pub value: Value,
}

/// One action of a [`FieldRule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRuleAction {
    /// `show` or `hide`.
    pub action: String,
    /// Field the action applies to.
    pub target_field: String,
}

// ---------------------------------------------------------------------------
// ConstraintFlags
// ---------------------------------------------------------------------------

/// Per-content-type outcome of schema relaxation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintFlags {
    /// At least one constraint was cleared or the schema was otherwise altered.
    pub suppressed: bool,
    /// The schema contains reference fields.
    pub has_references: bool,
    /// The schema contains JSON rich-text fields.
    pub has_json_rte: bool,
    /// A JSON rich-text field allows embedded records.
    pub has_json_rte_embedded: bool,
    /// The schema contains HTML rich-text fields.
    pub has_rte: bool,
    /// An HTML rich-text field allows embedded records.
    pub has_rte_embedded: bool,
}

impl ConstraintFlags {
    /// Whether records of this content type can hold record-to-record links
    /// and therefore need the reference-repair pass.
    #[must_use]
    pub fn needs_reference_repair(&self) -> bool {
        self.has_references || self.has_json_rte_embedded || self.has_rte_embedded
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
