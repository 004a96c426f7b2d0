//! `contentshift` core: content type schemas, record payloads, and identity map kinds.

pub mod locale;
pub mod schema;
pub mod types;

pub use locale::{master_first, LocaleSpec};
pub use schema::{
    find_field, Block, ConstraintFlags, ContentTypeDefinition, FieldKind, FieldRule,
    FieldRuleAction, FieldRuleCondition, FieldSchema, ReferenceTargets, TaxonomyBinding,
    ASSET_TARGET, PLACEHOLDER_FIELD_UID, TITLE_FIELD,
};
pub use types::{
    record_title, record_uid, strip_system_keys, AutoCreatedRecord, EntityKind, RecordPayload,
    VariantEntry, SYSTEM_KEYS,
};

