//! Extension, plugin and global-field identifier rewrite for schemas.

use contentshift_core::{EntityKind, FieldKind, FieldSchema, ReferenceTargets};

use crate::storage::IdentityMapStore;

/// Rewrites a schema tree in place for the target repository.
///
/// - single-target `reference` fields become multi-target unless
///   `preserve_shape` is set
/// - extension bindings map through the extension map, falling back to the
///   marketplace-app map; unmapped bindings are kept
/// - `global_ref` targets map through the global-field map
/// - plugin lists map the same way as bindings, dropping plugins neither
///   map knows
pub fn lookup_extensions(schema: &mut [FieldSchema], maps: &IdentityMapStore, preserve_shape: bool) {
    for field in schema {
        if let Some(binding) = field.extension_uid.as_mut() {
            if let Some(mapped) = extension_id(maps, binding) {
                *binding = mapped;
            }
        }

        match &mut field.kind {
            FieldKind::Reference { reference_to } => {
                if !preserve_shape {
                    if let ReferenceTargets::Single(uid) = reference_to {
                        *reference_to = ReferenceTargets::Multiple(vec![std::mem::take(uid)]);
                    }
                }
            }
            FieldKind::GlobalRef {
                reference_to,
                schema,
            } => {
                if let Some(mapped) = maps.resolve(EntityKind::GlobalFields, reference_to) {
                    *reference_to = mapped;
                }
                lookup_extensions(schema, maps, preserve_shape);
            }
            FieldKind::Group { schema } => lookup_extensions(schema, maps, preserve_shape),
            FieldKind::Blocks { blocks } => {
                for block in blocks {
                    lookup_extensions(&mut block.schema, maps, preserve_shape);
                }
            }
            FieldKind::Json { plugins } | FieldKind::JsonRte { plugins, .. } => {
                *plugins = std::mem::take(plugins)
                    .into_iter()
                    .filter_map(|plugin| extension_id(maps, &plugin))
                    .collect();
            }
            FieldKind::Plain { .. }
            | FieldKind::File
            | FieldKind::TextRte { .. }
            | FieldKind::Taxonomy { .. } => {}
        }
    }
}

fn extension_id(maps: &IdentityMapStore, old: &str) -> Option<String> {
    maps.resolve(EntityKind::Extensions, old)
        .or_else(|| maps.resolve(EntityKind::MarketplaceApps, old))
}

#[cfg(test)]
mod tests {
    use contentshift_core::Block;

    use super::*;

    fn maps() -> IdentityMapStore {
        let maps = IdentityMapStore::in_memory();
        maps.seed(EntityKind::Extensions, [("ext_old", "ext_new")]);
        maps.seed(EntityKind::MarketplaceApps, [("app_old", "app_new")]);
        maps.seed(EntityKind::GlobalFields, [("seo", "seo_v2")]);
        maps
    }

    fn reference(uid: &str, target: &str) -> FieldSchema {
        FieldSchema::new(
            uid,
            FieldKind::Reference {
                reference_to: ReferenceTargets::Single(target.to_string()),
            },
        )
    }

    #[test]
    fn single_reference_is_wrapped_unless_preserved() {
        let mut schema = vec![reference("author", "person")];
        lookup_extensions(&mut schema, &maps(), false);
        assert_eq!(
            schema[0].kind,
            FieldKind::Reference {
                reference_to: ReferenceTargets::Multiple(vec!["person".to_string()])
            }
        );

        let mut schema = vec![reference("author", "person")];
        lookup_extensions(&mut schema, &maps(), true);
        assert!(matches!(
            &schema[0].kind,
            FieldKind::Reference { reference_to: ReferenceTargets::Single(t) } if t == "person"
        ));
    }

    #[test]
    fn bindings_fall_back_to_marketplace_apps() {
        let mut a = FieldSchema::new("a", FieldKind::Plain { data_type: "text".into() });
        a.extension_uid = Some("ext_old".into());
        let mut b = FieldSchema::new("b", FieldKind::Plain { data_type: "text".into() });
        b.extension_uid = Some("app_old".into());
        let mut c = FieldSchema::new("c", FieldKind::Plain { data_type: "text".into() });
        c.extension_uid = Some("unknown".into());
        let mut schema = vec![a, b, c];

        lookup_extensions(&mut schema, &maps(), false);

        assert_eq!(schema[0].extension_uid.as_deref(), Some("ext_new"));
        assert_eq!(schema[1].extension_uid.as_deref(), Some("app_new"));
        assert_eq!(schema[2].extension_uid.as_deref(), Some("unknown"));
    }

    #[test]
    fn unknown_plugins_are_dropped() {
        let mut schema = vec![FieldSchema::new(
            "body",
            FieldKind::Json {
                plugins: vec!["ext_old".into(), "gone".into(), "app_old".into()],
            },
        )];
        lookup_extensions(&mut schema, &maps(), false);
        assert_eq!(
            schema[0].kind,
            FieldKind::Json {
                plugins: vec!["ext_new".into(), "app_new".into()]
            }
        );
    }

    #[test]
    fn nested_schemas_are_rewritten() {
        let mut schema = vec![
            FieldSchema::new(
                "seo",
                FieldKind::GlobalRef {
                    reference_to: "seo".into(),
                    schema: vec![reference("canonical", "page")],
                },
            ),
            FieldSchema::new(
                "sections",
                FieldKind::Blocks {
                    blocks: vec![Block {
                        uid: "hero".into(),
                        title: "Hero".into(),
                        schema: vec![reference("cta", "page")],
                    }],
                },
            ),
        ];
        lookup_extensions(&mut schema, &maps(), false);

        let FieldKind::GlobalRef { reference_to, schema: nested } = &schema[0].kind else {
            panic!("expected global field");
        };
        assert_eq!(reference_to, "seo_v2");
        assert!(matches!(
            &nested[0].kind,
            FieldKind::Reference { reference_to } if reference_to.is_multiple()
        ));
        let FieldKind::Blocks { blocks } = &schema[1].kind else {
            panic!("expected blocks");
        };
        assert!(matches!(
            &blocks[0].schema[0].kind,
            FieldKind::Reference { reference_to } if reference_to.is_multiple()
        ));
    }
}
