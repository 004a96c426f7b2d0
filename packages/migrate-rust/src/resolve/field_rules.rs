//! Record identifiers embedded in field-rule operands.

use contentshift_core::{find_field, FieldKind, FieldRule, FieldSchema};
use serde_json::Value;

use crate::storage::IdentityMap;

/// Result of rewriting a content type's field rules.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRuleRewrite {
    /// Rules to push, in their original order.
    pub rules: Vec<FieldRule>,
    /// Whether any rule conditioned on a reference field.
    pub touches_references: bool,
    /// Number of rules dropped.
    pub dropped: usize,
}

/// Rewrites reference-field operands segment by segment through `entries`.
///
/// A rule is dropped when one of its conditions names a field absent from
/// `schema`, or when a reference operand resolves none of its `.`-delimited
/// segments. Segments without a mapping are kept as they are.
#[must_use]
pub fn rewrite_field_rules(
    rules: &[FieldRule],
    schema: &[FieldSchema],
    entries: &IdentityMap,
) -> FieldRuleRewrite {
    let mut touches_references = false;
    let mut kept = Vec::with_capacity(rules.len());

    'rules: for rule in rules {
        let mut rule = rule.clone();
        for condition in &mut rule.conditions {
            let Some(field) = find_field(schema, &condition.operand_field) else {
                continue 'rules;
            };
            if !matches!(field.kind, FieldKind::Reference { .. }) {
                continue;
            }
            touches_references = true;
            let Some(operand) = condition.value.as_str() else {
                continue 'rules;
            };
            let mut resolved_any = false;
            let segments: Vec<String> = operand
                .split('.')
                .map(|segment| match entries.get(segment) {
                    Some(new) => {
                        resolved_any = true;
                        new
                    }
                    None => segment.to_string(),
                })
                .collect();
            if !resolved_any {
                continue 'rules;
            }
            condition.value = Value::String(segments.join("."));
        }
        kept.push(rule);
    }

    FieldRuleRewrite {
        dropped: rules.len() - kept.len(),
        rules: kept,
        touches_references,
    }
}

#[cfg(test)]
mod tests {
    use contentshift_core::{FieldRuleAction, FieldRuleCondition, ReferenceTargets};
    use serde_json::json;

    use super::*;

    fn schema() -> Vec<FieldSchema> {
        vec![
            FieldSchema::new("title", FieldKind::Plain { data_type: "text".into() }),
            FieldSchema::new(
                "category",
                FieldKind::Reference {
                    reference_to: ReferenceTargets::Single("category".into()),
                },
            ),
        ]
    }

    fn rule(operand_field: &str, value: Value) -> FieldRule {
        FieldRule {
            conditions: vec![FieldRuleCondition {
                operand_field: operand_field.into(),
                operator: "equals".into(),
                value,
            }],
            match_type: "all".into(),
            actions: vec![FieldRuleAction {
                action: "show".into(),
                target_field: "title".into(),
            }],
            rule_type: None,
        }
    }

    fn entries() -> IdentityMap {
        let map = IdentityMap::new();
        map.insert("e1", "n1");
        map
    }

    #[test]
    fn reference_operands_are_rewritten_per_segment() {
        let rules = vec![rule("category", json!("e1.category"))];
        let rewrite = rewrite_field_rules(&rules, &schema(), &entries());
        assert!(rewrite.touches_references);
        assert_eq!(rewrite.dropped, 0);
        assert_eq!(rewrite.rules[0].conditions[0].value, "n1.category");
    }

    #[test]
    fn unresolvable_reference_rules_are_dropped() {
        let rules = vec![
            rule("category", json!("ghost")),
            rule("title", json!("Hello")),
        ];
        let rewrite = rewrite_field_rules(&rules, &schema(), &entries());
        assert!(rewrite.touches_references);
        assert_eq!(rewrite.dropped, 1);
        assert_eq!(rewrite.rules.len(), 1);
        assert_eq!(rewrite.rules[0].conditions[0].value, "Hello");
    }

    #[test]
    fn rules_on_missing_fields_are_dropped() {
        let rules = vec![rule("removed", json!("x"))];
        let rewrite = rewrite_field_rules(&rules, &schema(), &entries());
        assert!(!rewrite.touches_references);
        assert!(rewrite.rules.is_empty());
    }
}
