//! Property Tests
//!
//! Order independence of `uniqueItems`, agreement between the looped and
//! unrolled `required`/`enum` checks, and inlining invariance.

use std::sync::Arc;

use familiar_validator::{SchemaValidator, ValidatorOptions};
use proptest::prelude::*;
use serde_json::{json, Value};

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-3i64..3).prop_map(Value::from),
        "[ab]{0,2}".prop_map(Value::String),
    ]
}

fn item() -> impl Strategy<Value = Value> {
    scalar().prop_recursive(2, 8, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(Value::Array),
            prop::collection::btree_map("[xy]", inner, 0..3)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

fn has_equal_pair(items: &[Value]) -> bool {
    items
        .iter()
        .enumerate()
        .any(|(i, a)| items.iter().skip(i + 1).any(|b| a == b))
}

fn validate(facade: &SchemaValidator, schema: &Arc<Value>, data: &Value) -> bool {
    facade.compile(schema).unwrap().validate(data).unwrap()
}

proptest! {
    #[test]
    fn unique_items_matches_pairwise_equality(items in prop::collection::vec(item(), 0..6)) {
        let facade = SchemaValidator::default();
        let schema = Arc::new(json!({"uniqueItems": true}));
        let valid = validate(&facade, &schema, &Value::Array(items.clone()));
        prop_assert_eq!(valid, !has_equal_pair(&items));
    }

    #[test]
    fn unique_items_ignores_order(items in prop::collection::vec(item(), 0..6), rotate in 0usize..6) {
        let facade = SchemaValidator::default();
        let schema = Arc::new(json!({"uniqueItems": true}));
        let mut shuffled = items.clone();
        if !shuffled.is_empty() {
            let by = rotate % shuffled.len();
            shuffled.rotate_left(by);
        }
        shuffled.reverse();
        prop_assert_eq!(
            validate(&facade, &schema, &Value::Array(items)),
            validate(&facade, &schema, &Value::Array(shuffled))
        );
    }

    #[test]
    fn looped_and_unrolled_required_agree(
        names in prop::collection::btree_set("[a-e]", 1..5),
        present in prop::collection::btree_set("[a-f]", 0..6),
        all_errors in any::<bool>(),
    ) {
        let schema = Arc::new(json!({"required": names.iter().collect::<Vec<_>>()}));
        let data = Value::Object(present.into_iter().map(|k| (k, json!(1))).collect());

        let unrolled = SchemaValidator::new(ValidatorOptions {
            all_errors,
            loop_required: 1000,
            ..Default::default()
        });
        let looped = SchemaValidator::new(ValidatorOptions {
            all_errors,
            loop_required: 0,
            ..Default::default()
        });
        prop_assert_eq!(
            unrolled.compile(&schema).unwrap().evaluate(&data).unwrap(),
            looped.compile(&schema).unwrap().evaluate(&data).unwrap()
        );
    }

    #[test]
    fn looped_and_unrolled_enum_agree(
        values in prop::collection::vec(item(), 1..6),
        data in item(),
    ) {
        let schema = Arc::new(json!({"enum": values}));
        let unrolled = SchemaValidator::new(ValidatorOptions {
            loop_enum: 1000,
            ..Default::default()
        });
        let looped = SchemaValidator::new(ValidatorOptions {
            loop_enum: 0,
            ..Default::default()
        });
        let expected = values.contains(&data);
        prop_assert_eq!(validate(&unrolled, &schema, &data), expected);
        prop_assert_eq!(validate(&looped, &schema, &data), expected);
    }

    #[test]
    fn inlining_never_changes_results(depth in 0usize..4, value in -3i64..3, tail in scalar()) {
        let schema = Arc::new(json!({
            "$ref": "#/$defs/node",
            "$defs": {
                "node": {
                    "type": "object",
                    "properties": {
                        "value": {"$ref": "#/$defs/small"},
                        "next": {"anyOf": [{"type": "null"}, {"$ref": "#/$defs/node"}]}
                    },
                    "required": ["value"]
                },
                "small": {"type": "integer", "minimum": -1}
            }
        }));
        let mut data = json!({"value": value, "next": tail});
        for _ in 0..depth {
            data = json!({"value": value, "next": data});
        }

        let facade = SchemaValidator::default();
        let options = |inline_refs| ValidatorOptions {
            all_errors: true,
            inline_refs,
            ..Default::default()
        };
        let inlined = facade.compile_with(&schema, options(true)).unwrap().evaluate(&data).unwrap();
        let called = facade.compile_with(&schema, options(false)).unwrap().evaluate(&data).unwrap();
        prop_assert_eq!(inlined, called);
    }
}
