//! Custom Keyword Tests
//!
//! Each keyword protocol registered through the facade and exercised by a
//! compiled validator.

use std::sync::Arc;

use familiar_validator::keywords::CompiledKeywordFn;
use familiar_validator::pointer::Segment;
use familiar_validator::{
    CompileError, JsonType, KeywordContext, KeywordDefinition, KeywordError, KeywordOutcome, SchemaValidator,
    ValidatorOptions,
};
use futures::FutureExt;
use serde_json::{json, Map, Value};

fn even_keyword() -> KeywordDefinition {
    KeywordDefinition::validate("even", |value, data, _parent, _ctx| {
        let wanted = value.as_bool().unwrap_or(true);
        let even = data.as_i64().map(|n| n % 2 == 0).unwrap_or(false);
        Ok((even == wanted).into())
    })
    .for_types(&[JsonType::Integer])
    .with_schema_types(&[JsonType::Boolean])
}

// =============================================================================
// Validate Protocol
// =============================================================================

#[test]
fn test_validate_keyword() {
    let facade = SchemaValidator::default();
    facade.add_keyword(even_keyword()).unwrap();

    let validator = facade.compile(&Arc::new(json!({"even": true}))).unwrap();
    assert!(validator.validate(&json!(4)).unwrap());
    // data types outside the keyword's list pass untouched
    assert!(validator.validate(&json!("three")).unwrap());

    let evaluation = validator.evaluate(&json!(3)).unwrap();
    assert!(!evaluation.valid);
    assert_eq!(evaluation.errors[0].keyword, "even");
    assert_eq!(evaluation.errors[0].message, "Failed validation for keyword 'even'");
    assert_eq!(evaluation.errors[0].schema_path, "#");
}

#[test]
fn test_validate_keyword_params_and_context() {
    let facade = SchemaValidator::default();
    facade
        .add_keyword(KeywordDefinition::validate("matchesKey", |_value, data, _parent, ctx| {
            let key = match ctx.parent_data_property() {
                Some(Segment::Key(key)) => key.clone(),
                _ => return Ok(KeywordOutcome::Pass),
            };
            if data.as_str() == Some(key.as_str()) {
                return Ok(KeywordOutcome::Pass);
            }
            let mut params = Map::new();
            params.insert("expectedKey".into(), Value::String(key));
            Ok(KeywordOutcome::FailWith(params))
        }))
        .unwrap();

    let validator = facade
        .compile(&Arc::new(json!({"additionalProperties": {"matchesKey": true}})))
        .unwrap();
    assert!(validator.validate(&json!({"a": "a", "b": "b"})).unwrap());

    let evaluation = validator.evaluate(&json!({"a": "b"})).unwrap();
    assert_eq!(evaluation.errors[0].data_path, "/a");
    assert_eq!(evaluation.errors[0].param("expectedKey"), Some(&json!("a")));
}

#[test]
fn test_keyword_error_propagates() {
    let facade = SchemaValidator::default();
    facade
        .add_keyword(KeywordDefinition::validate("explode", |_, _, _, _| {
            Err(KeywordError::new("explode", "boom"))
        }))
        .unwrap();
    let validator = facade.compile(&Arc::new(json!({"explode": true}))).unwrap();
    let err = validator.validate(&json!(1)).unwrap_err();
    assert_eq!(err.keyword, "explode");
}

// =============================================================================
// Definition Checks
// =============================================================================

#[test]
fn test_predefined_keyword_rejected() {
    let facade = SchemaValidator::default();
    let result = facade.add_keyword(KeywordDefinition::validate("type", |_, _, _, _| Ok(KeywordOutcome::Pass)));
    assert!(matches!(result, Err(CompileError::PredefinedKeyword(_))));

    let integer_schema = KeywordDefinition::validate("size", |_, _, _, _| Ok(KeywordOutcome::Pass))
        .with_schema_types(&[JsonType::Integer]);
    assert!(matches!(
        facade.add_keyword(integer_schema),
        Err(CompileError::InvalidKeywordDefinition { .. })
    ));
}

#[test]
fn test_schema_type_checked_at_compile() {
    let facade = SchemaValidator::default();
    facade.add_keyword(even_keyword()).unwrap();
    let result = facade.compile(&Arc::new(json!({"even": "yes"})));
    assert!(matches!(result, Err(CompileError::InvalidKeywordValue { .. })));
}

#[test]
fn test_meta_schema_checked_at_compile() {
    let facade = SchemaValidator::default();
    facade
        .add_keyword(
            KeywordDefinition::validate("between", |value, data, _, _| {
                let (Some(low), Some(high), Some(n)) = (value[0].as_f64(), value[1].as_f64(), data.as_f64()) else {
                    return Ok(KeywordOutcome::Pass);
                };
                Ok((low <= n && n <= high).into())
            })
            .with_meta_schema(json!({
                "type": "array",
                "items": {"type": "number"},
                "minItems": 2,
                "maxItems": 2
            })),
        )
        .unwrap();

    let result = facade.compile(&Arc::new(json!({"properties": {"n": {"between": ["a", "b"]}}})));
    match result {
        Err(CompileError::MetaSchemaMismatch { path, .. }) => assert_eq!(path, "#/properties/n/between"),
        other => panic!("expected MetaSchemaMismatch, got {other:?}"),
    }

    let validator = facade.compile(&Arc::new(json!({"between": [1, 3]}))).unwrap();
    assert!(validator.validate(&json!(2)).unwrap());
    assert!(!validator.validate(&json!(5)).unwrap());
}

#[test]
fn test_removed_keyword_is_unknown_again() {
    let facade = SchemaValidator::default();
    facade.add_keyword(even_keyword()).unwrap();
    assert!(facade.get_keyword("even").is_some());
    assert!(facade.remove_keyword("even").is_some());
    let result = facade.compile(&Arc::new(json!({"even": true})));
    assert!(matches!(result, Err(CompileError::Strict { .. })));
}

// =============================================================================
// Compile Protocol
// =============================================================================

#[test]
fn test_compile_keyword() {
    let facade = SchemaValidator::default();
    facade
        .add_keyword(
            KeywordDefinition::compile("divisibleBy", |value, _parent, _ctx| {
                let divisor = value
                    .as_i64()
                    .filter(|d| *d != 0)
                    .ok_or_else(|| KeywordError::new("divisibleBy", "divisor must be a non-zero integer"))?;
                let check: CompiledKeywordFn = Arc::new(
                    move |data: &Value, _ctx: &KeywordContext<'_>| -> Result<KeywordOutcome, KeywordError> {
                        Ok(data.as_i64().map_or(true, |n| n % divisor == 0).into())
                    },
                );
                Ok(check)
            })
            .for_types(&[JsonType::Integer]),
        )
        .unwrap();

    let validator = facade.compile(&Arc::new(json!({"divisibleBy": 3}))).unwrap();
    assert!(validator.validate(&json!(9)).unwrap());
    assert!(!validator.validate(&json!(10)).unwrap());

    let result = facade.compile(&Arc::new(json!({"divisibleBy": 0})));
    assert!(matches!(result, Err(CompileError::Keyword(_))));
}

#[test]
fn test_implements_skips_sibling_keywords() {
    let facade = SchemaValidator::default();
    facade
        .add_keyword(
            KeywordDefinition::validate("softMaximum", |slack, data, parent, _| {
                let (Some(max), Some(slack), Some(n)) = (parent["maximum"].as_f64(), slack.as_f64(), data.as_f64()) else {
                    return Ok(KeywordOutcome::Pass);
                };
                Ok((n <= max + slack).into())
            })
            .implementing(&["maximum"]),
        )
        .unwrap();
    let validator = facade
        .compile(&Arc::new(json!({"maximum": 10, "softMaximum": 2})))
        .unwrap();
    assert!(validator.validate(&json!(11)).unwrap());
    assert!(!validator.validate(&json!(13)).unwrap());
}

// =============================================================================
// Code Protocol
// =============================================================================

#[test]
fn test_code_keyword_marks_evaluated_properties() {
    let facade = SchemaValidator::default();
    facade
        .add_keyword(
            KeywordDefinition::code("knownKeys", |ctx| {
                let (Some(names), Some(object)) = (ctx.keyword_value.as_array(), ctx.data.as_object()) else {
                    return Ok(());
                };
                let present: Vec<String> = names
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|name| object.contains_key(*name))
                    .map(str::to_string)
                    .collect();
                if present.is_empty() {
                    ctx.report("no known key present", Map::new());
                }
                for name in present {
                    ctx.mark_property_evaluated(name);
                }
                Ok(())
            })
            .for_types(&[JsonType::Object]),
        )
        .unwrap();

    let validator = facade
        .compile(&Arc::new(json!({"knownKeys": ["x", "y"], "unevaluatedProperties": false})))
        .unwrap();
    assert!(validator.validate(&json!({"x": 1})).unwrap());
    assert!(validator.validate(&json!({"x": 1, "y": 2})).unwrap());

    let extra = validator.evaluate(&json!({"x": 1, "z": 2})).unwrap();
    assert!(!extra.valid);
    assert_eq!(extra.errors[0].keyword, "unevaluatedProperties");

    let none = validator.evaluate(&json!({})).unwrap();
    assert_eq!(none.errors[0].keyword, "knownKeys");
    assert_eq!(none.errors[0].message, "no known key present");
}

// =============================================================================
// Macro Protocol
// =============================================================================

#[test]
fn test_macro_keyword_expands_to_schema() {
    let facade = SchemaValidator::default();
    facade
        .add_keyword(KeywordDefinition::macro_expand("range", |value, _parent| {
            json!({"minimum": value[0], "maximum": value[1]})
        }))
        .unwrap();

    let validator = facade.compile(&Arc::new(json!({"type": "number", "range": [1, 3]}))).unwrap();
    assert!(validator.validate(&json!(2)).unwrap());

    let evaluation = validator.evaluate(&json!(5)).unwrap();
    assert!(!evaluation.valid);
    assert_eq!(evaluation.errors[0].keyword, "maximum");
    // expansions are appended after the declared allOf branches
    assert_eq!(evaluation.errors[0].schema_path, "#/allOf/0");

    let declared = facade
        .compile(&Arc::new(json!({"allOf": [{"type": "number"}], "range": [1, 3]})))
        .unwrap();
    assert_eq!(declared.evaluate(&json!(0)).unwrap().errors[0].schema_path, "#/allOf/1");
}

#[test]
fn test_nested_macros_expand() {
    let facade = SchemaValidator::default();
    facade
        .add_keyword(KeywordDefinition::macro_expand("positive", |_, _| json!({"exclusiveMinimum": 0})))
        .unwrap();
    facade
        .add_keyword(KeywordDefinition::macro_expand("count", |_, _| {
            json!({"type": "integer", "positive": true})
        }))
        .unwrap();
    let validator = facade.compile(&Arc::new(json!({"count": true}))).unwrap();
    assert!(validator.validate(&json!(3)).unwrap());
    assert!(!validator.validate(&json!(0)).unwrap());
    assert!(!validator.validate(&json!(1.5)).unwrap());
}

// =============================================================================
// Async Protocol
// =============================================================================

fn slow_even() -> KeywordDefinition {
    KeywordDefinition::validate_async("slowEven", |_value, data, _parent| {
        async move { Ok::<_, KeywordError>(KeywordOutcome::from(data.as_i64().map_or(true, |n| n % 2 == 0))) }
        .boxed()
    })
}

#[tokio::test]
async fn test_async_keyword_makes_validator_async() {
    let facade = SchemaValidator::new(ValidatorOptions::default());
    facade.add_keyword(slow_even()).unwrap();

    let validator = facade
        .compile(&Arc::new(json!({"properties": {"n": {"slowEven": true}}})))
        .unwrap();
    assert!(validator.is_async());

    assert!(validator.validate_async(json!({"n": 2})).await.unwrap().valid);
    let evaluation = validator.validate_async(json!({"n": 3})).await.unwrap();
    assert!(!evaluation.valid);
    assert_eq!(evaluation.errors[0].data_path, "/n");
    assert_eq!(validator.errors().len(), 1);
}

#[test]
fn test_sync_validator_without_async_keywords() {
    let facade = SchemaValidator::default();
    facade.add_keyword(even_keyword()).unwrap();
    let validator = facade.compile(&Arc::new(json!({"even": true}))).unwrap();
    assert!(!validator.is_async());
    assert_eq!(validator.context().map(|c| c.uses_data), Some(false));
}
