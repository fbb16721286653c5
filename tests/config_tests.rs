//! Configuration Tests
//!
//! `validator.toml` files feeding the validator options.

use std::sync::Arc;

use familiar_validator::config::OutputFormat;
use familiar_validator::{CoerceTypes, Draft, FormatMode, SchemaValidator, ValidatorConfig};
use serde_json::json;

// =============================================================================
// File Loading
// =============================================================================

#[test]
fn test_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("validator.toml");

    let mut config = ValidatorConfig::default();
    config.validator.all_errors = true;
    config.validator.draft = Draft::Draft7;
    config.validator.format_mode = FormatMode::Fast;
    config.validator.coerce_types = CoerceTypes::Array;
    config.cli.schema_dirs = vec![dir.path().join("schemas")];
    config.cli.output_format = OutputFormat::Compact;
    config.save(path.to_str().unwrap()).unwrap();

    let loaded = ValidatorConfig::load_from(path.to_str()).unwrap();
    assert_eq!(loaded.validator, config.validator);
    assert_eq!(loaded.cli.schema_dirs, config.cli.schema_dirs);
    assert!(matches!(loaded.cli.output_format, OutputFormat::Compact));
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(ValidatorConfig::load_from(path.to_str()).is_err());
}

#[test]
fn test_loaded_options_drive_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("validator.toml");
    std::fs::write(
        &path,
        r#"
[validator]
all_errors = true
strict = false
data = true
"#,
    )
    .unwrap();

    let config = ValidatorConfig::load_from(path.to_str()).unwrap();
    assert!(config.validator.data);

    let facade = SchemaValidator::new(config.validator);
    let schema = Arc::new(json!({
        "required": ["a", "b"],
        "properties": {"max": {"type": "integer"}, "n": {"maximum": {"$data": "1/max"}}},
        "unknownAnnotation": true
    }));
    let evaluation = facade
        .compile(&schema)
        .unwrap()
        .evaluate(&json!({"max": 2, "n": 3}))
        .unwrap();
    let keywords: Vec<&str> = evaluation.errors.iter().map(|e| e.keyword.as_str()).collect();
    assert_eq!(keywords, vec!["required", "required", "maximum"]);
}
