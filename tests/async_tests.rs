//! Async Loading Tests
//!
//! `compile_async` fetching external schemas through a `SchemaLoader`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use familiar_validator::{CompileError, LoadError, SchemaLoader, SchemaRef, SchemaValidator, ValidatorOptions};
use serde_json::{json, Value};

/// Serves documents from a map and counts the fetches
struct MapLoader {
    documents: HashMap<String, Value>,
    fetches: AtomicUsize,
}

impl MapLoader {
    fn new(documents: &[(&str, Value)]) -> Arc<Self> {
        Arc::new(Self {
            documents: documents.iter().map(|(uri, doc)| (uri.to_string(), doc.clone())).collect(),
            fetches: AtomicUsize::new(0),
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaLoader for MapLoader {
    async fn load(&self, uri: &str) -> Result<Value, LoadError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.documents
            .get(uri.trim_end_matches('#'))
            .cloned()
            .ok_or_else(|| LoadError::NotFound(uri.to_string()))
    }
}

fn remote_documents() -> Vec<(&'static str, Value)> {
    vec![
        (
            "https://example.com/defs/positive",
            json!({"$id": "https://example.com/defs/positive", "type": "number", "exclusiveMinimum": 0}),
        ),
        (
            "https://example.com/defs/price",
            json!({
                "$id": "https://example.com/defs/price",
                "type": "object",
                "required": ["amount"],
                "properties": {"amount": {"$ref": "positive"}, "currency": {"type": "string"}}
            }),
        ),
    ]
}

// =============================================================================
// Loader
// =============================================================================

#[tokio::test]
async fn test_compile_async_fetches_missing_schema() {
    let loader = MapLoader::new(&remote_documents());
    let facade = SchemaValidator::default().with_loader(loader.clone());
    let schema = Arc::new(json!({"properties": {"qty": {"$ref": "https://example.com/defs/positive"}}}));

    let validator = facade.compile_async(&schema).await.unwrap();
    assert_eq!(loader.fetches(), 1);
    assert!(validator.validate(&json!({"qty": 2})).unwrap());

    let evaluation = validator.evaluate(&json!({"qty": 0})).unwrap();
    assert_eq!(evaluation.errors[0].keyword, "exclusiveMinimum");

    // fetched documents are registered for later compiles
    assert!(facade.get_schema("https://example.com/defs/positive").is_some());
}

#[tokio::test]
async fn test_compile_async_follows_nested_references() {
    let loader = MapLoader::new(&remote_documents());
    let facade = SchemaValidator::default().with_loader(loader.clone());
    let schema = Arc::new(json!({"$ref": "https://example.com/defs/price"}));

    let validator = facade.compile_async(&schema).await.unwrap();
    assert_eq!(loader.fetches(), 2);
    assert!(validator.validate(&json!({"amount": 3, "currency": "EUR"})).unwrap());
    assert!(!validator.validate(&json!({"amount": -3})).unwrap());

    // cached by identity: no further fetches
    facade.compile_async(&schema).await.unwrap();
    assert_eq!(loader.fetches(), 2);
}

#[tokio::test]
async fn test_sync_compile_needs_async_path() {
    let loader = MapLoader::new(&remote_documents());
    let facade = SchemaValidator::default().with_loader(loader.clone());
    let schema = Arc::new(json!({"$ref": "https://example.com/defs/positive"}));

    assert!(matches!(facade.compile(&schema), Err(CompileError::AsyncRequired { .. })));
    assert_eq!(loader.fetches(), 0);
}

#[tokio::test]
async fn test_loader_failure_propagates() {
    let loader = MapLoader::new(&[]);
    let facade = SchemaValidator::default().with_loader(loader);
    let schema = Arc::new(json!({"$ref": "https://example.com/defs/absent"}));

    match facade.compile_async(&schema).await {
        Err(CompileError::ExternalLoad { uri, source }) => {
            assert_eq!(uri, "https://example.com/defs/absent");
            assert!(matches!(source, LoadError::NotFound(_)));
        }
        other => panic!("expected ExternalLoad, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unusable_document_rejected() {
    let loader = MapLoader::new(&[("https://example.com/defs/number", json!(42))]);
    let facade = SchemaValidator::default().with_loader(loader);
    let schema = Arc::new(json!({"$ref": "https://example.com/defs/number"}));

    assert!(matches!(
        facade.compile_async(&schema).await,
        Err(CompileError::ExternalLoad {
            source: LoadError::Unusable(_),
            ..
        })
    ));
}

#[tokio::test]
async fn test_used_schemas_not_registered_when_disabled() {
    let loader = MapLoader::new(&remote_documents());
    let facade = SchemaValidator::new(ValidatorOptions {
        add_used_schema: false,
        ..Default::default()
    })
    .with_loader(loader);
    let schema = Arc::new(json!({"$ref": "https://example.com/defs/positive"}));

    facade.compile_async(&schema).await.unwrap();
    assert!(facade.get_schema("https://example.com/defs/positive").is_none());
}

#[tokio::test]
async fn test_validate_async_by_key() {
    let loader = MapLoader::new(&remote_documents());
    let facade = SchemaValidator::default().with_loader(loader);
    facade
        .add_schema(json!({"type": "array", "items": {"$ref": "https://example.com/defs/price"}}), Some("prices"))
        .unwrap();

    let evaluation = facade
        .validate_async(SchemaRef::Key("prices"), json!([{"amount": 1}, {"amount": 0}]))
        .await
        .unwrap();
    assert!(!evaluation.valid);
    assert_eq!(evaluation.errors[0].data_path, "/1/amount");
}
