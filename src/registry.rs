//! Schema Registry
//!
//! In-memory stores consulted by the resolver and compiler: schemas by id or
//! key, meta-schemas, formats and custom keywords.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ValidatorOptions;
use crate::error::{CompileError, Result};
use crate::formats::{builtin_formats, FormatDefinition};
use crate::keywords::KeywordDefinition;
use crate::metaschema;

/// Selector for [`SchemaRegistry::remove_schemas`]
#[derive(Debug, Clone)]
pub enum RemovePattern {
    All,
    Key(String),
    Pattern(Regex),
}

/// Registered schemas, meta-schemas, formats and keywords
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<Value>>,
    meta_schemas: HashMap<String, Arc<Value>>,
    formats: HashMap<String, FormatDefinition>,
    keywords: HashMap<String, KeywordDefinition>,
    allow_format_override: bool,
}

/// Strip an empty trailing fragment so `http://x/s#` and `http://x/s` collide
pub fn normalize_id(id: &str) -> &str {
    id.strip_suffix('#').unwrap_or(id)
}

/// The `$id` of a schema document, if it declares one
pub fn schema_id(schema: &Value) -> Option<&str> {
    schema
        .get("$id")
        .or_else(|| schema.get("id"))
        .and_then(Value::as_str)
        .filter(|id| !id.starts_with('#'))
}

impl SchemaRegistry {
    /// A registry with the built-in formats and embedded meta-schemas loaded
    pub fn new(options: &ValidatorOptions) -> Self {
        let mut registry = Self {
            schemas: HashMap::new(),
            meta_schemas: HashMap::new(),
            formats: builtin_formats(options.format_mode),
            keywords: HashMap::new(),
            allow_format_override: options.allow_format_override,
        };
        metaschema::load_into(&mut registry);
        registry
    }

    /// Add a schema under `key`, or under its `$id` when no key is given.
    ///
    /// Returns the key the schema was stored under.
    pub fn add_schema(&mut self, schema: Value, key: Option<&str>) -> Result<String> {
        let id = schema_id(&schema).map(|id| normalize_id(id).to_string());
        let key = match (key, &id) {
            (Some(key), _) => normalize_id(key).to_string(),
            (None, Some(id)) => id.clone(),
            (None, None) => {
                return Err(CompileError::InvalidSchema(
                    "schema must have an $id or be added with a key".into(),
                ))
            }
        };
        if self.schemas.contains_key(&key) {
            return Err(CompileError::InvalidSchema(format!(
                "schema with key or id \"{key}\" already exists"
            )));
        }
        let schema = Arc::new(schema);
        if let Some(id) = id.filter(|id| *id != key) {
            self.schemas.entry(id).or_insert_with(|| Arc::clone(&schema));
        }
        debug!(key = %key, "Registered schema");
        self.schemas.insert(key.clone(), schema);
        Ok(key)
    }

    /// Store a schema fetched while resolving, replacing nothing
    pub(crate) fn add_used_schema(&mut self, uri: &str, schema: Arc<Value>) {
        self.schemas
            .entry(normalize_id(uri).to_string())
            .or_insert(schema);
    }

    pub fn get_schema(&self, key: &str) -> Option<&Arc<Value>> {
        self.schemas.get(normalize_id(key))
    }

    pub fn contains_schema(&self, key: &str) -> bool {
        self.schemas.contains_key(normalize_id(key))
    }

    /// Remove schemas, returning the keys that were dropped
    pub fn remove_schemas(&mut self, pattern: &RemovePattern) -> Vec<String> {
        let removed: Vec<String> = match pattern {
            RemovePattern::All => self.schemas.keys().cloned().collect(),
            RemovePattern::Key(key) => {
                let key = normalize_id(key);
                let target = self.schemas.get(key).cloned();
                // an entry registered under both key and $id goes away under both names
                self.schemas
                    .iter()
                    .filter(|(k, v)| k.as_str() == key || target.as_ref().is_some_and(|t| Arc::ptr_eq(t, v)))
                    .map(|(k, _)| k.clone())
                    .collect()
            }
            RemovePattern::Pattern(re) => self
                .schemas
                .keys()
                .filter(|k| re.is_match(k))
                .cloned()
                .collect(),
        };
        if removed.is_empty() {
            warn!(pattern = ?pattern, "removeSchema matched nothing");
        }
        for key in &removed {
            self.schemas.remove(key);
        }
        removed
    }

    /// Add a meta-schema; it becomes a `$ref` target and a `validate_schema` candidate
    pub fn add_meta_schema(&mut self, schema: Value, key: Option<&str>) -> Result<String> {
        let key = match (key, schema_id(&schema)) {
            (Some(key), _) => normalize_id(key).to_string(),
            (None, Some(id)) => normalize_id(id).to_string(),
            (None, None) => {
                return Err(CompileError::InvalidSchema(
                    "meta-schema must have an $id or be added with a key".into(),
                ))
            }
        };
        self.insert_meta_schema(&key, Arc::new(schema));
        Ok(key)
    }

    pub(crate) fn insert_meta_schema(&mut self, uri: &str, schema: Arc<Value>) {
        self.meta_schemas.insert(normalize_id(uri).to_string(), schema);
    }

    pub fn get_meta_schema(&self, uri: &str) -> Option<&Arc<Value>> {
        self.meta_schemas.get(normalize_id(uri))
    }

    /// Any registered document with this base URI: schemas first, then meta-schemas
    pub fn lookup_document(&self, uri: &str) -> Option<Arc<Value>> {
        let uri = normalize_id(uri);
        self.schemas
            .get(uri)
            .or_else(|| self.meta_schemas.get(uri))
            .cloned()
    }

    /// Register a format; an existing name is an error unless overriding is allowed
    pub fn add_format(&mut self, name: &str, definition: FormatDefinition, override_existing: bool) -> Result<()> {
        if self.formats.contains_key(name) && !(override_existing || self.allow_format_override) {
            return Err(CompileError::FormatExists(name.to_string()));
        }
        debug!(format = name, "Registered format");
        self.formats.insert(name.to_string(), definition);
        Ok(())
    }

    pub fn remove_format(&mut self, name: &str) -> Option<FormatDefinition> {
        self.formats.remove(name)
    }

    pub fn get_format(&self, name: &str) -> Option<&FormatDefinition> {
        self.formats.get(name)
    }

    pub(crate) fn formats(&self) -> &HashMap<String, FormatDefinition> {
        &self.formats
    }

    /// Check a value against a registered format; `None` when the format is unknown
    pub fn test_format(&self, name: &str, value: &Value) -> Option<bool> {
        self.formats.get(name).map(|format| format.test(value))
    }

    /// Register a custom keyword after checking its definition
    pub fn add_keyword(&mut self, definition: KeywordDefinition) -> Result<()> {
        definition.check_definition()?;
        if self.keywords.contains_key(&definition.keyword) {
            return Err(CompileError::InvalidKeywordDefinition {
                keyword: definition.keyword.clone(),
                reason: "keyword is already defined".into(),
            });
        }
        debug!(keyword = %definition.keyword, "Registered keyword");
        self.keywords.insert(definition.keyword.clone(), definition);
        Ok(())
    }

    pub fn remove_keyword(&mut self, keyword: &str) -> Option<KeywordDefinition> {
        self.keywords.remove(keyword)
    }

    pub fn get_keyword(&self, keyword: &str) -> Option<&KeywordDefinition> {
        self.keywords.get(keyword)
    }

    pub fn keywords(&self) -> impl Iterator<Item = &KeywordDefinition> {
        self.keywords.values()
    }

    pub fn has_macros(&self) -> bool {
        self.keywords.values().any(KeywordDefinition::is_macro)
    }

    /// Drop every user schema; formats, keywords and meta-schemas stay
    pub fn clear(&mut self) {
        self.schemas.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keywords::KeywordOutcome;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new(&ValidatorOptions::default())
    }

    #[test]
    fn test_add_schema_by_id_and_key() {
        let mut reg = registry();
        let key = reg
            .add_schema(json!({"$id": "http://example.com/a.json#", "type": "string"}), None)
            .unwrap();
        assert_eq!(key, "http://example.com/a.json");
        assert!(reg.get_schema("http://example.com/a.json#").is_some());

        reg.add_schema(json!({"type": "number"}), Some("num")).unwrap();
        assert!(reg.contains_schema("num"));
    }

    #[test]
    fn test_add_schema_requires_key_or_id() {
        let mut reg = registry();
        assert!(matches!(
            reg.add_schema(json!({"type": "string"}), None),
            Err(CompileError::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_duplicate_schema_rejected() {
        let mut reg = registry();
        reg.add_schema(json!({"type": "string"}), Some("s")).unwrap();
        assert!(reg.add_schema(json!({"type": "number"}), Some("s")).is_err());
    }

    #[test]
    fn test_remove_schema_patterns() {
        let mut reg = registry();
        reg.add_schema(json!({"$id": "http://x/a", "type": "string"}), Some("a")).unwrap();
        reg.add_schema(json!({"type": "string"}), Some("b")).unwrap();
        reg.add_schema(json!({"type": "string"}), Some("c1")).unwrap();

        let removed = reg.remove_schemas(&RemovePattern::Key("a".into()));
        assert_eq!(removed.len(), 2);
        assert!(reg.get_schema("http://x/a").is_none());

        let removed = reg.remove_schemas(&RemovePattern::Pattern(Regex::new("^c").unwrap()));
        assert_eq!(removed, vec!["c1".to_string()]);

        reg.remove_schemas(&RemovePattern::All);
        assert!(!reg.contains_schema("b"));
        assert!(reg.remove_schemas(&RemovePattern::All).is_empty());
    }

    #[test]
    fn test_format_override() {
        let mut reg = registry();
        let def = FormatDefinition::regex("^[a-z]+$").unwrap();
        assert!(matches!(
            reg.add_format("email", def.clone(), false),
            Err(CompileError::FormatExists(_))
        ));
        reg.add_format("email", def.clone(), true).unwrap();
        assert_eq!(reg.test_format("email", &json!("abc")), Some(true));
        assert_eq!(reg.test_format("email", &json!("a@b.c")), Some(false));
        assert_eq!(reg.test_format("nope", &json!("x")), None);
        assert!(reg.remove_format("email").is_some());
    }

    #[test]
    fn test_keyword_registration() {
        let mut reg = registry();
        let def = KeywordDefinition::validate("even", |_, data, _, _| {
            Ok(KeywordOutcome::from(data.as_i64().is_some_and(|n| n % 2 == 0)))
        });
        reg.add_keyword(def.clone()).unwrap();
        assert!(reg.get_keyword("even").is_some());
        assert!(reg.add_keyword(def).is_err());
        assert!(!reg.has_macros());
        assert!(reg.remove_keyword("even").is_some());
    }

    #[test]
    fn test_meta_schemas_are_loaded() {
        let reg = registry();
        assert!(reg.lookup_document("http://json-schema.org/draft-07/schema#").is_some());
        assert!(reg
            .lookup_document("https://json-schema.org/draft/2020-12/schema")
            .is_some());
    }
}
