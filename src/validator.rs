//! Compiled validators and the validator facade
//!
//! [`Validator`] wraps one compiled program: a boolean check plus the error
//! list of its last run. [`SchemaValidator`] owns the registry and the
//! compiled-validator cache, and is what most callers use.
//!
//! ## Cache
//!
//! Validators are cached by the schema's `$id` when it has one, otherwise by
//! the identity of the `Arc<Value>` passed in. A cached entry keeps its schema
//! alive, so an address is never reused while its entry exists. Entries are
//! dropped only by [`SchemaValidator::remove_schema`] and
//! [`SchemaValidator::clear_registries`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::checksum::Checksum;
use crate::compile::{self, Outcome, Program};
use crate::config::{CoerceTypes, RemoveAdditional, UseDefaults, ValidatorOptions};
use crate::error::{CompileError, KeywordError, LoadError, Result, ValidationError};
use crate::formats::FormatDefinition;
use crate::keywords::KeywordDefinition;
use crate::metaschema;
use crate::pointer;
use crate::registry::{normalize_id, schema_id, RemovePattern, SchemaRegistry};
use crate::resolve::{CompileContext, ResolveError, SchemaLoader};

/// Pass/fail plus the errors of one validation run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl From<Outcome> for Evaluation {
    fn from(outcome: Outcome) -> Self {
        Self {
            valid: outcome.valid,
            errors: outcome.errors,
        }
    }
}

enum Compiled {
    Program(Arc<Program>),
    /// The schema failed its meta-schema; every run reports these errors
    Rejected(Vec<ValidationError>),
}

/// A compiled schema
pub struct Validator {
    compiled: Compiled,
    schema: Arc<Value>,
    checksum: Checksum,
    async_mode: bool,
    last_errors: Mutex<Vec<ValidationError>>,
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("checksum", &self.checksum.short())
            .field("async", &self.is_async())
            .field("rejected", &matches!(self.compiled, Compiled::Rejected(_)))
            .finish()
    }
}

impl Validator {
    fn new(schema: &Arc<Value>, program: Program, async_mode: bool) -> Self {
        Self {
            compiled: Compiled::Program(Arc::new(program)),
            schema: Arc::clone(schema),
            checksum: Checksum::from_json(schema),
            async_mode,
            last_errors: Mutex::new(Vec::new()),
        }
    }

    fn rejected(schema: &Arc<Value>, mut errors: Vec<ValidationError>) -> Self {
        if let Some(first) = errors.first_mut() {
            first.params.insert("metaSchemaError".into(), Value::Bool(true));
        }
        Self {
            compiled: Compiled::Rejected(errors),
            schema: Arc::clone(schema),
            checksum: Checksum::from_json(schema),
            async_mode: false,
            last_errors: Mutex::new(Vec::new()),
        }
    }

    fn run(&self, data: &Value) -> std::result::Result<Outcome, KeywordError> {
        let outcome = match &self.compiled {
            Compiled::Program(program) => program.run(data)?,
            Compiled::Rejected(errors) => Outcome {
                valid: false,
                errors: errors.clone(),
                edits: Vec::new(),
            },
        };
        *self.last_errors.lock() = outcome.errors.clone();
        Ok(outcome)
    }

    /// Check `data`; the errors are kept for [`Validator::errors`]
    pub fn validate(&self, data: &Value) -> std::result::Result<bool, KeywordError> {
        Ok(self.run(data)?.valid)
    }

    pub fn evaluate(&self, data: &Value) -> std::result::Result<Evaluation, KeywordError> {
        Ok(self.run(data)?.into())
    }

    /// Validate and write coercions, defaults and removals back into `data`
    pub fn validate_mut(&self, data: &mut Value) -> std::result::Result<Evaluation, KeywordError> {
        let outcome = self.run(data)?;
        for edit in &outcome.edits {
            edit.apply(data);
        }
        Ok(outcome.into())
    }

    /// Validate on the blocking pool so async keywords and formats can be awaited
    pub async fn validate_async(&self, data: Value) -> std::result::Result<Evaluation, KeywordError> {
        let Compiled::Program(program) = &self.compiled else {
            return self.evaluate(&data);
        };
        let program = Arc::clone(program);
        let outcome = tokio::task::spawn_blocking(move || program.run(&data))
            .await
            .map_err(|e| KeywordError::new("$async", e.to_string()))??;
        *self.last_errors.lock() = outcome.errors.clone();
        Ok(outcome.into())
    }

    /// Errors of the most recent run
    pub fn errors(&self) -> Vec<ValidationError> {
        self.last_errors.lock().clone()
    }

    pub fn is_async(&self) -> bool {
        self.async_mode || matches!(&self.compiled, Compiled::Program(p) if p.is_async())
    }

    /// Aggregate compile flags; `None` for a schema rejected by its meta-schema
    pub fn context(&self) -> Option<&CompileContext> {
        match &self.compiled {
            Compiled::Program(program) => Some(program.context()),
            Compiled::Rejected(_) => None,
        }
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }
}

/// A schema given inline or by registry key
#[derive(Debug, Clone, Copy)]
pub enum SchemaRef<'a> {
    Key(&'a str),
    Schema(&'a Arc<Value>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Id(String),
    Ptr(usize),
}

impl CacheKey {
    fn of(schema: &Arc<Value>) -> Self {
        match schema_id(schema) {
            Some(id) => CacheKey::Id(normalize_id(id).to_string()),
            None => CacheKey::Ptr(Arc::as_ptr(schema) as usize),
        }
    }
}

/// Options applied when checking a document against a meta-schema
fn relaxed(options: &ValidatorOptions) -> ValidatorOptions {
    ValidatorOptions {
        all_errors: true,
        strict: false,
        strict_schema: false,
        strict_types: false,
        strict_required: false,
        validate_schema: false,
        data: false,
        remove_additional: RemoveAdditional::Off,
        use_defaults: UseDefaults::Off,
        coerce_types: CoerceTypes::Off,
        error_message: false,
        ..options.clone()
    }
}

/// Registry, cache and loader behind one handle
pub struct SchemaValidator {
    options: ValidatorOptions,
    registry: RwLock<SchemaRegistry>,
    cache: Mutex<HashMap<CacheKey, Arc<Validator>>>,
    meta_programs: Mutex<HashMap<String, Arc<Program>>>,
    loader: Option<Arc<dyn SchemaLoader>>,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new(ValidatorOptions::default())
    }
}

impl SchemaValidator {
    pub fn new(options: ValidatorOptions) -> Self {
        let registry = SchemaRegistry::new(&options);
        Self {
            options,
            registry: RwLock::new(registry),
            cache: Mutex::new(HashMap::new()),
            meta_programs: Mutex::new(HashMap::new()),
            loader: None,
        }
    }

    /// Install the hook `compile_async` uses to fetch unknown external schemas
    pub fn with_loader(mut self, loader: Arc<dyn SchemaLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn options(&self) -> &ValidatorOptions {
        &self.options
    }

    /// Compile a schema, reusing a cached validator when there is one
    pub fn compile(&self, schema: &Arc<Value>) -> Result<Arc<Validator>> {
        let key = CacheKey::of(schema);
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }
        let validator = self
            .build(schema, &self.options, &HashMap::new())
            .map_err(|e| e.into_compile_error(self.loader.is_some()))?;
        Ok(self.store(key, validator))
    }

    /// Compile with different options; the cache is bypassed
    pub fn compile_with(&self, schema: &Arc<Value>, options: ValidatorOptions) -> Result<Arc<Validator>> {
        let validator = self
            .build(schema, &options, &HashMap::new())
            .map_err(|e| e.into_compile_error(self.loader.is_some()))?;
        Ok(Arc::new(validator))
    }

    /// Compile, fetching unknown external schemas through the loader
    pub async fn compile_async(&self, schema: &Arc<Value>) -> Result<Arc<Validator>> {
        let key = CacheKey::of(schema);
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }
        let mut loaded: HashMap<String, Arc<Value>> = HashMap::new();
        let mut fetched: HashSet<String> = HashSet::new();
        loop {
            let uri = match self.build(schema, &self.options, &loaded) {
                Ok(validator) => return Ok(self.store(key, validator)),
                Err(ResolveError::Missing { uri, .. }) if self.loader.is_some() => uri,
                Err(e) => return Err(e.into_compile_error(false)),
            };
            let Some(loader) = self.loader.as_ref() else {
                return Err(CompileError::AsyncRequired { uri });
            };
            if !fetched.insert(uri.clone()) {
                return Err(CompileError::ExternalLoad {
                    uri,
                    source: LoadError::Unusable("document was loaded but the reference is still missing".into()),
                });
            }
            debug!(uri = %uri, "Fetching external schema");
            let document = loader
                .load(&uri)
                .await
                .map_err(|source| CompileError::ExternalLoad {
                    uri: uri.clone(),
                    source,
                })?;
            if !document.is_object() && !document.is_boolean() {
                return Err(CompileError::ExternalLoad {
                    uri,
                    source: LoadError::Unusable(format!("expected an object or a boolean, got {document}")),
                });
            }
            let document = Arc::new(document);
            if self.options.add_used_schema {
                self.registry.write().add_used_schema(&uri, Arc::clone(&document));
            }
            loaded.insert(normalize_id(&uri).to_string(), document);
        }
    }

    fn cached(&self, key: &CacheKey) -> Option<Arc<Validator>> {
        if !self.options.cache {
            return None;
        }
        self.cache.lock().get(key).cloned()
    }

    fn store(&self, key: CacheKey, validator: Validator) -> Arc<Validator> {
        let validator = Arc::new(validator);
        if self.options.cache {
            self.cache.lock().insert(key, Arc::clone(&validator));
        }
        validator
    }

    fn build(
        &self,
        schema: &Arc<Value>,
        options: &ValidatorOptions,
        loaded: &HashMap<String, Arc<Value>>,
    ) -> std::result::Result<Validator, ResolveError> {
        if options.validate_schema {
            let evaluation = self.check_schema(schema, options)?;
            if !evaluation.valid {
                debug!(errors = evaluation.errors.len(), "Schema rejected by its meta-schema");
                return Ok(Validator::rejected(schema, evaluation.errors));
            }
        }
        let registry = self.registry.read();
        let program = compile::build(schema, options, &registry, loaded)?;
        Ok(Validator::new(schema, program, options.async_mode))
    }

    fn check_schema(&self, schema: &Value, options: &ValidatorOptions) -> Result<Evaluation> {
        let uri = schema
            .get("$schema")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| options.meta_schema.clone())
            .unwrap_or_else(|| metaschema::default_uri(options.draft).to_string());
        let uri = normalize_id(metaschema::canonical_uri(&uri)).to_string();

        let cached = self.meta_programs.lock().get(&uri).cloned();
        let program = match cached {
            Some(program) => program,
            None => {
                let registry = self.registry.read();
                let meta = registry
                    .get_meta_schema(&uri)
                    .or_else(|| registry.get_schema(&uri))
                    .cloned()
                    .ok_or_else(|| CompileError::MetaSchemaNotFound(uri.clone()))?;
                let program = compile::build(&meta, &relaxed(options), &registry, &HashMap::new())
                    .map_err(|e| e.into_compile_error(false))?;
                let program = Arc::new(program);
                self.meta_programs.lock().insert(uri, Arc::clone(&program));
                program
            }
        };
        Ok(program.run(schema)?.into())
    }

    fn lookup(&self, schema: SchemaRef<'_>) -> Result<Arc<Value>> {
        match schema {
            SchemaRef::Schema(schema) => Ok(Arc::clone(schema)),
            SchemaRef::Key(key) => self
                .registry
                .read()
                .get_schema(key)
                .cloned()
                .ok_or_else(|| CompileError::SchemaNotFound(key.to_string())),
        }
    }

    /// Compile (or fetch from cache) and validate in one step
    pub fn validate(&self, schema: SchemaRef<'_>, data: &Value) -> Result<Evaluation> {
        let schema = self.lookup(schema)?;
        let validator = self.compile(&schema)?;
        Ok(validator.evaluate(data)?)
    }

    pub async fn validate_async(&self, schema: SchemaRef<'_>, data: Value) -> Result<Evaluation> {
        let schema = self.lookup(schema)?;
        let validator = self.compile_async(&schema).await?;
        Ok(validator.validate_async(data).await?)
    }

    /// Check a schema against its meta-schema
    pub fn validate_schema(&self, schema: &Value) -> Result<Evaluation> {
        self.check_schema(schema, &self.options)
    }

    /// Register a schema under `key` or its `$id`; returns the key used
    pub fn add_schema(&self, schema: Value, key: Option<&str>) -> Result<String> {
        if self.options.validate_schema {
            let evaluation = self.check_schema(&schema, &self.options)?;
            if !evaluation.valid {
                return Err(CompileError::MetaSchemaMismatch {
                    path: key.or_else(|| schema_id(&schema)).unwrap_or("#").to_string(),
                    errors: evaluation.errors.iter().map(ToString::to_string).collect(),
                });
            }
        }
        self.registry.write().add_schema(schema, key)
    }

    pub fn get_schema(&self, key: &str) -> Option<Arc<Value>> {
        self.registry.read().get_schema(key).cloned()
    }

    /// Remove schemas and forget validators compiled from them
    pub fn remove_schema(&self, pattern: &RemovePattern) -> Vec<String> {
        let removed = self.registry.write().remove_schemas(pattern);
        if !removed.is_empty() {
            let removed: HashSet<&str> = removed.iter().map(String::as_str).collect();
            // identity-keyed entries may reference the removed documents
            self.cache.lock().retain(|key, _| match key {
                CacheKey::Id(id) => !removed.contains(id.as_str()),
                CacheKey::Ptr(_) => false,
            });
        }
        removed
    }

    pub fn add_meta_schema(&self, schema: Value, key: Option<&str>) -> Result<String> {
        self.registry.write().add_meta_schema(schema, key)
    }

    pub fn add_format(&self, name: &str, definition: FormatDefinition) -> Result<()> {
        self.registry.write().add_format(name, definition, false)
    }

    pub fn remove_format(&self, name: &str) -> Option<FormatDefinition> {
        self.registry.write().remove_format(name)
    }

    pub fn get_format(&self, name: &str) -> Option<FormatDefinition> {
        self.registry.read().get_format(name).cloned()
    }

    pub fn test_format(&self, name: &str, value: &Value) -> Option<bool> {
        self.registry.read().test_format(name, value)
    }

    pub fn add_keyword(&self, definition: KeywordDefinition) -> Result<()> {
        self.registry.write().add_keyword(definition)
    }

    pub fn remove_keyword(&self, keyword: &str) -> Option<KeywordDefinition> {
        self.registry.write().remove_keyword(keyword)
    }

    pub fn get_keyword(&self, keyword: &str) -> Option<KeywordDefinition> {
        self.registry.read().get_keyword(keyword).cloned()
    }

    /// Drop every user schema and every cached validator
    pub fn clear_registries(&self) {
        self.registry.write().clear();
        self.cache.lock().clear();
    }
}

/// Tokens of an error's data path; `/` is the root
fn data_tokens(data_path: &str) -> Vec<String> {
    if data_path == "/" {
        return Vec::new();
    }
    pointer::tokens(data_path)
}

/// Render errors as `data.a.0: message`, joined by `separator`
pub fn errors_text(errors: &[ValidationError], separator: Option<&str>, data_var: Option<&str>) -> String {
    if errors.is_empty() {
        return "No errors".to_string();
    }
    let data_var = data_var.unwrap_or("data");
    errors
        .iter()
        .map(|e| {
            let path: String = data_tokens(&e.data_path)
                .iter()
                .map(|t| format!(".{t}"))
                .collect();
            format!("{data_var}{path}: {}", e.message)
        })
        .collect::<Vec<_>>()
        .join(separator.unwrap_or(", "))
}

/// Messages grouped by data path
pub fn field_errors(errors: &[ValidationError]) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for error in errors {
        grouped
            .entry(error.data_path.clone())
            .or_default()
            .push(error.message.clone());
    }
    grouped
}

/// `/a/0/b` as `a[0].b`
pub fn full_field_path(data_path: &str) -> String {
    let mut out = String::new();
    for token in data_tokens(data_path) {
        if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
            out.push_str(&format!("[{token}]"));
        } else {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(&token);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn error(path: &str, message: &str) -> ValidationError {
        ValidationError {
            data_path: path.into(),
            schema_path: "#".into(),
            keyword: "type".into(),
            message: message.into(),
            value: None,
            expected: None,
            params: Default::default(),
        }
    }

    #[test]
    fn test_full_field_path() {
        assert_eq!(full_field_path("/a/0/b"), "a[0].b");
        assert_eq!(full_field_path("/"), "");
        assert_eq!(full_field_path("/x~1y"), "x/y");
    }

    #[test]
    fn test_errors_text() {
        let errors = vec![error("/a/0", "Invalid type"), error("/", "Schema is false")];
        assert_eq!(errors_text(&errors, None, None), "data.a.0: Invalid type, data: Schema is false");
        assert_eq!(errors_text(&[], None, None), "No errors");
        assert_eq!(errors_text(&errors[..1], Some("\n"), Some("input")), "input.a.0: Invalid type");
    }

    #[test]
    fn test_field_errors_groups_by_path() {
        let errors = vec![error("/a", "one"), error("/a", "two"), error("/b", "three")];
        let grouped = field_errors(&errors);
        assert_eq!(grouped["/a"], vec!["one", "two"]);
        assert_eq!(grouped.len(), 2);
    }

    #[test]
    fn test_cache_by_identity_and_id() {
        let facade = SchemaValidator::default();
        let schema = Arc::new(json!({"type": "string"}));
        let a = facade.compile(&schema).unwrap();
        let b = facade.compile(&schema).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = Arc::new(json!({"type": "string"}));
        let c = facade.compile(&other).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));

        let with_id = Arc::new(json!({"$id": "http://example.com/s", "type": "integer"}));
        let same_id = Arc::new(json!({"$id": "http://example.com/s#", "type": "integer"}));
        let d = facade.compile(&with_id).unwrap();
        let e = facade.compile(&same_id).unwrap();
        assert!(Arc::ptr_eq(&d, &e));
    }

    #[test]
    fn test_errors_kept_from_last_run() {
        let facade = SchemaValidator::default();
        let validator = facade.compile(&Arc::new(json!({"type": "integer"}))).unwrap();
        assert!(!validator.validate(&json!("x")).unwrap());
        assert_eq!(validator.errors().len(), 1);
        assert!(validator.validate(&json!(3)).unwrap());
        assert!(validator.errors().is_empty());
    }

    #[test]
    fn test_rejected_schema_tags_first_error() {
        let options = ValidatorOptions {
            validate_schema: true,
            ..Default::default()
        };
        let facade = SchemaValidator::new(options);
        let validator = facade
            .compile(&Arc::new(json!({"type": "object", "minProperties": "two"})))
            .unwrap();
        let evaluation = validator.evaluate(&json!({})).unwrap();
        assert!(!evaluation.valid);
        assert_eq!(evaluation.errors[0].param("metaSchemaError"), Some(&json!(true)));
    }

    #[test]
    fn test_remove_schema_invalidates_cache() {
        let facade = SchemaValidator::default();
        facade
            .add_schema(json!({"$id": "http://example.com/a", "type": "string"}), None)
            .unwrap();
        let first = facade.validate(SchemaRef::Key("http://example.com/a"), &json!(1)).unwrap();
        assert!(!first.valid);
        assert_eq!(facade.remove_schema(&RemovePattern::Key("http://example.com/a".into())).len(), 1);
        assert!(matches!(
            facade.validate(SchemaRef::Key("http://example.com/a"), &json!(1)),
            Err(CompileError::SchemaNotFound(_))
        ));
    }
}
