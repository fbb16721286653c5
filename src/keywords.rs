//! Custom keyword protocol
//!
//! A keyword definition carries exactly one implementation protocol:
//!
//! - **validate**: a predicate called with the keyword value, the data, the
//!   parent schema and the data location
//! - **async validate**: the same, returning a future
//! - **compile**: a factory called once per schema location, returning a
//!   closure called per value
//! - **code**: a routine run against a [`CodeContext`] that can mark
//!   properties/items as evaluated and report standard error records
//! - **macro**: an expansion into ordinary schema keywords, applied before
//!   metadata collection
//!
//! Errors returned by a keyword's own logic ([`KeywordError`]) abort the run
//! and reach the caller of `validate`.

use crate::canonical::JsonType;
use crate::config::ValidatorOptions;
use crate::error::{CompileError, KeywordError, Result};
use crate::pointer::{DataPath, Segment};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Keywords the compiler implements itself; these cannot be registered
pub const PREDEFINED_KEYWORDS: &[&str] = &[
    "$schema",
    "$id",
    "id",
    "$anchor",
    "$dynamicAnchor",
    "$recursiveAnchor",
    "$ref",
    "$dynamicRef",
    "$recursiveRef",
    "$defs",
    "definitions",
    "$comment",
    "$vocabulary",
    "$data",
    "title",
    "description",
    "default",
    "examples",
    "readOnly",
    "writeOnly",
    "deprecated",
    "contentMediaType",
    "contentEncoding",
    "contentSchema",
    "type",
    "enum",
    "const",
    "multipleOf",
    "maximum",
    "exclusiveMaximum",
    "minimum",
    "exclusiveMinimum",
    "maxLength",
    "minLength",
    "pattern",
    "format",
    "items",
    "prefixItems",
    "additionalItems",
    "unevaluatedItems",
    "contains",
    "minContains",
    "maxContains",
    "maxItems",
    "minItems",
    "uniqueItems",
    "properties",
    "patternProperties",
    "additionalProperties",
    "unevaluatedProperties",
    "propertyNames",
    "required",
    "maxProperties",
    "minProperties",
    "dependencies",
    "dependentRequired",
    "dependentSchemas",
    "allOf",
    "anyOf",
    "oneOf",
    "not",
    "if",
    "then",
    "else",
    "elseIf",
    "errorMessage",
];

pub fn is_predefined(keyword: &str) -> bool {
    PREDEFINED_KEYWORDS.contains(&keyword)
}

/// Result of a custom keyword check
#[derive(Debug, Clone, PartialEq)]
pub enum KeywordOutcome {
    Pass,
    Fail,
    /// Fail and merge these fields into the error record
    FailWith(Map<String, Value>),
}

impl From<bool> for KeywordOutcome {
    fn from(valid: bool) -> Self {
        if valid {
            KeywordOutcome::Pass
        } else {
            KeywordOutcome::Fail
        }
    }
}

/// Where the value under validation sits
pub struct KeywordContext<'a> {
    pub data_path: &'a DataPath,
    pub root_data: &'a Value,
    pub schema_path: &'a str,
}

impl<'a> KeywordContext<'a> {
    /// The object or array holding the current value
    pub fn parent_data(&self) -> Option<&'a Value> {
        let mut parent = self.data_path.clone();
        if parent.is_empty() {
            return None;
        }
        parent.pop();
        parent.lookup(self.root_data)
    }

    /// Key or index of the current value inside its parent
    pub fn parent_data_property(&self) -> Option<&Segment> {
        self.data_path.last()
    }
}

/// Compile-time information handed to `compile` factories
pub struct KeywordCompileContext<'a> {
    pub schema_path: &'a str,
    pub root_schema: &'a Value,
    pub options: &'a ValidatorOptions,
}

pub type ValidateFn = Arc<
    dyn Fn(&Value, &Value, &Value, &KeywordContext<'_>) -> std::result::Result<KeywordOutcome, KeywordError>
        + Send
        + Sync,
>;

/// Async validate: keyword value, data, parent schema
pub type AsyncValidateFn = Arc<
    dyn Fn(Value, Value, Value) -> BoxFuture<'static, std::result::Result<KeywordOutcome, KeywordError>>
        + Send
        + Sync,
>;

pub type CompiledKeywordFn = Arc<
    dyn Fn(&Value, &KeywordContext<'_>) -> std::result::Result<KeywordOutcome, KeywordError> + Send + Sync,
>;

pub type CompileFn = Arc<
    dyn Fn(&Value, &Value, &KeywordCompileContext<'_>) -> std::result::Result<CompiledKeywordFn, KeywordError>
        + Send
        + Sync,
>;

pub type CodeFn =
    Arc<dyn Fn(&mut CodeContext<'_>) -> std::result::Result<(), KeywordError> + Send + Sync>;

/// Keyword value and parent schema in, replacement schema out
pub type MacroFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

/// The single implementation protocol of a keyword
#[derive(Clone)]
pub enum KeywordProtocol {
    Validate(ValidateFn),
    AsyncValidate(AsyncValidateFn),
    Compile(CompileFn),
    Code(CodeFn),
    Macro(MacroFn),
}

impl KeywordProtocol {
    fn name(&self) -> &'static str {
        match self {
            KeywordProtocol::Validate(_) => "validate",
            KeywordProtocol::AsyncValidate(_) => "async validate",
            KeywordProtocol::Compile(_) => "compile",
            KeywordProtocol::Code(_) => "code",
            KeywordProtocol::Macro(_) => "macro",
        }
    }
}

/// A user keyword
#[derive(Clone)]
pub struct KeywordDefinition {
    pub keyword: String,
    /// Data types the keyword applies to; other values pass untouched
    pub data_types: Vec<JsonType>,
    /// Allowed JSON types of the keyword's own value
    pub schema_types: Vec<JsonType>,
    /// Meta-schema the keyword value must satisfy
    pub meta_schema: Option<Value>,
    /// Sibling keywords handled by this keyword
    pub implements: Vec<String>,
    pub protocol: KeywordProtocol,
}

impl fmt::Debug for KeywordDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeywordDefinition")
            .field("keyword", &self.keyword)
            .field("protocol", &self.protocol.name())
            .field("data_types", &self.data_types)
            .field("schema_types", &self.schema_types)
            .finish()
    }
}

impl KeywordDefinition {
    fn with_protocol(keyword: impl Into<String>, protocol: KeywordProtocol) -> Self {
        Self {
            keyword: keyword.into(),
            data_types: Vec::new(),
            schema_types: Vec::new(),
            meta_schema: None,
            implements: Vec::new(),
            protocol,
        }
    }

    pub fn validate<F>(keyword: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value, &Value, &Value, &KeywordContext<'_>) -> std::result::Result<KeywordOutcome, KeywordError>
            + Send
            + Sync
            + 'static,
    {
        Self::with_protocol(keyword, KeywordProtocol::Validate(Arc::new(f)))
    }

    pub fn validate_async<F>(keyword: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, Value, Value) -> BoxFuture<'static, std::result::Result<KeywordOutcome, KeywordError>>
            + Send
            + Sync
            + 'static,
    {
        Self::with_protocol(keyword, KeywordProtocol::AsyncValidate(Arc::new(f)))
    }

    pub fn compile<F>(keyword: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value, &Value, &KeywordCompileContext<'_>) -> std::result::Result<CompiledKeywordFn, KeywordError>
            + Send
            + Sync
            + 'static,
    {
        Self::with_protocol(keyword, KeywordProtocol::Compile(Arc::new(f)))
    }

    pub fn code<F>(keyword: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut CodeContext<'_>) -> std::result::Result<(), KeywordError> + Send + Sync + 'static,
    {
        Self::with_protocol(keyword, KeywordProtocol::Code(Arc::new(f)))
    }

    pub fn macro_expand<F>(keyword: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        Self::with_protocol(keyword, KeywordProtocol::Macro(Arc::new(f)))
    }

    pub fn for_types(mut self, types: &[JsonType]) -> Self {
        self.data_types = types.to_vec();
        self
    }

    pub fn with_schema_types(mut self, types: &[JsonType]) -> Self {
        self.schema_types = types.to_vec();
        self
    }

    pub fn with_meta_schema(mut self, meta_schema: Value) -> Self {
        self.meta_schema = Some(meta_schema);
        self
    }

    pub fn implementing(mut self, keywords: &[&str]) -> Self {
        self.implements = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn is_macro(&self) -> bool {
        matches!(self.protocol, KeywordProtocol::Macro(_))
    }

    pub fn is_async(&self) -> bool {
        matches!(self.protocol, KeywordProtocol::AsyncValidate(_))
    }

    /// Whether the keyword has an opinion about this value
    pub fn applies_to(&self, data: &Value) -> bool {
        self.data_types.is_empty() || self.data_types.iter().any(|t| t.matches(data))
    }

    /// Reject malformed definitions before they are registered
    pub fn check_definition(&self) -> Result<()> {
        if self.keyword.is_empty() {
            return Err(CompileError::InvalidKeywordDefinition {
                keyword: self.keyword.clone(),
                reason: "keyword name must not be empty".into(),
            });
        }
        if is_predefined(&self.keyword) {
            return Err(CompileError::PredefinedKeyword(self.keyword.clone()));
        }
        if self.schema_types.contains(&JsonType::Integer) {
            return Err(CompileError::InvalidKeywordDefinition {
                keyword: self.keyword.clone(),
                reason: "Invalid schemaType \"integer\"".into(),
            });
        }
        if let Some(meta) = &self.meta_schema {
            if !meta.is_object() && !meta.is_boolean() {
                return Err(CompileError::InvalidKeywordDefinition {
                    keyword: self.keyword.clone(),
                    reason: "metaSchema must be an object".into(),
                });
            }
        }
        Ok(())
    }

    /// Compile-time check of the keyword value's JSON type
    pub fn check_schema_type(&self, value: &Value, path: &str) -> Result<()> {
        if self.schema_types.is_empty() || self.schema_types.iter().any(|t| t.matches(value)) {
            return Ok(());
        }
        let expected: Vec<&str> = self.schema_types.iter().map(|t| t.name()).collect();
        Err(CompileError::InvalidKeywordValue {
            keyword: self.keyword.clone(),
            path: path.to_string(),
            reason: format!("keyword value must be {}", expected.join(" or ")),
        })
    }
}

/// Builder context handed to `code` keywords
pub struct CodeContext<'a> {
    pub keyword: &'a str,
    pub keyword_value: &'a Value,
    pub parent_schema: &'a Value,
    pub data: &'a Value,
    pub location: KeywordContext<'a>,
    evaluated_properties: Vec<String>,
    evaluated_items: Vec<usize>,
    reports: Vec<(String, Map<String, Value>)>,
}

impl<'a> CodeContext<'a> {
    pub(crate) fn new(
        keyword: &'a str,
        keyword_value: &'a Value,
        parent_schema: &'a Value,
        data: &'a Value,
        location: KeywordContext<'a>,
    ) -> Self {
        Self {
            keyword,
            keyword_value,
            parent_schema,
            data,
            location,
            evaluated_properties: Vec::new(),
            evaluated_items: Vec::new(),
            reports: Vec::new(),
        }
    }

    /// Count a property as evaluated for `unevaluatedProperties`
    pub fn mark_property_evaluated(&mut self, name: impl Into<String>) {
        self.evaluated_properties.push(name.into());
    }

    /// Count an item as evaluated for `unevaluatedItems`
    pub fn mark_item_evaluated(&mut self, index: usize) {
        self.evaluated_items.push(index);
    }

    /// Record a standard error record for this keyword
    pub fn report(&mut self, message: impl Into<String>, params: Map<String, Value>) {
        self.reports.push((message.into(), params));
    }

    pub(crate) fn into_parts(self) -> CodeEffects {
        CodeEffects {
            evaluated_properties: self.evaluated_properties,
            evaluated_items: self.evaluated_items,
            reports: self.reports,
        }
    }
}

/// What a `code` keyword asked for once it returns
pub(crate) struct CodeEffects {
    pub evaluated_properties: Vec<String>,
    pub evaluated_items: Vec<usize>,
    pub reports: Vec<(String, Map<String, Value>)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_predefined_keyword_rejected() {
        let def = KeywordDefinition::validate("minimum", |_, _, _, _| Ok(KeywordOutcome::Pass));
        assert!(matches!(
            def.check_definition(),
            Err(CompileError::PredefinedKeyword(k)) if k == "minimum"
        ));
    }

    #[test]
    fn test_integer_schema_type_rejected() {
        let def = KeywordDefinition::validate("even", |_, _, _, _| Ok(KeywordOutcome::Pass))
            .with_schema_types(&[JsonType::Integer]);
        assert!(def.check_definition().is_err());
    }

    #[test]
    fn test_non_object_meta_schema_rejected() {
        let def = KeywordDefinition::validate("even", |_, _, _, _| Ok(KeywordOutcome::Pass))
            .with_meta_schema(json!("nope"));
        assert!(def.check_definition().is_err());
    }

    #[test]
    fn test_schema_type_check() {
        let def = KeywordDefinition::validate("range", |_, _, _, _| Ok(KeywordOutcome::Pass))
            .with_schema_types(&[JsonType::Array]);
        assert!(def.check_definition().is_ok());
        assert!(def.check_schema_type(&json!([1, 2]), "#").is_ok());
        assert!(def.check_schema_type(&json!(3), "#").is_err());
    }

    #[test]
    fn test_parent_data_lookup() {
        let root = json!({"a": {"b": 1}});
        let mut path = DataPath::root();
        path.push_key("a");
        path.push_key("b");
        let ctx = KeywordContext {
            data_path: &path,
            root_data: &root,
            schema_path: "#",
        };
        assert_eq!(ctx.parent_data(), Some(&json!({"b": 1})));
        assert_eq!(ctx.parent_data_property(), Some(&Segment::Key("b".into())));
    }
}
