//! Error types for schema compilation and validation

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Result type for compile operations
pub type Result<T> = std::result::Result<T, CompileError>;

/// Errors raised while turning a schema into a validator.
///
/// These are fatal: a failing compile never yields a partially built validator.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("[{mode}] {message} (at {path})")]
    Strict {
        mode: &'static str,
        path: String,
        message: String,
    },

    #[error("Invalid {keyword} pointer. {keyword} not found: {reference} (at {path})")]
    UnresolvedReference {
        keyword: &'static str,
        reference: String,
        path: String,
    },

    #[error("Invalid definition for keyword \"{keyword}\": {reason}")]
    InvalidKeywordDefinition { keyword: String, reason: String },

    #[error("Keyword \"{0}\" is a predefined keyword and cannot be registered.")]
    PredefinedKeyword(String),

    #[error("Invalid value for keyword \"{keyword}\" at {path}: {reason}")]
    InvalidKeywordValue {
        keyword: String,
        path: String,
        reason: String,
    },

    #[error("Format '{format}' not found (at {path})")]
    UnknownFormat { format: String, path: String },

    #[error("Format \"{0}\" is already registered, remove it before adding it again")]
    FormatExists(String),

    #[error("Invalid regular expression {pattern:?} at {path}: {source}")]
    InvalidRegex {
        pattern: String,
        path: String,
        #[source]
        source: regex::Error,
    },

    #[error("Schema at {path} does not match its meta-schema: {}", errors.join("; "))]
    MetaSchemaMismatch { path: String, errors: Vec<String> },

    #[error("Failed to load external schema {uri}: {source}")]
    ExternalLoad {
        uri: String,
        #[source]
        source: LoadError,
    },

    #[error("External schema {uri} is not registered; use compile_async with a schema loader")]
    AsyncRequired { uri: String },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Schema {0} not found in registry.")]
    SchemaNotFound(String),

    #[error("Meta-schema \"{0}\" is not loaded")]
    MetaSchemaNotFound(String),

    #[error(transparent)]
    Keyword(#[from] KeywordError),

    #[error("Invalid URI: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure reported by a [`SchemaLoader`](crate::resolve::SchemaLoader)
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("no schema available for {0}")]
    NotFound(String),

    #[error("loader returned an unusable schema: {0}")]
    Unusable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Error raised by a custom keyword's own logic.
///
/// Unlike a failed check this aborts the validation run and is returned to the caller.
#[derive(Error, Debug, Clone)]
#[error("keyword '{keyword}' raised: {message}")]
pub struct KeywordError {
    pub keyword: String,
    pub message: String,
}

impl KeywordError {
    pub fn new(keyword: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            message: message.into(),
        }
    }
}

/// One entry of a validator's error list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    /// JSON pointer into the data, `/` for the root
    pub data_path: String,
    /// `#`-prefixed pointer to the schema object declaring `keyword`
    pub schema_path: String,
    pub keyword: String,
    pub message: String,
    /// Offending value (verbose mode only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Expected value or constraint (verbose mode only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    /// Keyword-specific extras
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl ValidationError {
    /// Look up a keyword-specific extra field
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} at {}): {}",
            self.data_path, self.keyword, self.schema_path, self.message
        )
    }
}
