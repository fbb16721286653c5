//! Familiar Validator
//!
//! Compiles JSON Schema documents (drafts 6, 7, 2019-09 and 2020-12) into
//! reusable validators and runs them against JSON data.
//!
//! ## Features
//!
//! - **Reference Resolution**: `$id`/`$anchor`/`$dynamicAnchor` bookkeeping, local and external `$ref`, `$dynamicRef`
//! - **Inlining**: reference-free targets are spliced into the call site; cycles become shared units
//! - **Unevaluated Keywords**: `unevaluatedProperties`/`unevaluatedItems` across composition and references
//! - **Custom Keywords**: `validate`, `compile`, `code` and `macro` protocols, sync or async
//! - **Formats**: `full` and `fast` built-in tables plus user formats
//!
//! ## Pipeline
//!
//! ```text
//! schema ─► resolve::collector ─► resolve (session, inliner, units) ─► compile ─► Validator
//!                                       ▲                                              │
//!                                  SchemaLoader (async)                        SchemaValidator cache
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use familiar_validator::{SchemaValidator, ValidatorOptions};
//! use serde_json::json;
//!
//! let validator = SchemaValidator::new(ValidatorOptions::default());
//! let schema = Arc::new(json!({"type": "object", "required": ["id"]}));
//! let compiled = validator.compile(&schema).unwrap();
//! assert!(compiled.validate(&json!({"id": 1})).unwrap());
//! assert!(!compiled.validate(&json!({})).unwrap());
//! ```

pub mod canonical;
pub mod checksum;
pub mod compile;
pub mod config;
pub mod error;
pub mod formats;
pub mod keywords;
pub mod metaschema;
pub mod pointer;
pub mod registry;
pub mod resolve;
pub mod validator;

pub use canonical::JsonType;
pub use checksum::Checksum;
pub use config::{CoerceTypes, Draft, FormatMode, RemoveAdditional, UseDefaults, ValidatorConfig, ValidatorOptions};
pub use error::{CompileError, KeywordError, LoadError, Result, ValidationError};
pub use formats::FormatDefinition;
pub use keywords::{CodeContext, KeywordContext, KeywordDefinition, KeywordOutcome};
pub use registry::{RemovePattern, SchemaRegistry};
pub use resolve::{CompileContext, SchemaLoader};
pub use validator::{errors_text, field_errors, full_field_path, Evaluation, SchemaRef, SchemaValidator, Validator};
