//! Compiled node tree
//!
//! Each schema object compiles to a [`SchemaNode`]: its location, the enclosing
//! resource and an ordered list of [`Check`]s. References compile either to a
//! nested node (inlined) or to a unit handle (called).

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use serde_json::{Map, Value};

use crate::canonical::JsonType;
use crate::formats::FormatDefinition;
use crate::keywords::{CompiledKeywordFn, KeywordDefinition};
use crate::pointer::DataPointer;
use crate::resolve::graph::UnitId;
use crate::resolve::session::ResourceId;

/// A keyword argument: literal, or read from the data at validate time
#[derive(Debug, Clone)]
pub enum Arg<T> {
    Literal(T),
    Data(DataPointer),
}

/// Replacement messages from an `errorMessage` keyword
#[derive(Debug, Clone)]
pub enum ErrorMessage {
    Text(String),
    /// Per keyword, with `_` as fallback
    PerKeyword(Map<String, Value>),
}

impl ErrorMessage {
    pub fn for_keyword(&self, keyword: &str) -> Option<&str> {
        match self {
            ErrorMessage::Text(text) => Some(text),
            ErrorMessage::PerKeyword(map) => map
                .get(keyword)
                .or_else(|| map.get("_"))
                .and_then(Value::as_str),
        }
    }
}

/// How a reference is executed
#[derive(Debug)]
pub enum Target {
    Unit(UnitId),
    Inline(Box<SchemaNode>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Minimum,
    Maximum,
    ExclusiveMinimum,
    ExclusiveMaximum,
    MultipleOf,
}

impl NumericKind {
    pub fn keyword(self) -> &'static str {
        match self {
            NumericKind::Minimum => "minimum",
            NumericKind::Maximum => "maximum",
            NumericKind::ExclusiveMinimum => "exclusiveMinimum",
            NumericKind::ExclusiveMaximum => "exclusiveMaximum",
            NumericKind::MultipleOf => "multipleOf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountKind {
    MinLength,
    MaxLength,
    MinItems,
    MaxItems,
    MinProperties,
    MaxProperties,
}

impl CountKind {
    pub fn keyword(self) -> &'static str {
        match self {
            CountKind::MinLength => "minLength",
            CountKind::MaxLength => "maxLength",
            CountKind::MinItems => "minItems",
            CountKind::MaxItems => "maxItems",
            CountKind::MinProperties => "minProperties",
            CountKind::MaxProperties => "maxProperties",
        }
    }

    pub fn applies_to(self) -> JsonType {
        match self {
            CountKind::MinLength | CountKind::MaxLength => JsonType::String,
            CountKind::MinItems | CountKind::MaxItems => JsonType::Array,
            CountKind::MinProperties | CountKind::MaxProperties => JsonType::Object,
        }
    }

    pub fn is_min(self) -> bool {
        matches!(self, CountKind::MinLength | CountKind::MinItems | CountKind::MinProperties)
    }
}

/// Either a closing `false` or a schema applied to each leftover
#[derive(Debug)]
pub enum Leftover {
    Forbid,
    Allow,
    Schema(Box<SchemaNode>),
}

#[derive(Debug)]
pub struct DependentRequired {
    pub keyword: &'static str,
    pub property: String,
    pub required: Vec<String>,
}

#[derive(Debug)]
pub struct ElseIf {
    pub condition: SchemaNode,
    pub then: Option<SchemaNode>,
}

pub enum CustomImpl {
    Definition(KeywordDefinition),
    Compiled(KeywordDefinition, CompiledKeywordFn),
}

impl std::fmt::Debug for CustomImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CustomImpl::Definition(def) | CustomImpl::Compiled(def, _) => def.fmt(f),
        }
    }
}

impl CustomImpl {
    pub fn definition(&self) -> &KeywordDefinition {
        match self {
            CustomImpl::Definition(def) | CustomImpl::Compiled(def, _) => def,
        }
    }
}

/// One keyword's runtime check
#[derive(Debug)]
pub enum Check {
    /// The `false` schema
    False,
    Ref(Target),
    /// Binds to the outermost resource in the dynamic scope declaring the anchor
    DynamicRef {
        fallback: UnitId,
        anchor: String,
        candidates: Vec<(ResourceId, UnitId)>,
    },
    Not(Box<SchemaNode>),
    AllOf(Vec<SchemaNode>),
    AnyOf(Vec<SchemaNode>),
    OneOf(Vec<SchemaNode>),
    Conditional {
        condition: Box<SchemaNode>,
        then: Option<Box<SchemaNode>>,
        else_if: Vec<ElseIf>,
        otherwise: Option<Box<SchemaNode>>,
    },
    Custom {
        keyword: String,
        value: Value,
        implementation: CustomImpl,
    },
    Type(Vec<JsonType>),
    Const(Arg<Value>),
    Enum {
        values: Arg<Vec<Value>>,
        /// Canonical forms for large literal enums
        index: Option<HashSet<String>>,
    },
    Numeric {
        kind: NumericKind,
        limit: Arg<Value>,
    },
    Count {
        kind: CountKind,
        limit: Arg<Value>,
    },
    Pattern(Arg<Regex>),
    Format {
        name: Arg<String>,
        definition: Option<FormatDefinition>,
    },
    Required {
        names: Arg<Vec<String>>,
        looped: bool,
    },
    Properties(Vec<(String, SchemaNode)>),
    PatternProperties(Vec<(Regex, SchemaNode)>),
    AdditionalProperties {
        known: Vec<String>,
        patterns: Vec<Regex>,
        leftover: Leftover,
    },
    Dependencies {
        required: Vec<DependentRequired>,
        schemas: Vec<(String, SchemaNode)>,
    },
    PropertyNames(Box<SchemaNode>),
    UnevaluatedProperties(Leftover),
    PrefixItems {
        keyword: &'static str,
        schemas: Vec<SchemaNode>,
    },
    Items {
        keyword: &'static str,
        start: usize,
        leftover: Leftover,
    },
    Contains {
        schema: Box<SchemaNode>,
        min: usize,
        max: Option<usize>,
    },
    UniqueItems(Arg<Value>),
    UnevaluatedItems(Leftover),
}

/// A compiled schema object
#[derive(Debug)]
pub struct SchemaNode {
    /// `#`-pointer reported in errors
    pub schema_path: Arc<str>,
    /// Document holding the schema object, for `expected` values and custom keywords
    pub document: Arc<Value>,
    pub pointer: String,
    pub resource: ResourceId,
    pub checks: Vec<Check>,
    /// Declared types used for coercion
    pub coerce_to: Vec<JsonType>,
    /// Property defaults filled in before the object checks
    pub defaults: Vec<(String, Value)>,
    pub error_message: Option<ErrorMessage>,
    /// Node declares `unevaluatedProperties`/`unevaluatedItems` and gets its own tracking set
    pub closes: bool,
}

impl SchemaNode {
    /// The schema object this node was compiled from
    pub fn schema(&self) -> Option<&Value> {
        crate::pointer::get(&self.document, &self.pointer)
    }

    /// The additional-properties check, if the node has one
    pub fn additional_properties(&self) -> Option<(&[String], &[Regex], &Leftover)> {
        self.checks.iter().find_map(|check| match check {
            Check::AdditionalProperties {
                known,
                patterns,
                leftover,
            } => Some((known.as_slice(), patterns.as_slice(), leftover)),
            _ => None,
        })
    }
}

/// A compiled location called by name
#[derive(Debug)]
pub struct Unit {
    pub name: String,
    pub node: SchemaNode,
    pub recursive: bool,
}
