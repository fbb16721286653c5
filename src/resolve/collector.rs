//! Metadata collector
//!
//! One recursive walk per document. Registers `$id`, `$anchor` and
//! `$dynamicAnchor` declarations in the session, normalizes every reference
//! into a [`RefSite`], applies authoring lints and gathers the formats,
//! custom keywords and feature flags the compiler needs.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::trace;
use url::Url;

use super::session::{DocId, Location, ResolutionSession, ResourceId};
use crate::canonical::JsonType;
use crate::config::{Draft, ValidatorOptions};
use crate::error::{CompileError, Result};
use crate::keywords::{is_predefined, KeywordProtocol, MacroFn};
use crate::pointer;
use crate::registry::SchemaRegistry;

/// Keywords holding a map of name to subschema
const MAP_KEYWORDS: &[&str] = &["$defs", "definitions", "properties", "patternProperties", "dependentSchemas"];

/// Keywords holding a single subschema
const SINGLE_KEYWORDS: &[&str] = &[
    "additionalProperties",
    "additionalItems",
    "unevaluatedProperties",
    "unevaluatedItems",
    "contains",
    "propertyNames",
    "not",
    "if",
    "then",
    "else",
    "contentSchema",
];

/// Keywords holding an array of subschemas
const ARRAY_KEYWORDS: &[&str] = &["prefixItems", "allOf", "anyOf", "oneOf"];

/// Keywords whose argument may be a `{"$data": pointer}` object
pub const DATA_KEYWORDS: &[&str] = &[
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "minLength",
    "maxLength",
    "pattern",
    "format",
    "const",
    "enum",
    "required",
    "minItems",
    "maxItems",
    "minProperties",
    "maxProperties",
    "uniqueItems",
];

const MAX_MACRO_DEPTH: usize = 16;

/// How a subschema relates to the instance of its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Via {
    /// Definition containers; not applied to any instance
    Defs,
    /// Applied to the same instance (composition, conditionals, dependencies)
    InPlace,
    /// Applied to a child instance or a property name
    Child,
}

fn via(keyword: &str) -> Via {
    match keyword {
        "$defs" | "definitions" => Via::Defs,
        "allOf" | "anyOf" | "oneOf" | "not" | "if" | "then" | "else" | "elseIf" | "dependentSchemas"
        | "dependencies" => Via::InPlace,
        _ => Via::Child,
    }
}

/// Subschemas under one keyword, with their pointer tokens relative to the keyword
fn children<'v>(keyword: &str, value: &'v Value) -> Vec<(Vec<String>, &'v Value)> {
    let mut out = Vec::new();
    match keyword {
        k if MAP_KEYWORDS.contains(&k) => {
            if let Value::Object(map) = value {
                out.extend(map.iter().map(|(name, v)| (vec![name.clone()], v)));
            }
        }
        "dependencies" => {
            if let Value::Object(map) = value {
                out.extend(
                    map.iter()
                        .filter(|(_, v)| v.is_object() || v.is_boolean())
                        .map(|(name, v)| (vec![name.clone()], v)),
                );
            }
        }
        k if SINGLE_KEYWORDS.contains(&k) => out.push((Vec::new(), value)),
        k if ARRAY_KEYWORDS.contains(&k) => {
            if let Value::Array(items) = value {
                out.extend(items.iter().enumerate().map(|(i, v)| (vec![i.to_string()], v)));
            }
        }
        "items" => match value {
            Value::Array(items) => {
                out.extend(items.iter().enumerate().map(|(i, v)| (vec![i.to_string()], v)));
            }
            other => out.push((Vec::new(), other)),
        },
        "elseIf" => {
            if let Value::Array(items) = value {
                for (i, entry) in items.iter().enumerate() {
                    for part in ["if", "then"] {
                        if let Some(v) = entry.get(part) {
                            out.push((vec![i.to_string(), part.to_string()], v));
                        }
                    }
                }
            }
        }
        _ => {}
    }
    out
}

fn children_mut<'v>(keyword: &str, value: &'v mut Value) -> Vec<&'v mut Value> {
    let mut out = Vec::new();
    match keyword {
        k if MAP_KEYWORDS.contains(&k) => {
            if let Value::Object(map) = value {
                out.extend(map.values_mut());
            }
        }
        "dependencies" => {
            if let Value::Object(map) = value {
                out.extend(map.values_mut().filter(|v| v.is_object() || v.is_boolean()));
            }
        }
        k if SINGLE_KEYWORDS.contains(&k) => out.push(value),
        k if ARRAY_KEYWORDS.contains(&k) => {
            if let Value::Array(items) = value {
                out.extend(items.iter_mut());
            }
        }
        "items" => match value {
            Value::Array(items) => out.extend(items.iter_mut()),
            other => out.push(other),
        },
        "elseIf" => {
            if let Value::Array(items) = value {
                for entry in items.iter_mut() {
                    if let Value::Object(map) = entry {
                        out.extend(
                            map.iter_mut()
                                .filter(|(k, _)| *k == "if" || *k == "then")
                                .map(|(_, v)| v),
                        );
                    }
                }
            }
        }
        _ => {}
    }
    out
}

/// Data types a type-specific keyword applies to
pub fn keyword_types(keyword: &str) -> Option<&'static [JsonType]> {
    const NUMBER: &[JsonType] = &[JsonType::Number, JsonType::Integer];
    const STRING: &[JsonType] = &[JsonType::String];
    const ARRAY: &[JsonType] = &[JsonType::Array];
    const OBJECT: &[JsonType] = &[JsonType::Object];
    match keyword {
        "minimum" | "maximum" | "exclusiveMinimum" | "exclusiveMaximum" | "multipleOf" => Some(NUMBER),
        "minLength" | "maxLength" | "pattern" => Some(STRING),
        "items" | "prefixItems" | "additionalItems" | "contains" | "minContains" | "maxContains" | "minItems"
        | "maxItems" | "uniqueItems" | "unevaluatedItems" => Some(ARRAY),
        "properties" | "patternProperties" | "additionalProperties" | "required" | "minProperties"
        | "maxProperties" | "dependencies" | "dependentRequired" | "dependentSchemas" | "propertyNames"
        | "unevaluatedProperties" => Some(OBJECT),
        _ => None,
    }
}

/// Declared `type` names of a schema object, in declaration order
pub fn declared_types(schema: &Map<String, Value>) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(name)) => vec![name.as_str()],
        Some(Value::Array(names)) => names.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Whether a keyword argument is a `{"$data": "<pointer>"}` reference
pub fn data_reference(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if map.len() == 1 => map.get("$data").and_then(Value::as_str),
        _ => None,
    }
}

/// The reference keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKeyword {
    Ref,
    DynamicRef,
    RecursiveRef,
}

impl RefKeyword {
    pub fn as_str(self) -> &'static str {
        match self {
            RefKeyword::Ref => "$ref",
            RefKeyword::DynamicRef => "$dynamicRef",
            RefKeyword::RecursiveRef => "$recursiveRef",
        }
    }

    const ALL: [RefKeyword; 3] = [RefKeyword::Ref, RefKeyword::DynamicRef, RefKeyword::RecursiveRef];
}

/// A reference normalized against the base URI in effect at its site
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefKind {
    /// `#`: the enclosing resource itself
    SelfRoot,
    /// `#/...` inside the enclosing resource
    Pointer(String),
    /// `#name` inside the enclosing resource
    Anchor(String),
    /// Another resource, optionally with a fragment
    External { base: String, fragment: String },
}

/// One `$ref`/`$dynamicRef`/`$recursiveRef` occurrence
#[derive(Debug, Clone)]
pub struct RefSite {
    /// The schema object declaring the reference keyword
    pub location: Location,
    pub keyword: RefKeyword,
    pub raw: String,
    /// Absolute target URI without fragment
    pub base: String,
    /// Raw (still percent-encoded) fragment
    pub fragment: String,
    pub kind: RefKind,
    /// Highest location this site makes "ref-containing": the nearest
    /// `$defs`/`definitions` entry above it, or the document root
    pub boundary: String,
    pub resource: ResourceId,
}

/// Everything gathered while walking the documents of one resolution
#[derive(Debug, Default)]
pub struct Collected {
    pub sites: Vec<RefSite>,
    pub formats: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
    pub has_unevaluated_properties: bool,
    pub has_unevaluated_items: bool,
    pub uses_data: bool,
}

/// Split a URI into base (no fragment) and raw fragment
pub fn split_fragment(uri: &Url) -> (String, String) {
    let fragment = uri.fragment().unwrap_or("").to_string();
    let mut base = uri.clone();
    base.set_fragment(None);
    (base.to_string(), fragment)
}

/// Walk one document of the session, registering identifiers and collecting metadata
pub fn collect_document(
    session: &mut ResolutionSession,
    doc: DocId,
    options: &ValidatorOptions,
    registry: &SchemaRegistry,
    out: &mut Collected,
) -> Result<()> {
    let document = session.document(doc).clone();
    let base = Url::parse(&document.base)?;
    let root = Location::new(doc, "");
    session.register_identifier(&document.base, root.clone())?;
    let resource = session.add_resource(&document.base, root);
    let mut walker = Walker {
        session,
        options,
        registry,
        doc,
        draft: document.draft,
        lint: !document.meta,
        out,
    };
    walker.walk(&document.value, "", &base, resource, "", None)
}

struct Walker<'a> {
    session: &'a mut ResolutionSession,
    options: &'a ValidatorOptions,
    registry: &'a SchemaRegistry,
    doc: DocId,
    draft: Draft,
    lint: bool,
    out: &'a mut Collected,
}

impl Walker<'_> {
    fn walk(
        &mut self,
        value: &Value,
        ptr: &str,
        base: &Url,
        resource: ResourceId,
        boundary: &str,
        inherited: Option<&[JsonType]>,
    ) -> Result<()> {
        let Value::Object(obj) = value else {
            return Ok(());
        };
        let location = Location::new(self.doc, ptr);
        // drafts 6 and 7: everything next to $ref is ignored, $id included
        let drops_siblings = self.draft.ref_drops_siblings() && obj.contains_key("$ref");
        let mut base = base.clone();
        let mut resource = resource;

        if !drops_siblings {
            if let Some(id) = obj.get("$id").and_then(Value::as_str) {
                if let Some(anchor) = id.strip_prefix('#') {
                    if !anchor.is_empty() {
                        let uri = format!("{}#{}", self.base_string(&base), anchor);
                        self.session.register_identifier(&uri, location.clone())?;
                    }
                } else {
                    let (resolved, _) = split_fragment(&base.join(id)?);
                    trace!(id = %resolved, at = %ptr, "Registered $id");
                    self.session.register_identifier(&resolved, location.clone())?;
                    resource = self.session.add_resource(&resolved, location.clone());
                    base = Url::parse(&resolved)?;
                }
            }
            if let Some(anchor) = obj.get("$anchor").and_then(Value::as_str) {
                let uri = format!("{}#{}", self.base_string(&base), anchor);
                self.session.register_identifier(&uri, location.clone())?;
            }
            if let Some(anchor) = obj.get("$dynamicAnchor").and_then(Value::as_str) {
                let uri = format!("{}#{}", self.base_string(&base), anchor);
                self.session.register_identifier(&uri, location.clone())?;
                self.session.add_dynamic_anchor(resource, anchor, location.clone());
            }
            if obj.get("$recursiveAnchor") == Some(&Value::Bool(true))
                && self.session.resource_at(&location) == Some(resource)
            {
                self.session.add_dynamic_anchor(resource, "", location.clone());
            }
        }

        for keyword in RefKeyword::ALL {
            let Some(raw) = obj.get(keyword.as_str()) else {
                continue;
            };
            if drops_siblings && keyword != RefKeyword::Ref {
                continue;
            }
            let raw = raw.as_str().ok_or_else(|| CompileError::InvalidKeywordValue {
                keyword: keyword.as_str().to_string(),
                path: self.session.schema_path(&location),
                reason: "reference must be a string".into(),
            })?;
            self.add_site(&location, keyword, raw, &base, resource, boundary)?;
        }

        if !drops_siblings {
            self.note_features(obj);
            if self.lint {
                self.lint_node(obj, &location, inherited)?;
            }
        }

        let own_types: Vec<JsonType> = declared_types(obj)
            .into_iter()
            .filter_map(JsonType::from_name)
            .collect();
        for (keyword, value) in obj {
            if drops_siblings && !matches!(keyword.as_str(), "definitions" | "$defs") {
                continue;
            }
            let relation = via(keyword);
            for (tokens, child) in children(keyword, value) {
                let mut child_ptr = pointer::join(ptr, keyword);
                for token in &tokens {
                    child_ptr = pointer::join(&child_ptr, token);
                }
                let child_boundary = if relation == Via::Defs {
                    child_ptr.clone()
                } else {
                    boundary.to_string()
                };
                let child_inherited = match relation {
                    Via::InPlace if !own_types.is_empty() => Some(own_types.as_slice()),
                    Via::InPlace => inherited,
                    _ => None,
                };
                self.walk(child, &child_ptr, &base, resource, &child_boundary, child_inherited)?;
            }
        }
        Ok(())
    }

    fn base_string(&self, base: &Url) -> String {
        let (b, _) = split_fragment(base);
        b
    }

    fn add_site(
        &mut self,
        location: &Location,
        keyword: RefKeyword,
        raw: &str,
        base: &Url,
        resource: ResourceId,
        boundary: &str,
    ) -> Result<()> {
        let target = base.join(raw).map_err(|e| CompileError::InvalidKeywordValue {
            keyword: keyword.as_str().to_string(),
            path: self.session.schema_path(location),
            reason: format!("invalid reference {raw:?}: {e}"),
        })?;
        let (target_base, fragment) = split_fragment(&target);
        let current = self.base_string(base);
        let kind = if target_base != current {
            RefKind::External {
                base: target_base.clone(),
                fragment: fragment.clone(),
            }
        } else if fragment.is_empty() {
            RefKind::SelfRoot
        } else if fragment.starts_with('/') {
            RefKind::Pointer(pointer::from_fragment(&fragment))
        } else {
            RefKind::Anchor(fragment.clone())
        };
        trace!(at = %location.pointer, keyword = keyword.as_str(), reference = raw, "Collected reference");
        self.out.sites.push(RefSite {
            location: location.clone(),
            keyword,
            raw: raw.to_string(),
            base: target_base,
            fragment,
            kind,
            boundary: boundary.to_string(),
            resource,
        });
        Ok(())
    }

    fn note_features(&mut self, obj: &Map<String, Value>) {
        if obj.contains_key("unevaluatedProperties") {
            self.out.has_unevaluated_properties = true;
        }
        if obj.contains_key("unevaluatedItems") {
            self.out.has_unevaluated_items = true;
        }
        match obj.get("format") {
            Some(Value::String(name)) => {
                self.out.formats.insert(name.clone());
            }
            Some(other) if self.options.data && data_reference(other).is_some() => {
                self.out.uses_data = true;
            }
            _ => {}
        }
        if self.options.data
            && DATA_KEYWORDS
                .iter()
                .any(|k| obj.get(*k).and_then(data_reference).is_some())
        {
            self.out.uses_data = true;
        }
        for key in obj.keys() {
            if self.registry.get_keyword(key).is_some() {
                self.out.keywords.insert(key.clone());
            }
        }
    }

    fn lint_node(
        &self,
        obj: &Map<String, Value>,
        location: &Location,
        inherited: Option<&[JsonType]>,
    ) -> Result<()> {
        let path = self.session.schema_path(location);
        if let Some(mode) = self.options.lint_schema() {
            if let Some(key) = obj
                .keys()
                .find(|k| !is_predefined(k) && self.registry.get_keyword(k).is_none())
            {
                return Err(CompileError::Strict {
                    mode,
                    path,
                    message: format!("unknown keyword: \"{key}\""),
                });
            }
        }

        let mut types = Vec::new();
        for name in declared_types(obj) {
            match JsonType::from_name(name) {
                Some(t) => types.push(t),
                None if self.options.strict => {
                    return Err(CompileError::Strict {
                        mode: "strict",
                        path,
                        message: format!("type must be JSON type, got \"{name}\""),
                    })
                }
                None => {}
            }
        }

        if self.options.strict && !types.is_empty() {
            for key in obj.keys() {
                let Some(applicable) = keyword_types(key) else {
                    continue;
                };
                let compatible = types.iter().any(|t| {
                    applicable.contains(t) || (*t == JsonType::Integer && applicable.contains(&JsonType::Number))
                });
                if !compatible {
                    let names: Vec<&str> = types.iter().map(|t| t.name()).collect();
                    return Err(CompileError::Strict {
                        mode: "strict",
                        path,
                        message: format!("keyword \"{key}\" is not applicable to type \"{}\"", names.join(",")),
                    });
                }
            }
        }

        if self.options.strict_types && types.is_empty() && inherited.is_none() {
            if let Some((key, applicable)) = obj
                .keys()
                .find_map(|k| keyword_types(k).map(|types| (k, types)))
            {
                return Err(CompileError::Strict {
                    mode: "strictTypes",
                    path,
                    message: format!("missing type \"{}\" for keyword \"{key}\"", applicable[0].name()),
                });
            }
        }

        if self.options.strict_required {
            if let Some(Value::Array(required)) = obj.get("required") {
                let properties = obj.get("properties").and_then(Value::as_object);
                for name in required.iter().filter_map(Value::as_str) {
                    if !properties.is_some_and(|p| p.contains_key(name)) {
                        return Err(CompileError::Strict {
                            mode: "strictRequired",
                            path,
                            message: format!("required property \"{name}\" is not defined"),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Expand macro keywords into extra `allOf` branches, recursively
///
/// Errors raised inside an expansion carry schema paths into the expanded
/// copy (`#/allOf/<n>/...`, after any declared branches), not into the
/// schema as written.
pub fn expand_macros(schema: &Value, registry: &SchemaRegistry) -> Result<Value> {
    let mut expanded = schema.clone();
    expand_node(&mut expanded, registry, 0)?;
    Ok(expanded)
}

fn expand_node(value: &mut Value, registry: &SchemaRegistry, depth: usize) -> Result<()> {
    let Value::Object(obj) = value else {
        return Ok(());
    };
    let macros: Vec<(String, MacroFn)> = obj
        .keys()
        .filter_map(|k| match registry.get_keyword(k).map(|def| &def.protocol) {
            Some(KeywordProtocol::Macro(f)) => Some((k.clone(), Arc::clone(f))),
            _ => None,
        })
        .collect();

    let original_branches = match obj.get("allOf") {
        Some(Value::Array(items)) => items.len(),
        _ => 0,
    };
    if !macros.is_empty() {
        if depth >= MAX_MACRO_DEPTH {
            return Err(CompileError::InvalidKeywordDefinition {
                keyword: macros[0].0.clone(),
                reason: format!("macro expansion nested deeper than {MAX_MACRO_DEPTH} levels"),
            });
        }
        let parent = Value::Object(obj.clone());
        let mut expansions = Vec::with_capacity(macros.len());
        for (keyword, expand) in &macros {
            if let Some(argument) = obj.get(keyword) {
                expansions.push(expand(argument, &parent));
            }
        }
        match obj.entry("allOf").or_insert_with(|| Value::Array(Vec::new())) {
            Value::Array(branches) => branches.extend(expansions),
            _ => {
                return Err(CompileError::InvalidKeywordValue {
                    keyword: "allOf".into(),
                    path: String::new(),
                    reason: "allOf must be an array".into(),
                })
            }
        }
    }

    for (keyword, child) in obj.iter_mut() {
        if keyword == "allOf" {
            if let Value::Array(branches) = child {
                for (i, branch) in branches.iter_mut().enumerate() {
                    let next = if i >= original_branches { depth + 1 } else { depth };
                    expand_node(branch, registry, next)?;
                }
            }
            continue;
        }
        for sub in children_mut(keyword, child) {
            expand_node(sub, registry, depth)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keywords::KeywordDefinition;
    use serde_json::json;

    fn collect(schema: Value, options: &ValidatorOptions) -> Result<(ResolutionSession, Collected)> {
        let registry = SchemaRegistry::new(options);
        let mut session = ResolutionSession::new();
        let draft = Draft::from_schema_uri(schema.get("$schema").and_then(Value::as_str).unwrap_or(""))
            .unwrap_or(options.draft);
        let doc = session.add_document("json-schema:///root", Arc::new(schema), draft, false);
        let mut out = Collected::default();
        collect_document(&mut session, doc, options, &registry, &mut out)?;
        Ok((session, out))
    }

    #[test]
    fn test_identifiers_registered() {
        let (session, out) = collect(
            json!({
                "$id": "http://example.com/root.json",
                "$defs": {
                    "a": {"$id": "a.json", "$anchor": "top", "type": "string"},
                    "b": {"$anchor": "bee", "type": "number"}
                },
                "$ref": "a.json#top"
            }),
            &ValidatorOptions::default(),
        )
        .unwrap();
        assert_eq!(
            session.lookup("http://example.com/root.json"),
            Some(&Location::new(0, ""))
        );
        assert_eq!(
            session.lookup("http://example.com/a.json#top"),
            Some(&Location::new(0, "/$defs/a"))
        );
        assert_eq!(
            session.lookup("http://example.com/root.json#bee"),
            Some(&Location::new(0, "/$defs/b"))
        );
        assert_eq!(out.sites.len(), 1);
        assert_eq!(out.sites[0].base, "http://example.com/a.json");
        assert!(matches!(out.sites[0].kind, RefKind::External { .. }));
    }

    #[test]
    fn test_ref_kinds_and_boundaries() {
        let (_, out) = collect(
            json!({
                "properties": {"a": {"$ref": "#/$defs/x"}, "b": {"$ref": "#"}},
                "$defs": {"x": {"items": {"$ref": "#node"}}, "y": {"$anchor": "node"}}
            }),
            &ValidatorOptions::default(),
        )
        .unwrap();
        let by_ptr = |p: &str| out.sites.iter().find(|s| s.location.pointer == p).unwrap();
        assert_eq!(by_ptr("/properties/a").kind, RefKind::Pointer("/$defs/x".into()));
        assert_eq!(by_ptr("/properties/a").boundary, "");
        assert_eq!(by_ptr("/properties/b").kind, RefKind::SelfRoot);
        assert_eq!(by_ptr("/$defs/x/items").kind, RefKind::Anchor("node".into()));
        assert_eq!(by_ptr("/$defs/x/items").boundary, "/$defs/x");
    }

    #[test]
    fn test_draft7_ref_drops_sibling_id() {
        let (session, _) = collect(
            json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "$id": "http://example.com/base/",
                "allOf": [{"$id": "http://example.com/other/", "$ref": "foo.json"}]
            }),
            &ValidatorOptions::default(),
        )
        .unwrap();
        assert!(session.lookup("http://example.com/other/").is_none());
    }

    #[test]
    fn test_strict_unknown_keyword() {
        let err = collect(json!({"type": "string", "minLenght": 2}), &ValidatorOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::Strict { mode: "strict", .. }));
        let relaxed = ValidatorOptions {
            strict: false,
            ..Default::default()
        };
        assert!(collect(json!({"minLenght": 2}), &relaxed).is_ok());
    }

    #[test]
    fn test_strict_incompatible_keyword() {
        let err = collect(json!({"type": "string", "minimum": 2}), &ValidatorOptions::default()).unwrap_err();
        assert!(err.to_string().contains("minimum"));
        assert!(collect(json!({"type": ["string", "integer"], "minimum": 2}), &ValidatorOptions::default()).is_ok());
    }

    #[test]
    fn test_strict_types_and_required() {
        let options = ValidatorOptions {
            strict_types: true,
            strict_required: true,
            ..Default::default()
        };
        assert!(collect(json!({"properties": {"a": {}}}), &options).is_err());
        assert!(collect(json!({"type": "object", "allOf": [{"properties": {"a": {}}}]}), &options).is_ok());
        let err = collect(json!({"type": "object", "properties": {"a": {}}, "required": ["b"]}), &options).unwrap_err();
        assert!(matches!(err, CompileError::Strict { mode: "strictRequired", .. }));
    }

    #[test]
    fn test_features_noted() {
        let options = ValidatorOptions {
            data: true,
            ..Default::default()
        };
        let (_, out) = collect(
            json!({
                "properties": {
                    "a": {"type": "string", "format": "email"},
                    "b": {"type": "number", "maximum": {"$data": "1/c"}}
                },
                "unevaluatedProperties": false
            }),
            &options,
        )
        .unwrap();
        assert!(out.formats.contains("email"));
        assert!(out.uses_data);
        assert!(out.has_unevaluated_properties);
        assert!(!out.has_unevaluated_items);
    }

    #[test]
    fn test_macro_expansion() {
        let mut registry = SchemaRegistry::new(&ValidatorOptions::default());
        registry
            .add_keyword(KeywordDefinition::macro_expand("range", |value, _| {
                json!({"minimum": value[0], "maximum": value[1]})
            }))
            .unwrap();
        let expanded = expand_macros(&json!({"properties": {"n": {"range": [1, 3]}}}), &registry).unwrap();
        assert_eq!(
            expanded["properties"]["n"]["allOf"],
            json!([{"minimum": 1, "maximum": 3}])
        );
    }

    #[test]
    fn test_runaway_macro_rejected() {
        let mut registry = SchemaRegistry::new(&ValidatorOptions::default());
        registry
            .add_keyword(KeywordDefinition::macro_expand("forever", |value, _| json!({"forever": value})))
            .unwrap();
        assert!(expand_macros(&json!({"forever": 1}), &registry).is_err());
    }
}
