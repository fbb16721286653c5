//! Validator compiler
//!
//! Walks the resolved documents and builds a [`Program`]: one [`Unit`] per
//! called location (unit 0 is the root, named `validate`), each a tree of
//! [`SchemaNode`]s. Inlined references are compiled in place; the rest become
//! calls recorded in the call graph.
//!
//! Within a node the checks run in a fixed order: references, `not`, `anyOf`,
//! `allOf`, `oneOf`, conditionals, custom keywords, `type`, then the
//! type-specific keywords with `unevaluatedProperties`/`unevaluatedItems` last.

pub mod coerce;
pub mod eval;
pub mod node;
pub mod tracking;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::canonical::{canonical_stringify, JsonType};
use crate::config::{CoerceTypes, UseDefaults, ValidatorOptions};
use crate::error::{CompileError, Result};
use crate::formats::FormatDefinition;
use crate::keywords::{KeywordCompileContext, KeywordProtocol};
use crate::pointer::{self, DataPointer};
use crate::registry::SchemaRegistry;
use crate::resolve::collector::{data_reference, declared_types, RefKeyword};
use crate::resolve::graph::{CallGraph, UnitId};
use crate::resolve::session::Location;
use crate::resolve::{resolve, CompileContext, Resolution, ResolveError, SiteResolution};
pub use eval::{Edit, EditAction, Outcome};
use node::{
    Arg, Check, CountKind, CustomImpl, DependentRequired, ElseIf, ErrorMessage, Leftover, NumericKind,
    SchemaNode, Target, Unit,
};

/// A compiled schema, ready to run
#[derive(Debug)]
pub struct Program {
    pub(crate) units: Vec<Unit>,
    pub(crate) context: CompileContext,
    pub(crate) options: ValidatorOptions,
    /// Formats looked up by name at validate time (`$data` format arguments)
    pub(crate) formats: HashMap<String, FormatDefinition>,
    pub(crate) root_message: Option<String>,
    pub(crate) is_async: bool,
}

impl Program {
    pub fn context(&self) -> &CompileContext {
        &self.context
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn unit_names(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|u| u.name.as_str())
    }
}

/// Resolve and compile a schema
pub fn build(
    schema: &Arc<Value>,
    options: &ValidatorOptions,
    registry: &SchemaRegistry,
    loaded: &HashMap<String, Arc<Value>>,
) -> std::result::Result<Program, ResolveError> {
    let resolution = resolve(schema, options, registry, loaded)?;
    let compiler = Compiler {
        resolution: &resolution,
        options,
        registry,
        loaded,
        graph: CallGraph::new(),
        current: 0,
        is_async: false,
    };
    Ok(compiler.finish()?)
}

struct Compiler<'a> {
    resolution: &'a Resolution,
    options: &'a ValidatorOptions,
    registry: &'a SchemaRegistry,
    loaded: &'a HashMap<String, Arc<Value>>,
    graph: CallGraph,
    current: UnitId,
    is_async: bool,
}

impl<'a> Compiler<'a> {
    fn finish(mut self) -> Result<Program> {
        let resolution = self.resolution;
        let specs = &resolution.units;
        let mut nodes = Vec::with_capacity(specs.len());
        for (id, spec) in specs.iter().enumerate() {
            self.current = id;
            self.graph.add_unit(id);
            nodes.push(self.compile_node(&spec.location)?);
        }

        let analysis = self.graph.analyze(0);
        let units: Vec<Unit> = specs
            .iter()
            .zip(nodes)
            .enumerate()
            .map(|(id, (spec, node))| Unit {
                name: spec.name.clone(),
                node,
                recursive: analysis.recursive.contains(&id),
            })
            .collect();
        let collected = &resolution.collected;
        let context = CompileContext {
            has_unevaluated_properties: collected.has_unevaluated_properties,
            has_unevaluated_items: collected.has_unevaluated_items,
            has_root_reference: analysis.has_root_reference,
            referenced_functions: analysis
                .reachable
                .iter()
                .map(|&id| units[id].name.clone())
                .collect(),
            uses_data: collected.uses_data,
        };
        debug!(
            units = units.len(),
            recursive = analysis.recursive.len(),
            has_root_reference = context.has_root_reference,
            "Compiled schema"
        );

        // $data format names are only known at validate time
        let formats = if context.uses_data {
            self.registry.formats().clone()
        } else {
            HashMap::new()
        };

        let root_message = if self.options.error_message {
            resolution
                .session
                .value_at(&Location::new(0, ""))
                .and_then(|root| root.get("errorMessage"))
                .and_then(Value::as_str)
                .map(str::to_string)
        } else {
            None
        };

        Ok(Program {
            units,
            context,
            options: self.options.clone(),
            formats,
            root_message,
            is_async: self.is_async,
        })
    }

    fn invalid(&self, keyword: &str, path: &str, reason: impl Into<String>) -> CompileError {
        CompileError::InvalidKeywordValue {
            keyword: keyword.to_string(),
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    fn compile_node(&mut self, location: &Location) -> Result<SchemaNode> {
        let resolution = self.resolution;
        let session = &resolution.session;
        let document = session.document(location.doc);
        let path = session.schema_path(location);
        let value = session
            .value_at(location)
            .ok_or_else(|| CompileError::InvalidSchema(format!("no schema at {path}")))?;
        let mut node = SchemaNode {
            schema_path: Arc::from(path.as_str()),
            document: Arc::clone(&document.value),
            pointer: location.pointer.clone(),
            resource: session.resource_of(location),
            checks: Vec::new(),
            coerce_to: Vec::new(),
            defaults: Vec::new(),
            error_message: None,
            closes: false,
        };
        let obj = match value {
            Value::Bool(true) => return Ok(node),
            Value::Bool(false) => {
                node.checks.push(Check::False);
                return Ok(node);
            }
            Value::Object(obj) => obj,
            _ => {
                return Err(CompileError::InvalidSchema(format!(
                    "schema at {path} must be an object or a boolean"
                )))
            }
        };
        trace!(at = %path, "Compiling schema node");

        if self.options.error_message {
            node.error_message = match obj.get("errorMessage") {
                Some(Value::String(text)) => Some(ErrorMessage::Text(text.clone())),
                Some(Value::Object(map)) => Some(ErrorMessage::PerKeyword(map.clone())),
                Some(_) => return Err(self.invalid("errorMessage", &path, "must be a string or an object")),
                None => None,
            };
        }

        if document.draft.ref_drops_siblings() && obj.contains_key("$ref") {
            node.checks.push(self.reference(location, RefKeyword::Ref, &path)?);
            return Ok(node);
        }

        let registry = self.registry;
        let implemented: HashSet<&str> = obj
            .keys()
            .filter_map(|k| registry.get_keyword(k))
            .flat_map(|def| def.implements.iter().map(String::as_str))
            .collect();
        let has = |k: &str| obj.contains_key(k) && !implemented.contains(k);

        if self.options.coerce_types != CoerceTypes::Off {
            node.coerce_to = declared_types(obj).into_iter().filter_map(JsonType::from_name).collect();
        }
        if self.options.use_defaults != UseDefaults::Off {
            if let Some(Value::Object(props)) = obj.get("properties") {
                node.defaults = props
                    .iter()
                    .filter_map(|(name, sub)| sub.get("default").map(|d| (name.clone(), d.clone())))
                    .collect();
            }
        }
        node.closes = has("unevaluatedProperties") || has("unevaluatedItems");

        for keyword in [RefKeyword::Ref, RefKeyword::DynamicRef, RefKeyword::RecursiveRef] {
            if has(keyword.as_str()) {
                node.checks.push(self.reference(location, keyword, &path)?);
            }
        }

        if has("not") {
            let child = self.compile_node(&location.child("not"))?;
            node.checks.push(Check::Not(Box::new(child)));
        }
        if has("anyOf") {
            node.checks.push(Check::AnyOf(self.branches(location, obj, "anyOf", &path)?));
        }
        if has("allOf") {
            node.checks.push(Check::AllOf(self.branches(location, obj, "allOf", &path)?));
        }
        if has("oneOf") {
            node.checks.push(Check::OneOf(self.branches(location, obj, "oneOf", &path)?));
        }
        if has("if") {
            node.checks.push(self.conditional(location, obj, &path)?);
        }

        for (keyword, argument) in obj {
            if let Some(check) = self.custom(keyword, argument, &path, &document.value, value)? {
                node.checks.push(check);
            }
        }

        if has("type") {
            let types: Vec<JsonType> = declared_types(obj).into_iter().filter_map(JsonType::from_name).collect();
            if !types.is_empty() {
                node.checks.push(Check::Type(types));
            }
        }
        if has("const") {
            if let Some(arg) = self.argument(obj, "const", &path)? {
                node.checks.push(Check::Const(arg));
            }
        }
        if has("enum") {
            node.checks.push(self.enumeration(obj, &path)?);
        }

        for kind in [
            NumericKind::Minimum,
            NumericKind::Maximum,
            NumericKind::ExclusiveMinimum,
            NumericKind::ExclusiveMaximum,
            NumericKind::MultipleOf,
        ] {
            if !has(kind.keyword()) {
                continue;
            }
            if let Some(limit) = self.argument(obj, kind.keyword(), &path)? {
                if let Arg::Literal(v) = &limit {
                    let ok = v.as_f64().is_some_and(|n| kind != NumericKind::MultipleOf || n > 0.0);
                    if !ok {
                        return Err(self.invalid(kind.keyword(), &path, "must be a number (positive for multipleOf)"));
                    }
                }
                node.checks.push(Check::Numeric { kind, limit });
            }
        }

        for kind in [CountKind::MinLength, CountKind::MaxLength] {
            self.count(&mut node, obj, kind, &path, &has)?;
        }
        if has("pattern") {
            node.checks.push(self.pattern(obj, &path)?);
        }
        if has("format") && self.options.validate_formats {
            if let Some(check) = self.format(obj, &path)? {
                node.checks.push(check);
            }
        }

        if has("required") {
            node.checks.push(self.required(obj, &path)?);
        }
        for kind in [CountKind::MinProperties, CountKind::MaxProperties] {
            self.count(&mut node, obj, kind, &path, &has)?;
        }
        if has("properties") {
            let props = self.named_children(location, obj, "properties", &path)?;
            node.checks.push(Check::Properties(props));
        }
        if has("patternProperties") {
            let mut compiled = Vec::new();
            for (pattern, sub) in self.named_children(location, obj, "patternProperties", &path)? {
                compiled.push((self.regex(&pattern, "patternProperties", &path)?, sub));
            }
            node.checks.push(Check::PatternProperties(compiled));
        }
        if has("additionalProperties") {
            let known = obj
                .get("properties")
                .and_then(Value::as_object)
                .map(|p| p.keys().cloned().collect())
                .unwrap_or_default();
            let mut patterns = Vec::new();
            if let Some(Value::Object(pp)) = obj.get("patternProperties") {
                for pattern in pp.keys() {
                    patterns.push(self.regex(pattern, "patternProperties", &path)?);
                }
            }
            let leftover = self.leftover(location, obj, "additionalProperties")?;
            node.checks.push(Check::AdditionalProperties {
                known,
                patterns,
                leftover,
            });
        }
        if let Some(check) = self.dependencies(location, obj, &path, &has)? {
            node.checks.push(check);
        }
        if has("propertyNames") {
            let child = self.compile_node(&location.child("propertyNames"))?;
            node.checks.push(Check::PropertyNames(Box::new(child)));
        }
        if has("unevaluatedProperties") {
            let leftover = self.leftover(location, obj, "unevaluatedProperties")?;
            node.checks.push(Check::UnevaluatedProperties(leftover));
        }

        for kind in [CountKind::MinItems, CountKind::MaxItems] {
            self.count(&mut node, obj, kind, &path, &has)?;
        }
        if has("uniqueItems") {
            if let Some(arg) = self.argument(obj, "uniqueItems", &path)? {
                match &arg {
                    Arg::Literal(Value::Bool(false)) => {}
                    Arg::Literal(Value::Bool(true)) | Arg::Data(_) => node.checks.push(Check::UniqueItems(arg)),
                    Arg::Literal(_) => return Err(self.invalid("uniqueItems", &path, "must be a boolean")),
                }
            }
        }
        self.items(&mut node, location, obj, &path, &has)?;
        if has("contains") {
            let schema = Box::new(self.compile_node(&location.child("contains"))?);
            let min = match obj.get("minContains") {
                Some(v) => v
                    .as_u64()
                    .ok_or_else(|| self.invalid("minContains", &path, "must be a non-negative integer"))?
                    as usize,
                None => 1,
            };
            let max = match obj.get("maxContains") {
                Some(v) => Some(
                    v.as_u64()
                        .ok_or_else(|| self.invalid("maxContains", &path, "must be a non-negative integer"))?
                        as usize,
                ),
                None => None,
            };
            node.checks.push(Check::Contains { schema, min, max });
        }
        if has("unevaluatedItems") {
            let leftover = self.leftover(location, obj, "unevaluatedItems")?;
            node.checks.push(Check::UnevaluatedItems(leftover));
        }

        Ok(node)
    }

    fn reference(&mut self, location: &Location, keyword: RefKeyword, path: &str) -> Result<Check> {
        let resolution = self.resolution;
        let site = resolution
            .sites
            .get(&(location.clone(), keyword))
            .ok_or_else(|| CompileError::InvalidSchema(format!("unresolved {} at {path}", keyword.as_str())))?;
        Ok(match site {
            SiteResolution::Inline(target) => Check::Ref(Target::Inline(Box::new(self.compile_node(target)?))),
            SiteResolution::Call(unit) => {
                self.graph.add_call(self.current, *unit);
                Check::Ref(Target::Unit(*unit))
            }
            SiteResolution::Dynamic {
                fallback,
                anchor,
                candidates,
            } => {
                self.graph.add_call(self.current, *fallback);
                for (_, unit) in candidates {
                    self.graph.add_call(self.current, *unit);
                }
                Check::DynamicRef {
                    fallback: *fallback,
                    anchor: anchor.clone(),
                    candidates: candidates.clone(),
                }
            }
        })
    }

    fn branches(&mut self, location: &Location, obj: &Map<String, Value>, keyword: &str, path: &str) -> Result<Vec<SchemaNode>> {
        let items = match obj.get(keyword) {
            Some(Value::Array(items)) if !items.is_empty() => items.len(),
            _ => return Err(self.invalid(keyword, path, "must be a non-empty array of schemas")),
        };
        let base = location.child(keyword);
        (0..items).map(|i| self.compile_node(&base.child_index(i))).collect()
    }

    fn named_children(
        &mut self,
        location: &Location,
        obj: &Map<String, Value>,
        keyword: &str,
        path: &str,
    ) -> Result<Vec<(String, SchemaNode)>> {
        let names: Vec<String> = match obj.get(keyword) {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => return Err(self.invalid(keyword, path, "must be an object")),
        };
        let base = location.child(keyword);
        names
            .into_iter()
            .map(|name| {
                let child = self.compile_node(&base.child(&name))?;
                Ok((name, child))
            })
            .collect()
    }

    fn conditional(&mut self, location: &Location, obj: &Map<String, Value>, path: &str) -> Result<Check> {
        let condition = Box::new(self.compile_node(&location.child("if"))?);
        let then = match obj.get("then") {
            Some(_) => Some(Box::new(self.compile_node(&location.child("then"))?)),
            None => None,
        };
        let otherwise = match obj.get("else") {
            Some(_) => Some(Box::new(self.compile_node(&location.child("else"))?)),
            None => None,
        };
        let mut else_if = Vec::new();
        match obj.get("elseIf") {
            None => {}
            Some(Value::Array(entries)) => {
                let base = location.child("elseIf");
                for (i, entry) in entries.iter().enumerate() {
                    let entry_loc = base.child_index(i);
                    if entry.get("if").is_none() {
                        return Err(self.invalid("elseIf", path, "every entry needs an \"if\" schema"));
                    }
                    let condition = self.compile_node(&entry_loc.child("if"))?;
                    let then = match entry.get("then") {
                        Some(_) => Some(self.compile_node(&entry_loc.child("then"))?),
                        None => None,
                    };
                    else_if.push(ElseIf { condition, then });
                }
            }
            Some(_) => return Err(self.invalid("elseIf", path, "must be an array")),
        }
        Ok(Check::Conditional {
            condition,
            then,
            else_if,
            otherwise,
        })
    }

    fn custom(
        &mut self,
        keyword: &str,
        argument: &Value,
        path: &str,
        root: &Value,
        parent: &Value,
    ) -> Result<Option<Check>> {
        let Some(definition) = self.registry.get_keyword(keyword) else {
            return Ok(None);
        };
        if definition.is_macro() {
            return Ok(None);
        }
        definition.check_schema_type(argument, path)?;
        if let Some(meta) = &definition.meta_schema {
            self.check_argument(keyword, meta, argument, path)?;
        }
        if definition.is_async() {
            self.is_async = true;
        }
        let implementation = match &definition.protocol {
            KeywordProtocol::Compile(factory) => {
                let context = KeywordCompileContext {
                    schema_path: path,
                    root_schema: root,
                    options: self.options,
                };
                let compiled = factory(argument, parent, &context)?;
                CustomImpl::Compiled(definition.clone(), compiled)
            }
            _ => CustomImpl::Definition(definition.clone()),
        };
        Ok(Some(Check::Custom {
            keyword: keyword.to_string(),
            value: argument.clone(),
            implementation,
        }))
    }

    /// Validate a custom keyword's argument against the keyword's meta-schema
    fn check_argument(&self, keyword: &str, meta: &Value, argument: &Value, path: &str) -> Result<()> {
        let options = ValidatorOptions {
            strict: false,
            all_errors: true,
            validate_schema: false,
            coerce_types: CoerceTypes::Off,
            use_defaults: UseDefaults::Off,
            remove_additional: crate::config::RemoveAdditional::Off,
            ..self.options.clone()
        };
        let program = build(&Arc::new(meta.clone()), &options, self.registry, self.loaded)
            .map_err(|e| e.into_compile_error(false))?;
        let outcome = program.run(argument)?;
        if outcome.valid {
            return Ok(());
        }
        Err(CompileError::MetaSchemaMismatch {
            path: format!("{path}/{}", pointer::escape(keyword)),
            errors: outcome.errors.iter().map(ToString::to_string).collect(),
        })
    }

    /// Literal argument or `$data` pointer
    fn argument(&self, obj: &Map<String, Value>, keyword: &str, path: &str) -> Result<Option<Arg<Value>>> {
        let Some(value) = obj.get(keyword) else {
            return Ok(None);
        };
        if self.options.data {
            if let Some(raw) = data_reference(value) {
                let ptr = DataPointer::parse(raw)
                    .ok_or_else(|| self.invalid(keyword, path, format!("invalid $data pointer {raw:?}")))?;
                return Ok(Some(Arg::Data(ptr)));
            }
        }
        Ok(Some(Arg::Literal(value.clone())))
    }

    fn count(
        &self,
        node: &mut SchemaNode,
        obj: &Map<String, Value>,
        kind: CountKind,
        path: &str,
        has: &dyn Fn(&str) -> bool,
    ) -> Result<()> {
        if !has(kind.keyword()) {
            return Ok(());
        }
        if let Some(limit) = self.argument(obj, kind.keyword(), path)? {
            if let Arg::Literal(v) = &limit {
                let ok = v.as_u64().is_some() || v.as_f64().is_some_and(|f| f >= 0.0 && f.fract() == 0.0);
                if !ok {
                    return Err(self.invalid(kind.keyword(), path, "must be a non-negative integer"));
                }
            }
            node.checks.push(Check::Count { kind, limit });
        }
        Ok(())
    }

    fn regex(&self, pattern: &str, keyword: &str, path: &str) -> Result<Regex> {
        Regex::new(pattern).map_err(|source| CompileError::InvalidRegex {
            pattern: pattern.to_string(),
            path: format!("{path}/{keyword}"),
            source,
        })
    }

    fn pattern(&self, obj: &Map<String, Value>, path: &str) -> Result<Check> {
        match self.argument(obj, "pattern", path)? {
            Some(Arg::Data(ptr)) => Ok(Check::Pattern(Arg::Data(ptr))),
            Some(Arg::Literal(Value::String(p))) => Ok(Check::Pattern(Arg::Literal(self.regex(&p, "pattern", path)?))),
            _ => Err(self.invalid("pattern", path, "must be a string")),
        }
    }

    fn format(&mut self, obj: &Map<String, Value>, path: &str) -> Result<Option<Check>> {
        match self.argument(obj, "format", path)? {
            Some(Arg::Data(ptr)) => Ok(Some(Check::Format {
                name: Arg::Data(ptr),
                definition: None,
            })),
            Some(Arg::Literal(Value::String(name))) => match self.registry.get_format(&name) {
                Some(definition) => {
                    if definition.is_async() {
                        self.is_async = true;
                    }
                    Ok(Some(Check::Format {
                        name: Arg::Literal(name),
                        definition: Some(definition.clone()),
                    }))
                }
                None if self.options.strict => Err(CompileError::UnknownFormat {
                    format: name,
                    path: path.to_string(),
                }),
                None => {
                    warn!(format = %name, at = %path, "Unknown format ignored");
                    Ok(None)
                }
            },
            _ => Err(self.invalid("format", path, "must be a string")),
        }
    }

    fn enumeration(&self, obj: &Map<String, Value>, path: &str) -> Result<Check> {
        match self.argument(obj, "enum", path)? {
            Some(Arg::Data(ptr)) => Ok(Check::Enum {
                values: Arg::Data(ptr),
                index: None,
            }),
            Some(Arg::Literal(Value::Array(values))) => {
                let index = (values.len() > self.options.loop_enum)
                    .then(|| values.iter().map(canonical_stringify).collect());
                Ok(Check::Enum {
                    values: Arg::Literal(values),
                    index,
                })
            }
            _ => Err(self.invalid("enum", path, "must be an array")),
        }
    }

    fn required(&self, obj: &Map<String, Value>, path: &str) -> Result<Check> {
        match self.argument(obj, "required", path)? {
            Some(Arg::Data(ptr)) => Ok(Check::Required {
                names: Arg::Data(ptr),
                looped: true,
            }),
            Some(Arg::Literal(Value::Array(names))) => {
                let names: Vec<String> = names
                    .iter()
                    .map(|n| n.as_str().map(str::to_string))
                    .collect::<Option<_>>()
                    .ok_or_else(|| self.invalid("required", path, "must be an array of strings"))?;
                let looped = self.options.all_errors || names.len() > self.options.loop_required;
                Ok(Check::Required {
                    names: Arg::Literal(names),
                    looped,
                })
            }
            _ => Err(self.invalid("required", path, "must be an array of strings")),
        }
    }

    fn leftover(&mut self, location: &Location, obj: &Map<String, Value>, keyword: &str) -> Result<Leftover> {
        Ok(match obj.get(keyword) {
            Some(Value::Bool(false)) => Leftover::Forbid,
            Some(Value::Bool(true)) | None => Leftover::Allow,
            Some(_) => Leftover::Schema(Box::new(self.compile_node(&location.child(keyword))?)),
        })
    }

    fn dependencies(
        &mut self,
        location: &Location,
        obj: &Map<String, Value>,
        path: &str,
        has: &dyn Fn(&str) -> bool,
    ) -> Result<Option<Check>> {
        let mut required = Vec::new();
        let mut schemas = Vec::new();
        for keyword in ["dependencies", "dependentRequired", "dependentSchemas"] {
            if !has(keyword) {
                continue;
            }
            let Some(Value::Object(map)) = obj.get(keyword) else {
                return Err(self.invalid(keyword, path, "must be an object"));
            };
            let base = location.child(keyword);
            for (property, dependency) in map {
                match dependency {
                    Value::Array(names) if keyword != "dependentSchemas" => {
                        let names = names
                            .iter()
                            .map(|n| n.as_str().map(str::to_string))
                            .collect::<Option<Vec<_>>>()
                            .ok_or_else(|| self.invalid(keyword, path, "dependencies must list property names"))?;
                        let keyword = if keyword == "dependencies" { "dependencies" } else { "dependentRequired" };
                        required.push(DependentRequired {
                            keyword,
                            property: property.clone(),
                            required: names,
                        });
                    }
                    Value::Object(_) | Value::Bool(_) if keyword != "dependentRequired" => {
                        let child = self.compile_node(&base.child(property))?;
                        schemas.push((property.clone(), child));
                    }
                    _ => return Err(self.invalid(keyword, path, "unexpected dependency value")),
                }
            }
        }
        if required.is_empty() && schemas.is_empty() {
            return Ok(None);
        }
        Ok(Some(Check::Dependencies { required, schemas }))
    }

    fn items(
        &mut self,
        node: &mut SchemaNode,
        location: &Location,
        obj: &Map<String, Value>,
        path: &str,
        has: &dyn Fn(&str) -> bool,
    ) -> Result<()> {
        if has("prefixItems") {
            let schemas = self.branches(location, obj, "prefixItems", path)?;
            let start = schemas.len();
            node.checks.push(Check::PrefixItems {
                keyword: "prefixItems",
                schemas,
            });
            if has("items") {
                let leftover = self.leftover(location, obj, "items")?;
                node.checks.push(Check::Items {
                    keyword: "items",
                    start,
                    leftover,
                });
            }
            return Ok(());
        }
        match obj.get("items") {
            Some(Value::Array(tuple)) if has("items") => {
                let base = location.child("items");
                let schemas = (0..tuple.len())
                    .map(|i| self.compile_node(&base.child_index(i)))
                    .collect::<Result<Vec<_>>>()?;
                let start = schemas.len();
                node.checks.push(Check::PrefixItems { keyword: "items", schemas });
                if has("additionalItems") {
                    let leftover = self.leftover(location, obj, "additionalItems")?;
                    node.checks.push(Check::Items {
                        keyword: "additionalItems",
                        start,
                        leftover,
                    });
                }
            }
            Some(_) if has("items") => {
                let leftover = self.leftover(location, obj, "items")?;
                node.checks.push(Check::Items {
                    keyword: "items",
                    start: 0,
                    leftover,
                });
            }
            _ => {}
        }
        Ok(())
    }
}
