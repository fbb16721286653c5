//! Program interpreter
//!
//! Runs a [`Program`] against one data value. Errors accumulate in a single
//! list; composition keywords take marks on that list (and on the evaluated
//! key sets and the edit log) so failed branches can be discarded.
//!
//! The dynamic scope is the stack of schema resources entered so far. A
//! `$dynamicRef` binds to the outermost resource in that stack that declares a
//! matching dynamic anchor.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde_json::{Map, Value};

use super::coerce::coerce;
use super::node::{
    Arg, Check, CountKind, CustomImpl, DependentRequired, ElseIf, Leftover, NumericKind, SchemaNode, Target,
};
use super::tracking::{EvaluatedKeys, Snapshot};
use super::Program;
use crate::canonical::{canonical_stringify, deep_equal, len_of, JsonType};
use crate::config::{RemoveAdditional, UseDefaults};
use crate::error::{KeywordError, ValidationError};
use crate::formats::{FormatCheck, FormatDefinition};
use crate::keywords::{CodeContext, KeywordContext, KeywordOutcome, KeywordProtocol};
use crate::pointer::{DataPath, Segment};
use crate::resolve::graph::UnitId;
use crate::resolve::session::ResourceId;

type EvalResult = std::result::Result<bool, KeywordError>;

/// A change made to the data during a run
#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub path: DataPath,
    pub action: EditAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditAction {
    /// Replace (or insert) the value at the path
    Set(Value),
    /// Remove a property from the object at the path
    Remove(String),
}

impl Edit {
    /// Replay the change onto a value with the original shape
    pub fn apply(&self, root: &mut Value) {
        match &self.action {
            EditAction::Set(value) => {
                let Some(last) = self.path.last().cloned() else {
                    *root = value.clone();
                    return;
                };
                let mut parent = self.path.clone();
                parent.pop();
                match (last, parent.lookup_mut(root)) {
                    (Segment::Key(key), Some(Value::Object(map))) => {
                        map.insert(key, value.clone());
                    }
                    (Segment::Index(index), Some(Value::Array(items))) if index < items.len() => {
                        items[index] = value.clone();
                    }
                    _ => {}
                }
            }
            EditAction::Remove(key) => {
                if let Some(Value::Object(map)) = self.path.lookup_mut(root) {
                    map.remove(key);
                }
            }
        }
    }
}

/// Result of one run
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub edits: Vec<Edit>,
}

impl Program {
    /// Validate `data`, collecting errors and the edits mutating options asked for
    pub fn run(&self, data: &Value) -> std::result::Result<Outcome, KeywordError> {
        let Some(root) = self.units.first() else {
            return Ok(Outcome {
                valid: true,
                ..Outcome::default()
            });
        };
        let mut evaluator = Evaluator {
            program: self,
            root: data,
            errors: Vec::new(),
            edits: Vec::new(),
            scope: Vec::new(),
            all_errors: self.options.all_errors,
            active: Vec::new(),
        };
        let mut keys = EvaluatedKeys::new(
            self.context.has_unevaluated_properties,
            self.context.has_unevaluated_items,
        );
        let valid = evaluator.eval(&root.node, data, &mut DataPath::root(), &mut keys)?;
        Ok(Outcome {
            valid,
            errors: evaluator.errors,
            edits: evaluator.edits,
        })
    }
}

/// Positions to roll back to when a branch is discarded
#[derive(Clone, Copy)]
struct Marks {
    errors: usize,
    edits: usize,
    keys: Snapshot,
}

struct Evaluator<'p> {
    program: &'p Program,
    root: &'p Value,
    errors: Vec<ValidationError>,
    edits: Vec<Edit>,
    scope: Vec<ResourceId>,
    all_errors: bool,
    /// Unit calls in progress, with the data path length and value each was entered at
    active: Vec<ActiveCall>,
}

/// A reference call on the evaluation stack
#[derive(Clone, Copy, PartialEq, Eq)]
struct ActiveCall {
    unit: UnitId,
    depth: usize,
    data: *const Value,
}

impl<'p> Evaluator<'p> {
    fn marks(&self, keys: &EvaluatedKeys) -> Marks {
        Marks {
            errors: self.errors.len(),
            edits: self.edits.len(),
            keys: keys.snapshot(),
        }
    }

    fn rollback(&mut self, marks: Marks, keys: &mut EvaluatedKeys) {
        self.errors.truncate(marks.errors);
        self.edits.truncate(marks.edits);
        keys.rollback(marks.keys);
    }

    fn eval(&mut self, node: &SchemaNode, data: &Value, path: &mut DataPath, keys: &mut EvaluatedKeys) -> EvalResult {
        let entered = self.scope.last() != Some(&node.resource);
        if entered {
            self.scope.push(node.resource);
        }
        let result = if node.closes {
            let mut local = keys.fresh();
            let valid = self.eval_checks(node, data, path, &mut local);
            if matches!(valid, Ok(true)) {
                keys.merge(local);
            }
            valid
        } else {
            self.eval_checks(node, data, path, keys)
        };
        if entered {
            self.scope.pop();
        }
        result
    }

    fn eval_checks(&mut self, node: &SchemaNode, data: &Value, path: &mut DataPath, keys: &mut EvaluatedKeys) -> EvalResult {
        let data = self.prepare(node, data, path);
        let data = data.as_ref();
        let mut valid = true;
        for check in &node.checks {
            if !self.check(node, check, data, path, keys)? {
                valid = false;
                if !self.all_errors {
                    break;
                }
            }
        }
        Ok(valid)
    }

    /// Coercion, defaults and property removal, applied at node entry
    fn prepare<'d>(&mut self, node: &SchemaNode, data: &'d Value, path: &DataPath) -> Cow<'d, Value> {
        let program = self.program;
        let options = &program.options;
        let mut current = Cow::Borrowed(data);

        if !node.coerce_to.is_empty() {
            if let Some(coerced) = coerce(&current, &node.coerce_to, options.coerce_types) {
                self.edits.push(Edit {
                    path: path.clone(),
                    action: EditAction::Set(coerced.clone()),
                });
                current = Cow::Owned(coerced);
            }
        }

        if !node.defaults.is_empty() {
            if let Value::Object(map) = current.as_ref() {
                let empty = options.use_defaults == UseDefaults::Empty;
                let missing: Vec<(String, Value)> = node
                    .defaults
                    .iter()
                    .filter(|(name, _)| match map.get(name) {
                        None => true,
                        Some(Value::Null) => empty,
                        Some(Value::String(s)) => empty && s.is_empty(),
                        Some(_) => false,
                    })
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    if let Value::Object(map) = current.to_mut() {
                        for (name, default) in missing {
                            let mut at = path.clone();
                            at.push_key(&name);
                            self.edits.push(Edit {
                                path: at,
                                action: EditAction::Set(default.clone()),
                            });
                            map.insert(name, default);
                        }
                    }
                }
            }
        }

        self.remove_additional(node, current, path)
    }

    /// Drop the properties `additionalProperties` would reject
    fn remove_additional<'d>(&mut self, node: &SchemaNode, mut current: Cow<'d, Value>, path: &DataPath) -> Cow<'d, Value> {
        let program = self.program;
        let options = &program.options;
        if options.remove_additional != RemoveAdditional::Off {
            if let (Value::Object(map), Some((known, patterns, leftover))) =
                (current.as_ref(), node.additional_properties())
            {
                let extra: Vec<String> = map
                    .keys()
                    .filter(|k| !known.contains(k) && !patterns.iter().any(|re| re.is_match(k)))
                    .cloned()
                    .collect();
                let doomed: Vec<String> = match (options.remove_additional, leftover) {
                    (RemoveAdditional::All, _) | (_, Leftover::Forbid) => extra,
                    (_, Leftover::Allow) => Vec::new(),
                    (_, Leftover::Schema(schema)) => extra
                        .into_iter()
                        .filter(|k| {
                            let mut at = path.clone();
                            at.push_key(k);
                            let value = map.get(k.as_str()).unwrap_or(&Value::Null);
                            !self.passes_silently(schema, value, &mut at)
                        })
                        .collect(),
                };
                if !doomed.is_empty() {
                    if let Value::Object(map) = current.to_mut() {
                        for key in doomed {
                            map.remove(&key);
                            self.edits.push(Edit {
                                path: path.clone(),
                                action: EditAction::Remove(key),
                            });
                        }
                    }
                }
            }
        }

        current
    }

    /// Evaluate without leaving errors or edits behind
    fn passes_silently(&mut self, node: &SchemaNode, data: &Value, path: &mut DataPath) -> bool {
        let errors = self.errors.len();
        let edits = self.edits.len();
        let mut keys = EvaluatedKeys::new(false, false);
        let valid = self.eval(node, data, path, &mut keys).unwrap_or(false);
        self.errors.truncate(errors);
        self.edits.truncate(edits);
        valid
    }

    fn report(
        &mut self,
        node: &SchemaNode,
        keyword: &str,
        message: String,
        data: &Value,
        path: &DataPath,
        params: Map<String, Value>,
    ) {
        let message = node
            .error_message
            .as_ref()
            .and_then(|m| m.for_keyword(keyword))
            .map(str::to_string)
            .or_else(|| self.program.root_message.clone())
            .unwrap_or(message);
        let (value, expected) = if self.program.options.verbose {
            let expected = node.schema().and_then(|s| s.get(keyword)).cloned();
            (Some(data.clone()), expected)
        } else {
            (None, None)
        };
        self.errors.push(ValidationError {
            data_path: path.to_string(),
            schema_path: node.schema_path.to_string(),
            keyword: keyword.to_string(),
            message,
            value,
            expected,
            params,
        });
    }

    /// Enter a compile unit. Recursion through data is unbounded; a unit
    /// re-entered on the same value at the same location can never finish
    fn call(&mut self, unit: UnitId, data: &Value, path: &mut DataPath, keys: &mut EvaluatedKeys) -> EvalResult {
        let program = self.program;
        let Some(target) = program.units.get(unit) else {
            return Err(KeywordError::new("$ref", format!("unknown compile unit {unit}")));
        };
        let frame = ActiveCall {
            unit,
            depth: path.len(),
            data: data as *const Value,
        };
        if self.active.contains(&frame) {
            return Err(KeywordError::new(
                "$ref",
                format!("reference cycle through '{}' at '{path}' makes no progress", target.name),
            ));
        }
        self.active.push(frame);
        let result = self.eval(&target.node, data, path, keys);
        self.active.pop();
        result
    }

    fn descend_key(
        &mut self,
        node: &SchemaNode,
        value: &Value,
        key: &str,
        path: &mut DataPath,
        keys: &EvaluatedKeys,
    ) -> EvalResult {
        path.push_key(key);
        let mut child = keys.fresh();
        let result = self.eval(node, value, path, &mut child);
        path.pop();
        result
    }

    fn descend_index(
        &mut self,
        node: &SchemaNode,
        value: &Value,
        index: usize,
        path: &mut DataPath,
        keys: &EvaluatedKeys,
    ) -> EvalResult {
        path.push_index(index);
        let mut child = keys.fresh();
        let result = self.eval(node, value, path, &mut child);
        path.pop();
        result
    }

    /// A `$data` or literal argument; `None` when the pointer leads nowhere
    fn argument<'a>(&self, arg: &'a Arg<Value>, path: &DataPath) -> Option<Cow<'a, Value>> {
        match arg {
            Arg::Literal(value) => Some(Cow::Borrowed(value)),
            Arg::Data(pointer) => pointer.resolve(self.root, path).map(Cow::Owned),
        }
    }

    /// Dispatch one check; each arm delegates so the frame on the recursive
    /// path stays small
    fn check(
        &mut self,
        node: &SchemaNode,
        check: &Check,
        data: &Value,
        path: &mut DataPath,
        keys: &mut EvaluatedKeys,
    ) -> EvalResult {
        match check {
            Check::False => {
                self.report(node, "boolean", "Schema is false".into(), data, path, Map::new());
                Ok(false)
            }
            Check::Ref(Target::Unit(unit)) => self.call(*unit, data, path, keys),
            Check::Ref(Target::Inline(target)) => self.eval(target, data, path, keys),
            Check::DynamicRef {
                fallback, candidates, ..
            } => self.dynamic_ref(*fallback, candidates, data, path, keys),
            Check::Not(inner) => self.not(node, inner, data, path, keys),
            Check::AllOf(branches) => self.all_of(branches, data, path, keys),
            Check::AnyOf(branches) => self.any_of(node, branches, data, path, keys),
            Check::OneOf(branches) => self.one_of(node, branches, data, path, keys),
            Check::Conditional {
                condition,
                then,
                else_if,
                otherwise,
            } => self.conditional(node, condition, then.as_deref(), else_if, otherwise.as_deref(), data, path, keys),
            Check::Custom {
                keyword,
                value,
                implementation,
            } => self.custom(node, keyword, value, implementation, data, path, keys),
            Check::Type(types) => self.types(node, types, data, path),
            Check::Const(arg) => self.constant(node, arg, data, path),
            Check::Enum { values, index } => self.enumeration(node, values, index.as_ref(), data, path),
            Check::Numeric { kind, limit } => self.numeric(node, *kind, limit, data, path),
            Check::Count { kind, limit } => self.count(node, *kind, limit, data, path),
            Check::Pattern(arg) => self.pattern(node, arg, data, path),
            Check::Format { name, definition } => self.format(node, name, definition.as_ref(), data, path),
            Check::Required { names, looped } => self.required(node, names, *looped, data, path),
            Check::Properties(properties) => self.properties(properties, data, path, keys),
            Check::PatternProperties(patterns) => self.pattern_properties(patterns, data, path, keys),
            Check::AdditionalProperties {
                known,
                patterns,
                leftover,
            } => self.additional(node, known, patterns, leftover, data, path, keys),
            Check::Dependencies { required, schemas } => self.dependencies(node, required, schemas, data, path, keys),
            Check::PropertyNames(schema) => self.property_names(schema, data, path, keys),
            Check::UnevaluatedProperties(leftover) => self.unevaluated_properties(node, leftover, data, path, keys),
            Check::PrefixItems { schemas, .. } => self.prefix_items(schemas, data, path, keys),
            Check::Items {
                keyword,
                start,
                leftover,
            } => self.items(node, keyword, *start, leftover, data, path, keys),
            Check::Contains { schema, min, max } => self.contains(node, schema, *min, *max, data, path, keys),
            Check::UniqueItems(arg) => self.unique_items(node, arg, data, path),
            Check::UnevaluatedItems(leftover) => self.unevaluated_items(node, leftover, data, path, keys),
        }
    }

    /// Bind to the outermost scope entry declaring the anchor
    fn dynamic_ref(
        &mut self,
        fallback: UnitId,
        candidates: &[(ResourceId, UnitId)],
        data: &Value,
        path: &mut DataPath,
        keys: &mut EvaluatedKeys,
    ) -> EvalResult {
        let unit = self
            .scope
            .iter()
            .find_map(|rid| candidates.iter().find(|(r, _)| r == rid).map(|(_, u)| *u))
            .unwrap_or(fallback);
        self.call(unit, data, path, keys)
    }

    fn not(&mut self, node: &SchemaNode, inner: &SchemaNode, data: &Value, path: &mut DataPath, keys: &mut EvaluatedKeys) -> EvalResult {
        let marks = self.marks(keys);
        let matched = self.eval(inner, data, path, keys)?;
        self.rollback(marks, keys);
        if matched {
            self.report(
                node,
                "not",
                "Data must not validate against the provided schema.".into(),
                data,
                path,
                Map::new(),
            );
        }
        Ok(!matched)
    }

    fn all_of(&mut self, branches: &[SchemaNode], data: &Value, path: &mut DataPath, keys: &mut EvaluatedKeys) -> EvalResult {
        let mut valid = true;
        for branch in branches {
            if !self.eval(branch, data, path, keys)? {
                valid = false;
                if !self.all_errors {
                    break;
                }
            }
        }
        Ok(valid)
    }

    #[allow(clippy::too_many_arguments)]
    fn conditional(
        &mut self,
        node: &SchemaNode,
        condition: &SchemaNode,
        then: Option<&SchemaNode>,
        else_if: &[ElseIf],
        otherwise: Option<&SchemaNode>,
        data: &Value,
        path: &mut DataPath,
        keys: &mut EvaluatedKeys,
    ) -> EvalResult {
        if self.condition(condition, data, path, keys)? {
            return self.conditional_branch(node, then, "then", data, path, keys);
        }
        for entry in else_if {
            if self.condition(&entry.condition, data, path, keys)? {
                return self.conditional_branch(node, entry.then.as_ref(), "then", data, path, keys);
            }
        }
        self.conditional_branch(node, otherwise, "else", data, path, keys)
    }

    fn types(&mut self, node: &SchemaNode, types: &[JsonType], data: &Value, path: &DataPath) -> EvalResult {
        if types.iter().any(|t| t.matches(data)) {
            return Ok(true);
        }
        let names: Vec<&str> = types.iter().map(|t| t.name()).collect();
        let message = if names.len() == 1 {
            "Invalid type".to_string()
        } else {
            format!("Invalid type. Must be {}", names.join(" or "))
        };
        let params = params([("type", Value::from(names.join(",")))]);
        self.report(node, "type", message, data, path, params);
        Ok(false)
    }

    fn constant(&mut self, node: &SchemaNode, arg: &Arg<Value>, data: &Value, path: &DataPath) -> EvalResult {
        let Some(expected) = self.argument(arg, path) else {
            return Ok(true);
        };
        if deep_equal(&expected, data) {
            return Ok(true);
        }
        let message = format!("Value or type does not match {expected}");
        let params = params([("allowedValue", expected.into_owned())]);
        self.report(node, "const", message, data, path, params);
        Ok(false)
    }

    fn enumeration(
        &mut self,
        node: &SchemaNode,
        values: &Arg<Vec<Value>>,
        index: Option<&HashSet<String>>,
        data: &Value,
        path: &DataPath,
    ) -> EvalResult {
        let found = match values {
            Arg::Literal(values) => match index {
                Some(index) => Some(index.contains(&canonical_stringify(data))),
                None => Some(values.iter().any(|v| deep_equal(v, data))),
            },
            Arg::Data(pointer) => match pointer.resolve(self.root, path) {
                None => return Ok(true),
                Some(Value::Array(values)) => Some(values.iter().any(|v| deep_equal(v, data))),
                Some(_) => None,
            },
        };
        if found == Some(true) {
            return Ok(true);
        }
        self.report(
            node,
            "enum",
            "Value must be one of the items listed in enum".into(),
            data,
            path,
            Map::new(),
        );
        Ok(false)
    }

    fn pattern(&mut self, node: &SchemaNode, arg: &Arg<Regex>, data: &Value, path: &DataPath) -> EvalResult {
        let Value::String(text) = data else {
            return Ok(true);
        };
        let (matched, pattern) = match arg {
            Arg::Literal(re) => (re.is_match(text), re.as_str().to_string()),
            Arg::Data(pointer) => match pointer.resolve(self.root, path) {
                None => return Ok(true),
                Some(Value::String(pattern)) => {
                    let matched = Regex::new(&pattern).map(|re| re.is_match(text)).unwrap_or(false);
                    (matched, pattern)
                }
                Some(other) => (false, other.to_string()),
            },
        };
        if matched {
            return Ok(true);
        }
        let params = params([("pattern", Value::from(pattern))]);
        self.report(
            node,
            "pattern",
            "Value does not match the required pattern".into(),
            data,
            path,
            params,
        );
        Ok(false)
    }

    fn format(
        &mut self,
        node: &SchemaNode,
        name: &Arg<String>,
        definition: Option<&FormatDefinition>,
        data: &Value,
        path: &DataPath,
    ) -> EvalResult {
        let program = self.program;
        let (name, definition): (Cow<'_, str>, Option<&FormatDefinition>) = match name {
            Arg::Literal(name) => (Cow::Borrowed(name.as_str()), definition),
            Arg::Data(pointer) => match pointer.resolve(self.root, path) {
                None => return Ok(true),
                Some(Value::String(name)) => {
                    let definition = program.formats.get(&name);
                    (Cow::Owned(name), definition)
                }
                Some(other) => (Cow::Owned(other.to_string()), None),
            },
        };
        let valid = match definition {
            Some(definition) if !definition.applies_to(data) => true,
            Some(definition) => match &definition.check {
                FormatCheck::Async(f) => futures::executor::block_on(f(data.clone())),
                _ => definition.test(data),
            },
            None => false,
        };
        if valid {
            return Ok(true);
        }
        let message = format!("Failed to validate value against format {name}");
        let params = params([("format", Value::from(name.as_ref()))]);
        self.report(node, "format", message, data, path, params);
        Ok(false)
    }

    fn properties(
        &mut self,
        properties: &[(String, SchemaNode)],
        data: &Value,
        path: &mut DataPath,
        keys: &mut EvaluatedKeys,
    ) -> EvalResult {
        let Value::Object(map) = data else {
            return Ok(true);
        };
        let mut valid = true;
        for (name, schema) in properties {
            let Some(value) = map.get(name) else {
                continue;
            };
            keys.mark_prop(name);
            if !self.descend_key(schema, value, name, path, keys)? {
                valid = false;
                if !self.all_errors {
                    break;
                }
            }
        }
        Ok(valid)
    }

    fn pattern_properties(
        &mut self,
        patterns: &[(Regex, SchemaNode)],
        data: &Value,
        path: &mut DataPath,
        keys: &mut EvaluatedKeys,
    ) -> EvalResult {
        let Value::Object(map) = data else {
            return Ok(true);
        };
        let mut valid = true;
        'outer: for (re, schema) in patterns {
            for (name, value) in map.iter().filter(|(k, _)| re.is_match(k)) {
                keys.mark_prop(name);
                if !self.descend_key(schema, value, name, path, keys)? {
                    valid = false;
                    if !self.all_errors {
                        break 'outer;
                    }
                }
            }
        }
        Ok(valid)
    }

    #[allow(clippy::too_many_arguments)]
    fn additional(
        &mut self,
        node: &SchemaNode,
        known: &[String],
        patterns: &[Regex],
        leftover: &Leftover,
        data: &Value,
        path: &mut DataPath,
        keys: &mut EvaluatedKeys,
    ) -> EvalResult {
        let Value::Object(map) = data else {
            return Ok(true);
        };
        let mut valid = true;
        for (name, value) in map {
            if known.contains(name) || patterns.iter().any(|re| re.is_match(name)) {
                continue;
            }
            let ok = match leftover {
                Leftover::Allow => true,
                Leftover::Forbid => {
                    let params = params([("additionalProperty", Value::from(name.as_str()))]);
                    let message = format!("Additional property {name} is not allowed");
                    self.report(node, "additionalProperties", message, data, path, params);
                    false
                }
                Leftover::Schema(schema) => self.descend_key(schema, value, name, path, keys)?,
            };
            if !ok {
                valid = false;
                if !self.all_errors {
                    break;
                }
            }
        }
        keys.mark_all_props();
        Ok(valid)
    }

    fn dependencies(
        &mut self,
        node: &SchemaNode,
        required: &[DependentRequired],
        schemas: &[(String, SchemaNode)],
        data: &Value,
        path: &mut DataPath,
        keys: &mut EvaluatedKeys,
    ) -> EvalResult {
        let Value::Object(map) = data else {
            return Ok(true);
        };
        let mut valid = true;
        'deps: for dependency in required.iter().filter(|d| map.contains_key(&d.property)) {
            for missing in dependency.required.iter().filter(|r| !map.contains_key(r.as_str())) {
                let message = format!(
                    "Property ({missing}) is required when {} is present.",
                    dependency.property
                );
                let params = params([
                    ("property", Value::from(dependency.property.as_str())),
                    ("missingProperty", Value::from(missing.as_str())),
                ]);
                self.report(node, dependency.keyword, message, data, path, params);
                valid = false;
                if !self.all_errors {
                    break 'deps;
                }
            }
        }
        if !valid && !self.all_errors {
            return Ok(false);
        }
        for (property, schema) in schemas {
            if map.contains_key(property) && !self.eval(schema, data, path, keys)? {
                valid = false;
                if !self.all_errors {
                    break;
                }
            }
        }
        Ok(valid)
    }

    fn property_names(&mut self, schema: &SchemaNode, data: &Value, path: &mut DataPath, keys: &EvaluatedKeys) -> EvalResult {
        let Value::Object(map) = data else {
            return Ok(true);
        };
        let mut valid = true;
        for name in map.keys() {
            let mut scratch = keys.fresh();
            if !self.eval(schema, &Value::String(name.clone()), path, &mut scratch)? {
                valid = false;
                if !self.all_errors {
                    break;
                }
            }
        }
        Ok(valid)
    }

    fn unevaluated_properties(
        &mut self,
        node: &SchemaNode,
        leftover: &Leftover,
        data: &Value,
        path: &mut DataPath,
        keys: &mut EvaluatedKeys,
    ) -> EvalResult {
        let Value::Object(map) = data else {
            return Ok(true);
        };
        let pending: Vec<&String> = map.keys().filter(|k| !keys.prop_evaluated(k)).collect();
        let mut valid = true;
        match leftover {
            Leftover::Allow => {}
            Leftover::Forbid if !pending.is_empty() => {
                let names: Vec<&str> = pending.iter().map(|k| k.as_str()).collect();
                let message = format!("Unevaluated properties: [{}] in schema.", names.join(","));
                let params = params([("unevaluatedProperties", Value::from(names))]);
                self.report(node, "unevaluatedProperties", message, data, path, params);
                valid = false;
            }
            Leftover::Forbid => {}
            Leftover::Schema(schema) => {
                for name in pending {
                    if !self.descend_key(schema, &map[name.as_str()], name, path, keys)? {
                        valid = false;
                        if !self.all_errors {
                            break;
                        }
                    }
                }
            }
        }
        keys.mark_all_props();
        Ok(valid)
    }

    fn prefix_items(&mut self, schemas: &[SchemaNode], data: &Value, path: &mut DataPath, keys: &mut EvaluatedKeys) -> EvalResult {
        let Value::Array(items) = data else {
            return Ok(true);
        };
        let mut valid = true;
        for (index, (schema, item)) in schemas.iter().zip(items).enumerate() {
            keys.mark_item(index);
            if !self.descend_index(schema, item, index, path, keys)? {
                valid = false;
                if !self.all_errors {
                    break;
                }
            }
        }
        Ok(valid)
    }

    #[allow(clippy::too_many_arguments)]
    fn items(
        &mut self,
        node: &SchemaNode,
        keyword: &str,
        start: usize,
        leftover: &Leftover,
        data: &Value,
        path: &mut DataPath,
        keys: &mut EvaluatedKeys,
    ) -> EvalResult {
        let Value::Array(items) = data else {
            return Ok(true);
        };
        if items.len() <= start {
            return Ok(true);
        }
        let mut valid = true;
        match leftover {
            Leftover::Allow => {}
            Leftover::Forbid => {
                let message = format!("Array has too many items. Expected at most {start}");
                let params = params([("limit", Value::from(start))]);
                self.report(node, keyword, message, data, path, params);
                valid = false;
            }
            Leftover::Schema(schema) => {
                for (index, item) in items.iter().enumerate().skip(start) {
                    if !self.descend_index(schema, item, index, path, keys)? {
                        valid = false;
                        if !self.all_errors {
                            break;
                        }
                    }
                }
            }
        }
        keys.mark_items_from(start);
        Ok(valid)
    }

    #[allow(clippy::too_many_arguments)]
    fn contains(
        &mut self,
        node: &SchemaNode,
        schema: &SchemaNode,
        min: usize,
        max: Option<usize>,
        data: &Value,
        path: &mut DataPath,
        keys: &mut EvaluatedKeys,
    ) -> EvalResult {
        let Value::Array(items) = data else {
            return Ok(true);
        };
        let mut matched = 0;
        for (index, item) in items.iter().enumerate() {
            let errors = self.errors.len();
            let edits = self.edits.len();
            if self.descend_index(schema, item, index, path, keys)? {
                matched += 1;
                keys.mark_item(index);
            } else {
                self.edits.truncate(edits);
            }
            self.errors.truncate(errors);
            if max.is_none() && !keys.is_enabled() && matched >= min {
                break;
            }
        }
        if matched < min {
            let message = format!("Array must contain at least {min} item matching the schema.");
            let params = params([("minContains", Value::from(min))]);
            self.report(node, "contains", message, data, path, params);
            return Ok(false);
        }
        if let Some(max) = max {
            if matched > max {
                let message = format!("Array must contain at most {max} item matching the schema.");
                let params = params([("maxContains", Value::from(max))]);
                self.report(node, "contains", message, data, path, params);
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn unique_items(&mut self, node: &SchemaNode, arg: &Arg<Value>, data: &Value, path: &DataPath) -> EvalResult {
        let Value::Array(items) = data else {
            return Ok(true);
        };
        match self.argument(arg, path).as_deref() {
            None | Some(Value::Bool(false)) => return Ok(true),
            Some(Value::Bool(true)) => {}
            Some(_) => {
                self.report(node, "uniqueItems", "Array items must be unique".into(), data, path, Map::new());
                return Ok(false);
            }
        }
        let Some((i, j)) = duplicate(items) else {
            return Ok(true);
        };
        let params = params([("i", Value::from(i)), ("j", Value::from(j))]);
        self.report(node, "uniqueItems", "Array items must be unique".into(), data, path, params);
        Ok(false)
    }

    fn unevaluated_items(
        &mut self,
        node: &SchemaNode,
        leftover: &Leftover,
        data: &Value,
        path: &mut DataPath,
        keys: &mut EvaluatedKeys,
    ) -> EvalResult {
        let Value::Array(items) = data else {
            return Ok(true);
        };
        let pending: Vec<usize> = (0..items.len()).filter(|i| !keys.item_evaluated(*i)).collect();
        let mut valid = true;
        match leftover {
            Leftover::Allow => {}
            Leftover::Forbid if !pending.is_empty() => {
                let list: Vec<String> = pending.iter().map(ToString::to_string).collect();
                let message = format!("Unevaluated items: [{}] in schema, in array.", list.join(","));
                let params = params([("unevaluatedItems", Value::from(pending.clone()))]);
                self.report(node, "unevaluatedItems", message, data, path, params);
                valid = false;
            }
            Leftover::Forbid => {}
            Leftover::Schema(schema) => {
                for index in pending {
                    if !self.descend_index(schema, &items[index], index, path, keys)? {
                        valid = false;
                        if !self.all_errors {
                            break;
                        }
                    }
                }
            }
        }
        keys.mark_items_from(0);
        Ok(valid)
    }

    fn any_of(
        &mut self,
        node: &SchemaNode,
        branches: &[SchemaNode],
        data: &Value,
        path: &mut DataPath,
        keys: &mut EvaluatedKeys,
    ) -> EvalResult {
        let start = self.errors.len();
        let mut passed = false;
        for branch in branches {
            let marks = self.marks(keys);
            if self.eval(branch, data, path, keys)? {
                passed = true;
                // later branches only matter for their annotations
                if !keys.is_enabled() {
                    break;
                }
            } else if passed {
                self.rollback(marks, keys);
            } else {
                self.edits.truncate(marks.edits);
                keys.rollback(marks.keys);
            }
        }
        if passed {
            self.errors.truncate(start);
            return Ok(true);
        }
        self.report(
            node,
            "anyOf",
            "Data must validate against at least one schema".into(),
            data,
            path,
            Map::new(),
        );
        Ok(false)
    }

    fn one_of(
        &mut self,
        node: &SchemaNode,
        branches: &[SchemaNode],
        data: &Value,
        path: &mut DataPath,
        keys: &mut EvaluatedKeys,
    ) -> EvalResult {
        let start = self.marks(keys);
        let mut passing = Vec::new();
        for (index, branch) in branches.iter().enumerate() {
            let marks = self.marks(keys);
            if self.eval(branch, data, path, keys)? {
                passing.push(index);
                if passing.len() > 1 && !keys.is_enabled() {
                    break;
                }
            } else {
                self.edits.truncate(marks.edits);
                keys.rollback(marks.keys);
            }
        }
        if passing.len() == 1 {
            self.errors.truncate(start.errors);
            return Ok(true);
        }
        if !passing.is_empty() {
            self.rollback(start, keys);
        }
        let message = format!(
            "Data must validate against exactly one schema, but matched {}",
            passing.len()
        );
        let passing = if passing.is_empty() {
            Value::Null
        } else {
            Value::from(passing)
        };
        self.report(node, "oneOf", message, data, path, params([("passingSchemas", passing)]));
        Ok(false)
    }

    /// Evaluate an `if` schema; its errors never surface and a failed
    /// condition leaves no annotations behind
    fn condition(&mut self, condition: &SchemaNode, data: &Value, path: &mut DataPath, keys: &mut EvaluatedKeys) -> EvalResult {
        let marks = self.marks(keys);
        let holds = self.eval(condition, data, path, keys)?;
        if holds {
            self.errors.truncate(marks.errors);
        } else {
            self.rollback(marks, keys);
        }
        Ok(holds)
    }

    fn conditional_branch(
        &mut self,
        node: &SchemaNode,
        branch: Option<&SchemaNode>,
        name: &str,
        data: &Value,
        path: &mut DataPath,
        keys: &mut EvaluatedKeys,
    ) -> EvalResult {
        let Some(branch) = branch else {
            return Ok(true);
        };
        if self.eval(branch, data, path, keys)? {
            return Ok(true);
        }
        let params = params([("failingKeyword", Value::from(name))]);
        self.report(node, "if", format!("Data must match \"{name}\" schema"), data, path, params);
        Ok(false)
    }

    #[allow(clippy::too_many_arguments)]
    fn custom(
        &mut self,
        node: &SchemaNode,
        keyword: &str,
        value: &Value,
        implementation: &CustomImpl,
        data: &Value,
        path: &mut DataPath,
        keys: &mut EvaluatedKeys,
    ) -> EvalResult {
        let definition = implementation.definition();
        if !definition.applies_to(data) {
            return Ok(true);
        }
        let parent = node.schema().unwrap_or(&Value::Null);
        let context = KeywordContext {
            data_path: path,
            root_data: self.root,
            schema_path: &node.schema_path,
        };
        let outcome = match (implementation, &definition.protocol) {
            (CustomImpl::Compiled(_, validate), _) => validate(data, &context)?,
            (_, KeywordProtocol::Validate(validate)) => validate(value, data, parent, &context)?,
            (_, KeywordProtocol::AsyncValidate(validate)) => {
                futures::executor::block_on(validate(value.clone(), data.clone(), parent.clone()))?
            }
            (_, KeywordProtocol::Code(generate)) => {
                let mut code = CodeContext::new(keyword, value, parent, data, context);
                generate(&mut code)?;
                let effects = code.into_parts();
                for name in &effects.evaluated_properties {
                    keys.mark_prop(name);
                }
                for index in effects.evaluated_items {
                    keys.mark_item(index);
                }
                if effects.reports.is_empty() {
                    return Ok(true);
                }
                for (message, params) in effects.reports {
                    self.report(node, keyword, message, data, path, params);
                }
                return Ok(false);
            }
            (_, KeywordProtocol::Compile(_) | KeywordProtocol::Macro(_)) => KeywordOutcome::Pass,
        };
        let params = match outcome {
            KeywordOutcome::Pass => return Ok(true),
            KeywordOutcome::Fail => Map::new(),
            KeywordOutcome::FailWith(params) => params,
        };
        let message = format!("Failed validation for keyword '{keyword}'");
        self.report(node, keyword, message, data, path, params);
        Ok(false)
    }

    fn numeric(&mut self, node: &SchemaNode, kind: NumericKind, limit: &Arg<Value>, data: &Value, path: &DataPath) -> EvalResult {
        let Value::Number(number) = data else {
            return Ok(true);
        };
        let Some(limit) = self.argument(limit, path) else {
            return Ok(true);
        };
        let keyword = kind.keyword();
        let bound = match limit.as_ref() {
            Value::Number(bound) if kind != NumericKind::MultipleOf || bound.as_f64().is_some_and(|m| m > 0.0) => bound,
            _ => {
                let message = format!("Invalid $data value for {keyword}");
                self.report(node, keyword, message, data, path, Map::new());
                return Ok(false);
            }
        };
        let (value, lim) = match (number.as_f64(), bound.as_f64()) {
            (Some(v), Some(l)) => (v, l),
            _ => return Ok(true),
        };
        let (valid, comparison, message) = match kind {
            NumericKind::Minimum => (value >= lim, ">=", format!("Value must be at least {bound}")),
            NumericKind::Maximum => (value <= lim, "<=", format!("Value must be at most {bound}")),
            NumericKind::ExclusiveMinimum => (value > lim, ">", format!("Value must be greater than {bound}")),
            NumericKind::ExclusiveMaximum => (value < lim, "<", format!("Value must be less than {bound}")),
            NumericKind::MultipleOf => {
                let valid = match (number.as_i64(), bound.as_i64()) {
                    (Some(v), Some(m)) => v.checked_rem(m) == Some(0),
                    _ => is_multiple(value, lim),
                };
                (valid, "multipleOf", format!("Value must be a multiple of {bound}"))
            }
        };
        if valid {
            return Ok(true);
        }
        let params = if kind == NumericKind::MultipleOf {
            params([("multipleOf", Value::Number(bound.clone()))])
        } else {
            params([
                ("comparison", Value::from(comparison)),
                ("limit", Value::Number(bound.clone())),
            ])
        };
        self.report(node, keyword, message, data, path, params);
        Ok(false)
    }

    fn count(&mut self, node: &SchemaNode, kind: CountKind, limit: &Arg<Value>, data: &Value, path: &DataPath) -> EvalResult {
        if !kind.applies_to().matches(data) {
            return Ok(true);
        }
        let Some(limit) = self.argument(limit, path) else {
            return Ok(true);
        };
        let keyword = kind.keyword();
        let limit = match limit.as_ref() {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
            _ => None,
        };
        let Some(limit) = limit else {
            let message = format!("Invalid $data value for {keyword}");
            self.report(node, keyword, message, data, path, Map::new());
            return Ok(false);
        };
        let count = match data {
            Value::String(s) => len_of(s),
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            _ => return Ok(true),
        };
        let count = count as u64;
        let valid = if kind.is_min() { count >= limit } else { count <= limit };
        if valid {
            return Ok(true);
        }
        let bound = if kind.is_min() { "least" } else { "most" };
        let message = match kind.applies_to() {
            JsonType::String => format!("Length of value must be at {bound} {limit} characters."),
            JsonType::Array => format!("Array must have at {bound} {limit} items"),
            _ => format!("Object must have at {bound} {limit} properties."),
        };
        self.report(node, keyword, message, data, path, params([("limit", Value::from(limit))]));
        Ok(false)
    }

    fn required(&mut self, node: &SchemaNode, names: &Arg<Vec<String>>, looped: bool, data: &Value, path: &DataPath) -> EvalResult {
        let Value::Object(map) = data else {
            return Ok(true);
        };
        let names: Cow<'_, [String]> = match names {
            Arg::Literal(names) => Cow::Borrowed(names.as_slice()),
            Arg::Data(pointer) => match pointer.resolve(self.root, path) {
                None => return Ok(true),
                Some(Value::Array(items)) => {
                    match items.iter().map(|v| v.as_str().map(str::to_string)).collect::<Option<Vec<_>>>() {
                        Some(names) => Cow::Owned(names),
                        None => {
                            let message = "Invalid $data value for required".to_string();
                            self.report(node, "required", message, data, path, Map::new());
                            return Ok(false);
                        }
                    }
                }
                Some(_) => {
                    let message = "Invalid $data value for required".to_string();
                    self.report(node, "required", message, data, path, Map::new());
                    return Ok(false);
                }
            },
        };

        if !looped {
            // unrolled: one presence test per name, first miss wins
            return match names.iter().find(|name| !map.contains_key(name.as_str())) {
                None => Ok(true),
                Some(missing) => {
                    self.missing(node, missing, data, path);
                    Ok(false)
                }
            };
        }

        let mut valid = true;
        for name in names.iter() {
            if map.contains_key(name.as_str()) {
                continue;
            }
            self.missing(node, name, data, path);
            valid = false;
            if !self.all_errors {
                break;
            }
        }
        Ok(valid)
    }

    fn missing(&mut self, node: &SchemaNode, name: &str, data: &Value, path: &DataPath) {
        let message = format!("Missing required field: {name} in data.");
        let params = params([("missingProperty", Value::from(name))]);
        self.report(node, "required", message, data, path, params);
    }
}

fn params<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Float `multipleOf` with a relative tolerance
fn is_multiple(value: f64, divisor: f64) -> bool {
    if divisor == 0.0 {
        return false;
    }
    let quotient = value / divisor;
    if !quotient.is_finite() {
        return false;
    }
    (quotient - quotient.round()).abs() <= quotient.abs() * f64::EPSILON
}

/// First pair of equal items, by canonical form
pub(crate) fn duplicate(items: &[Value]) -> Option<(usize, usize)> {
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(items.len());
    for (j, item) in items.iter().enumerate() {
        if let Some(&i) = seen.get(&canonical_stringify(item)) {
            return Some((i, j));
        }
        seen.insert(canonical_stringify(item), j);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_multiple() {
        assert!(is_multiple(0.3, 0.1));
        assert!(is_multiple(4.5, 1.5));
        assert!(!is_multiple(4.6, 1.5));
        assert!(!is_multiple(1.0, 0.0));
        assert!(!is_multiple(1e308, 1e-308));
    }

    #[test]
    fn test_duplicate_uses_structural_equality() {
        assert_eq!(duplicate(&[json!(1), json!(2), json!(1.0)]), Some((0, 2)));
        assert_eq!(duplicate(&[json!({"a": 1, "b": 2}), json!({"b": 2, "a": 1})]), Some((0, 1)));
        assert_eq!(duplicate(&[json!([1]), json!([1, 1])]), None);
    }

    #[test]
    fn test_edit_apply() {
        let mut data = json!({"a": {"b": 1, "c": 2}, "list": [1, 2]});
        let mut path = DataPath::root();
        path.push_key("a");
        Edit {
            path: path.clone(),
            action: EditAction::Remove("c".into()),
        }
        .apply(&mut data);
        path.push_key("d");
        Edit {
            path,
            action: EditAction::Set(json!(true)),
        }
        .apply(&mut data);
        let mut at = DataPath::root();
        at.push_key("list");
        at.push_index(1);
        Edit {
            path: at,
            action: EditAction::Set(json!("2")),
        }
        .apply(&mut data);
        assert_eq!(data, json!({"a": {"b": 1, "d": true}, "list": [1, "2"]}));
    }

    #[test]
    fn test_root_set_replaces_value() {
        let mut data = json!("5");
        Edit {
            path: DataPath::root(),
            action: EditAction::Set(json!(5)),
        }
        .apply(&mut data);
        assert_eq!(data, json!(5));
    }
}
