//! Resolution session
//!
//! Per-compile state: the document arena, the identifier table, schema
//! resources and the function-name map. A session is created by one resolve
//! call and never shared.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::config::Draft;
use crate::error::{CompileError, Result};
use crate::pointer;

pub type DocId = usize;
pub type ResourceId = usize;

/// A schema location: document handle plus JSON pointer inside it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub doc: DocId,
    pub pointer: String,
}

impl Location {
    pub fn new(doc: DocId, pointer: impl Into<String>) -> Self {
        Self {
            doc,
            pointer: pointer.into(),
        }
    }

    pub fn child(&self, token: &str) -> Self {
        Self::new(self.doc, pointer::join(&self.pointer, token))
    }

    pub fn child_index(&self, index: usize) -> Self {
        Self::new(self.doc, pointer::join_index(&self.pointer, index))
    }

    /// Same document, `self` equal to or above `other`
    pub fn contains(&self, other: &Location) -> bool {
        self.doc == other.doc && pointer::is_within(&self.pointer, &other.pointer)
    }
}

/// One JSON document taking part in resolution
#[derive(Debug, Clone)]
pub struct Document {
    /// Retrieval URI without fragment
    pub base: String,
    pub value: Arc<Value>,
    pub draft: Draft,
    /// Loaded from the meta-schema store; exempt from authoring lints
    pub meta: bool,
}

/// A schema resource: the root of a document or a subschema with `$id`
#[derive(Debug, Clone)]
pub struct Resource {
    pub base: String,
    pub location: Location,
    /// `$dynamicAnchor` names declared in this resource, first declaration wins.
    /// The empty name stands for `$recursiveAnchor: true` at the resource root.
    pub dynamic_anchors: HashMap<String, Location>,
}

#[derive(Debug, Default)]
pub struct ResolutionSession {
    documents: Vec<Document>,
    by_base: HashMap<String, DocId>,
    identifiers: HashMap<String, Location>,
    resources: Vec<Resource>,
    function_names: HashMap<Location, String>,
    name_counts: HashMap<String, usize>,
}

/// Name of the root compile unit
pub const ROOT_FUNCTION: &str = "validate";

impl ResolutionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, base: &str, value: Arc<Value>, draft: Draft, meta: bool) -> DocId {
        let id = self.documents.len();
        debug!(doc = id, base = %base, "Added document to session");
        self.documents.push(Document {
            base: base.to_string(),
            value,
            draft,
            meta,
        });
        self.by_base.insert(base.to_string(), id);
        id
    }

    pub fn document(&self, id: DocId) -> &Document {
        &self.documents[id]
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn has_base(&self, base: &str) -> bool {
        self.by_base.contains_key(base)
    }

    /// The value a location points at
    pub fn value_at(&self, location: &Location) -> Option<&Value> {
        let document = self.documents.get(location.doc)?;
        pointer::get(&document.value, &location.pointer)
    }

    /// Map an absolute URI (resource base or `base#anchor`) to a location
    pub fn register_identifier(&mut self, uri: &str, location: Location) -> Result<()> {
        match self.identifiers.get(uri) {
            Some(existing) if *existing != location => Err(CompileError::InvalidSchema(format!(
                "identifier \"{uri}\" resolves to more than one schema ({} and {})",
                self.schema_path(existing),
                self.schema_path(&location)
            ))),
            Some(_) => Ok(()),
            None => {
                self.identifiers.insert(uri.to_string(), location);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, uri: &str) -> Option<&Location> {
        self.identifiers.get(uri)
    }

    pub fn add_resource(&mut self, base: &str, location: Location) -> ResourceId {
        if let Some(existing) = self.resources.iter().position(|r| r.location == location) {
            self.resources[existing].base = base.to_string();
            return existing;
        }
        self.resources.push(Resource {
            base: base.to_string(),
            location,
            dynamic_anchors: HashMap::new(),
        });
        self.resources.len() - 1
    }

    pub fn add_dynamic_anchor(&mut self, resource: ResourceId, name: &str, location: Location) {
        if let Some(res) = self.resources.get_mut(resource) {
            res.dynamic_anchors.entry(name.to_string()).or_insert(location);
        }
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Resource whose root is exactly this location
    pub fn resource_at(&self, location: &Location) -> Option<ResourceId> {
        self.resources.iter().position(|r| r.location == *location)
    }

    /// Innermost resource enclosing a location
    pub fn resource_of(&self, location: &Location) -> ResourceId {
        self.resources
            .iter()
            .enumerate()
            .filter(|(_, r)| r.location.contains(location))
            .max_by_key(|(_, r)| r.location.pointer.len())
            .map(|(id, _)| id)
            .unwrap_or(0)
    }

    /// Stable function name for a compile unit location
    pub fn function_name(&mut self, location: &Location) -> String {
        if location.doc == 0 && location.pointer.is_empty() {
            return ROOT_FUNCTION.to_string();
        }
        if let Some(name) = self.function_names.get(location) {
            return name.clone();
        }
        let stem: String = pointer::last_token(&location.pointer)
            .unwrap_or_else(|| "schema".to_string())
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let stem = if stem.is_empty() || stem.starts_with(|c: char| c.is_ascii_digit()) {
            format!("schema{stem}")
        } else {
            stem
        };
        let counter = self.name_counts.entry(stem.clone()).or_insert(0);
        *counter += 1;
        let name = format!("{stem}_{counter}");
        self.function_names.insert(location.clone(), name.clone());
        name
    }

    /// `#`-pointer of a location, prefixed with the document base outside the root document
    pub fn schema_path(&self, location: &Location) -> String {
        let fragment = pointer::to_fragment(&location.pointer);
        if location.doc == 0 {
            fragment
        } else {
            match self.documents.get(location.doc) {
                Some(doc) => format!("{}{}", doc.base, fragment),
                None => fragment,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_function_names_are_stable_and_unique() {
        let mut session = ResolutionSession::new();
        session.add_document("json-schema:///root", Arc::new(json!({})), Draft::default(), false);
        let root = Location::new(0, "");
        let a = Location::new(0, "/$defs/node");
        let b = Location::new(0, "/properties/node");
        assert_eq!(session.function_name(&root), "validate");
        assert_eq!(session.function_name(&a), "node_1");
        assert_eq!(session.function_name(&b), "node_2");
        assert_eq!(session.function_name(&a), "node_1");
        assert_eq!(session.function_name(&Location::new(0, "/items/0")), "schema0_1");
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let mut session = ResolutionSession::new();
        session.add_document("json-schema:///root", Arc::new(json!({})), Draft::default(), false);
        session
            .register_identifier("http://x/a", Location::new(0, "/a"))
            .unwrap();
        session
            .register_identifier("http://x/a", Location::new(0, "/a"))
            .unwrap();
        assert!(session
            .register_identifier("http://x/a", Location::new(0, "/b"))
            .is_err());
    }

    #[test]
    fn test_resource_of_picks_innermost() {
        let mut session = ResolutionSession::new();
        session.add_document("json-schema:///root", Arc::new(json!({})), Draft::default(), false);
        session.add_resource("json-schema:///root", Location::new(0, ""));
        let inner = session.add_resource("http://x/inner", Location::new(0, "/$defs/a"));
        assert_eq!(session.resource_of(&Location::new(0, "/$defs/a/properties/b")), inner);
        assert_eq!(session.resource_of(&Location::new(0, "/properties/b")), 0);
    }

    #[test]
    fn test_schema_path_prefix() {
        let mut session = ResolutionSession::new();
        session.add_document("json-schema:///root", Arc::new(json!({})), Draft::default(), false);
        session.add_document("http://x/other.json", Arc::new(json!({})), Draft::default(), false);
        assert_eq!(session.schema_path(&Location::new(0, "/a")), "#/a");
        assert_eq!(
            session.schema_path(&Location::new(1, "/b")),
            "http://x/other.json#/b"
        );
    }
}
