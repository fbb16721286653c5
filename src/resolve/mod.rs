//! Reference resolver
//!
//! Turns a raw schema into a [`Resolution`]: the documents taking part, every
//! reference bound to a concrete target, the decision to inline or call each
//! one, and the list of compile units.
//!
//! ## Pipeline
//!
//! ```text
//! schema ──► macro expansion ──► collector ──► site lookup ──► inliner ──► units
//!                                   ▲              │
//!                                   └── external ──┘  (registry, meta-schemas, loader)
//! ```
//!
//! External documents are looked up in the registry, the meta-schema store and
//! the documents already fetched by an async loader, in that order. A document
//! nobody has yet surfaces as [`ResolveError::Missing`]; the async entry point
//! fetches it and resolves again.

pub mod collector;
pub mod graph;
pub mod inline;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::checksum::Checksum;
use crate::config::{Draft, ValidatorOptions};
use crate::error::{CompileError, LoadError};
use crate::pointer;
use crate::registry::SchemaRegistry;
use collector::{collect_document, expand_macros, Collected, RefKeyword, RefSite};
use graph::UnitId;
use inline::PlannedSite;
use session::{DocId, Location, ResolutionSession, ResourceId, ROOT_FUNCTION};

/// Fetches external schemas by URI for `compile_async`
#[async_trait]
pub trait SchemaLoader: Send + Sync {
    async fn load(&self, uri: &str) -> std::result::Result<Value, LoadError>;
}

/// Aggregate flags computed once per compile
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileContext {
    pub has_unevaluated_properties: bool,
    pub has_unevaluated_items: bool,
    pub has_root_reference: bool,
    pub referenced_functions: Vec<String>,
    pub uses_data: bool,
}

/// How one reference is executed
#[derive(Debug, Clone)]
pub enum SiteResolution {
    /// Compile the target in place
    Inline(Location),
    /// Call a shared compile unit
    Call(UnitId),
    /// Resolve against the dynamic scope; fall back to the static target
    Dynamic {
        fallback: UnitId,
        anchor: String,
        candidates: Vec<(ResourceId, UnitId)>,
    },
}

/// A location compiled once and called by name
#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub name: String,
    pub location: Location,
}

#[derive(Debug)]
pub struct Resolution {
    pub session: ResolutionSession,
    pub sites: HashMap<(Location, RefKeyword), SiteResolution>,
    pub units: Vec<UnitSpec>,
    pub collected: Collected,
}

/// Resolution failure; `Missing` is retried after an async fetch
#[derive(Debug)]
pub enum ResolveError {
    Missing {
        uri: String,
        keyword: &'static str,
        reference: String,
        path: String,
    },
    Compile(CompileError),
}

impl From<CompileError> for ResolveError {
    fn from(err: CompileError) -> Self {
        ResolveError::Compile(err)
    }
}

impl ResolveError {
    /// Final form for synchronous callers
    pub fn into_compile_error(self, has_loader: bool) -> CompileError {
        match self {
            ResolveError::Missing { uri, .. } if has_loader => CompileError::AsyncRequired { uri },
            ResolveError::Missing {
                keyword,
                reference,
                path,
                ..
            } => CompileError::UnresolvedReference {
                keyword,
                reference,
                path,
            },
            ResolveError::Compile(err) => err,
        }
    }
}

/// Draft a document is written in: its `$schema`, else the configured default
pub fn document_draft(schema: &Value, default: Draft) -> Draft {
    schema
        .get("$schema")
        .and_then(Value::as_str)
        .and_then(Draft::from_schema_uri)
        .unwrap_or(default)
}

fn add_document(
    session: &mut ResolutionSession,
    base: &str,
    value: &Arc<Value>,
    meta: bool,
    options: &ValidatorOptions,
    registry: &SchemaRegistry,
    collected: &mut Collected,
) -> Result<DocId, CompileError> {
    let value = if registry.has_macros() {
        Arc::new(expand_macros(value, registry)?)
    } else {
        Arc::clone(value)
    };
    let draft = document_draft(&value, options.draft);
    let doc = session.add_document(base, value, draft, meta);
    collect_document(session, doc, options, registry, collected)?;
    Ok(doc)
}

/// Resolve a schema against the registry and any documents fetched so far
pub fn resolve(
    schema: &Arc<Value>,
    options: &ValidatorOptions,
    registry: &SchemaRegistry,
    loaded: &HashMap<String, Arc<Value>>,
) -> Result<Resolution, ResolveError> {
    let mut session = ResolutionSession::new();
    let mut collected = Collected::default();
    let base = format!("json-schema:///{}", Checksum::from_json(schema).short());
    add_document(&mut session, &base, schema, false, options, registry, &mut collected)?;

    // collecting an external document appends its sites, so iterate by index
    let mut targets = Vec::with_capacity(collected.sites.len());
    let mut i = 0;
    while i < collected.sites.len() {
        let site = collected.sites[i].clone();
        let target = locate(&mut session, &site, options, registry, loaded, &mut collected)?;
        targets.push(target);
        i += 1;
    }

    let planned: Vec<PlannedSite> = collected
        .sites
        .iter()
        .zip(&targets)
        .map(|(site, target)| PlannedSite {
            site: site.location.clone(),
            boundary: site.boundary.clone(),
            target: target.clone(),
            dynamic: dynamic_anchor(&session, site, target).is_some(),
        })
        .collect();
    let inlined = inline::plan(&planned, options.inline_refs);

    let root = Location::new(0, "");
    let mut units = vec![UnitSpec {
        name: ROOT_FUNCTION.to_string(),
        location: root.clone(),
    }];
    let mut unit_of: HashMap<Location, UnitId> = HashMap::from([(root, 0)]);
    let mut unit_for = |session: &mut ResolutionSession, location: &Location| -> UnitId {
        if let Some(&unit) = unit_of.get(location) {
            return unit;
        }
        let name = session.function_name(location);
        debug!(function = %name, at = %session.schema_path(location), "Compile unit");
        units.push(UnitSpec {
            name,
            location: location.clone(),
        });
        unit_of.insert(location.clone(), units.len() - 1);
        units.len() - 1
    };

    let mut sites = HashMap::with_capacity(collected.sites.len());
    for ((site, target), inline) in collected.sites.iter().zip(&targets).zip(inlined) {
        let resolution = if inline {
            SiteResolution::Inline(target.clone())
        } else if let Some(anchor) = dynamic_anchor(&session, site, target) {
            let fallback = unit_for(&mut session, target);
            let mut candidates = Vec::new();
            let anchored: Vec<(ResourceId, Location)> = session
                .resources()
                .iter()
                .enumerate()
                .filter_map(|(rid, res)| res.dynamic_anchors.get(&anchor).map(|loc| (rid, loc.clone())))
                .collect();
            for (rid, location) in anchored {
                candidates.push((rid, unit_for(&mut session, &location)));
            }
            SiteResolution::Dynamic {
                fallback,
                anchor,
                candidates,
            }
        } else {
            SiteResolution::Call(unit_for(&mut session, target))
        };
        sites.insert((site.location.clone(), site.keyword), resolution);
    }

    Ok(Resolution {
        session,
        sites,
        units,
        collected,
    })
}

/// Bind a site to its static target, loading external documents on the way
fn locate(
    session: &mut ResolutionSession,
    site: &RefSite,
    options: &ValidatorOptions,
    registry: &SchemaRegistry,
    loaded: &HashMap<String, Arc<Value>>,
    collected: &mut Collected,
) -> Result<Location, ResolveError> {
    if session.lookup(&site.base).is_none() && !session.has_base(&site.base) {
        let (document, meta) = match registry.get_schema(&site.base) {
            Some(doc) => (Some(Arc::clone(doc)), false),
            None => match registry.get_meta_schema(&site.base) {
                Some(doc) => (Some(Arc::clone(doc)), true),
                None => (loaded.get(&site.base).cloned(), false),
            },
        };
        let Some(document) = document else {
            return Err(ResolveError::Missing {
                uri: site.base.clone(),
                keyword: site.keyword.as_str(),
                reference: site.raw.clone(),
                path: session.schema_path(&site.location),
            });
        };
        debug!(uri = %site.base, meta, "Resolved external schema");
        add_document(session, &site.base, &document, meta, options, registry, collected)?;
    }

    let unresolved = || CompileError::UnresolvedReference {
        keyword: site.keyword.as_str(),
        reference: site.raw.clone(),
        path: session.schema_path(&site.location),
    };
    let resource = session.lookup(&site.base).cloned().ok_or_else(unresolved)?;
    let target = if site.fragment.is_empty() {
        resource
    } else if site.fragment.starts_with('/') {
        let ptr = format!("{}{}", resource.pointer, pointer::from_fragment(&site.fragment));
        Location::new(resource.doc, ptr)
    } else {
        let anchor = format!("{}#{}", site.base, pointer::from_fragment(&site.fragment));
        session.lookup(&anchor).cloned().ok_or_else(unresolved)?
    };
    if session.value_at(&target).is_none() {
        return Err(unresolved().into());
    }
    Ok(target)
}

/// Anchor name of a dynamic reference whose static target carries the matching dynamic anchor
fn dynamic_anchor(session: &ResolutionSession, site: &RefSite, target: &Location) -> Option<String> {
    let node = session.value_at(target)?;
    match site.keyword {
        RefKeyword::Ref => None,
        RefKeyword::DynamicRef => {
            let name = pointer::from_fragment(&site.fragment);
            if name.is_empty() || name.starts_with('/') {
                return None;
            }
            (node.get("$dynamicAnchor").and_then(Value::as_str) == Some(name.as_str())).then_some(name)
        }
        RefKeyword::RecursiveRef => {
            (node.get("$recursiveAnchor") == Some(&Value::Bool(true))).then(String::new)
        }
    }
}
