//! Embedded meta-schemas
//!
//! Draft-07 and the 2020-12 dialect (with its vocabulary documents) are
//! compiled into the binary. Draft 6 schemas are checked against draft-07 and
//! 2019-09 schemas against 2020-12.

use std::path::Path;
use std::sync::Arc;

use include_dir::{include_dir, Dir, File};
use serde_json::Value;
use tracing::{error, trace};

use crate::config::Draft;
use crate::registry::{schema_id, SchemaRegistry};

static META_SCHEMAS: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/metaschemas");

pub const DRAFT_07: &str = "http://json-schema.org/draft-07/schema";
pub const DRAFT_2020_12: &str = "https://json-schema.org/draft/2020-12/schema";

/// Draft names accepted wherever a meta-schema is named
const ALIASES: &[(&str, &str)] = &[
    ("draft-06", DRAFT_07),
    ("draft-07", DRAFT_07),
    ("draft/2019-09", DRAFT_2020_12),
    ("draft/2020-12", DRAFT_2020_12),
    ("http://json-schema.org/draft-06/schema", DRAFT_07),
    ("https://json-schema.org/draft/2019-09/schema", DRAFT_2020_12),
];

/// Map an alias or a known-but-not-embedded URI to an embedded meta-schema URI
pub fn canonical_uri(name: &str) -> &str {
    let trimmed = name.trim_end_matches('#');
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == trimmed)
        .map(|(_, uri)| *uri)
        .unwrap_or(trimmed)
}

/// Meta-schema used when a schema carries no `$schema`
pub fn default_uri(draft: Draft) -> &'static str {
    match draft {
        Draft::Draft6 | Draft::Draft7 => DRAFT_07,
        Draft::Draft2019_09 | Draft::Draft2020_12 => DRAFT_2020_12,
    }
}

fn collect_files<'a>(dir: &'a Dir<'a>, out: &mut Vec<&'a File<'a>>) {
    out.extend(dir.files());
    for sub in dir.dirs() {
        collect_files(sub, out);
    }
}

/// Register every embedded meta-schema under its `$id`
pub fn load_into(registry: &mut SchemaRegistry) {
    let mut files = Vec::new();
    collect_files(&META_SCHEMAS, &mut files);
    for file in files {
        if file.path().extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(content) = file.contents_utf8() else {
            continue;
        };
        match serde_json::from_str::<Value>(content) {
            Ok(schema) => {
                let Some(id) = schema_id(&schema).map(str::to_string) else {
                    error!(path = %file.path().display(), "Embedded meta-schema has no $id");
                    continue;
                };
                trace!(id = %id, "Loaded embedded meta-schema");
                registry.insert_meta_schema(&id, Arc::new(schema));
            }
            Err(e) => error!(path = %file.path().display(), error = %e, "Embedded meta-schema is not JSON"),
        }
    }
}

/// Whether a path names one of the embedded files
pub fn is_embedded(path: &Path) -> bool {
    META_SCHEMAS.get_file(path).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidatorOptions;

    #[test]
    fn test_aliases() {
        assert_eq!(canonical_uri("draft-07"), DRAFT_07);
        assert_eq!(canonical_uri("http://json-schema.org/draft-07/schema#"), DRAFT_07);
        assert_eq!(canonical_uri("draft/2019-09"), DRAFT_2020_12);
        assert_eq!(canonical_uri("http://example.com/meta"), "http://example.com/meta");
    }

    #[test]
    fn test_vocabularies_registered() {
        let registry = SchemaRegistry::new(&ValidatorOptions::default());
        for vocab in ["core", "applicator", "unevaluated", "validation", "meta-data", "format-annotation", "content"] {
            let uri = format!("https://json-schema.org/draft/2020-12/meta/{vocab}");
            assert!(registry.get_meta_schema(&uri).is_some(), "missing {uri}");
        }
        assert!(is_embedded(Path::new("draft-07.json")));
    }

    #[test]
    fn test_default_uri() {
        assert_eq!(default_uri(Draft::Draft6), DRAFT_07);
        assert_eq!(default_uri(Draft::Draft2019_09), DRAFT_2020_12);
    }
}
