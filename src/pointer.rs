//! JSON Pointer helpers
//!
//! Schema locations are carried as plain pointer strings (`""` is the
//! document root, `/properties/a` a child). Data locations are carried as a
//! segment stack and rendered only when an error is recorded.

use serde_json::Value;
use std::fmt;

/// Escape one reference token (`~` then `/`)
pub fn escape(token: &str) -> String {
    if !token.contains(['~', '/']) {
        return token.to_string();
    }
    token.replace('~', "~0").replace('/', "~1")
}

/// Reverse of [`escape`]
pub fn unescape(token: &str) -> String {
    if !token.contains('~') {
        return token.to_string();
    }
    token.replace("~1", "/").replace("~0", "~")
}

/// Append one (unescaped) token to a pointer
pub fn join(pointer: &str, token: &str) -> String {
    let mut out = String::with_capacity(pointer.len() + token.len() + 1);
    out.push_str(pointer);
    out.push('/');
    out.push_str(&escape(token));
    out
}

/// Append an array index to a pointer
pub fn join_index(pointer: &str, index: usize) -> String {
    format!("{pointer}/{index}")
}

/// Split a pointer into unescaped tokens
pub fn tokens(pointer: &str) -> Vec<String> {
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer
        .trim_start_matches('/')
        .split('/')
        .map(unescape)
        .collect()
}

/// Pointer of the enclosing location, `None` at the root
pub fn parent(pointer: &str) -> Option<&str> {
    if pointer.is_empty() {
        return None;
    }
    pointer.rfind('/').map(|idx| &pointer[..idx])
}

/// Last (unescaped) token of a pointer
pub fn last_token(pointer: &str) -> Option<String> {
    if pointer.is_empty() {
        return None;
    }
    pointer.rfind('/').map(|idx| unescape(&pointer[idx + 1..]))
}

/// True when `descendant` equals `ancestor` or lies beneath it on a token boundary
pub fn is_within(ancestor: &str, descendant: &str) -> bool {
    if ancestor.is_empty() {
        return true;
    }
    descendant == ancestor
        || (descendant.starts_with(ancestor) && descendant.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

/// Resolve a pointer against a document
pub fn get<'a>(document: &'a Value, pointer: &str) -> Option<&'a Value> {
    if pointer.is_empty() {
        return Some(document);
    }
    document.pointer(pointer)
}

/// Render a schema pointer as a `#`-prefixed fragment
pub fn to_fragment(pointer: &str) -> String {
    format!("#{pointer}")
}

/// Convert a URI fragment (`/a%20b/c`) to a plain pointer, decoding percent escapes
pub fn from_fragment(fragment: &str) -> String {
    let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
    if !fragment.contains('%') {
        return fragment.to_string();
    }
    let bytes = fragment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = decoded {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// One step into a data value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, "{}", escape(key)),
            Segment::Index(idx) => write!(f, "{idx}"),
        }
    }
}

/// Location of the value currently being validated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataPath {
    segments: Vec<Segment>,
}

impl DataPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn push_key(&mut self, key: &str) {
        self.segments.push(Segment::Key(key.to_string()));
    }

    pub fn push_index(&mut self, index: usize) {
        self.segments.push(Segment::Index(index));
    }

    pub fn pop(&mut self) {
        self.segments.pop();
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Key or index of the current value inside its parent
    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Walk the segments from `root`
    pub fn lookup<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        lookup_segments(root, &self.segments)
    }

    /// Walk the segments from `root`, mutably
    pub fn lookup_mut<'a>(&self, root: &'a mut Value) -> Option<&'a mut Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get_mut(key)?,
                (Segment::Index(idx), Value::Array(items)) => items.get_mut(*idx)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

fn lookup_segments<'a>(root: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(idx), Value::Array(items)) => items.get(*idx)?,
            _ => return None,
        };
    }
    Some(current)
}

/// A `$data` pointer: absolute (`/a/b`) or relative (`1/a`, `0#`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataPointer {
    Absolute(String),
    Relative {
        up: usize,
        rest: String,
        /// `N#` form: yields the key or index instead of the value
        key_of: bool,
    },
}

impl DataPointer {
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.starts_with('/') {
            return Some(DataPointer::Absolute(raw.to_string()));
        }
        let digits = raw.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return None;
        }
        let up = raw[..digits].parse().ok()?;
        let rest = &raw[digits..];
        if rest == "#" {
            return Some(DataPointer::Relative {
                up,
                rest: String::new(),
                key_of: true,
            });
        }
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        Some(DataPointer::Relative {
            up,
            rest: rest.to_string(),
            key_of: false,
        })
    }

    /// Resolve against the run's root data and the current location
    pub fn resolve(&self, root: &Value, at: &DataPath) -> Option<Value> {
        match self {
            DataPointer::Absolute(pointer) => get(root, pointer).cloned(),
            DataPointer::Relative { up, rest, key_of } => {
                let segments = at.segments();
                if *up > segments.len() {
                    return None;
                }
                let base = &segments[..segments.len() - up];
                if *key_of {
                    return match base.last()? {
                        Segment::Key(key) => Some(Value::String(key.clone())),
                        Segment::Index(idx) => Some(Value::from(*idx)),
                    };
                }
                let anchor = lookup_segments(root, base)?;
                get(anchor, rest).cloned()
            }
        }
    }
}
