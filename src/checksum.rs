//! Schema fingerprints

use crate::canonical::canonical_stringify;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA256 of a schema's canonical form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum from JSON value (key order does not matter)
    pub fn from_json(value: &serde_json::Value) -> Self {
        Self::from_bytes(canonical_stringify(value).as_bytes())
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, used to name anonymous documents
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checksum_ignores_key_order() {
        let a = Checksum::from_json(&json!({"type": "string", "minLength": 1}));
        let b = Checksum::from_json(&json!({"minLength": 1, "type": "string"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_checksum_different_content() {
        let a = Checksum::from_json(&json!({"type": "string"}));
        let b = Checksum::from_json(&json!({"type": "number"}));
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 12);
        assert_eq!(a.as_str().len(), 64);
    }
}
