//! Checksum utilities for module integrity

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::module::Module;

/// SHA256 checksum of module content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum of a module's canonical (compact JSON) form.
    ///
    /// Equal declarations hash equal; the weave report compares input and
    /// output checksums to tell whether anything changed.
    pub fn of_module(module: &Module) -> Self {
        let canonical = serde_json::to_vec(module).unwrap_or_default();
        Self::from_bytes(&canonical)
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

    #[test]
    fn test_checksum_consistency() {
        let content = br#"{"name": "Zoo", "version": "1.0.0"}"#;
        assert_eq!(Checksum::from_bytes(content), Checksum::from_bytes(content));
        assert_ne!(Checksum::from_bytes(content), Checksum::from_bytes(b"other"));
        assert_eq!(Checksum::from_bytes(content).to_string().len(), 64);
    }

    #[test]
    fn test_module_checksum_tracks_content() {
        let a = Module::new("Zoo", semver::Version::new(1, 0, 0));
        let mut b = a.clone();
        assert_eq!(Checksum::of_module(&a), Checksum::of_module(&b));

        b.version = semver::Version::new(1, 0, 1);
        assert_ne!(Checksum::of_module(&a), Checksum::of_module(&b));
    }
}
