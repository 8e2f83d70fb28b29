//! Content fingerprints used as cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Deterministic blake3 digest of `(source text, stage name, stage config version)`.
///
/// Component ids are not part of the digest: two components with identical
/// text and stage configuration share one cache entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn compute(source_text: &str, stage_name: &str, stage_config_version: u32) -> Self {
        let mut hasher = blake3::Hasher::new();
        // Length-prefix each field so field boundaries cannot shift.
        for field in [stage_name.as_bytes(), source_text.as_bytes()] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        hasher.update(&stage_config_version.to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn as_hash(&self) -> blake3::Hash {
        blake3::Hash::from(self.0)
    }

    /// Full lowercase hex form.
    pub fn to_hex(&self) -> String {
        self.as_hash().to_hex().to_string()
    }

    /// First 12 hex characters, for logs.
    pub fn short(&self) -> String {
        self.as_hash().to_hex()[..12].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}
