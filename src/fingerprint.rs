//! Content fingerprints and cache keys.
//!
//! A [`SourceFingerprint`] identifies the exact content of a source set. A
//! [`CacheKey`] pairs it with the analysis level an artifact was built at,
//! rendered as `<hex>:<level>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::adapter::{SourceInput, SourceSet};
use crate::model::AnalysisLevel;

/// SHA-256 over a source set's language tag and its sorted inputs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceFingerprint(String);

impl SourceFingerprint {
    /// Fingerprint a source set.
    ///
    /// Inputs are sorted by path, so listing order does not matter. Every
    /// field is length-prefixed so no two distinct sets share a byte stream.
    pub fn compute(source_set: &SourceSet) -> Self {
        let mut inputs: Vec<&SourceInput> = source_set.inputs.iter().collect();
        inputs.sort_by(|a, b| a.path().cmp(b.path()).then(a.contents().cmp(b.contents())));

        let mut hasher = Sha256::new();
        update_field(&mut hasher, source_set.language.as_str().as_bytes());
        for input in inputs {
            update_field(&mut hasher, input.strategy().as_str().as_bytes());
            update_field(&mut hasher, input.path().as_bytes());
            update_field(&mut hasher, input.contents().as_bytes());
        }
        SourceFingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for SourceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one generation: content plus analysis level.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub fingerprint: SourceFingerprint,
    pub level: AnalysisLevel,
}

impl CacheKey {
    pub fn new(fingerprint: SourceFingerprint, level: AnalysisLevel) -> Self {
        Self { fingerprint, level }
    }

    pub fn for_source_set(source_set: &SourceSet, level: AnalysisLevel) -> Self {
        Self::new(SourceFingerprint::compute(source_set), level)
    }

    /// Whether an artifact under this key can answer a request for `other`.
    pub fn covers(&self, other: &CacheKey) -> bool {
        self.fingerprint == other.fingerprint && self.level.satisfies(other.level)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.fingerprint, self.level)
    }
}

impl FromStr for CacheKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hash, level) = s
            .split_once(':')
            .ok_or_else(|| format!("cache key '{}' has no level", s))?;
        if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("cache key '{}' has a malformed fingerprint", s));
        }
        Ok(CacheKey {
            fingerprint: SourceFingerprint(hash.to_ascii_lowercase()),
            level: level.parse()?,
        })
    }
}
