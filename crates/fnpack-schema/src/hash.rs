//! Content hashes of deployment archives.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// SHA-256 digest of a deployment archive.
///
/// The platform reports deployed code hashes as base64 while object keys and
/// logs use lowercase hex, so both renderings are provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeHash([u8; 32]);

impl CodeHash {
    /// Compute the digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Lowercase hex rendering (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Standard base64 rendering, as reported by the compute platform.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Whether a platform-reported base64 hash names this digest.
    pub fn matches_base64(&self, reported: &str) -> bool {
        STANDARD
            .decode(reported.trim())
            .is_ok_and(|bytes| bytes.as_slice() == self.0.as_slice())
    }
}

impl std::fmt::Display for CodeHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
