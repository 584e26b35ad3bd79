//! Expected image digests and the running SHA-256 used to check them.

use sha2::{Digest, Sha256};

use crate::error::OtaError;

pub const DIGEST_LEN: usize = 32;

/// A SHA-256 digest the finished image must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedDigest([u8; DIGEST_LEN]);

impl ExpectedDigest {
    /// Parse a 64 character hex string (either case, surrounding whitespace
    /// ignored).
    pub fn parse(hex_str: &str) -> Result<Self, OtaError> {
        let trimmed = hex_str.trim();
        if trimmed.len() != DIGEST_LEN * 2 {
            return Err(OtaError::InvalidChecksum(format!(
                "expected {} hex characters, got {}",
                DIGEST_LEN * 2,
                trimmed.len()
            )));
        }

        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(trimmed, &mut bytes)
            .map_err(|e| OtaError::InvalidChecksum(e.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Running digest over everything a sink accepted.
///
/// Sinks feed it from `write` and ask `verify` when finalizing.
#[derive(Default)]
pub struct DigestVerifier {
    expected: Option<ExpectedDigest>,
    hasher: Sha256,
}

impl DigestVerifier {
    pub fn expect(&mut self, digest: ExpectedDigest) {
        self.expected = Some(digest);
    }

    /// Restart hashing; the expected digest is kept.
    pub fn reset(&mut self) {
        self.hasher = Sha256::new();
    }

    /// Forget both the expected digest and the running hash.
    pub fn clear(&mut self) {
        self.expected = None;
        self.hasher = Sha256::new();
    }

    pub fn update(&mut self, data: &[u8]) {
        if self.expected.is_some() {
            self.hasher.update(data);
        }
    }

    /// Compare the running hash against the expected digest. Passes when no
    /// digest was pinned. Returns the actual digest as hex on mismatch.
    pub fn verify(&mut self) -> Result<(), String> {
        let Some(expected) = self.expected.take() else {
            return Ok(());
        };
        let actual = std::mem::take(&mut self.hasher).finalize();
        if actual.as_slice() == expected.as_bytes() {
            Ok(())
        } else {
            Err(hex::encode(actual))
        }
    }
}
