//! Content fingerprints used as optimistic-lock tokens.
//!
//! A fingerprint is the SHA-256 digest of the exact bytes stored at a path.
//! Writers read `(bytes, fingerprint)`, compute a new value, and hand the
//! fingerprint back to [`write_with_optimistic_lock`]; the write only lands
//! if nobody changed the stored bytes in between.
//!
//! [`write_with_optimistic_lock`]: crate::storage::StorageBackend::write_with_optimistic_lock

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// SHA-256 digest of stored content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Computes the fingerprint of `bytes`.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Returns the raw digest.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the lowercase hex rendering (64 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns true if `bytes` hash to this fingerprint.
    #[must_use]
    pub fn matches(&self, bytes: &[u8]) -> bool {
        Self::of(bytes) == *self
    }
}

/// Returns true if a stored object (or its absence) satisfies `expected`.
///
/// `None` on either side means "absent": an absent object only matches an
/// absent expectation, and a present object only matches its own digest.
#[must_use]
pub fn lock_matches(current: Option<&Fingerprint>, expected: Option<&Fingerprint>) -> bool {
    current == expected
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut digest = [0_u8; 32];
        hex::decode_to_slice(s, &mut digest)
            .map_err(|e| Error::InvalidInput(format!("invalid fingerprint {s:?}: {e}")))?;
        Ok(Self(digest))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
