//! Content-addressed hashing primitives
//!
//! Provides [`ContentHash`], a 32-byte Blake3 hash identifying candidates and
//! output artifacts.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte content hash (Blake3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute Blake3 hash of arbitrary data
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self::new(*blake3::hash(data).as_bytes())
    }

    /// Hash of a text candidate
    #[inline]
    #[must_use]
    pub fn of_text(text: &str) -> Self {
        Self::compute(text.as_bytes())
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Hash parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    /// Not valid hex
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Wrong number of bytes
    #[error("invalid hash length: expected 32, got {0}")]
    InvalidLength(usize),
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| HashError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_same_hash() {
        assert_eq!(ContentHash::of_text("def f(): pass"), ContentHash::of_text("def f(): pass"));
        assert_ne!(ContentHash::of_text("a"), ContentHash::of_text("b"));
    }

    #[test]
    fn display_parse_roundtrip() {
        let hash = ContentHash::of_text("x = 1");
        let parsed: ContentHash = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);
        assert_eq!(hash.short().len(), 16);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!("zz".parse::<ContentHash>(), Err(HashError::InvalidHex(_))));
        assert!(matches!("abcd".parse::<ContentHash>(), Err(HashError::InvalidLength(2))));
    }

    #[test]
    fn serializes_as_hex_string() {
        let hash = ContentHash::new([0xab; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
    }
}
