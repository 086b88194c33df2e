use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

/// A 32-byte Arweave identifier (transaction id, data-item id, or block
/// id), transported as a 43-character base64url string.
///
/// Comparable to `ChunkHash`/`CryptoHash` in `core/primitives/src/sharding.rs`:
/// a thin newtype around a fixed-size hash that carries no validation
/// beyond its length.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier([u8; 32]);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier must decode to exactly 32 bytes, got {0}")]
    WrongLength(usize),
    #[error("identifier is not valid base64url: {0}")]
    InvalidBase64(String),
}

impl Identifier {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base64url(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| IdentifierError::InvalidBase64(e.to_string()))?;
        let len = decoded.len();
        let bytes: [u8; 32] =
            decoded.try_into().map_err(|_| IdentifierError::WrongLength(len))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.to_base64url())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64url())
    }
}

impl serde::Serialize for Identifier {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64url())
    }
}

impl<'de> serde::Deserialize<'de> for Identifier {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_base64url() {
        let bytes = [7u8; 32];
        let id = Identifier::from_bytes(bytes);
        let text = id.to_base64url();
        assert_eq!(text.len(), 43);
        let parsed: Identifier = text.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = "AAAA".parse::<Identifier>().unwrap_err();
        assert_eq!(err, IdentifierError::WrongLength(3));
    }

    #[test]
    fn rejects_invalid_base64() {
        let err = "not base64url!!".parse::<Identifier>().unwrap_err();
        assert!(matches!(err, IdentifierError::InvalidBase64(_)));
    }

    #[test]
    fn serde_round_trip() {
        let id = Identifier::from_bytes([9u8; 32]);
        let json = serde_json::to_string(&id).unwrap();
        let back: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
