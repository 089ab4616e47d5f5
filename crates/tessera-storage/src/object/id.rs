//! SHA-1 object identifiers.

use crate::{Result, StorageError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

/// A 20-byte SHA-1 object identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 20]);

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl ObjectId {
    /// Length of a raw identifier in bytes.
    pub const LEN: usize = 20;

    /// Length of the hex representation.
    pub const HEX_LEN: usize = 40;

    /// The all-zero identifier.
    ///
    /// Only used as a placeholder on the wire (e.g. the `capabilities^{}`
    /// advertisement of an empty repository). "No object" is `Option::None`.
    pub const ZERO: ObjectId = ObjectId([0u8; 20]);

    /// Creates an ObjectId from raw bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Creates an ObjectId from a slice that must be exactly 20 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 20] = bytes.try_into().map_err(|_| {
            StorageError::InvalidObject(format!("invalid object id length: {}", bytes.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Creates an ObjectId from a hex string.
    pub fn from_hex(hex: impl AsRef<[u8]>) -> Result<Self> {
        let hex = hex.as_ref();
        if hex.len() != Self::HEX_LEN {
            return Err(StorageError::InvalidObject(format!(
                "invalid object id length: {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|e| StorageError::InvalidObject(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns the lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns true for the all-zero placeholder.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// First byte of the digest, used to pick a fan-out bucket.
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }

    /// Hashes an arbitrary byte string.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Loose-object path components: the first two hex characters and the
    /// remaining thirty-eight.
    pub fn loose_path_parts(&self) -> (String, String) {
        let hex = self.to_hex();
        let (dir, file) = hex.split_at(2);
        (dir.to_string(), file.to_string())
    }
}

impl FromStr for ObjectId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_hex_roundtrip() {
        let hex = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
        let id = ObjectId::from_hex(hex).unwrap();
        assert_eq!(id.to_hex(), hex);
        assert_eq!(hex.parse::<ObjectId>().unwrap(), id);
    }

    #[test]
    fn test_object_id_uppercase_hex_decodes_to_lowercase() {
        let id = ObjectId::from_hex("A94A8FE5CCB19BA61C4C0873D391E987982FBBD3").unwrap();
        assert_eq!(id.to_hex(), "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3");
    }

    #[test]
    fn test_object_id_invalid_hex_length() {
        assert!(ObjectId::from_hex("abc").is_err());
        assert!(ObjectId::from_hex("a94a8fe5ccb19ba61c4c0873d391e987982fbbd3ff").is_err());
    }

    #[test]
    fn test_object_id_invalid_hex_chars() {
        let result = ObjectId::from_hex("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz");
        assert!(matches!(result, Err(StorageError::InvalidObject(_))));
    }

    #[test]
    fn test_object_id_from_slice() {
        assert!(ObjectId::from_slice(&[1u8; 20]).is_ok());
        assert!(ObjectId::from_slice(&[1u8; 19]).is_err());
    }

    #[test]
    fn test_zero_id() {
        assert!(ObjectId::ZERO.is_zero());
        assert_eq!(ObjectId::ZERO.to_hex(), "0".repeat(40));
        assert!(!ObjectId::from_bytes([1u8; 20]).is_zero());
    }

    #[test]
    fn test_loose_path_parts() {
        let id = ObjectId::from_hex("ce013625030ba8dba906f756967f9e9ca394464a").unwrap();
        let (dir, file) = id.loose_path_parts();
        assert_eq!(dir, "ce");
        assert_eq!(file, "013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn test_object_id_debug() {
        let debug = format!("{:?}", ObjectId::ZERO);
        assert!(debug.contains("ObjectId"));
        assert!(debug.contains(&"0".repeat(40)));
    }

    #[test]
    fn test_object_id_serialization() {
        let id = ObjectId::from_bytes([0xab; 20]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(20)));
        let parsed: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_object_id_ordering_is_bytewise() {
        let low = ObjectId::from_bytes([0x01; 20]);
        let high = ObjectId::from_bytes([0xf0; 20]);
        assert!(low < high);
    }
}
