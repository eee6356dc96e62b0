//! SHA-1 object identity for the client. Every object is addressed by the
//! SHA-1 of `"<type> <len>\0<content>"`; the all-zero value stands in for
//! "no object" in ref creation and deletion.

use std::{fmt::Display, io, str::FromStr};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::{errors::GitError, internal::object::types::ObjectType};

/// A 20-byte SHA-1 object ID.
///
/// Supports conversion to/from hex strings, byte slices, and stream reading.
/// The `Default` value is [`ObjectHash::ZERO`], the 40-zero hash Git uses for
/// "ref does not exist" in receive-pack command lines.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Deserialize, Serialize,
)]
pub struct ObjectHash(pub [u8; 20]);

impl Display for ObjectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for ObjectHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Parse 40 lowercase hex characters into an `ObjectHash`.
impl FromStr for ObjectHash {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 {
            return Err(GitError::InvalidHashValue(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| GitError::InvalidHashValue(s.to_string()))?;
        let mut h = [0u8; 20];
        h.copy_from_slice(&bytes);
        Ok(ObjectHash(h))
    }
}

impl ObjectHash {
    /// The distinguished all-zero hash.
    pub const ZERO: ObjectHash = ObjectHash([0u8; 20]);

    /// Compute the SHA-1 of raw data.
    pub fn new(data: &[u8]) -> ObjectHash {
        let digest = Sha1::digest(data);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(digest.as_ref());
        ObjectHash(bytes)
    }

    /// Hash an object the way Git does: `"<type> <len>\0"` header then content.
    pub fn from_type_and_data(object_type: ObjectType, data: &[u8]) -> ObjectHash {
        let mut hasher = Sha1::new();
        hasher.update(object_type.to_bytes());
        hasher.update(b" ");
        hasher.update(data.len().to_string().as_bytes());
        hasher.update(b"\x00");
        hasher.update(data);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(hasher.finalize().as_ref());
        ObjectHash(bytes)
    }

    /// Create an `ObjectHash` from exactly 20 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<ObjectHash, GitError> {
        if bytes.len() != 20 {
            return Err(GitError::InvalidHashValue(hex::encode(bytes)));
        }
        let mut h = [0u8; 20];
        h.copy_from_slice(bytes);
        Ok(ObjectHash(h))
    }

    /// Read 20 hash bytes from a stream.
    pub fn from_stream(data: &mut impl io::Read) -> io::Result<ObjectHash> {
        let mut h = [0u8; 20];
        data.read_exact(&mut h)?;
        Ok(ObjectHash(h))
    }

    /// Whether this is the all-zero hash.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Return raw bytes of the hash.
    pub fn to_data(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    /// Hashing "Hello, world!" should match the known SHA-1 value.
    #[test]
    fn test_sha1_new() {
        let data = "Hello, world!".as_bytes();
        let sha1 = ObjectHash::new(data);
        assert_eq!(sha1.to_string(), "943a702d06f34599aee1f8da8ef9f7296031d699");
    }

    /// `from_type_and_data` must reproduce `git hash-object` output.
    #[test]
    fn test_blob_object_hash() {
        // echo -n "what is up, doc?" | git hash-object --stdin
        let hash = ObjectHash::from_type_and_data(ObjectType::Blob, b"what is up, doc?");
        assert_eq!(hash.to_string(), "bd9dbf5aae1a3862dd1526723246b20206e5fc37");
    }

    /// Construct a hash from raw bytes and render it back to hex.
    #[test]
    fn test_from_bytes() {
        let sha1 = ObjectHash::from_bytes(&[
            0x8a, 0xb6, 0x86, 0xea, 0xfe, 0xb1, 0xf4, 0x47, 0x02, 0x73, 0x8c, 0x8b, 0x0f, 0x24,
            0xf2, 0x56, 0x7c, 0x36, 0xda, 0x6d,
        ])
        .unwrap();
        assert_eq!(sha1.to_string(), "8ab686eafeb1f44702738c8b0f24f2567c36da6d");
    }

    /// Wrong byte length is rejected.
    #[test]
    fn test_from_bytes_wrong_length() {
        assert!(ObjectHash::from_bytes(&[0u8; 19]).is_err());
        assert!(ObjectHash::from_bytes(&[0u8; 32]).is_err());
    }

    /// Read a hash from a stream.
    #[test]
    fn test_from_stream() {
        let source = [
            0x8a, 0xb6, 0x86, 0xea, 0xfe, 0xb1, 0xf4, 0x47, 0x02, 0x73, 0x8c, 0x8b, 0x0f, 0x24,
            0xf2, 0x56, 0x7c, 0x36, 0xda, 0x6d,
        ];
        let mut reader = std::io::Cursor::new(source);
        let sha1 = ObjectHash::from_stream(&mut reader).unwrap();
        assert_eq!(sha1.to_string(), "8ab686eafeb1f44702738c8b0f24f2567c36da6d");
    }

    /// Hex parse round-trips, and bad lengths are rejected.
    #[test]
    fn test_from_str() {
        let hash_str = "8ab686eafeb1f44702738c8b0f24f2567c36da6d";
        let hash = ObjectHash::from_str(hash_str).unwrap();
        assert_eq!(hash.to_string(), hash_str);

        assert!(ObjectHash::from_str("8ab686").is_err());
        assert!(ObjectHash::from_str(&"z".repeat(40)).is_err());
    }

    /// The zero constant renders as 40 zeros and reports itself as zero.
    #[test]
    fn test_zero() {
        assert_eq!(
            ObjectHash::ZERO.to_string(),
            "0000000000000000000000000000000000000000"
        );
        assert!(ObjectHash::ZERO.is_zero());
        assert!(!ObjectHash::new(b"x").is_zero());
        assert_eq!(ObjectHash::default(), ObjectHash::ZERO);
    }
}
