//! The Blob object stores raw file content. It carries no metadata of its
//! own; names and modes live in the trees that reference it.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::object::{ObjectTrait, types::ObjectType},
};

/// File content addressed by the SHA-1 of `"blob <len>\0<content>"`.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub id: ObjectHash,
    pub data: Vec<u8>,
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "blob {}", self.id)
    }
}

impl Blob {
    /// Create a blob from string content, computing its hash.
    pub fn from_content(content: &str) -> Blob {
        Self::from_content_bytes(content.as_bytes().to_vec())
    }

    /// Create a blob from raw bytes, computing its hash.
    pub fn from_content_bytes(data: Vec<u8>) -> Blob {
        let id = ObjectHash::from_type_and_data(ObjectType::Blob, &data);
        Blob { id, data }
    }
}

impl ObjectTrait for Blob {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError> {
        Ok(Blob {
            id: hash,
            data: data.to_vec(),
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Blob
    }

    fn get_size(&self) -> usize {
        self.data.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A blob's id must match `git hash-object`.
    #[test]
    fn test_from_content() {
        let blob = Blob::from_content("what is up, doc?");
        assert_eq!(
            blob.id.to_string(),
            "bd9dbf5aae1a3862dd1526723246b20206e5fc37"
        );
        assert_eq!(blob.get_size(), 16);
    }

    /// Parse then serialize returns the original bytes and hash.
    #[test]
    fn test_round_trip() {
        let original = Blob::from_content_bytes(vec![0u8, 159, 146, 150]); // non-UTF-8 is fine
        let parsed = Blob::from_bytes(&original.data, original.id).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.to_data().unwrap(), original.data);
        assert_eq!(parsed.object_hash().unwrap(), original.id);
    }

    /// The empty blob has Git's well-known hash.
    #[test]
    fn test_empty_blob() {
        let blob = Blob::from_content("");
        assert_eq!(
            blob.id.to_string(),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
    }
}
