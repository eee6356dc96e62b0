//! Lightweight representation of a decoded Git object coming out of a pack
//! stream, with helpers to convert to/from strongly typed objects.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::object::{
        ObjectTrait, blob::Blob, commit::Commit, tag::Tag, tree::Tree, types::ObjectType,
    },
};

/// A fully resolved object: type, raw content bytes, and identity. This is
/// what the object store holds and what pack encode/decode exchange.
#[derive(Eq, Clone, Debug, Serialize, Deserialize)]
pub struct Entry {
    pub obj_type: ObjectType,
    pub data: Vec<u8>,
    pub hash: ObjectHash,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.obj_type == other.obj_type && self.hash == other.hash
    }
}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.obj_type.hash(state);
        self.hash.hash(state);
    }
}

impl Entry {
    /// Reparse this entry as a typed commit.
    pub fn to_commit(&self) -> Result<Commit, GitError> {
        if self.obj_type != ObjectType::Commit {
            return Err(GitError::InvalidCommitObject(format!(
                "entry {} is a {}",
                self.hash, self.obj_type
            )));
        }
        Commit::from_bytes(&self.data, self.hash)
    }

    /// Reparse this entry as a typed tree.
    pub fn to_tree(&self) -> Result<Tree, GitError> {
        if self.obj_type != ObjectType::Tree {
            return Err(GitError::InvalidTreeObject(format!(
                "entry {} is a {}",
                self.hash, self.obj_type
            )));
        }
        Tree::from_bytes(&self.data, self.hash)
    }

    /// Reparse this entry as a typed blob.
    pub fn to_blob(&self) -> Result<Blob, GitError> {
        if self.obj_type != ObjectType::Blob {
            return Err(GitError::NotABlob(self.hash.to_string()));
        }
        Blob::from_bytes(&self.data, self.hash)
    }

    /// Reparse this entry as a typed tag.
    pub fn to_tag(&self) -> Result<Tag, GitError> {
        if self.obj_type != ObjectType::Tag {
            return Err(GitError::InvalidTagObject(format!(
                "entry {} is a {}",
                self.hash, self.obj_type
            )));
        }
        Tag::from_bytes(&self.data, self.hash)
    }
}

impl From<Blob> for Entry {
    fn from(value: Blob) -> Self {
        Self {
            obj_type: ObjectType::Blob,
            data: value.data,
            hash: value.id,
        }
    }
}

impl From<Commit> for Entry {
    fn from(value: Commit) -> Self {
        Self {
            obj_type: ObjectType::Commit,
            data: value.to_data().unwrap(),
            hash: value.id,
        }
    }
}

impl From<Tree> for Entry {
    fn from(value: Tree) -> Self {
        Self {
            obj_type: ObjectType::Tree,
            data: value.to_data().unwrap(),
            hash: value.id,
        }
    }
}

impl From<Tag> for Entry {
    fn from(value: Tag) -> Self {
        Self {
            obj_type: ObjectType::Tag,
            data: value.to_data().unwrap(),
            hash: value.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Conversions from typed objects preserve identity and round-trip back.
    #[test]
    fn test_conversions() {
        let blob = Blob::from_content("hello");
        let entry = Entry::from(blob.clone());
        assert_eq!(entry.obj_type, ObjectType::Blob);
        assert_eq!(entry.hash, blob.id);
        assert_eq!(entry.to_blob().unwrap(), blob);
        assert!(entry.to_commit().is_err());
        assert!(entry.to_tree().is_err());
    }

    /// Entries compare by (type, hash), not content bytes.
    #[test]
    fn test_equality() {
        let a = Entry::from(Blob::from_content("same"));
        let b = Entry::from(Blob::from_content("same"));
        assert_eq!(a, b);
    }
}
