//! Object model definitions for Git blobs, trees, commits, and tags, plus the
//! trait that lets the pack layer create strongly typed values from raw bytes.
//!
//! Serialization here is byte-deterministic: `to_data` reproduces Git's
//! canonical object bytes so that hashing the result yields the same SHA-1
//! that Git itself would compute.

pub mod blob;
pub mod commit;
pub mod signature;
pub mod tag;
pub mod tree;
pub mod types;

use std::{
    fmt::Display,
    io::{BufRead, Read},
};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::{object::types::ObjectType, zlib::stream::inflate::ReadBoxed},
};

/// **The Object Trait**
/// Defines the common interface for all Git object types: blobs, trees,
/// commits, and tags.
pub trait ObjectTrait: Send + Sync + Display {
    /// Creates a new object from a byte slice.
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError>
    where
        Self: Sized;

    /// Generate a new object from a hashing inflate reader. The `size` hint
    /// is only used to preallocate the content buffer; the hash comes from
    /// the reader's running digest over `"<type> <len>\0" + content`.
    fn from_buf_read<R: BufRead>(read: &mut ReadBoxed<R>, size: usize) -> Result<Self, GitError>
    where
        Self: Sized,
    {
        let mut content: Vec<u8> = Vec::with_capacity(size);
        read.read_to_end(&mut content)?;
        let hash = read.object_hash();
        Self::from_bytes(&content, hash)
    }

    /// Returns the type of the object.
    fn get_type(&self) -> ObjectType;

    fn get_size(&self) -> usize;

    /// Serialize to Git's canonical byte representation (without the
    /// `"<type> <len>\0"` loose-object header).
    fn to_data(&self) -> Result<Vec<u8>, GitError>;

    /// Computes the object hash from serialized data.
    fn object_hash(&self) -> Result<ObjectHash, GitError> {
        let data = self.to_data()?;
        Ok(ObjectHash::from_type_and_data(self.get_type(), &data))
    }
}
