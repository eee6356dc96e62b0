//! The Tree object represents one directory level: an ordered list of
//! entries mapping names to blobs, subtrees, symlinks, or gitlinks.
//!
//! Serialization follows Git's canonical form exactly: for each entry
//! `<octal mode> <name>\0<20-byte hash>` with no separators between entries,
//! and entries sorted byte-wise with an implicit trailing `/` on directory
//! names. Two trees with the same logical entries therefore serialize
//! identically regardless of insertion order.

use std::cmp::Ordering;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::object::{ObjectTrait, types::ObjectType},
};

/// Recognized entry modes. Git stores the mode as ASCII octal on the wire;
/// parsers accept a leading zero on `040000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeItemMode {
    Blob,
    BlobExecutable,
    Link,
    Tree,
    Commit,
}

impl Display for TreeItemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            TreeItemMode::Blob => "100644",
            TreeItemMode::BlobExecutable => "100755",
            TreeItemMode::Link => "120000",
            TreeItemMode::Tree => "40000",
            TreeItemMode::Commit => "160000",
        })
    }
}

impl TreeItemMode {
    /// Parse the ASCII octal mode field.
    pub fn from_bytes(mode: &[u8]) -> Result<TreeItemMode, GitError> {
        Ok(match mode {
            b"100644" | b"100664" => TreeItemMode::Blob,
            b"100755" => TreeItemMode::BlobExecutable,
            b"120000" => TreeItemMode::Link,
            b"40000" | b"040000" => TreeItemMode::Tree,
            b"160000" => TreeItemMode::Commit,
            _ => {
                return Err(GitError::InvalidTreeObject(format!(
                    "unknown entry mode: {}",
                    String::from_utf8_lossy(mode)
                )));
            }
        })
    }

    /// The unix permission bits a clone should apply for this entry.
    pub fn unix_permissions(&self) -> u32 {
        match self {
            TreeItemMode::BlobExecutable => 0o755,
            _ => 0o644,
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, TreeItemMode::Tree)
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, TreeItemMode::Blob | TreeItemMode::BlobExecutable)
    }
}

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeItem {
    pub mode: TreeItemMode,
    pub id: ObjectHash,
    pub name: String,
}

impl TreeItem {
    pub fn new(mode: TreeItemMode, id: ObjectHash, name: String) -> TreeItem {
        TreeItem { mode, id, name }
    }

    /// The key Git sorts entries by: directory names compare as `name/`.
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.as_bytes().to_vec();
        if self.mode.is_tree() {
            key.push(b'/');
        }
        key
    }
}

impl Display for TreeItem {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {} {}", self.mode, self.id, self.name)
    }
}

/// A full directory listing, hashed over its canonical serialization.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub id: ObjectHash,
    pub tree_items: Vec<TreeItem>,
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tree {}", self.id)?;
        for item in &self.tree_items {
            writeln!(f, "{item}")?;
        }
        Ok(())
    }
}

impl Tree {
    /// Build a tree from entries. Entries are sorted into Git's canonical
    /// order before hashing, so insertion order does not matter. An empty
    /// entry list is allowed: the empty tree is a valid object that staged
    /// commits may reference.
    pub fn from_tree_items(mut tree_items: Vec<TreeItem>) -> Result<Tree, GitError> {
        tree_items.sort_by(|a, b| canonical_cmp(a, b));
        let mut tree = Tree {
            id: ObjectHash::ZERO,
            tree_items,
        };
        tree.id = tree.object_hash()?;
        Ok(tree)
    }

    /// Find an entry by exact name.
    pub fn get_item(&self, name: &str) -> Option<&TreeItem> {
        self.tree_items.iter().find(|item| item.name == name)
    }
}

fn canonical_cmp(a: &TreeItem, b: &TreeItem) -> Ordering {
    a.sort_key().cmp(&b.sort_key())
}

impl ObjectTrait for Tree {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError> {
        let mut tree_items = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            let space = memchr::memchr(b' ', rest).ok_or_else(|| {
                GitError::InvalidTreeObject("entry missing mode/name separator".to_string())
            })?;
            let mode = TreeItemMode::from_bytes(&rest[..space])?;

            let nul = memchr::memchr(b'\0', &rest[space + 1..]).ok_or_else(|| {
                GitError::InvalidTreeObject("entry missing name terminator".to_string())
            })? + space
                + 1;
            let name = String::from_utf8(rest[space + 1..nul].to_vec())
                .map_err(|e| GitError::InvalidTreeObject(format!("entry name not UTF-8: {e}")))?;

            if rest.len() < nul + 21 {
                return Err(GitError::InvalidTreeObject(format!(
                    "truncated hash for entry `{name}`"
                )));
            }
            let id = ObjectHash::from_bytes(&rest[nul + 1..nul + 21])?;

            tree_items.push(TreeItem { mode, id, name });
            rest = &rest[nul + 21..];
        }

        Ok(Tree {
            id: hash,
            tree_items,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn get_size(&self) -> usize {
        0
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        for item in &self.tree_items {
            data.extend(item.mode.to_string().as_bytes());
            data.push(b' ');
            data.extend(item.name.as_bytes());
            data.push(b'\0');
            data.extend(item.id.as_ref());
        }
        Ok(data)
    }
}
