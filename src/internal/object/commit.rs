//! The Commit object records one version of the project: the root tree, the
//! parent commits it was derived from, author/committer identities, and the
//! message.
//!
//! Wire form: header lines `tree`, `parent` (zero or more, in order),
//! `author`, `committer`, then any further headers (`gpgsig` folded across
//! continuation lines, `mergetag`, `encoding`, …) in their original order,
//! a blank line, and the message. Headers beyond the core set are preserved
//! verbatim and in sequence so that parse → serialize is byte-identical and
//! re-hashing yields the original id.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::object::{ObjectTrait, signature::Signature, types::ObjectType},
};

/// A commit in the history DAG. Parents are referenced by hash only; walks
/// follow hashes through the object store rather than owning pointers.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: ObjectHash,
    pub tree_id: ObjectHash,
    pub parent_commit_ids: Vec<ObjectHash>,
    pub author: Signature,
    pub committer: Signature,
    /// Every header after `committer` (`gpgsig`, `mergetag`, `encoding`, …)
    /// with unfolded raw values, in the order it appeared on the wire.
    /// Keeping `gpgsig` in place here is what makes serialization
    /// byte-exact for signed merge commits whose trailers follow it.
    pub additional_headers: Vec<(String, Vec<u8>)>,
    pub message: String,
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "commit: {}", self.id)?;
        writeln!(f, "tree: {}", self.tree_id)?;
        for parent in self.parent_commit_ids.iter() {
            writeln!(f, "parent: {parent}")?;
        }
        writeln!(f, "author {}", self.author)?;
        writeln!(f, "committer {}", self.committer)?;
        writeln!(f)?;
        writeln!(f, "{}", self.message)
    }
}

impl Commit {
    pub fn new(
        author: Signature,
        committer: Signature,
        tree_id: ObjectHash,
        parent_commit_ids: Vec<ObjectHash>,
        message: &str,
    ) -> Commit {
        let mut commit = Commit {
            id: ObjectHash::ZERO,
            tree_id,
            parent_commit_ids,
            author,
            committer,
            additional_headers: Vec::new(),
            message: message.to_string(),
        };
        let hash = ObjectHash::from_type_and_data(ObjectType::Commit, &commit.to_data().unwrap());
        commit.id = hash;
        commit
    }

    /// PGP signature text with continuation folding removed; `None` for
    /// unsigned commits.
    pub fn gpg_signature(&self) -> Option<String> {
        self.additional_headers
            .iter()
            .find(|(name, _)| name == "gpgsig")
            .map(|(_, value)| String::from_utf8_lossy(value).into_owned())
    }

    /// First non-empty line of the message, used for log-style summaries.
    pub fn summary(&self) -> &str {
        self.message
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
    }
}

/// Split raw commit bytes into logical header lines (with continuation lines
/// unfolded into `\n`-joined values) and the message following the blank line.
fn split_headers(data: &[u8]) -> (Vec<(String, Vec<u8>)>, String) {
    let mut headers = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        if data[pos] == b'\n' {
            pos += 1; // blank line: message begins
            break;
        }
        let line_end = memchr::memchr(b'\n', &data[pos..])
            .map(|i| pos + i)
            .unwrap_or(data.len());
        let line = &data[pos..line_end];
        pos = (line_end + 1).min(data.len());

        let space = memchr::memchr(b' ', line).unwrap_or(line.len());
        let name = String::from_utf8_lossy(&line[..space]).into_owned();
        let mut value = line[(space + 1).min(line.len())..].to_vec();

        // A leading space marks a continuation of the previous value.
        while pos < data.len() && data[pos] == b' ' {
            let cont_end = memchr::memchr(b'\n', &data[pos..])
                .map(|i| pos + i)
                .unwrap_or(data.len());
            value.push(b'\n');
            value.extend_from_slice(&data[pos + 1..cont_end]);
            pos = (cont_end + 1).min(data.len());
        }

        headers.push((name, value));
    }

    let message = String::from_utf8_lossy(&data[pos..]).into_owned();
    (headers, message)
}

/// Write one header, folding embedded newlines back into continuation lines.
fn push_header(data: &mut Vec<u8>, name: &str, value: &[u8]) {
    data.extend(name.as_bytes());
    data.push(b' ');
    for (i, part) in value.split(|&b| b == b'\n').enumerate() {
        if i > 0 {
            data.push(b'\n');
            data.push(b' ');
        }
        data.extend(part);
    }
    data.push(b'\n');
}

impl ObjectTrait for Commit {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError> {
        let (headers, message) = split_headers(data);

        let mut tree_id = None;
        let mut parent_commit_ids = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut additional_headers = Vec::new();

        for (name, value) in headers {
            match name.as_str() {
                "tree" => {
                    let hex = String::from_utf8_lossy(&value);
                    tree_id = Some(ObjectHash::from_str(hex.trim())?);
                }
                "parent" => {
                    let hex = String::from_utf8_lossy(&value);
                    parent_commit_ids.push(ObjectHash::from_str(hex.trim())?);
                }
                "author" => {
                    let mut line = b"author ".to_vec();
                    line.extend(&value);
                    author = Some(Signature::from_data(line)?);
                }
                "committer" => {
                    let mut line = b"committer ".to_vec();
                    line.extend(&value);
                    committer = Some(Signature::from_data(line)?);
                }
                // gpgsig and friends stay in sequence so serialization
                // reproduces the wire bytes exactly.
                _ => additional_headers.push((name, value)),
            }
        }

        let tree_id = tree_id
            .ok_or_else(|| GitError::InvalidCommitObject("missing tree header".to_string()))?;
        let author = author
            .ok_or_else(|| GitError::InvalidCommitObject("missing author header".to_string()))?;
        let committer = committer
            .ok_or_else(|| GitError::InvalidCommitObject("missing committer header".to_string()))?;

        Ok(Commit {
            id: hash,
            tree_id,
            parent_commit_ids,
            author,
            committer,
            additional_headers,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    fn get_size(&self) -> usize {
        0
    }

    /// [Git-Internals-Git-Objects](https://git-scm.com/book/en/v2/Git-Internals-Git-Objects)
    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();

        push_header(&mut data, "tree", self.tree_id.to_string().as_bytes());
        for parent in &self.parent_commit_ids {
            push_header(&mut data, "parent", parent.to_string().as_bytes());
        }
        push_header(&mut data, "author", self.author.value().as_bytes());
        push_header(&mut data, "committer", self.committer.value().as_bytes());
        for (name, value) in &self.additional_headers {
            push_header(&mut data, name, value);
        }
        data.push(b'\n');
        data.extend(self.message.as_bytes());

        Ok(data)
    }
}
