//! Commit comparison: diff two commits' flat trees by path and count line
//! changes for modified text files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::{
    client::GitClient,
    errors::GitError,
    hash::ObjectHash,
    internal::object::tree::TreeItemMode,
};

/// How a path changed between two commits. Renames are reported as a delete
/// plus an add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Added,
    Modified,
    Deleted,
}

/// One changed path with its line counts. Binary files report 0/0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDiffEntry {
    pub path: String,
    pub status: DiffStatus,
    pub additions: usize,
    pub deletions: usize,
}

impl GitClient {
    /// Compare two commits' file listings, ordered by path.
    ///
    /// Line counts require fetching both blob versions for modified entries;
    /// added and deleted entries count against the single version that
    /// exists.
    pub async fn compare_commits(
        &self,
        base: ObjectHash,
        head: ObjectHash,
    ) -> Result<Vec<CommitDiffEntry>, GitError> {
        let (base_files, head_files) =
            futures::try_join!(self.blob_map(base), self.blob_map(head))?;

        let mut paths: Vec<&String> = base_files.keys().chain(head_files.keys()).collect();
        paths.sort();
        paths.dedup();

        let mut diff = Vec::new();
        for path in paths {
            match (base_files.get(path), head_files.get(path)) {
                (None, Some(&new)) => {
                    let (additions, _) = self.line_counts(None, Some(new)).await?;
                    diff.push(CommitDiffEntry {
                        path: path.clone(),
                        status: DiffStatus::Added,
                        additions,
                        deletions: 0,
                    });
                }
                (Some(&old), None) => {
                    let (_, deletions) = self.line_counts(Some(old), None).await?;
                    diff.push(CommitDiffEntry {
                        path: path.clone(),
                        status: DiffStatus::Deleted,
                        additions: 0,
                        deletions,
                    });
                }
                (Some(&old), Some(&new)) if old != new => {
                    let (additions, deletions) =
                        self.line_counts(Some(old), Some(new)).await?;
                    diff.push(CommitDiffEntry {
                        path: path.clone(),
                        status: DiffStatus::Modified,
                        additions,
                        deletions,
                    });
                }
                _ => {}
            }
        }
        Ok(diff)
    }

    /// path → blob hash for every file entry reachable from a commit.
    async fn blob_map(
        &self,
        commit: ObjectHash,
    ) -> Result<BTreeMap<String, ObjectHash>, GitError> {
        let flat = self.get_flat_tree(commit).await?;
        Ok(flat
            .entries
            .into_iter()
            .filter(|e| e.is_blob() && e.mode != TreeItemMode::Commit)
            .map(|e| (e.path, e.hash))
            .collect())
    }

    /// (additions, deletions) between two optional blob versions.
    async fn line_counts(
        &self,
        old: Option<ObjectHash>,
        new: Option<ObjectHash>,
    ) -> Result<(usize, usize), GitError> {
        let old_data = match old {
            Some(hash) => Some(self.get_blob(hash).await?.data),
            None => None,
        };
        let new_data = match new {
            Some(hash) => Some(self.get_blob(hash).await?.data),
            None => None,
        };

        // Binary content: report no line counts rather than guessing.
        if old_data.as_deref().is_some_and(is_binary)
            || new_data.as_deref().is_some_and(is_binary)
        {
            return Ok((0, 0));
        }

        let old_text = old_data.unwrap_or_default();
        let new_text = new_data.unwrap_or_default();
        Ok(count_changes(&old_text, &new_text))
    }
}

fn is_binary(data: &[u8]) -> bool {
    memchr::memchr(0, data).is_some()
}

fn count_changes(old: &[u8], new: &[u8]) -> (usize, usize) {
    let old = String::from_utf8_lossy(old);
    let new = String::from_utf8_lossy(new);
    let diff = TextDiff::from_lines(old.as_ref(), new.as_ref());
    let mut additions = 0;
    let mut deletions = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Insert => additions += 1,
            similar::ChangeTag::Delete => deletions += 1,
            similar::ChangeTag::Equal => {}
        }
    }
    (additions, deletions)
}
