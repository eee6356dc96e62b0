//! Read operations: commits, trees, blobs, tags, path walks, and the
//! flattened full-path listing with its tree-completeness recovery pass.
//!
//! Every getter consults the object store first and falls back to a fetch,
//! so a null store simply means more round trips, never failure.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    client::GitClient,
    errors::GitError,
    hash::ObjectHash,
    internal::object::{
        blob::Blob,
        commit::Commit,
        tag::Tag,
        tree::{Tree, TreeItemMode},
        types::ObjectType,
    },
    internal::pack::entry::Entry,
    protocol::fetch::FetchRequest,
};

/// Batch size for tree-completeness recovery fetches.
const TREE_RECOVERY_BATCH: usize = 50;
/// Recovery rounds before giving up on an incomplete closure.
const TREE_RECOVERY_ROUNDS: usize = 3;

/// One entry of a flattened tree: the entry plus its full slash-delimited
/// path from the root (no leading slash).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatTreeEntry {
    pub name: String,
    pub path: String,
    pub mode: TreeItemMode,
    pub hash: ObjectHash,
}

impl FlatTreeEntry {
    pub fn is_blob(&self) -> bool {
        self.mode.is_blob() || self.mode == TreeItemMode::Link
    }
}

/// All blobs and trees reachable from a root tree, in DFS pre-order with
/// siblings in Git tree order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatTree {
    pub root: ObjectHash,
    pub entries: Vec<FlatTreeEntry>,
}

impl GitClient {
    /// Fetch (or load) a commit by hash.
    pub async fn get_commit(&self, hash: ObjectHash) -> Result<Commit, GitError> {
        self.object(hash, ObjectType::Commit, || FetchRequest::trees_of(hash))
            .await?
            .to_commit()
    }

    /// Fetch (or load) a tree by hash.
    pub async fn get_tree(&self, hash: ObjectHash) -> Result<Tree, GitError> {
        self.object(hash, ObjectType::Tree, || FetchRequest::trees_of(hash))
            .await?
            .to_tree()
    }

    /// Fetch (or load) a blob by hash.
    pub async fn get_blob(&self, hash: ObjectHash) -> Result<Blob, GitError> {
        self.object(hash, ObjectType::Blob, || {
            FetchRequest::objects(vec![hash])
        })
        .await?
        .to_blob()
    }

    /// Fetch (or load) an annotated tag by hash.
    pub async fn get_tag(&self, hash: ObjectHash) -> Result<Tag, GitError> {
        self.object(hash, ObjectType::Tag, || FetchRequest::objects(vec![hash]))
            .await?
            .to_tag()
    }

    /// Walk `path` from the given root tree, requiring every segment to be a
    /// tree. The empty path returns the root itself.
    pub async fn get_tree_by_path(
        &self,
        root_tree: ObjectHash,
        path: &str,
    ) -> Result<Tree, GitError> {
        let mut tree = self.get_tree(root_tree).await?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let item = tree
                .get_item(segment)
                .ok_or_else(|| GitError::PathNotFound(path.to_string()))?;
            if !item.mode.is_tree() {
                return Err(GitError::NotATree(path.to_string()));
            }
            tree = self.get_tree(item.id).await?;
        }
        Ok(tree)
    }

    /// Walk to the blob at `path` under the given root tree.
    pub async fn get_blob_by_path(
        &self,
        root_tree: ObjectHash,
        path: &str,
    ) -> Result<Blob, GitError> {
        let (dir, name) = match path.rsplit_once('/') {
            Some((dir, name)) => (dir, name),
            None => ("", path),
        };
        if name.is_empty() {
            return Err(GitError::PathNotFound(path.to_string()));
        }
        let parent = self.get_tree_by_path(root_tree, dir).await?;
        let item = parent
            .get_item(name)
            .ok_or_else(|| GitError::PathNotFound(path.to_string()))?;
        if item.mode.is_tree() || item.mode == TreeItemMode::Commit {
            return Err(GitError::NotABlob(path.to_string()));
        }
        self.get_blob(item.id).await
    }

    /// Flatten every tree and blob reachable from a commit into full-path
    /// entries.
    ///
    /// The commit's tree closure is fetched blob-less; afterwards a
    /// completeness pass verifies every referenced tree is present and
    /// re-fetches missing ones in batches, up to a bounded number of rounds.
    pub async fn get_flat_tree(&self, commit: ObjectHash) -> Result<FlatTree, GitError> {
        let commit = self.get_commit(commit).await?;
        self.complete_tree_closure(commit.tree_id).await?;

        let mut entries = Vec::new();
        self.flatten(commit.tree_id, "", &mut entries)?;
        Ok(FlatTree {
            root: commit.tree_id,
            entries,
        })
    }

    /// Ensure the whole tree closure under `root` is in the store.
    async fn complete_tree_closure(&self, root: ObjectHash) -> Result<(), GitError> {
        for round in 0..=TREE_RECOVERY_ROUNDS {
            let missing = self.missing_trees(root)?;
            if missing.is_empty() {
                return Ok(());
            }
            if round == TREE_RECOVERY_ROUNDS {
                return Err(GitError::IncompleteTree {
                    rounds: TREE_RECOVERY_ROUNDS,
                    missing: missing.len(),
                });
            }
            tracing::debug!(
                missing = missing.len(),
                round = round + 1,
                "re-fetching missing trees"
            );
            for chunk in missing.chunks(TREE_RECOVERY_BATCH) {
                let request = FetchRequest {
                    wants: chunk.to_vec(),
                    filter: Some(crate::protocol::fetch::BlobFilter::None),
                    no_progress: true,
                    ..Default::default()
                };
                self.fetch_into_store(request).await?;
            }
        }
        unreachable!("loop returns or errors before rounds are exhausted")
    }

    /// Tree hashes referenced from `root` that the store does not hold.
    fn missing_trees(&self, root: ObjectHash) -> Result<Vec<ObjectHash>, GitError> {
        let mut missing = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![root];

        while let Some(hash) = stack.pop() {
            if !visited.insert(hash) {
                continue;
            }
            let Some(entry) = self.storage.get(&hash) else {
                missing.push(hash);
                continue;
            };
            for item in entry.to_tree()?.tree_items {
                if item.mode.is_tree() {
                    stack.push(item.id);
                }
            }
        }
        Ok(missing)
    }

    /// DFS pre-order flatten; assumes the closure is complete in the store.
    fn flatten(
        &self,
        tree: ObjectHash,
        prefix: &str,
        out: &mut Vec<FlatTreeEntry>,
    ) -> Result<(), GitError> {
        let tree = self
            .storage
            .get(&tree)
            .ok_or_else(|| GitError::ObjectNotFound(tree.to_string()))?
            .to_tree()?;

        for item in tree.tree_items {
            let path = if prefix.is_empty() {
                item.name.clone()
            } else {
                format!("{prefix}/{}", item.name)
            };
            out.push(FlatTreeEntry {
                name: item.name.clone(),
                path: path.clone(),
                mode: item.mode,
                hash: item.id,
            });
            if item.mode.is_tree() {
                self.flatten(item.id, &path, out)?;
            }
        }
        Ok(())
    }

    /// Store-first object lookup with a fetch fallback described by
    /// `request`.
    async fn object<F>(
        &self,
        hash: ObjectHash,
        expected: ObjectType,
        request: F,
    ) -> Result<Entry, GitError>
    where
        F: FnOnce() -> FetchRequest,
    {
        if let Some(entry) = self.storage.get(&hash) {
            return Ok(entry);
        }
        self.fetch_into_store(request()).await?;
        self.storage.get(&hash).ok_or_else(|| {
            GitError::ObjectNotFound(format!("{expected} {hash} absent after fetch"))
        })
    }
}
