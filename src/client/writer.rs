//! The staged writer: an in-memory overlay over one base commit's tree that
//! accumulates blob edits, synthesizes the new trees and commit bottom-up,
//! and pushes everything in a single receive-pack request.
//!
//! Lifecycle:
//!
//! ```text
//! Open ──stage…──► Open
//! Open ──build──► Built ──push──► Pushed (terminal)
//! Open|Built ──discard──► Discarded (terminal)
//! ```
//!
//! One writer is strictly sequential; it is not safe to mutate from
//! multiple tasks concurrently.

use std::collections::{BTreeMap, HashSet};

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    client::GitClient,
    errors::GitError,
    hash::ObjectHash,
    internal::object::{
        blob::Blob,
        commit::Commit,
        signature::Signature,
        tree::{Tree, TreeItem, TreeItemMode},
    },
    internal::pack::{encode::encode_pack, entry::Entry},
    protocol::{pkt_line, refs::GitRef},
};

/// Metadata for the synthesized commit.
#[derive(Debug, Clone)]
pub struct CommitMeta {
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

/// Result of a successful push.
#[derive(Debug, Clone)]
pub struct PushResult {
    pub refname: String,
    pub commit: Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Built,
    Pushed,
    Discarded,
}

/// One entry in a loaded overlay directory.
#[derive(Debug, Clone)]
enum OverlayItem {
    /// Untouched entry carried over from the base tree. Subdirectories that
    /// are themselves loaded in the overlay get their hash recomputed at
    /// build time.
    Existing(TreeItem),
    /// A staged blob with new content.
    Staged { mode: TreeItemMode, content: Vec<u8> },
}

/// Staged edits on top of one base commit. Created by
/// [`GitClient::staged_writer`].
pub struct StagedWriter {
    client: GitClient,
    refname: String,
    base_commit: Commit,
    /// Loaded directories: dir path (`""` = root) → name → item.
    overlay: BTreeMap<String, BTreeMap<String, OverlayItem>>,
    state: WriterState,
    built: Option<(Commit, Vec<Entry>)>,
    result: Option<PushResult>,
}

impl GitClient {
    /// Open a staged writer at the current tip of `refname`.
    pub async fn staged_writer(&self, refname: &str) -> Result<StagedWriter, GitError> {
        let tip = self.get_ref(refname).await?;
        let base_commit = self.get_commit(tip.hash).await?;
        Ok(StagedWriter {
            client: self.clone(),
            refname: refname.to_string(),
            base_commit,
            overlay: BTreeMap::new(),
            state: WriterState::Open,
            built: None,
            result: None,
        })
    }
}

impl StagedWriter {
    /// The commit this writer was opened against.
    pub fn base_commit(&self) -> &Commit {
        &self.base_commit
    }

    /// The ref this writer was opened from.
    pub fn refname(&self) -> &str {
        &self.refname
    }

    /// Stage a new blob at `path`, creating parent trees as needed.
    pub async fn create_blob(&mut self, path: &str, content: &[u8]) -> Result<(), GitError> {
        self.ensure_open()?;
        let (dir, name) = split_path(path)?;
        self.load_dir_chain(&dir).await?;
        let entries = self.overlay.get_mut(&dir).expect("chain just loaded");
        if entries.contains_key(&name) {
            return Err(GitError::PathExists(path.to_string()));
        }
        entries.insert(
            name,
            OverlayItem::Staged {
                mode: TreeItemMode::Blob,
                content: content.to_vec(),
            },
        );
        Ok(())
    }

    /// Replace the content of an existing blob.
    pub async fn update_blob(&mut self, path: &str, content: &[u8]) -> Result<(), GitError> {
        self.ensure_open()?;
        let (dir, name) = split_path(path)?;
        self.load_dir_chain(&dir).await?;
        let entries = self.overlay.get_mut(&dir).expect("chain just loaded");
        let mode = match entries.get(&name) {
            Some(OverlayItem::Staged { mode, .. }) => *mode,
            Some(OverlayItem::Existing(item)) if item.mode.is_blob() => item.mode,
            Some(_) => return Err(GitError::NotABlob(path.to_string())),
            None => return Err(GitError::PathNotFound(path.to_string())),
        };
        entries.insert(
            name,
            OverlayItem::Staged {
                mode,
                content: content.to_vec(),
            },
        );
        Ok(())
    }

    /// Remove a blob; now-empty parent trees are pruned at build time.
    pub async fn delete_blob(&mut self, path: &str) -> Result<(), GitError> {
        self.ensure_open()?;
        let (dir, name) = split_path(path)?;
        self.load_dir_chain(&dir).await?;
        let entries = self.overlay.get_mut(&dir).expect("chain just loaded");
        match entries.get(&name) {
            Some(OverlayItem::Staged { .. }) => {}
            Some(OverlayItem::Existing(item)) if item.mode.is_blob() => {}
            Some(_) => return Err(GitError::NotABlob(path.to_string())),
            None => return Err(GitError::PathNotFound(path.to_string())),
        }
        entries.remove(&name);
        Ok(())
    }

    /// Atomically rename a blob within the staged overlay.
    pub async fn move_blob(&mut self, from: &str, to: &str) -> Result<(), GitError> {
        self.ensure_open()?;
        let content = self.read_blob_content(from).await?;
        self.create_blob(to, &content).await?;
        self.delete_blob(from).await?;
        Ok(())
    }

    /// Synthesize the new trees and commit from the overlay. Transitions to
    /// Built and returns the commit that `push` will send.
    pub async fn build(&mut self, meta: CommitMeta) -> Result<Commit, GitError> {
        self.ensure_open()?;

        let mut pending: Vec<Entry> = Vec::new();
        // Rebuild deepest directories first so parents see child hashes.
        let mut dirs: Vec<String> = self.overlay.keys().cloned().collect();
        dirs.sort_by_key(|d| std::cmp::Reverse(d.matches('/').count() + usize::from(!d.is_empty())));

        // dir path → rebuilt hash (None = pruned empty tree)
        let mut rebuilt: BTreeMap<String, Option<ObjectHash>> = BTreeMap::new();

        for dir in dirs {
            let mut items = Vec::new();
            for (name, item) in &self.overlay[&dir] {
                match item {
                    OverlayItem::Staged { mode, content } => {
                        let blob = Blob::from_content_bytes(content.clone());
                        items.push(TreeItem::new(*mode, blob.id, name.clone()));
                        pending.push(Entry::from(blob));
                    }
                    OverlayItem::Existing(tree_item) => {
                        let child_dir = join_path(&dir, name);
                        if tree_item.mode.is_tree() {
                            if let Some(hash) = rebuilt.get(&child_dir) {
                                // child was rebuilt (or pruned away)
                                if let Some(hash) = hash {
                                    items.push(TreeItem::new(
                                        TreeItemMode::Tree,
                                        *hash,
                                        name.clone(),
                                    ));
                                }
                                continue;
                            }
                        }
                        items.push(tree_item.clone());
                    }
                }
            }

            if items.is_empty() && !dir.is_empty() {
                rebuilt.insert(dir, None);
                continue;
            }
            let tree = Tree::from_tree_items(items)?;
            pending.push(Entry::from(tree.clone()));
            rebuilt.insert(dir, Some(tree.id));
        }

        let root = match rebuilt.get("") {
            Some(Some(hash)) => *hash,
            // nothing staged at all: the base tree is unchanged
            _ => self.base_commit.tree_id,
        };

        let commit = Commit::new(
            meta.author,
            meta.committer,
            root,
            vec![self.base_commit.id],
            &meta.message,
        );
        pending.push(Entry::from(commit.clone()));

        // A pack must not carry the same object twice.
        let mut seen = HashSet::new();
        pending.retain(|e| seen.insert(e.hash));

        self.built = Some((commit.clone(), pending));
        self.state = WriterState::Built;
        Ok(commit)
    }

    /// Push the staged commit to `refname`.
    ///
    /// A writer still in the Open state is built implicitly from `meta`;
    /// after an explicit [`StagedWriter::build`] the already-built commit is
    /// pushed and `meta` is not consulted. The ref's current hash is
    /// re-fetched and must still equal the base commit, otherwise the push
    /// fails with `RefChanged` and no state is modified. A second push on a
    /// Pushed writer is a no-op returning the same result.
    pub async fn push(&mut self, refname: &str, meta: CommitMeta) -> Result<PushResult, GitError> {
        match self.state {
            WriterState::Pushed => {
                return Ok(self.result.clone().expect("pushed writers have a result"));
            }
            WriterState::Discarded => return Err(GitError::WriterClosed),
            // Open implicitly builds first.
            WriterState::Open => {
                self.build(meta).await?;
            }
            WriterState::Built => {}
        }
        let (commit, pending) = self.built.clone().expect("built state");

        // Precondition: the remote tip must still be our base commit. A ref
        // that vanished since the writer was opened is also a concurrent
        // change, not an invitation to recreate it.
        let old = match self.client.get_ref(refname).await {
            Ok(GitRef { hash, .. }) if hash == self.base_commit.id => hash,
            Ok(GitRef { hash, .. }) => {
                return Err(GitError::RefChanged {
                    refname: refname.to_string(),
                    expected: self.base_commit.id.to_string(),
                    actual: hash.to_string(),
                });
            }
            Err(GitError::RefNotFound(_)) => {
                return Err(GitError::RefChanged {
                    refname: refname.to_string(),
                    expected: self.base_commit.id.to_string(),
                    actual: "deleted".to_string(),
                });
            }
            Err(err) => return Err(err),
        };

        let (pack, _) = encode_pack(&pending)?;
        let body = build_push_body(old, commit.id, refname, self.client.user_agent.as_str(), &pack)?;
        let response = self.client.transport.receive_pack(body).await?;
        crate::protocol::refs::parse_receive_pack_response(response, refname)?;

        // Only now are the synthesized objects part of the remote history.
        self.client.storage.add(pending);
        self.state = WriterState::Pushed;
        let result = PushResult {
            refname: refname.to_string(),
            commit,
        };
        self.result = Some(result.clone());
        Ok(result)
    }

    /// Abandon the staged edits. Terminal.
    pub fn discard(&mut self) -> Result<(), GitError> {
        match self.state {
            WriterState::Open | WriterState::Built => {
                self.state = WriterState::Discarded;
                self.overlay.clear();
                self.built = None;
                Ok(())
            }
            _ => Err(GitError::WriterClosed),
        }
    }

    fn ensure_open(&self) -> Result<(), GitError> {
        match self.state {
            WriterState::Open => Ok(()),
            _ => Err(GitError::WriterClosed),
        }
    }

    /// Read a blob through the overlay (staged content wins over the base).
    async fn read_blob_content(&mut self, path: &str) -> Result<Vec<u8>, GitError> {
        let (dir, name) = split_path(path)?;
        self.load_dir_chain(&dir).await?;
        match self.overlay[&dir].get(&name) {
            Some(OverlayItem::Staged { content, .. }) => Ok(content.clone()),
            Some(OverlayItem::Existing(item)) if item.mode.is_blob() => {
                Ok(self.client.get_blob(item.id).await?.data)
            }
            Some(_) => Err(GitError::NotABlob(path.to_string())),
            None => Err(GitError::PathNotFound(path.to_string())),
        }
    }

    /// Load every directory from the root to `dir` into the overlay,
    /// creating empty directories (and placeholder parent entries) where the
    /// base tree has none.
    async fn load_dir_chain(&mut self, dir: &str) -> Result<(), GitError> {
        // Root first.
        if !self.overlay.contains_key("") {
            let tree = self.client.get_tree(self.base_commit.tree_id).await?;
            self.overlay.insert(String::new(), to_overlay(tree));
        }

        let mut current = String::new();
        for segment in dir.split('/').filter(|s| !s.is_empty()) {
            let child = join_path(&current, segment);
            if !self.overlay.contains_key(&child) {
                let existing = self
                    .overlay
                    .get(&current)
                    .and_then(|entries| entries.get(segment))
                    .cloned();
                let loaded = match existing {
                    Some(OverlayItem::Existing(item)) if item.mode.is_tree() => {
                        to_overlay(self.client.get_tree(item.id).await?)
                    }
                    Some(_) => return Err(GitError::NotATree(child.clone())),
                    None => {
                        // New directory: placeholder entry in the parent;
                        // its hash is recomputed at build time.
                        self.overlay
                            .get_mut(&current)
                            .expect("parent loaded")
                            .insert(
                                segment.to_string(),
                                OverlayItem::Existing(TreeItem::new(
                                    TreeItemMode::Tree,
                                    ObjectHash::ZERO,
                                    segment.to_string(),
                                )),
                            );
                        BTreeMap::new()
                    }
                };
                self.overlay.insert(child.clone(), loaded);
            }
            current = child;
        }
        Ok(())
    }
}

fn to_overlay(tree: Tree) -> BTreeMap<String, OverlayItem> {
    tree.tree_items
        .into_iter()
        .map(|item| (item.name.clone(), OverlayItem::Existing(item)))
        .collect()
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Split `a/b/c.txt` into (`a/b`, `c.txt`), normalizing duplicate and
/// leading/trailing slashes; rejects empty paths.
fn split_path(path: &str) -> Result<(String, String), GitError> {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.pop() {
        Some(name) => Ok((segments.join("/"), name.to_string())),
        None => Err(GitError::PathNotFound(path.to_string())),
    }
}

/// Assemble the receive-pack body: command pkt-line, flush, the pack bytes
/// verbatim (not pkt-framed), and a final flush.
fn build_push_body(
    old: ObjectHash,
    new: ObjectHash,
    refname: &str,
    agent: &str,
    pack: &[u8],
) -> Result<Bytes, GitError> {
    let mut body = BytesMut::new();
    pkt_line::add_pkt_line_string(
        &mut body,
        &format!(
            "{old} {new} {refname}\0report-status-v2 side-band-64k quiet object-format=sha1 agent={agent}\n"
        ),
    )?;
    body.put(&pkt_line::FLUSH_PKT[..]);
    body.put(pack);
    body.put(&pkt_line::FLUSH_PKT[..]);
    Ok(body.freeze())
}
