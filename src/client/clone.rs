//! The clone pipeline: materialize one commit's tree into a target
//! directory. Blob content is fetched in batches with bounded parallelism,
//! blobs the server omitted are recovered individually, and per-file
//! callbacks report progress without coupling the pipeline to any UI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use path_absolutize::Absolutize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::{
    client::GitClient,
    client::read::FlatTreeEntry,
    errors::GitError,
    hash::ObjectHash,
    internal::object::{blob::Blob, tree::TreeItemMode},
    protocol::fetch::FetchRequest,
};

/// Invoked after each file write completes, with the entry path and size.
pub type FileWrittenCallback = Arc<dyn Fn(&str, u64) + Send + Sync>;
/// Invoked when a file could not be produced; the clone continues.
pub type FileFailedCallback = Arc<dyn Fn(&str, &GitError) + Send + Sync>;

/// Options for [`GitClient::clone_commit`].
#[derive(Clone)]
pub struct CloneOptions {
    pub target_path: PathBuf,
    pub commit: ObjectHash,
    /// POSIX-style globs (`**`, `*`, `?`, character classes). An entry is
    /// kept iff the include list is empty or any include matches, and no
    /// exclude matches.
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    /// Blobs per fetch request; 0 fetches everything in one pass.
    pub batch_size: usize,
    /// Concurrent batch fetches; 1 is sequential.
    pub concurrency: usize,
    pub on_file_written: Option<FileWrittenCallback>,
    pub on_file_failed: Option<FileFailedCallback>,
}

impl CloneOptions {
    pub fn new(target_path: impl Into<PathBuf>, commit: ObjectHash) -> Self {
        Self {
            target_path: target_path.into(),
            commit,
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            batch_size: 0,
            concurrency: 1,
            on_file_written: None,
            on_file_failed: None,
        }
    }

    pub fn include(mut self, globs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.include_globs = globs.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude(mut self, globs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude_globs = globs.into_iter().map(Into::into).collect();
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn on_file_written(mut self, callback: FileWrittenCallback) -> Self {
        self.on_file_written = Some(callback);
        self
    }

    pub fn on_file_failed(mut self, callback: FileFailedCallback) -> Self {
        self.on_file_failed = Some(callback);
        self
    }
}

/// Outcome of a clone.
#[derive(Debug, Clone)]
pub struct CloneResult {
    pub path: PathBuf,
    pub commit: ObjectHash,
    /// File entries in the commit's tree.
    pub total_files: usize,
    /// Files that survived the glob filter and were written.
    pub filtered_files: usize,
    /// Bytes written for those files.
    pub filtered_bytes: u64,
}

impl GitClient {
    /// Clone one commit's tree into `target_path`.
    ///
    /// File writes are unordered with respect to each other; each callback
    /// fires exactly once per file after its write completes. The clone
    /// fails only for tree-level problems or unsafe paths; individual blob
    /// failures are reported through `on_file_failed` and skipped.
    pub async fn clone_commit(&self, options: CloneOptions) -> Result<CloneResult, GitError> {
        let flat = self.get_flat_tree(options.commit).await?;

        let mut files = Vec::new();
        for entry in flat.entries {
            match entry.mode {
                TreeItemMode::Commit => {
                    tracing::warn!(path = %entry.path, "skipping submodule entry");
                }
                TreeItemMode::Tree => {}
                _ => files.push(entry),
            }
        }
        let total_files = files.len();

        let include = build_glob_set(&options.include_globs)?;
        let exclude = build_glob_set(&options.exclude_globs)?;
        let kept: Vec<FlatTreeEntry> = files
            .into_iter()
            .filter(|entry| {
                let included =
                    options.include_globs.is_empty() || include.is_match(&entry.path);
                included && !exclude.is_match(&entry.path)
            })
            .collect();

        // Validate every destination before touching the filesystem.
        let target = options.target_path.clone();
        for entry in &kept {
            sandboxed_path(&target, &entry.path)?;
        }
        tokio::fs::create_dir_all(&target).await?;

        let batches: Vec<Vec<FlatTreeEntry>> = if options.batch_size == 0 {
            vec![kept]
        } else {
            kept.chunks(options.batch_size).map(|c| c.to_vec()).collect()
        };

        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for batch in batches {
            if batch.is_empty() {
                continue;
            }
            let client = self.clone();
            let semaphore = semaphore.clone();
            let target = target.clone();
            let on_written = options.on_file_written.clone();
            let on_failed = options.on_file_failed.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                client
                    .process_batch(batch, &target, on_written, on_failed)
                    .await
            });
        }

        let mut filtered_files = 0;
        let mut filtered_bytes = 0u64;
        while let Some(joined) = tasks.join_next().await {
            let (written, bytes) = joined
                .map_err(|e| GitError::IOError(std::io::Error::other(e)))??;
            filtered_files += written;
            filtered_bytes += bytes;
        }

        Ok(CloneResult {
            path: target,
            commit: options.commit,
            total_files,
            filtered_files,
            filtered_bytes,
        })
    }

    /// Fetch one batch of blobs and write its files. Returns the number of
    /// files written and their byte total.
    async fn process_batch(
        &self,
        batch: Vec<FlatTreeEntry>,
        target: &Path,
        on_written: Option<FileWrittenCallback>,
        on_failed: Option<FileFailedCallback>,
    ) -> Result<(usize, u64), GitError> {
        // One fetch with many wants; dedupe shared content.
        let mut wants: Vec<ObjectHash> = batch
            .iter()
            .map(|e| e.hash)
            .filter(|h| self.storage.get(h).is_none())
            .collect();
        wants.sort();
        wants.dedup();
        if !wants.is_empty() {
            self.fetch_into_store(FetchRequest::objects(wants)).await?;
        }

        let mut written = 0;
        let mut bytes = 0u64;
        for entry in &batch {
            let blob = match self.blob_with_recovery(entry).await {
                Ok(blob) => blob,
                Err(err) => {
                    tracing::warn!(path = %entry.path, error = %err, "file skipped");
                    if let Some(cb) = &on_failed {
                        cb(&entry.path, &err);
                    }
                    continue;
                }
            };
            match write_entry(target, entry, &blob).await {
                Ok(size) => {
                    written += 1;
                    bytes += size;
                    if let Some(cb) = &on_written {
                        cb(&entry.path, size);
                    }
                }
                Err(err @ GitError::UnsafePath(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(path = %entry.path, error = %err, "write failed");
                    if let Some(cb) = &on_failed {
                        cb(&entry.path, &err);
                    }
                }
            }
        }
        Ok((written, bytes))
    }

    /// Load a blob from the store, falling back to an individual fetch for
    /// blobs the server left out of the batched response.
    async fn blob_with_recovery(&self, entry: &FlatTreeEntry) -> Result<Blob, GitError> {
        if let Some(stored) = self.storage.get(&entry.hash) {
            return stored.to_blob();
        }
        tracing::debug!(path = %entry.path, hash = %entry.hash, "batched fetch omitted blob, retrying individually");
        self.get_blob(entry.hash).await
    }
}

fn build_glob_set(globs: &[String]) -> Result<GlobSet, GitError> {
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        // literal_separator gives POSIX semantics: `*` stays within one
        // path component and `**` spans directories.
        let compiled = GlobBuilder::new(glob)
            .literal_separator(true)
            .build()
            .map_err(|e| GitError::parse(format!("invalid glob `{glob}`: {e}"), glob.as_bytes()))?;
        builder.add(compiled);
    }
    builder
        .build()
        .map_err(|e| GitError::parse(format!("invalid glob set: {e}"), b""))
}

/// Join `rel` under `target`, refusing any result that escapes the target
/// after lexical normalization.
fn sandboxed_path(target: &Path, rel: &str) -> Result<PathBuf, GitError> {
    if Path::new(rel).is_absolute() {
        return Err(GitError::UnsafePath(rel.to_string()));
    }
    let target_abs = target
        .absolutize()
        .map_err(GitError::IOError)?
        .into_owned();
    let joined = target_abs.join(rel);
    let resolved = joined.absolutize().map_err(GitError::IOError)?.into_owned();
    if !resolved.starts_with(&target_abs) {
        return Err(GitError::UnsafePath(rel.to_string()));
    }
    Ok(resolved)
}

/// Write one entry under `target`: regular file, executable, or symlink.
/// Parent directory creation is idempotent and race-safe.
async fn write_entry(
    target: &Path,
    entry: &FlatTreeEntry,
    blob: &Blob,
) -> Result<u64, GitError> {
    let dest = sandboxed_path(target, &entry.path)?;
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match entry.mode {
        TreeItemMode::Link => {
            write_symlink(&dest, &blob.data).await?;
        }
        _ => {
            tokio::fs::write(&dest, &blob.data).await?;
            if entry.mode == TreeItemMode::BlobExecutable {
                set_executable(&dest).await;
            }
        }
    }
    Ok(blob.data.len() as u64)
}

#[cfg(unix)]
async fn write_symlink(dest: &Path, link_target: &[u8]) -> Result<(), GitError> {
    let link_target = String::from_utf8_lossy(link_target).into_owned();
    // replace a previous link if the clone target is reused
    let _ = tokio::fs::remove_file(dest).await;
    tokio::fs::symlink(link_target, dest).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn write_symlink(dest: &Path, link_target: &[u8]) -> Result<(), GitError> {
    // No symlinks here; materialize the link target text as file content.
    tokio::fs::write(dest, link_target).await?;
    Ok(())
}

#[cfg(unix)]
async fn set_executable(dest: &Path) {
    use std::os::unix::fs::PermissionsExt;
    // filesystems without permission bits just keep the default mode
    let _ = tokio::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o755)).await;
}

#[cfg(not(unix))]
async fn set_executable(_dest: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    /// Include/exclude semantics: kept iff (no includes or any include
    /// matches) and no exclude matches. Matches the glob scenario from the
    /// clone contract.
    #[test]
    fn test_glob_filtering() {
        let include = build_glob_set(&["*.md".to_string(), "docs/**".to_string()]).unwrap();
        let exclude = build_glob_set(&["**/x.md".to_string()]).unwrap();

        let keep = |path: &str| include.is_match(path) && !exclude.is_match(path);
        assert!(keep("README.md"));
        assert!(!keep("src/a.go"), "not included");
        assert!(!keep("src/b.go"), "not included");
        assert!(!keep("docs/x.md"), "excluded by **/x.md");
    }

    /// Escaping paths are refused, nested ones resolve under the target.
    #[test]
    fn test_sandboxed_path() {
        let target = Path::new("/tmp/clone-target");
        assert!(sandboxed_path(target, "src/a.go").is_ok());
        assert!(sandboxed_path(target, "a/../b.txt").is_ok());

        assert!(matches!(
            sandboxed_path(target, "../escape.txt"),
            Err(GitError::UnsafePath(_))
        ));
        assert!(matches!(
            sandboxed_path(target, "a/../../escape.txt"),
            Err(GitError::UnsafePath(_))
        ));
        assert!(matches!(
            sandboxed_path(target, "/etc/passwd"),
            Err(GitError::UnsafePath(_))
        ));
    }

    /// Files and executables land on disk with their content.
    #[tokio::test]
    async fn test_write_entry() {
        let dir = tempfile::tempdir().unwrap();
        let blob = Blob::from_content("#!/bin/sh\necho hi\n");
        let entry = FlatTreeEntry {
            name: "run.sh".to_string(),
            path: "bin/run.sh".to_string(),
            mode: TreeItemMode::BlobExecutable,
            hash: blob.id,
        };

        let size = write_entry(dir.path(), &entry, &blob).await.unwrap();
        assert_eq!(size, blob.data.len() as u64);

        let written = std::fs::read(dir.path().join("bin/run.sh")).unwrap();
        assert_eq!(written, blob.data);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join("bin/run.sh"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o111, 0o111, "executable bits set");
        }
    }

    /// Symlink entries become symlinks pointing at the blob content.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_symlink_entry() {
        let dir = tempfile::tempdir().unwrap();
        let blob = Blob::from_content("target.txt");
        let entry = FlatTreeEntry {
            name: "latest".to_string(),
            path: "latest".to_string(),
            mode: TreeItemMode::Link,
            hash: blob.id,
        };

        write_entry(dir.path(), &entry, &blob).await.unwrap();
        let link = std::fs::read_link(dir.path().join("latest")).unwrap();
        assert_eq!(link, PathBuf::from("target.txt"));
    }
}
