//! Error types for the nanogit crate.
//!
//! This module defines a unified error enumeration used across pkt-line framing,
//! pack decoding, object parsing, the HTTP transport, and the high-level client
//! operations. It integrates with `thiserror` to provide rich `Display`
//! implementations and error source chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - `is_retryable` classifies transport-level failures for the retry layer;
//!   protocol and semantic errors are never retried.

use thiserror::Error;

/// Which spelling the server used when it reported a failure in-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// An `ERR ` packet (pack-protocol error line).
    Err,
    /// An `error:` prefixed message.
    Error,
    /// A `fatal:` prefixed message.
    Fatal,
}

impl std::fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerErrorKind::Err => f.write_str("ERR"),
            ServerErrorKind::Error => f.write_str("error"),
            ServerErrorKind::Fatal => f.write_str("fatal"),
        }
    }
}

#[derive(Error, Debug)]
/// Unified error enumeration for the nanogit library.
///
/// - Used across pkt-line codec, pack encode/decode, object model, transport
///   and client operations.
/// - Implements `std::error::Error` via `thiserror`.
pub enum GitError {
    /// HTTP-level failure with a status code the server returned.
    #[error("transport failure (status {status}): {message}")]
    Transport { status: u16, message: String },

    /// Server rejected the credentials (401/403).
    #[error("authentication rejected (status {status}): {message}")]
    Auth { status: u16, message: String },

    /// Server reported an in-band `ERR`/`error:`/`fatal:` message.
    #[error("server reported {kind}: {message}")]
    Server {
        kind: ServerErrorKind,
        message: String,
    },

    /// Push rejected while the server unpacked our objects.
    #[error("push rejected during unpack: {0}")]
    Unpack(String),

    /// Per-ref rejection (`ng <refname> <reason>`).
    #[error("ref update rejected for `{refname}`: {reason}")]
    RefUpdate { refname: String, reason: String },

    /// Queried ref absent from the advertisement.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// A concurrent update invalidated the expected base hash on push.
    #[error("ref `{refname}` changed: expected {expected}, found {actual}")]
    RefChanged {
        refname: String,
        expected: String,
        actual: String,
    },

    /// Malformed pkt-line, pack stream, or response bytes.
    #[error("parse error: {message} (input: {snippet:?})")]
    Parse { message: String, snippet: String },

    /// Delta reconstruction produced the wrong size or hit a bad instruction.
    #[error("delta application failed: {0}")]
    Delta(String),

    /// REF_DELTA base absent from both the pack and the object store.
    #[error("delta base {0} missing from pack and object store")]
    MissingBase(String),

    /// Tree closure could not be completed within the bounded recovery rounds.
    #[error("tree closure incomplete after {rounds} recovery rounds: {missing} trees missing")]
    IncompleteTree { rounds: usize, missing: usize },

    /// Path segment resolved to something other than a tree.
    #[error("not a tree: {0}")]
    NotATree(String),

    /// Final path segment resolved to something other than a blob.
    #[error("not a blob: {0}")]
    NotABlob(String),

    /// Staged path already occupied by a blob.
    #[error("path already exists: {0}")]
    PathExists(String),

    /// Path absent from the tree or staged overlay.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// Clone entry escapes the target directory after normalization.
    #[error("entry path escapes clone target: {0}")]
    UnsafePath(String),

    /// pkt-line payload exceeds the 65516-byte limit.
    #[error("pkt-line payload of {0} bytes exceeds the 65516 byte limit")]
    DataTooLarge(usize),

    /// Context cancellation observed while an operation was in flight.
    #[error("operation cancelled")]
    Cancelled,

    /// Mutating operation on a writer that already pushed or was discarded.
    #[error("staged writer is closed")]
    WriterClosed,

    /// Invalid or unsupported git object type name or number.
    #[error("the `{0}` is not a valid git object type")]
    InvalidObjectType(String),

    /// Malformed tree object.
    #[error("not a valid git tree object: {0}")]
    InvalidTreeObject(String),

    /// Malformed commit object.
    #[error("not a valid git commit object: {0}")]
    InvalidCommitObject(String),

    /// Malformed tag object.
    #[error("not a valid git tag object: {0}")]
    InvalidTagObject(String),

    /// Malformed author/committer/tagger line.
    #[error("the `{0}` is not a valid git signature")]
    InvalidSignature(String),

    /// Malformed or unsupported pack stream.
    #[error("the `{0}` is not a valid pack file")]
    InvalidPackFile(String),

    /// Invalid SHA-1 hash formatting or length.
    #[error("the `{0}` is not a valid hash value")]
    InvalidHashValue(String),

    /// Object missing from the store when it was required locally.
    #[error("can't find object: {0}")]
    ObjectNotFound(String),

    /// I/O error from an underlying reader, writer, or the filesystem.
    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),

    /// Request never produced an HTTP status (DNS, TLS, connect, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl GitError {
    /// Whether the retry layer may re-issue the failed request.
    ///
    /// Retryable: 5xx, 429, 408 and connection-level failures. Everything
    /// else (other 4xx, parse errors, server protocol errors) is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            GitError::Transport { status, .. } => {
                matches!(*status, 500..=599 | 429 | 408)
            }
            GitError::Network(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    pub(crate) fn parse(message: impl Into<String>, input: &[u8]) -> Self {
        let snippet = String::from_utf8_lossy(&input[..input.len().min(64)]).into_owned();
        GitError::Parse {
            message: message.into(),
            snippet,
        }
    }
}
