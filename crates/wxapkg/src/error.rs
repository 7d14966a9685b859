//! Error types for unpacking and reconstruction.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for unpack operations.
#[derive(Debug, Error)]
pub enum UnpackError {
    /// Archive or manifest not found at the specified path.
    #[error("Archive not found: {0}")]
    NotFound(PathBuf),

    /// The container is structurally invalid.
    #[error("Malformed package: {0}")]
    Format(#[from] FormatError),

    /// An entry name is unsafe to materialize.
    #[error("Security violation: {0}")]
    Security(#[from] SecurityError),

    /// A directory was required but a plain file occupies the path.
    #[error("Path conflict: {} is a file, cannot create entries below it", .0.display())]
    Conflict(PathBuf),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A scheduled task ended without delivering its result (it panicked).
    #[error("Scheduled task aborted before completion")]
    TaskAborted,

    /// The package is a subpackage and no main package directory was given.
    #[error(
        "{} looks like a subpackage; pass the unpacked main package directory with --main-dir",
        .0.display()
    )]
    MainDirRequired(PathBuf),

    /// None of the page-frame variants exist in the package.
    #[error("No page-frame file found in {}", .0.display())]
    FrameNotFound(PathBuf),
}

impl UnpackError {
    /// Map a read failure, reporting a missing input as [`UnpackError::NotFound`].
    pub fn reading(path: &Path, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            UnpackError::NotFound(path.to_path_buf())
        } else {
            UnpackError::Io(err)
        }
    }
}

/// Structural errors in the binary container. Always fatal for the archive.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    /// One or both sentinel bytes of the header do not match.
    #[error("bad magic markers: first=0x{first:02x}, last=0x{last:02x}")]
    BadMarker {
        /// Byte found at offset 0
        first: u8,
        /// Byte found at offset 13
        last: u8,
    },

    /// Fewer than 14 bytes were available for the header.
    #[error("header truncated: {len} bytes")]
    TruncatedHeader { len: usize },

    /// A field of the file table points past the end of the table section.
    #[error("file table truncated at offset {offset}: need {needed} bytes, {available} available")]
    TruncatedTable {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// An entry's byte range lies outside the container.
    #[error("incomplete entry {name}: {offset}+{size} exceeds package length {container_len}")]
    EntryOutOfBounds {
        name: String,
        offset: u32,
        size: u32,
        container_len: usize,
    },

    /// An entry name is not valid UTF-8.
    #[error("entry name at table offset {offset} is not valid UTF-8")]
    InvalidName { offset: usize },
}

/// Security-related errors for entry names.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Path traversal attempt detected (e.g., "../../etc/passwd").
    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),

    /// The name resolves to the output root itself.
    #[error("Entry name is empty after normalization: {0:?}")]
    EmptyPath(String),
}

/// Failure inside one reconstruction stage or collaborator.
///
/// Stage errors are logged and the stage contributes nothing; sibling stages
/// keep running.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("collaborator failed: {0}")]
    Collaborator(String),

    #[error("manifest has no `{0}` field")]
    MissingField(&'static str),

    #[error(transparent)]
    Unpack(#[from] UnpackError),
}
