//! Engine result taxonomy.
//!
//! Every driver-facing operation returns one of these codes. Anticipated
//! native failures (permissions, missing files, sharing violations, disk
//! full) are mapped at the dispatcher boundary; anything else travels
//! through [`FsError::Io`] and is fatal to the in-flight operation.

use std::io;
use thiserror::Error;

/// Engine error type.
#[derive(Debug, Error)]
pub enum FsError {
    /// The target file already exists.
    #[error("file exists: {0}")]
    FileExists(String),

    /// Something already exists at the target path.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The file does not exist.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// A path component (or the whole path) does not exist.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// Expected a directory, found a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Permission denied by the underlying filesystem.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Directory contains entries and cannot be removed.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// The native sharing mode rejected the open.
    #[error("sharing violation: {0}")]
    SharingViolation(String),

    /// The underlying volume is full (or flush/resize failed).
    #[error("disk full: {0}")]
    DiskFull(String),

    /// Intentionally unsupported operation.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Generic failure, e.g. appending to a non-seekable target.
    #[error("{0}")]
    Other(String),

    /// Unanticipated native I/O failure. Fatal to the operation.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Create a FileExists error.
    pub fn file_exists(path: impl Into<String>) -> Self {
        Self::FileExists(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a FileNotFound error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound(path.into())
    }

    /// Create a PathNotFound error.
    pub fn path_not_found(path: impl Into<String>) -> Self {
        Self::PathNotFound(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an AccessDenied error.
    pub fn access_denied(path: impl Into<String>) -> Self {
        Self::AccessDenied(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create a SharingViolation error.
    pub fn sharing_violation(path: impl Into<String>) -> Self {
        Self::SharingViolation(path.into())
    }

    /// Create a DiskFull error.
    pub fn disk_full(path: impl Into<String>) -> Self {
        Self::DiskFull(path.into())
    }

    /// Create a NotImplemented error.
    pub fn not_implemented(what: impl Into<String>) -> Self {
        Self::NotImplemented(what.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Engine result type.
pub type FsResult<T> = Result<T, FsError>;
