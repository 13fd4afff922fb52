//! Error types for the VFS crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by overlay administration.
///
/// Lookups never fail: a path that cannot be resolved is `None`.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Overlay path is missing or not a directory.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Overlay path is already registered.
    #[error("overlay already registered: {}", .0.display())]
    AlreadyRegistered(PathBuf),
}

/// Result type for VFS operations.
pub type Result<T> = std::result::Result<T, Error>;
