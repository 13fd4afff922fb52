//! Error types for the facade crate.

use thiserror::Error;

/// Errors surfaced by configuration and registry setup.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// Archive error.
    #[error("{0}")]
    Rpf(#[from] liberty_rpf::Error),

    /// Overlay administration error.
    #[error("{0}")]
    Vfs(#[from] liberty_vfs::Error),
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, Error>;
