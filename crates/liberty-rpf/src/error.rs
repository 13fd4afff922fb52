//! Error types for the RPF crate.

use thiserror::Error;

/// Errors that can occur when working with RPF archives.
///
/// Only conditions a caller can act on are represented here. A missing
/// key or a failed inflate is absorbed by the codec and never produces
/// an `Error`.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Common library error.
    #[error("{0}")]
    Common(#[from] liberty_common::Error),

    /// Header magic is not a recognized archive tag.
    #[error("invalid archive magic: {0:02x?}")]
    InvalidMagic([u8; 4]),

    /// Fewer bytes than a complete header.
    #[error("truncated header: {0} bytes")]
    TruncatedHeader(usize),

    /// Entry data extends past the end of the archive.
    #[error("entry {name} out of bounds: {end:#x} > archive length {len:#x}")]
    EntryOutOfBounds { name: String, end: u64, len: u64 },

    /// Entry name would escape the output directory.
    #[error("unsafe entry name: {0}")]
    UnsafeEntryName(String),

    /// Entry not found.
    #[error("entry not found: {0}")]
    EntryNotFound(String),
}

/// Result type for RPF operations.
pub type Result<T> = std::result::Result<T, Error>;
