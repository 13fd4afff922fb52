//! Errors raised while decoding archive and resource bytes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A read ran past the end of the buffer.
    #[error("buffer too short: wanted {needed} bytes, {available} left")]
    UnexpectedEof { needed: usize, available: usize },

    #[error("bad tag: expected {expected:02x?}, found {actual:02x?}")]
    InvalidMagic { expected: Vec<u8>, actual: Vec<u8> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Name bytes are not UTF-8.
    #[error("invalid name encoding: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Name runs to the end of its table without a NUL.
    #[error("unterminated name")]
    MissingNullTerminator,
}

pub type Result<T> = std::result::Result<T, Error>;
