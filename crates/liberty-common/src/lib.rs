//! Common utilities for Liberty.
//!
//! This crate provides foundational types shared by the archive and
//! file-system crates:
//!
//! - [`BinaryReader`] - Borrowing little-endian cursor over archive bytes
//! - [`crc`] - CRC32C names for converted-texture cache files

mod error;
mod reader;

pub mod crc;

pub use error::{Error, Result};
pub use reader::BinaryReader;

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
