//! RPF2 archive reader for GTA IV console game files.
//!
//! RPF2 packs game assets behind a fixed 20-byte header and a table of
//! contents at offset 0x800. The TOC may be ciphered; entry bodies may be
//! deflated. This crate provides:
//!
//! - Header parsing and probing, TOC records and name-table paths
//! - The TOC cipher (AES-256-ECB, 16 rounds), the single-pass body cipher
//!   and key discovery
//! - Bulk parallel extraction bounded by a [`MemoryBudget`]
//! - A memory-mapped streaming read path with a lazily decrypted TOC
//! - A cross-archive file index with an extraction cache
//!
//! # Example
//!
//! ```no_run
//! use liberty_rpf::{RpfArchive, RpfKey};
//!
//! let key = RpfKey::locate(&RpfKey::default_search_dirs());
//! let archive = RpfArchive::open("common.rpf", key)?;
//!
//! for entry in archive.files() {
//!     println!("{}: {} bytes", entry.name, entry.size);
//! }
//!
//! let data = archive.read_file("data/handling.dat")?;
//! # Ok::<(), liberty_rpf::Error>(())
//! ```

mod archive;
mod budget;
pub mod crypto;
mod decompress;
mod entry;
mod error;
mod extract;
pub mod header;
mod loader;
mod stream;

pub use archive::RpfArchive;
pub use budget::{BudgetGuard, MemoryBudget};
pub use crypto::{decrypt_body, decrypt_toc_block, encrypt_body, encrypt_toc_block, RpfKey};
pub use decompress::decompress_entry;
pub use entry::{list_entries, list_toc_entries, RpfEntry, TOC_RECORD_SIZE};
pub use error::{Error, Result};
pub use extract::{
    extract_archive, read_archive_index, ExtractOptions, ExtractionResult, DEFAULT_MEMORY_BUDGET,
};
pub use loader::{default_temp_dir, loader_key, ArchiveLoader, LoaderStats};
pub use header::{is_rpf_file, parse_header, peek_header, read_header, RpfHeader};
pub use stream::{ArchiveStreams, FALLBACK_ARCHIVES};
