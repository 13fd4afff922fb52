//! Liberty - guest file I/O for GTA IV console recompilation.
//!
//! This crate ties the Liberty library ecosystem together behind one
//! explicitly owned [`Registry`].
//!
//! # Crates
//!
//! - [`liberty_common`] - Little-endian binary reading, CRC32C
//! - [`liberty_rpf`] - RPF2 archives: codec, parallel extraction, streaming reads,
//!   cross-archive index
//! - [`liberty_vfs`] - Guest path resolution and mod overlays
//!
//! # Example
//!
//! ```no_run
//! use liberty::prelude::*;
//!
//! let config = Config::from_file("liberty.json")?;
//! let registry = Registry::new(config);
//!
//! if let Some(host) = registry.resolve("game:\\common\\data\\handling.dat") {
//!     println!("served from {}", host.display());
//! }
//! # Ok::<(), liberty::Error>(())
//! ```

mod config;
mod error;
mod registry;

pub use liberty_common as common;
pub use liberty_rpf as rpf;
pub use liberty_vfs as vfs;

pub use config::{Config, ExtractionConfig, MappingConfig, OverlayConfig};
pub use error::{Error, Result};
pub use registry::{Registry, RegistryStats};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{Config, Registry};
    pub use liberty_common::{crc, BinaryReader};
    pub use liberty_rpf::{
        extract_archive, ArchiveLoader, ArchiveStreams, ExtractOptions, ExtractionResult,
        MemoryBudget, RpfArchive, RpfEntry, RpfKey,
    };
    pub use liberty_vfs::{normalize_path, ModOverlay, PathResolver};
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
