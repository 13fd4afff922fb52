//! Guest file-system virtualization for GTA IV.
//!
//! Guest code names files with console paths such as
//! `game:\common\data\handling.dat`. This crate maps them onto host files:
//!
//! - [`normalize_path`] - the lookup key shared by every component
//! - [`PathResolver`] - mappings and a case-insensitive index over the
//!   extracted archive tree, with memory-mapped opens for large files
//! - [`ModOverlay`] - priority-ordered mod folders that shadow game files,
//!   with on-the-fly PC to console texture conversion
//!
//! # Example
//!
//! ```no_run
//! use liberty_vfs::{ModOverlay, PathResolver};
//!
//! let vfs = PathResolver::new("extracted");
//! let mods = ModOverlay::default();
//! mods.scan_standard_locations("game");
//! mods.rebuild_index();
//!
//! let path = "game:\\common\\data\\handling.dat";
//! let host = mods.resolve(path).or_else(|| vfs.resolve(path));
//! ```

mod error;
mod overlay;
mod path;
mod resolver;
pub mod texture;

pub use error::{Error, Result};
pub use overlay::{
    default_cache_dir, remap_overlay_key, FileOverride, ModOverlay, OverlayEntry, OverlayStats,
    STANDARD_OVERLAYS,
};
pub use path::{
    has_known_extension, has_parent_segment, key_extension, normalize_path, ASSET_EXTENSIONS,
};
pub use resolver::{
    PathMapping, PathResolver, ResolverStats, DEFAULT_PATH_MAPPINGS, MMAP_THRESHOLD,
};
