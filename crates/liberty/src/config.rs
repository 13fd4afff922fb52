//! Host-side configuration.
//!
//! Loaded from JSON; every field has a default, so an empty object is a
//! valid configuration.

use std::fs;
use std::path::{Path, PathBuf};

use liberty_rpf::{ExtractOptions, RpfKey};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the extracted archive tree served by the resolver.
    pub extracted_root: PathBuf,
    /// Game install root, searched for standard overlay folders.
    pub game_root: Option<PathBuf>,
    /// Directory holding the raw `.rpf` archives for streaming reads.
    /// Falls back to `game_root`, then the working directory.
    pub archive_root: Option<PathBuf>,
    /// Directories searched for the archive key.
    pub key_search_dirs: Vec<PathBuf>,
    /// Overlays registered in addition to the standard ones.
    pub overlays: Vec<OverlayConfig>,
    /// Mappings appended after the built-in ones.
    pub path_mappings: Vec<MappingConfig>,
    /// Where converted textures are written.
    pub texture_cache_dir: Option<PathBuf>,
    /// Where files served out of overlay archives are written.
    pub rpf_cache_dir: Option<PathBuf>,
    pub extraction: ExtractionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extracted_root: PathBuf::from("extracted"),
            game_root: None,
            archive_root: None,
            key_search_dirs: RpfKey::default_search_dirs(),
            overlays: Vec::new(),
            path_mappings: Vec::new(),
            texture_cache_dir: None,
            rpf_cache_dir: None,
            extraction: ExtractionConfig::default(),
        }
    }
}

impl Config {
    /// Load a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the configuration as pretty JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Effective directory for streaming archive reads.
    pub fn archive_dir(&self) -> PathBuf {
        self.archive_root
            .clone()
            .or_else(|| self.game_root.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// An explicitly configured overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub name: Option<String>,
}

/// An extra guest-to-host prefix mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingConfig {
    pub guest: String,
    pub host: String,
}

/// Bulk extraction tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Worker threads; 0 picks from the host.
    pub threads: usize,
    /// In-flight buffer budget in MiB.
    pub memory_budget_mb: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            memory_budget_mb: 512,
        }
    }
}

impl ExtractionConfig {
    pub fn options(&self) -> ExtractOptions {
        ExtractOptions {
            threads: self.threads,
            memory_budget: self.memory_budget_mb.max(1) * 1024 * 1024,
        }
    }
}
