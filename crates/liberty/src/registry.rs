//! The explicitly owned set of file-I/O services.
//!
//! A [`Registry`] holds the resolver, overlays, the overlay archive index
//! and archive streams built from one [`Config`]. It is `Send + Sync`;
//! share it behind an `Arc`.

use std::path::{Path, PathBuf};

use liberty_rpf::{
    default_temp_dir, extract_archive, ArchiveLoader, ArchiveStreams, ExtractionResult, LoaderStats,
    RpfKey,
};
use liberty_vfs::{
    default_cache_dir, has_parent_segment, normalize_path, ModOverlay, OverlayStats, PathResolver,
    ResolverStats,
};
use log::{info, warn};

use crate::config::Config;

/// Snapshot of every component's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub resolver: ResolverStats,
    pub overlay: OverlayStats,
    pub loader: LoaderStats,
    /// Archives opened by the streaming read path.
    pub open_archives: Vec<String>,
}

/// Guest file-I/O services.
#[derive(Debug)]
pub struct Registry {
    config: Config,
    key: Option<RpfKey>,
    vfs: PathResolver,
    overlay: ModOverlay,
    loader: ArchiveLoader,
    streams: ArchiveStreams,
}

impl Registry {
    /// Build all services, locating the archive key from the configured
    /// search directories.
    pub fn new(config: Config) -> Self {
        let key = RpfKey::locate(&config.key_search_dirs);
        Self::with_key(config, key)
    }

    /// Build all services with an explicitly provisioned key.
    pub fn with_key(config: Config, key: Option<RpfKey>) -> Self {
        let vfs = PathResolver::new(&config.extracted_root);
        for mapping in &config.path_mappings {
            vfs.add_path_mapping(&mapping.guest, &mapping.host);
        }

        let cache_dir = config
            .texture_cache_dir
            .clone()
            .unwrap_or_else(default_cache_dir);
        let overlay = ModOverlay::new(cache_dir);

        if let Some(game_root) = &config.game_root {
            let found = overlay.scan_standard_locations(game_root);
            info!("Found {} standard overlays under {}", found, game_root.display());
        }
        for entry in &config.overlays {
            if let Err(e) = overlay.add_overlay(&entry.path, entry.priority, entry.name.as_deref()) {
                warn!("Ignoring overlay {}: {}", entry.path.display(), e);
            }
        }
        overlay.rebuild_index();

        let rpf_cache = config.rpf_cache_dir.clone().unwrap_or_else(default_temp_dir);
        let loader = ArchiveLoader::new(key.clone(), rpf_cache);
        scan_overlay_archives(&overlay, &loader);

        let streams = ArchiveStreams::new(config.archive_dir(), key.clone());

        Self {
            config,
            key,
            vfs,
            overlay,
            loader,
            streams,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether an archive key is available.
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn vfs(&self) -> &PathResolver {
        &self.vfs
    }

    pub fn overlay(&self) -> &ModOverlay {
        &self.overlay
    }

    pub fn loader(&self) -> &ArchiveLoader {
        &self.loader
    }

    pub fn streams(&self) -> &ArchiveStreams {
        &self.streams
    }

    /// Resolve a guest path: loose overlay files first, then the extracted
    /// tree, then files packed in overlay archives (written out to the
    /// archive cache directory).
    pub fn resolve(&self, guest_path: &str) -> Option<PathBuf> {
        self.overlay
            .resolve(guest_path)
            .or_else(|| self.vfs.resolve(guest_path))
            .or_else(|| self.resolve_packed(guest_path))
    }

    fn resolve_packed(&self, guest_path: &str) -> Option<PathBuf> {
        let key = normalize_path(guest_path);
        if key.is_empty() || has_parent_segment(&key) || !self.loader.has_file(&key) {
            return None;
        }
        self.loader.extract_to_temp(&key)
    }

    pub fn exists(&self, guest_path: &str) -> bool {
        self.resolve(guest_path).is_some_and(|p| p.exists())
    }

    pub fn is_directory(&self, guest_path: &str) -> bool {
        self.resolve(guest_path).is_some_and(|p| p.is_dir())
    }

    /// Size of the resolved regular file, 0 when absent.
    pub fn file_size(&self, guest_path: &str) -> u64 {
        self.resolve(guest_path)
            .and_then(|p| std::fs::metadata(p).ok())
            .filter(|m| m.is_file())
            .map_or(0, |m| m.len())
    }

    /// Extract an archive with the configured tuning and this registry's
    /// key.
    pub fn extract<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        archive_path: P,
        output_dir: Q,
        progress: &(dyn Fn(f32) + Sync),
    ) -> ExtractionResult {
        extract_archive(
            archive_path,
            output_dir,
            self.key.as_ref(),
            &self.config.extraction.options(),
            progress,
        )
    }

    /// Read through a caller handle from the streaming path.
    pub fn read_at(&self, handle: u32, buf: &mut [u8], offset: u64) -> usize {
        self.streams.read_handle(handle, buf, offset)
    }

    /// Rescan the extracted tree, overlays and overlay archives, and close
    /// all streamed archives.
    pub fn reset(&self) {
        self.streams.reset();
        self.vfs.rebuild_index();
        self.overlay.rebuild_index();
        self.loader.reset();
        scan_overlay_archives(&self.overlay, &self.loader);
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            resolver: self.vfs.stats(),
            overlay: self.overlay.stats(),
            loader: self.loader.stats(),
            open_archives: self.streams.open_archives(),
        }
    }
}

/// Index the archives inside every enabled overlay, lowest priority
/// first so higher-priority archives win shared paths.
fn scan_overlay_archives(overlay: &ModOverlay, loader: &ArchiveLoader) {
    let mut overlays = overlay.overlays();
    overlays.retain(|o| o.enabled);
    overlays.sort_by_key(|o| o.priority);

    for entry in overlays {
        loader.scan_directory(&entry.path, true);
    }
}
