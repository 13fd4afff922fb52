//! Priority-ordered mod overlays.
//!
//! Each overlay is a host directory whose files shadow game files by
//! normalized path. [`ModOverlay::rebuild_index`] flattens all enabled
//! overlays into one map, highest priority first; the first overlay to
//! claim a key keeps it until the next rebuild.

use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use liberty_common::crc;
use log::{debug, info, warn};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use walkdir::WalkDir;

use crate::path::{key_extension, normalize_path};
use crate::texture;
use crate::{Error, Result};

/// Overlay folders looked for under a game root, with their priorities.
pub const STANDARD_OVERLAYS: &[(&str, i32)] = &[
    ("mods/update", 100),
    ("update", 50),
    ("GTAIV.EFLC.FusionFix/update", 40),
    ("plugins/update", 30),
    ("mods", 20),
];

/// Top-level folders that mark a fix-pack style update tree.
const FIX_PACK_MARKERS: &[&str] = &["common", "pc", "TLAD", "TBoGT", "GTAIV.EFLC.FusionFix"];

const FIX_PACK_ROOT: &str = "gtaiv.eflc.fusionfix/";

/// A registered overlay directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayEntry {
    pub path: PathBuf,
    /// Higher wins
    pub priority: i32,
    pub enabled: bool,
    pub name: String,
}

/// One file served from an overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOverride {
    pub host_path: PathBuf,
    /// Normalized, remapped guest key.
    pub key: String,
    pub priority: i32,
}

/// Snapshot of overlay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayStats {
    pub total_overlays: usize,
    pub enabled_overlays: usize,
    pub override_files: usize,
    pub img_folders: usize,
    pub hits: u64,
    pub misses: u64,
    pub textures_converted: u64,
}

/// Map overlay-relative keys into the game namespace.
///
/// Episode folders move under `dlc/`; the fix pack's own shader, texture
/// and model folders land in the shared or platform trees; a redundant
/// leading `update/` is dropped.
pub fn remap_overlay_key(key: &str) -> String {
    let mut result = if key.starts_with("tlad/") || key.starts_with("tbogt/") {
        format!("dlc/{key}")
    } else if let Some(sub) = key.strip_prefix(FIX_PACK_ROOT) {
        if sub.starts_with("shaders/") {
            format!("common/{sub}")
        } else if sub.starts_with("textures/") || sub.starts_with("models/") {
            format!("xbox360/{sub}")
        } else {
            key.to_string()
        }
    } else {
        key.to_string()
    };

    if let Some(stripped) = result.strip_prefix("update/") {
        result = stripped.to_string();
    }
    result
}

#[derive(Debug, Default)]
struct State {
    overlays: Vec<OverlayEntry>,
    index: FxHashMap<String, FileOverride>,
    img_folders: FxHashMap<String, PathBuf>,
    /// source path + target extension -> converted file
    converted: FxHashMap<String, PathBuf>,
}

impl State {
    fn position(&self, path: &Path) -> Option<usize> {
        self.overlays.iter().position(|o| same_dir(&o.path, path))
    }

    fn sort(&mut self) {
        self.overlays.sort_by_key(|o| Reverse(o.priority));
    }

    fn lookup(&self, key: &str) -> Option<&FileOverride> {
        if let Some(hit) = self.index.get(key) {
            return Some(hit);
        }
        let remapped = remap_overlay_key(key);
        if remapped != key {
            return self.index.get(&remapped);
        }
        None
    }
}

/// User modification overlays over the game tree.
#[derive(Debug)]
pub struct ModOverlay {
    state: Mutex<State>,
    cache_dir: PathBuf,
    hits: AtomicU64,
    misses: AtomicU64,
    textures_converted: AtomicU64,
}

impl Default for ModOverlay {
    fn default() -> Self {
        Self::new(default_cache_dir())
    }
}

/// Converted textures go under the system temp directory by default.
pub fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("liberty").join("texture_cache")
}

impl ModOverlay {
    /// Create an empty overlay set caching converted textures in
    /// `cache_dir`.
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            state: Mutex::new(State::default()),
            cache_dir: cache_dir.as_ref().to_path_buf(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            textures_converted: AtomicU64::new(0),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Register an overlay directory. Takes effect on the next
    /// [`rebuild_index`](Self::rebuild_index).
    pub fn add_overlay<P: AsRef<Path>>(&self, path: P, priority: i32, name: Option<&str>) -> Result<()> {
        let path = path.as_ref();
        if !path.is_dir() {
            warn!("Overlay path is not a directory: {}", path.display());
            return Err(Error::NotADirectory(path.to_path_buf()));
        }

        let mut state = self.state.lock();
        if state.position(path).is_some() {
            return Err(Error::AlreadyRegistered(path.to_path_buf()));
        }

        let name = match name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => dir_name(path),
        };
        info!("Added overlay {} (priority {}, {})", path.display(), priority, name);

        state.overlays.push(OverlayEntry {
            path: path.to_path_buf(),
            priority,
            enabled: true,
            name,
        });
        state.sort();
        Ok(())
    }

    /// Unregister an overlay. Returns whether it was registered.
    pub fn remove_overlay<P: AsRef<Path>>(&self, path: P) -> bool {
        let mut state = self.state.lock();
        match state.position(path.as_ref()) {
            Some(idx) => {
                let removed = state.overlays.remove(idx);
                info!("Removed overlay {}", removed.path.display());
                true
            }
            None => false,
        }
    }

    /// Drop every overlay and the flattened index.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.overlays.clear();
        state.index.clear();
        state.img_folders.clear();
    }

    /// Enable or disable an overlay. Returns whether it was registered.
    pub fn set_enabled<P: AsRef<Path>>(&self, path: P, enabled: bool) -> bool {
        let mut state = self.state.lock();
        let Some(idx) = state.position(path.as_ref()) else {
            return false;
        };

        let overlay = &mut state.overlays[idx];
        if overlay.enabled != enabled {
            overlay.enabled = enabled;
            info!(
                "Overlay {} {}",
                overlay.name,
                if enabled { "enabled" } else { "disabled" }
            );
        }
        state.sort();
        true
    }

    /// Registered overlays, highest priority first.
    pub fn overlays(&self) -> Vec<OverlayEntry> {
        self.state.lock().overlays.clone()
    }

    /// Register the standard overlay folders that exist under
    /// `game_root`. Returns how many were added.
    pub fn scan_standard_locations<P: AsRef<Path>>(&self, game_root: P) -> usize {
        let game_root = game_root.as_ref();
        let mut added = 0;

        for (relative, priority) in STANDARD_OVERLAYS {
            let path = game_root.join(relative);
            if !path.is_dir() {
                continue;
            }

            let mut name = relative.to_string();
            if FIX_PACK_MARKERS.iter().any(|m| path.join(m).exists()) {
                name.push_str(" (fix pack)");
            }

            match self.add_overlay(&path, *priority, Some(&name)) {
                Ok(()) => added += 1,
                Err(e) => debug!("Skipping {}: {}", path.display(), e),
            }
        }

        added
    }

    /// Flatten enabled overlays into the override map and rescan IMG
    /// replacement folders.
    pub fn rebuild_index(&self) {
        let mut state = self.state.lock();
        let mut index = FxHashMap::default();
        let mut img_folders = FxHashMap::default();

        for overlay in state.overlays.iter().filter(|o| o.enabled) {
            for entry in WalkDir::new(&overlay.path)
                .min_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let Ok(relative) = entry.path().strip_prefix(&overlay.path) else {
                    continue;
                };
                let key = normalize_path(&relative.to_string_lossy());

                if entry.file_type().is_dir() {
                    if is_img_folder(&key) {
                        img_folders.entry(key).or_insert_with(|| entry.path().to_path_buf());
                    }
                    continue;
                }
                if !entry.file_type().is_file() {
                    continue;
                }

                let key = remap_overlay_key(&key);
                index.entry(key.clone()).or_insert_with(|| FileOverride {
                    host_path: entry.path().to_path_buf(),
                    key,
                    priority: overlay.priority,
                });
            }
        }

        let enabled = state.overlays.iter().filter(|o| o.enabled).count();
        info!(
            "Overlay index rebuilt: {} files, {} IMG folders from {} overlays",
            index.len(),
            img_folders.len(),
            enabled
        );

        state.index = index;
        state.img_folders = img_folders;
    }

    /// Resolve a guest path to an overriding host file.
    ///
    /// On a miss for a console texture whose PC counterpart is overridden,
    /// the PC file is converted once and the cached copy is served.
    pub fn resolve(&self, guest_path: &str) -> Option<PathBuf> {
        let key = normalize_path(guest_path);
        let mut state = self.state.lock();

        let direct = state.lookup(&key).map(|hit| hit.host_path.clone());
        let found = match direct {
            Some(path) => Some(path),
            None => self.convert_fallback(&mut state, &key),
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub fn has_override(&self, guest_path: &str) -> bool {
        self.resolve(guest_path).is_some()
    }

    fn convert_fallback(&self, state: &mut State, key: &str) -> Option<PathBuf> {
        let target_ext = key_extension(key)?;
        let pc_ext = texture::pc_counterpart(target_ext)?;
        let pc_key = format!("{}{}", &key[..key.len() - target_ext.len()], pc_ext);
        let source = state.lookup(&pc_key)?.host_path.clone();

        let cache_key = format!("{}{}", source.display(), target_ext);
        if let Some(cached) = state.converted.get(&cache_key) {
            if cached.exists() {
                return Some(cached.clone());
            }
        }

        let converted = self.convert_and_cache(&source, target_ext)?;
        state.converted.insert(cache_key, converted.clone());
        Some(converted)
    }

    fn convert_and_cache(&self, source: &Path, target_ext: &str) -> Option<PathBuf> {
        let data = match fs::read(source) {
            Ok(data) => data,
            Err(e) => {
                warn!("Cannot read {}: {}", source.display(), e);
                return None;
            }
        };

        // Unconvertible input is served as-is.
        let converted = texture::pc_to_console(&data).unwrap_or(data);

        let cache_path = self
            .cache_dir
            .join(crc::cache_file_name(source, target_ext));

        let written = fs::create_dir_all(&self.cache_dir).and_then(|_| fs::write(&cache_path, &converted));
        if let Err(e) = written {
            warn!("Cannot write {}: {}", cache_path.display(), e);
            return None;
        }

        self.textures_converted.fetch_add(1, Ordering::Relaxed);
        info!(
            "Converted {} -> {}",
            source.display(),
            cache_path.display()
        );
        Some(cache_path)
    }

    /// All overrides, sorted by key.
    pub fn overrides(&self) -> Vec<FileOverride> {
        let state = self.state.lock();
        let mut overrides: Vec<FileOverride> = state.index.values().cloned().collect();
        overrides.sort_by(|a, b| a.key.cmp(&b.key));
        overrides
    }

    /// Replacement folder for a packed IMG archive path.
    pub fn img_replacement_folder(&self, img_path: &str) -> Option<PathBuf> {
        let key = normalize_path(img_path);
        let state = self.state.lock();

        if let Some(folder) = state.img_folders.get(&key) {
            return Some(folder.clone());
        }
        let remapped = remap_overlay_key(&key);
        if remapped != key {
            return state.img_folders.get(&remapped).cloned();
        }
        None
    }

    /// All IMG replacement folders, sorted by key.
    pub fn img_folders(&self) -> Vec<(String, PathBuf)> {
        let state = self.state.lock();
        let mut folders: Vec<(String, PathBuf)> = state
            .img_folders
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        folders.sort();
        folders
    }

    /// Forget converted textures and delete the cache directory.
    pub fn clear_texture_cache(&self) {
        self.state.lock().converted.clear();
        if let Err(e) = fs::remove_dir_all(&self.cache_dir) {
            debug!("Texture cache {} not removed: {}", self.cache_dir.display(), e);
        }
    }

    pub fn stats(&self) -> OverlayStats {
        let state = self.state.lock();
        OverlayStats {
            total_overlays: state.overlays.len(),
            enabled_overlays: state.overlays.iter().filter(|o| o.enabled).count(),
            override_files: state.index.len(),
            img_folders: state.img_folders.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            textures_converted: self.textures_converted.load(Ordering::Relaxed),
        }
    }
}

fn is_img_folder(key: &str) -> bool {
    let leaf = key.rsplit('/').next().unwrap_or(key);
    leaf.len() > 4 && leaf.ends_with(".img")
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Compare directories by canonical path, falling back to the raw paths.
fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
