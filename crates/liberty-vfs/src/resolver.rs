//! Resolution of guest paths against the extracted game tree.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};
use memmap2::Mmap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use walkdir::WalkDir;

use crate::path::{
    has_known_extension, has_parent_segment, normalize_path, strip_segment_prefix, ASSET_EXTENSIONS,
};

/// Mappings installed by [`PathResolver::reset_path_mappings`], in match
/// order.
///
/// Archive names map onto the folder they were extracted into; bare asset
/// folders map into the archive folder that holds them.
pub const DEFAULT_PATH_MAPPINGS: &[(&str, &str)] = &[
    ("fxl_final", "common/shaders/fxl_final"),
    ("shaders/fxl_final", "common/shaders/fxl_final"),
    ("common.rpf", "common"),
    ("xbox360.rpf", "xbox360"),
    ("audio.rpf", "audio"),
    ("common", "common"),
    ("data", "common/data"),
    ("text", "common/text"),
    ("textures", "xbox360/textures"),
    ("models", "xbox360/models"),
    ("anim", "xbox360/anim"),
];

/// Files at least this large are served memory-mapped.
pub const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// A guest prefix redirected to a host prefix under the extracted root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    /// Normalized guest prefix.
    pub guest_prefix: String,
    /// Host prefix, relative to the extracted root.
    pub host_prefix: String,
}

impl PathMapping {
    pub fn new(guest_prefix: &str, host_prefix: &str) -> Self {
        Self {
            guest_prefix: normalize_path(guest_prefix),
            host_prefix: host_prefix.replace('\\', "/").trim_matches('/').to_string(),
        }
    }
}

/// Snapshot of resolver counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub total_files: u64,
    pub total_directories: u64,
    pub total_bytes: u64,
    /// Successful resolutions
    pub hits: u64,
    /// Failed resolutions
    pub misses: u64,
    /// Files opened through [`PathResolver::open_mapped`]
    pub mmap_opens: u64,
}

#[derive(Debug, Default)]
struct State {
    root: PathBuf,
    mappings: Vec<PathMapping>,
    /// Normalized relative path -> host path, files and directories
    index: FxHashMap<String, PathBuf>,
    total_files: u64,
    total_directories: u64,
    total_bytes: u64,
}

impl State {
    fn lookup(&self, key: &str) -> Option<PathBuf> {
        if has_parent_segment(key) {
            return None;
        }
        if let Some(found) = self.lookup_mapped(key) {
            return Some(found);
        }

        let direct = self.root.join(key);
        if direct.exists() {
            return Some(direct);
        }

        if let Some(found) = self.index.get(key) {
            return Some(found.clone());
        }

        if !has_known_extension(key) {
            for ext in ASSET_EXTENSIONS {
                let with_ext = format!("{key}{ext}");
                let direct = self.root.join(&with_ext);
                if direct.exists() {
                    return Some(direct);
                }
                if let Some(found) = self.index.get(&with_ext) {
                    return Some(found.clone());
                }
            }
        }

        None
    }

    /// First matching mapping only.
    fn lookup_mapped(&self, key: &str) -> Option<PathBuf> {
        let (mapping, rest) = self
            .mappings
            .iter()
            .find_map(|m| strip_segment_prefix(key, &m.guest_prefix).map(|rest| (m, rest)))?;

        let mut candidate = self.root.join(&mapping.host_prefix);
        if !rest.is_empty() {
            candidate.push(rest);
        }
        if candidate.exists() {
            return Some(candidate);
        }

        ASSET_EXTENSIONS.iter().find_map(|ext| {
            let mut with_ext = candidate.clone().into_os_string();
            with_ext.push(ext);
            let with_ext = PathBuf::from(with_ext);
            with_ext.exists().then_some(with_ext)
        })
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        self.total_files = 0;
        self.total_directories = 0;
        self.total_bytes = 0;

        if !self.root.is_dir() {
            warn!("Extracted root does not exist: {}", self.root.display());
            return;
        }

        for entry in WalkDir::new(&self.root).min_depth(1).into_iter().filter_map(|e| e.ok()) {
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = normalize_path(&relative.to_string_lossy());

            let file_type = entry.file_type();
            if file_type.is_dir() {
                self.total_directories += 1;
            } else if file_type.is_file() {
                self.total_files += 1;
                self.total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }

            self.index.insert(key, entry.into_path());
        }
    }
}

/// Maps guest paths onto files below an extracted root.
///
/// Resolution order: the first matching path mapping (with asset
/// extension probing), the path joined directly under the root, the
/// case-insensitive index, then the index again with each asset extension
/// appended when the path has none. Paths with a `..` segment never
/// resolve. The index is built by one recursive
/// scan at construction and on [`rebuild_index`](Self::rebuild_index); it
/// does not follow later changes to the tree.
#[derive(Debug)]
pub struct PathResolver {
    state: RwLock<State>,
    hits: AtomicU64,
    misses: AtomicU64,
    mmap_opens: AtomicU64,
}

impl PathResolver {
    /// Create a resolver over `root` with the default mappings and a fresh
    /// index.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let resolver = Self {
            state: RwLock::new(State::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            mmap_opens: AtomicU64::new(0),
        };
        resolver.initialize(root);
        resolver
    }

    /// Point the resolver at a new root, resetting mappings, index and
    /// counters.
    pub fn initialize<P: AsRef<Path>>(&self, root: P) {
        let mut state = self.state.write();
        state.root = root.as_ref().to_path_buf();
        state.mappings = default_mappings();
        state.rebuild_index();

        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.mmap_opens.store(0, Ordering::Relaxed);

        info!(
            "VFS root {}: {} files, {} directories, {} bytes",
            state.root.display(),
            state.total_files,
            state.total_directories,
            state.total_bytes
        );
    }

    /// Extracted root.
    pub fn root(&self) -> PathBuf {
        self.state.read().root.clone()
    }

    /// Resolve a guest path to a host path.
    pub fn resolve(&self, guest_path: &str) -> Option<PathBuf> {
        let key = normalize_path(guest_path);
        let found = self.state.read().lookup(&key);

        match &found {
            Some(path) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("VFS {} -> {}", guest_path, path.display());
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("VFS miss: {} ({})", guest_path, key);
            }
        }
        found
    }

    /// Whether the guest path resolves to something that exists.
    pub fn exists(&self, guest_path: &str) -> bool {
        self.resolve(guest_path).is_some_and(|p| p.exists())
    }

    pub fn is_directory(&self, guest_path: &str) -> bool {
        self.resolve(guest_path).is_some_and(|p| p.is_dir())
    }

    /// Size of a resolved regular file, 0 otherwise.
    pub fn file_size(&self, guest_path: &str) -> u64 {
        self.resolve(guest_path)
            .and_then(|p| std::fs::metadata(p).ok())
            .filter(|m| m.is_file())
            .map_or(0, |m| m.len())
    }

    /// Whether the guest path is a regular file of at least
    /// [`MMAP_THRESHOLD`] bytes.
    pub fn should_use_mmap(&self, guest_path: &str) -> bool {
        self.file_size(guest_path) >= MMAP_THRESHOLD
    }

    /// Map a large resolved file read-only.
    ///
    /// Returns `None` when the path does not resolve, is not a regular
    /// file, is smaller than [`MMAP_THRESHOLD`] or cannot be mapped.
    pub fn open_mapped(&self, guest_path: &str) -> Option<Mmap> {
        let path = self.resolve(guest_path)?;
        let file = std::fs::File::open(&path).ok()?;
        let meta = file.metadata().ok()?;
        if !meta.is_file() || meta.len() < MMAP_THRESHOLD {
            return None;
        }

        match unsafe { Mmap::map(&file) } {
            Ok(mmap) => {
                self.mmap_opens.fetch_add(1, Ordering::Relaxed);
                debug!("VFS mapped {} ({} bytes)", path.display(), mmap.len());
                Some(mmap)
            }
            Err(e) => {
                warn!("Failed to map {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Append a mapping; earlier mappings keep precedence.
    pub fn add_path_mapping(&self, guest_prefix: &str, host_prefix: &str) {
        self.state
            .write()
            .mappings
            .push(PathMapping::new(guest_prefix, host_prefix));
    }

    /// Restore [`DEFAULT_PATH_MAPPINGS`].
    pub fn reset_path_mappings(&self) {
        self.state.write().mappings = default_mappings();
    }

    /// Current mappings in match order.
    pub fn path_mappings(&self) -> Vec<PathMapping> {
        self.state.read().mappings.clone()
    }

    /// Rescan the extracted root.
    pub fn rebuild_index(&self) {
        let mut state = self.state.write();
        state.rebuild_index();
        info!("VFS index rebuilt: {} entries", state.index.len());
    }

    pub fn stats(&self) -> ResolverStats {
        let state = self.state.read();
        ResolverStats {
            total_files: state.total_files,
            total_directories: state.total_directories,
            total_bytes: state.total_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            mmap_opens: self.mmap_opens.load(Ordering::Relaxed),
        }
    }
}

fn default_mappings() -> Vec<PathMapping> {
    DEFAULT_PATH_MAPPINGS
        .iter()
        .map(|(guest, host)| PathMapping::new(guest, host))
        .collect()
}
