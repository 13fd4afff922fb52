//! Cross-archive file index.
//!
//! [`ArchiveLoader`] opens every `.rpf` under a set of directories and
//! indexes their file entries by normalized path, so a file can be found
//! without knowing which archive holds it. When two archives hold the same
//! path the one loaded last wins. Extracted bodies are cached in memory
//! until [`ArchiveLoader::clear_cache`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use liberty_common::crc;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use walkdir::WalkDir;

use crate::archive::RpfArchive;
use crate::crypto::RpfKey;
use crate::Result;

/// Counters reported by [`ArchiveLoader::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub archives_loaded: u64,
    pub files_extracted: u64,
    pub bytes_extracted: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Default)]
struct Index {
    /// Load order
    archives: Vec<Arc<RpfArchive>>,
    /// Normalized entry path -> (archive slot, entry index)
    files: FxHashMap<String, (usize, usize)>,
}

impl Index {
    fn find(&self, path: &Path) -> Option<usize> {
        self.archives.iter().position(|a| a.path() == path)
    }
}

/// Index of file entries across many archives.
#[derive(Debug)]
pub struct ArchiveLoader {
    key: Option<RpfKey>,
    temp_dir: PathBuf,
    index: RwLock<Index>,
    extracted: Mutex<FxHashMap<String, Arc<[u8]>>>,
    files_extracted: AtomicU64,
    bytes_extracted: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

/// Lookup key of an archive entry path: lowercase, `/`-separated, no
/// leading separator.
pub fn loader_key(path: &str) -> String {
    path.to_ascii_lowercase()
        .replace('\\', "/")
        .trim_start_matches('/')
        .to_string()
}

/// Default directory for [`ArchiveLoader::extract_to_temp`].
pub fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("liberty").join("rpf_cache")
}

impl ArchiveLoader {
    /// Create an empty loader. `temp_dir` receives files written by
    /// [`extract_to_temp`](Self::extract_to_temp).
    pub fn new<P: AsRef<Path>>(key: Option<RpfKey>, temp_dir: P) -> Self {
        Self {
            key,
            temp_dir: temp_dir.as_ref().to_path_buf(),
            index: RwLock::new(Index::default()),
            extracted: Mutex::new(FxHashMap::default()),
            files_extracted: AtomicU64::new(0),
            bytes_extracted: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Load every `.rpf` (any case) under `dir`. Returns the number of
    /// archives loaded; archives that fail to open are skipped.
    pub fn scan_directory<P: AsRef<Path>>(&self, dir: P, recursive: bool) -> usize {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            debug!("Archive scan skipped, not a directory: {}", dir.display());
            return 0;
        }

        let walker = WalkDir::new(dir).min_depth(1).sort_by_file_name();
        let walker = if recursive { walker } else { walker.max_depth(1) };

        let mut loaded = 0;
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            let is_rpf = entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("rpf"));
            if !is_rpf {
                continue;
            }

            match self.load_archive(entry.path()) {
                Ok(_) => loaded += 1,
                Err(e) => warn!("Skipping archive {}: {}", entry.path().display(), e),
            }
        }

        info!("Loaded {} archives from {}", loaded, dir.display());
        loaded
    }

    /// Open one archive and index its files. Returns the number of file
    /// entries indexed. Loading an archive twice re-indexes it.
    pub fn load_archive<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let archive = RpfArchive::open(path.as_ref(), self.key.clone())?;
        let mut index = self.index.write();

        let slot = match index.find(archive.path()) {
            Some(slot) => {
                index.archives[slot] = Arc::new(archive);
                index.files.retain(|_, (s, _)| *s != slot);
                slot
            }
            None => {
                index.archives.push(Arc::new(archive));
                index.archives.len() - 1
            }
        };

        let archive = Arc::clone(&index.archives[slot]);
        let mut indexed = 0;
        for (i, entry) in archive.entries().iter().enumerate() {
            if entry.is_directory || entry.name.is_empty() {
                continue;
            }
            index.files.insert(loader_key(&entry.name), (slot, i));
            indexed += 1;
        }

        debug!("Indexed {} files from {}", indexed, archive.name());
        Ok(indexed)
    }

    /// Whether any loaded archive holds `path`.
    pub fn has_file(&self, path: &str) -> bool {
        self.index.read().files.contains_key(&loader_key(path))
    }

    /// Host path of the archive that serves `path`.
    pub fn containing_archive(&self, path: &str) -> Option<PathBuf> {
        let index = self.index.read();
        let (slot, _) = index.files.get(&loader_key(path))?;
        Some(index.archives[*slot].path().to_path_buf())
    }

    /// Contents of `path`, decrypted and inflated, served from the cache
    /// after the first read.
    pub fn extract_file(&self, path: &str) -> Option<Arc<[u8]>> {
        let key = loader_key(path);
        if let Some(data) = self.extracted.lock().get(&key) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Some(Arc::clone(data));
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let (archive, entry_index) = {
            let index = self.index.read();
            let (slot, entry_index) = *index.files.get(&key)?;
            (Arc::clone(&index.archives[slot]), entry_index)
        };

        let entry = archive.entries().get(entry_index)?;
        let data: Arc<[u8]> = match archive.read_entry(entry) {
            Ok(data) => data.into(),
            Err(e) => {
                warn!("Failed to extract {} from {}: {}", path, archive.name(), e);
                return None;
            }
        };

        self.files_extracted.fetch_add(1, Ordering::Relaxed);
        self.bytes_extracted
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        self.extracted.lock().insert(key, Arc::clone(&data));
        Some(data)
    }

    /// Extract `path` into the temp directory and return the host file.
    ///
    /// The file name is the CRC32C of the normalized path plus the
    /// original extension, so repeated calls reuse the same file.
    pub fn extract_to_temp(&self, path: &str) -> Option<PathBuf> {
        let data = self.extract_file(path)?;

        let key = loader_key(path);
        let extension = Path::new(&key)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let out = self
            .temp_dir
            .join(crc::cache_file_name(Path::new(&key), &extension));

        if let Err(e) = fs::create_dir_all(&self.temp_dir).and_then(|_| fs::write(&out, &data)) {
            warn!("Failed to write {}: {}", out.display(), e);
            return None;
        }
        Some(out)
    }

    /// File entry names of a loaded archive, in TOC order.
    pub fn list_files<P: AsRef<Path>>(&self, archive_path: P) -> Vec<String> {
        let index = self.index.read();
        let Some(slot) = index.find(archive_path.as_ref()) else {
            return Vec::new();
        };
        index.archives[slot]
            .files()
            .map(|e| e.name.clone())
            .collect()
    }

    /// Host paths of loaded archives, in load order.
    pub fn loaded_archives(&self) -> Vec<PathBuf> {
        self.index
            .read()
            .archives
            .iter()
            .map(|a| a.path().to_path_buf())
            .collect()
    }

    /// Directory used by [`extract_to_temp`](Self::extract_to_temp).
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Drop cached file contents; the index is kept.
    pub fn clear_cache(&self) {
        self.extracted.lock().clear();
    }

    /// Drop every archive, the index and the cache.
    pub fn reset(&self) {
        *self.index.write() = Index::default();
        self.clear_cache();
    }

    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            archives_loaded: self.index.read().archives.len() as u64,
            files_extracted: self.files_extracted.load(Ordering::Relaxed),
            bytes_extracted: self.bytes_extracted.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    /// Log loaded archives and counters.
    pub fn log_status(&self) {
        let stats = self.stats();
        let index = self.index.read();
        info!(
            "Archive loader: {} archives, {} indexed files",
            stats.archives_loaded,
            index.files.len()
        );
        for archive in &index.archives {
            info!("  {} ({} files)", archive.path().display(), archive.files().count());
        }
        info!(
            "  extracted {} files ({} bytes), cache {} hits / {} misses",
            stats.files_extracted, stats.bytes_extracted, stats.cache_hits, stats.cache_misses
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::{build_archive, write_archive, Fixture, KEY};

    fn file<'a>(name: &'a str, data: &'a [u8]) -> Fixture<'a> {
        Fixture {
            name,
            data,
            compress: false,
            encrypt: false,
        }
    }

    fn loader(dir: &Path) -> ArchiveLoader {
        ArchiveLoader::new(RpfKey::from_slice(&KEY), dir.join("tmp"))
    }

    #[test]
    fn test_scan_indexes_files_across_archives() {
        let dir = tempfile::tempdir().unwrap();
        let mods = dir.path().join("mods");
        fs::create_dir_all(mods.join("nested")).unwrap();

        write_archive(&mods, "a.rpf", &build_archive(&[file("data/Handling.dat", b"a")], true));
        write_archive(
            &mods.join("nested"),
            "B.RPF",
            &build_archive(&[file("text/american.gxt", b"gxt")], false),
        );
        fs::write(mods.join("readme.txt"), b"not an archive").unwrap();
        fs::write(mods.join("broken.rpf"), b"RPF9").unwrap();

        let flat = loader(dir.path());
        assert_eq!(flat.scan_directory(&mods, false), 1);
        assert!(!flat.has_file("text/american.gxt"));

        let loader = loader(dir.path());
        assert_eq!(loader.scan_directory(&mods, true), 2);
        assert!(loader.has_file("\\DATA\\handling.dat"));
        assert!(loader.has_file("/text/american.gxt"));
        assert!(!loader.has_file("data"));
        assert_eq!(
            loader.containing_archive("text/american.gxt"),
            Some(mods.join("nested").join("B.RPF"))
        );
        assert_eq!(loader.stats().archives_loaded, 2);
    }

    #[test]
    fn test_later_archive_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_archive(dir.path(), "1.rpf", &build_archive(&[file("gta.dat", b"first")], false));
        let second = write_archive(dir.path(), "2.rpf", &build_archive(&[file("gta.dat", b"second")], false));

        let loader = loader(dir.path());
        assert_eq!(loader.load_archive(&first).unwrap(), 1);
        assert_eq!(loader.load_archive(&second).unwrap(), 1);

        assert_eq!(loader.containing_archive("gta.dat"), Some(second.clone()));
        assert_eq!(&*loader.extract_file("gta.dat").unwrap(), b"second");
        assert_eq!(loader.loaded_archives(), vec![first, second]);
    }

    #[test]
    fn test_extract_caches_contents() {
        let dir = tempfile::tempdir().unwrap();
        let files = [
            Fixture {
                name: "carcols.dat",
                data: &[0x21; 300],
                compress: true,
                encrypt: true,
            },
            file("gta.dat", b"IDE common:/data/default.ide"),
        ];
        let path = write_archive(dir.path(), "common.rpf", &build_archive(&files, true));

        let loader = loader(dir.path());
        loader.load_archive(&path).unwrap();

        assert_eq!(&*loader.extract_file("CARCOLS.DAT").unwrap(), &[0x21; 300][..]);
        assert_eq!(&*loader.extract_file("carcols.dat").unwrap(), &[0x21; 300][..]);
        assert!(loader.extract_file("missing.dat").is_none());

        let stats = loader.stats();
        assert_eq!(stats.files_extracted, 1);
        assert_eq!(stats.bytes_extracted, 300);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 2);

        loader.clear_cache();
        assert!(loader.extract_file("carcols.dat").is_some());
        assert_eq!(loader.stats().files_extracted, 2);
        assert!(loader.has_file("gta.dat"));
    }

    #[test]
    fn test_extract_to_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            "common.rpf",
            &build_archive(&[file("data/Default.IDE", b"objs\nend\n")], false),
        );

        let loader = loader(dir.path());
        loader.load_archive(&path).unwrap();

        let out = loader.extract_to_temp("data/default.ide").unwrap();
        assert!(out.starts_with(dir.path().join("tmp")));
        assert_eq!(out.extension().and_then(|e| e.to_str()), Some("ide"));
        assert_eq!(fs::read(&out).unwrap(), b"objs\nend\n");
        assert_eq!(loader.extract_to_temp("DATA\\default.ide"), Some(out));
        assert!(loader.extract_to_temp("data/other.ide").is_none());
    }

    #[test]
    fn test_list_files_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(
            dir.path(),
            "common.rpf",
            &build_archive(&[file("gta.dat", b"g"), file("handling.dat", b"h")], false),
        );

        let loader = loader(dir.path());
        loader.load_archive(&path).unwrap();
        loader.load_archive(&path).unwrap();

        assert_eq!(loader.list_files(&path), vec!["gta.dat", "handling.dat"]);
        assert!(loader.list_files(dir.path().join("other.rpf")).is_empty());
        assert_eq!(loader.stats().archives_loaded, 1);

        loader.reset();
        assert!(!loader.has_file("gta.dat"));
        assert!(loader.loaded_archives().is_empty());
    }
}
