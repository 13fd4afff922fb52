//! Offset-based reads against named archives.
//!
//! [`ArchiveStreams`] keeps one [`RpfArchive`] per archive name under a
//! root directory. A name is opened at most once: an archive that fails
//! to open stays unusable until [`ArchiveStreams::reset`]. Names are
//! case-insensitive both as slot keys and on disk. Caller handles are
//! bound to archive names on first successful read.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::archive::RpfArchive;
use crate::crypto::RpfKey;

/// Archives tried, in order, for a handle with no binding.
pub const FALLBACK_ARCHIVES: &[&str] = &["common.rpf", "xbox360.rpf", "audio.rpf"];

/// Registry of open archives and handle bindings.
pub struct ArchiveStreams {
    root: PathBuf,
    key: Option<RpfKey>,
    /// `None` marks an archive that failed to open
    slots: Mutex<FxHashMap<String, Option<Arc<RpfArchive>>>>,
    bindings: Mutex<FxHashMap<u32, String>>,
}

impl ArchiveStreams {
    /// Create a registry serving archives from `root`.
    pub fn new<P: AsRef<Path>>(root: P, key: Option<RpfKey>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            key,
            slots: Mutex::new(FxHashMap::default()),
            bindings: Mutex::new(FxHashMap::default()),
        }
    }

    /// Directory archives are opened from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get an open archive, opening it on first use.
    pub fn open_or_get(&self, name: &str) -> Option<Arc<RpfArchive>> {
        let slot_key = name.to_ascii_lowercase();
        let mut slots = self.slots.lock();

        if let Some(slot) = slots.get(&slot_key) {
            return slot.clone();
        }

        let path = self.locate(name);
        let slot = match RpfArchive::open(&path, self.key.clone()) {
            Ok(archive) => Some(Arc::new(archive)),
            Err(e) => {
                warn!("Archive {} unusable: {}", path.display(), e);
                None
            }
        };

        slots.insert(slot_key, slot.clone());
        slot
    }

    /// Host path for `name`, matching the file name case-insensitively
    /// when the exact spelling does not exist.
    fn locate(&self, name: &str) -> PathBuf {
        let exact = self.root.join(name);
        if exact.is_file() {
            return exact;
        }

        let (dir, file_name) = match name.rsplit_once(['/', '\\']) {
            Some((dir, file_name)) => (self.root.join(dir), file_name),
            None => (self.root.clone(), name),
        };

        std::fs::read_dir(&dir)
            .into_iter()
            .flatten()
            .flatten()
            .find(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|n| n.eq_ignore_ascii_case(file_name))
            })
            .map_or(exact, |e| e.path())
    }

    /// Read from a named archive. Returns 0 when the archive is unusable or
    /// `offset` is past its end.
    pub fn read_at(&self, name: &str, offset: u64, buf: &mut [u8]) -> usize {
        match self.open_or_get(name) {
            Some(archive) => archive.read_at(offset, buf),
            None => 0,
        }
    }

    /// Read through a caller handle.
    ///
    /// An unbound handle tries [`FALLBACK_ARCHIVES`] in order and is bound
    /// to the first archive that yields data.
    pub fn read_handle(&self, handle: u32, buf: &mut [u8], offset: u64) -> usize {
        if let Some(name) = self.bound_archive(handle) {
            return self.read_at(&name, offset, buf);
        }

        for name in FALLBACK_ARCHIVES {
            let read = self.read_at(name, offset, buf);
            if read > 0 {
                debug!("Handle {:#x} bound to {}", handle, name);
                self.bind_handle(handle, name);
                return read;
            }
        }

        0
    }

    /// Bind `handle` to an archive name for the rest of its lifetime.
    pub fn bind_handle(&self, handle: u32, name: &str) {
        self.bindings.lock().insert(handle, name.to_string());
    }

    /// Forget a handle binding.
    pub fn release_handle(&self, handle: u32) -> bool {
        self.bindings.lock().remove(&handle).is_some()
    }

    /// Archive name a handle is bound to.
    pub fn bound_archive(&self, handle: u32) -> Option<String> {
        self.bindings.lock().get(&handle).cloned()
    }

    /// Names of archives opened successfully so far.
    pub fn open_archives(&self) -> Vec<String> {
        let slots = self.slots.lock();
        let mut names: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Drop every archive and binding.
    pub fn reset(&self) {
        self.slots.lock().clear();
        self.bindings.lock().clear();
    }
}

impl std::fmt::Debug for ArchiveStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStreams")
            .field("root", &self.root)
            .field("open", &self.open_archives())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::{build_archive, write_archive, Fixture, KEY};

    fn fixture() -> Vec<u8> {
        build_archive(
            &[Fixture {
                name: "default.ide",
                data: b"objs\nend",
                compress: false,
                encrypt: false,
            }],
            true,
        )
    }

    #[test]
    fn test_unbound_handle_uses_fallback_list() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = fixture();
        write_archive(dir.path(), "xbox360.rpf", &bytes);

        let streams = ArchiveStreams::new(dir.path(), RpfKey::from_slice(&KEY));
        let mut buf = [0u8; 4];

        assert_eq!(streams.read_handle(0x40, &mut buf, 0), 4);
        assert_eq!(&buf, b"RPF2");
        assert_eq!(streams.bound_archive(0x40).as_deref(), Some("xbox360.rpf"));
        assert_eq!(streams.open_archives(), vec!["xbox360.rpf".to_string()]);

        assert!(streams.release_handle(0x40));
        assert!(streams.bound_archive(0x40).is_none());
    }

    #[test]
    fn test_failed_open_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let streams = ArchiveStreams::new(dir.path(), None);
        let mut buf = [0u8; 16];

        assert_eq!(streams.read_at("common.rpf", 0, &mut buf), 0);

        // Appears later, but the slot stays unusable until reset.
        write_archive(dir.path(), "common.rpf", &fixture());
        assert_eq!(streams.read_at("common.rpf", 0, &mut buf), 0);

        streams.reset();
        assert_eq!(streams.read_at("common.rpf", 0, &mut buf), 16);
    }

    #[test]
    fn test_bound_handle_reads_bound_archive() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = fixture();
        write_archive(dir.path(), "audio.rpf", &bytes);

        let streams = ArchiveStreams::new(dir.path(), RpfKey::from_slice(&KEY));
        streams.bind_handle(9, "audio.rpf");

        let mut buf = vec![0u8; 8];
        let data_offset = 0x1000;
        assert_eq!(streams.read_handle(9, &mut buf, data_offset), 8);
        assert_eq!(&buf, b"objs\nend");
    }

    #[test]
    fn test_names_match_any_case() {
        let dir = tempfile::tempdir().unwrap();
        write_archive(dir.path(), "COMMON.RPF", &fixture());

        let streams = ArchiveStreams::new(dir.path(), RpfKey::from_slice(&KEY));
        let mut buf = [0u8; 4];

        assert_eq!(streams.read_at("common.rpf", 0, &mut buf), 4);
        assert_eq!(&buf, b"RPF2");
        assert_eq!(streams.read_at("Common.Rpf", 0, &mut buf), 4);

        let a = streams.open_or_get("common.rpf").unwrap();
        let b = streams.open_or_get("COMMON.RPF").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(streams.open_archives(), vec!["common.rpf".to_string()]);
    }
}
