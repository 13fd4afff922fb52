//! Memory-mapped archive with a lazily decrypted TOC.
//!
//! State moves one way: a successfully opened [`RpfArchive`] has a parsed
//! header; the first read that touches the TOC decrypts the whole TOC
//! region once and keeps it. After that the plaintext is immutable and
//! shared by every reader without locking. A TOC that runs past the end
//! of the file is recorded as uncacheable on the first attempt and every
//! later read decrypts on demand.

use std::borrow::Cow;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{debug, warn};
use memmap2::Mmap;

use crate::crypto::{self, RpfKey, BLOCK_SIZE};
use crate::decompress;
use crate::entry::{self, RpfEntry};
use crate::header::{self, RpfHeader};
use crate::{Error, Result};

/// An open RPF archive.
pub struct RpfArchive {
    /// Archive file name
    name: String,
    /// Host path
    path: PathBuf,
    /// Memory-mapped file data
    mmap: Mmap,
    header: RpfHeader,
    key: Option<RpfKey>,
    /// Whole-TOC plaintext, or `None` when the TOC is truncated. Set once.
    toc: OnceLock<Option<Vec<u8>>>,
    entries: OnceLock<Vec<RpfEntry>>,
}

impl RpfArchive {
    /// Open an archive and validate its header.
    pub fn open<P: AsRef<Path>>(path: P, key: Option<RpfKey>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let header = header::parse_header(&mmap)?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        debug!(
            "Opened {}: toc_size={:#x} entries={} encrypted={}",
            name, header.toc_size, header.entry_count, header.encrypted
        );

        Ok(Self {
            name,
            path: path.to_path_buf(),
            mmap,
            header,
            key,
            toc: OnceLock::new(),
            entries: OnceLock::new(),
        })
    }

    /// Get the archive name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host path of the archive.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed header.
    #[inline]
    pub fn header(&self) -> &RpfHeader {
        &self.header
    }

    /// Archive length in bytes.
    #[inline]
    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Whether the archive file is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Whether the decrypted TOC has been cached.
    #[inline]
    pub fn is_toc_cached(&self) -> bool {
        matches!(self.toc.get(), Some(Some(_)))
    }

    fn key_bytes(&self) -> &[u8] {
        self.key.as_ref().map_or(&[], |k| k.as_bytes())
    }

    /// Decrypt and cache the whole TOC.
    ///
    /// Returns `None` for unencrypted archives and when the TOC extends
    /// past the end of the file; reads then fall back to passthrough or
    /// per-request decryption respectively.
    pub fn ensure_toc_decrypted(&self) -> Option<&[u8]> {
        if !self.header.encrypted {
            return None;
        }

        self.toc
            .get_or_init(|| {
                let range = self.header.toc_range();
                if range.end > self.len() {
                    warn!(
                        "{}: TOC {:#x}..{:#x} extends past archive end {:#x}; not caching",
                        self.name,
                        range.start,
                        range.end,
                        self.len()
                    );
                    return None;
                }

                let mut plaintext = self.mmap[range.start as usize..range.end as usize].to_vec();
                crypto::decrypt_toc_block(self.key_bytes(), &mut plaintext, 0);
                debug!("{}: cached {} TOC bytes", self.name, plaintext.len());
                Some(plaintext)
            })
            .as_deref()
    }

    /// Read up to `buf.len()` bytes at `offset`.
    ///
    /// Bytes before and after the TOC are returned raw; bytes inside an
    /// encrypted TOC are returned decrypted. Short reads happen only at
    /// end of file.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let len = self.len();
        if offset >= len || buf.is_empty() {
            return 0;
        }

        let end = len.min(offset + buf.len() as u64);
        let out = &mut buf[..(end - offset) as usize];
        let toc = self.header.toc_range();

        let before = offset..end.min(toc.start);
        let inside = offset.max(toc.start)..end.min(toc.end);
        let after = offset.max(toc.end)..end;

        for raw in [&before, &after] {
            if raw.start < raw.end {
                out[span(raw, offset)].copy_from_slice(&self.mmap[span(raw, 0)]);
            }
        }

        if inside.start < inside.end {
            let dest = &mut out[span(&inside, offset)];
            if !self.header.encrypted {
                dest.copy_from_slice(&self.mmap[span(&inside, 0)]);
            } else if let Some(plain) = self.ensure_toc_decrypted() {
                dest.copy_from_slice(&plain[span(&inside, toc.start)]);
            } else {
                self.decrypt_on_demand(&inside, dest);
            }
        }

        out.len()
    }

    /// Decrypt just the blocks covering `range`, keeping TOC-relative
    /// block alignment.
    fn decrypt_on_demand(&self, range: &Range<u64>, dest: &mut [u8]) {
        let toc_start = self.header.toc_range().start;
        let block = BLOCK_SIZE as u64;

        let aligned_start = toc_start + (range.start - toc_start) / block * block;
        let aligned_end =
            (toc_start + (range.end - toc_start).div_ceil(block) * block).min(self.len());

        let mut scratch = self.mmap[aligned_start as usize..aligned_end as usize].to_vec();
        crypto::decrypt_toc_block(self.key_bytes(), &mut scratch, aligned_start - toc_start);

        dest.copy_from_slice(&scratch[span(range, aligned_start)]);
    }

    /// TOC plaintext, decrypting without caching if the full region is
    /// unavailable.
    fn plaintext_toc(&self) -> Cow<'_, [u8]> {
        if let Some(toc) = self.ensure_toc_decrypted() {
            return Cow::Borrowed(toc);
        }

        let range = self.header.toc_range();
        let end = range.end.min(self.len()).max(range.start.min(self.len()));
        let start = range.start.min(end);
        let raw = &self.mmap[start as usize..end as usize];

        if self.header.encrypted {
            let mut owned = raw.to_vec();
            crypto::decrypt_toc_block(self.key_bytes(), &mut owned, 0);
            Cow::Owned(owned)
        } else {
            Cow::Borrowed(raw)
        }
    }

    /// All TOC entries, parsed once.
    pub fn entries(&self) -> &[RpfEntry] {
        self.entries.get_or_init(|| {
            let toc = self.plaintext_toc();
            entry::list_toc_entries(&toc, self.header.entry_count)
        })
    }

    /// Number of entries.
    #[inline]
    pub fn entry_count(&self) -> usize {
        self.entries().len()
    }

    /// Iterate over file (non-directory) entries.
    pub fn files(&self) -> impl Iterator<Item = &RpfEntry> + '_ {
        self.entries().iter().filter(|e| !e.is_directory)
    }

    /// Find a file entry by path (case-insensitive, either separator).
    pub fn find(&self, name: &str) -> Option<&RpfEntry> {
        let normalized = name.replace('\\', "/");
        let normalized = normalized.trim_matches('/');
        self.files()
            .find(|e| e.name.eq_ignore_ascii_case(normalized))
    }

    /// Read entry contents - handles bounds, decryption and decompression.
    pub fn read_entry(&self, entry: &RpfEntry) -> Result<Vec<u8>> {
        if entry.is_directory {
            return Err(Error::EntryNotFound(entry.name.clone()));
        }
        entry.check_bounds(self.len())?;

        let start = entry.offset as usize;
        let mut data = self.mmap[start..start + entry.stored_len() as usize].to_vec();

        if entry.is_encrypted {
            crypto::decrypt_body(self.key_bytes(), &mut data);
        }
        if entry.is_compressed {
            data = decompress::decompress_entry(data, entry.size as usize);
        }

        Ok(data)
    }

    /// Read a file entry by path.
    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find(name)
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))?;
        self.read_entry(entry)
    }
}

/// Index range of `range` relative to `base`.
#[inline]
fn span(range: &Range<u64>, base: u64) -> Range<usize> {
    (range.start - base) as usize..(range.end - base) as usize
}

impl std::fmt::Debug for RpfArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpfArchive")
            .field("name", &self.name)
            .field("header", &self.header)
            .field("toc_cached", &self.is_toc_cached())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::header::TOC_OFFSET;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    pub(crate) const KEY: [u8; 32] = [0x5A; 32];

    /// One file in a fixture archive.
    pub(crate) struct Fixture<'a> {
        pub name: &'a str,
        pub data: &'a [u8],
        pub compress: bool,
        /// Cipher the stored body with the single-pass body cipher.
        pub encrypt: bool,
    }

    /// Build an archive with a root directory holding `files`. Data blocks
    /// start at 0x1000 and are padded to the larger of the two sizes.
    pub(crate) fn build_archive(files: &[Fixture<'_>], encrypt_toc: bool) -> Vec<u8> {
        let count = files.len() as u32 + 1;
        let mut names = vec![0u8];
        let mut records = Vec::new();
        let mut bodies = Vec::new();
        let data_start = 0x1000u32;

        records.extend(rec(0, 0x8000_0000, 1, files.len() as u32));
        for file in files {
            let name_offset = names.len() as u32;
            names.extend_from_slice(file.name.as_bytes());
            names.push(0);

            let offset = data_start + bodies.len() as u32;
            let (mut stored, mut field3) = if file.compress {
                let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
                enc.write_all(file.data).unwrap();
                let stored = enc.finish().unwrap();
                let f3 = ((stored.len() as u32) << 8) | 1;
                (stored, f3)
            } else {
                (file.data.to_vec(), 0)
            };
            if file.encrypt {
                crypto::encrypt_body(&KEY, &mut stored);
                field3 |= 0x02;
            }

            records.extend(rec(name_offset, file.data.len() as u32, offset, field3));
            // Reserve max(size, stored) so every entry stays in bounds.
            let reserved = stored.len().max(file.data.len());
            bodies.extend(stored);
            bodies.resize(offset as usize - data_start as usize + reserved, 0);
        }

        let mut toc = records;
        toc.extend(names);
        toc.resize(toc.len().div_ceil(16) * 16, 0);
        assert!(toc.len() <= (data_start as u64 - TOC_OFFSET) as usize);

        if encrypt_toc {
            crypto::encrypt_toc_block(&KEY, &mut toc, 0);
        }

        let mut out = b"RPF2".to_vec();
        for v in [toc.len() as u32, count, 0, encrypt_toc as u32] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.resize(TOC_OFFSET as usize, 0xEE);
        out.extend(toc);
        out.resize(data_start as usize, 0);
        out.extend(bodies);
        out
    }

    fn rec(a: u32, b: u32, c: u32, d: u32) -> Vec<u8> {
        [a, b, c, d].iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub(crate) fn write_archive(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn sample_files() -> Vec<Fixture<'static>> {
        vec![
            Fixture {
                name: "handling.dat",
                data: b"; handling data\nADMIRAL 1600.0 3.0 85",
                compress: true,
                encrypt: false,
            },
            Fixture {
                name: "gta.dat",
                data: b"IDE common:/data/default.ide",
                compress: false,
                encrypt: false,
            },
        ]
    }

    #[test]
    fn test_open_and_read_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(dir.path(), "common.rpf", &build_archive(&sample_files(), true));

        let archive = RpfArchive::open(&path, RpfKey::from_slice(&KEY)).unwrap();
        assert_eq!(archive.entry_count(), 3);
        assert_eq!(archive.files().count(), 2);
        assert!(archive.is_toc_cached());

        let data = archive.read_file("HANDLING.DAT").unwrap();
        assert_eq!(data, b"; handling data\nADMIRAL 1600.0 3.0 85");
        assert_eq!(archive.read_file("/gta.dat").unwrap(), b"IDE common:/data/default.ide");
    }

    #[test]
    fn test_entries_within_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_archive(dir.path(), "common.rpf", &build_archive(&sample_files(), false));
        let archive = RpfArchive::open(&path, None).unwrap();

        for entry in archive.files() {
            assert!(entry.offset as u64 + entry.max_len() <= archive.len());
        }
    }

    #[test]
    fn test_read_at_splits_around_toc() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = build_archive(&sample_files(), true);
        let path = write_archive(dir.path(), "common.rpf", &bytes);
        let archive = RpfArchive::open(&path, RpfKey::from_slice(&KEY)).unwrap();

        let toc = archive.header().toc_range();
        let mut plain_toc = bytes[toc.start as usize..toc.end as usize].to_vec();
        crypto::decrypt_toc_block(&KEY, &mut plain_toc, 0);

        let mut buf = vec![0u8; 0x810];
        assert_eq!(archive.read_at(0, &mut buf), 0x810);
        assert_eq!(&buf[..0x800], &bytes[..0x800]);
        assert_eq!(&buf[0x800..], &plain_toc[..0x10]);

        // Spanning the TOC end: decrypted tail then raw padding.
        let start = toc.end - 8;
        let mut buf = vec![0u8; 24];
        assert_eq!(archive.read_at(start, &mut buf), 24);
        assert_eq!(&buf[..8], &plain_toc[plain_toc.len() - 8..]);
        assert_eq!(&buf[8..], &bytes[toc.end as usize..toc.end as usize + 16]);
    }

    #[test]
    fn test_read_at_short_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = build_archive(&sample_files(), false);
        let path = write_archive(dir.path(), "common.rpf", &bytes);
        let archive = RpfArchive::open(&path, None).unwrap();

        let mut buf = vec![0u8; 64];
        let n = archive.read_at(archive.len() - 10, &mut buf);
        assert_eq!(n, 10);
        assert_eq!(&buf[..10], &bytes[bytes.len() - 10..]);
        assert_eq!(archive.read_at(archive.len() + 5, &mut buf), 0);
    }

    #[test]
    fn test_truncated_toc_decrypts_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let full = build_archive(&sample_files(), true);
        let toc = crate::header::parse_header(&full).unwrap().toc_range();

        // Cut the file in the middle of the TOC, on a block boundary.
        let cut = (toc.start + 32) as usize;
        let path = write_archive(dir.path(), "cut.rpf", &full[..cut]);
        let archive = RpfArchive::open(&path, RpfKey::from_slice(&KEY)).unwrap();

        let mut expected = full[toc.start as usize..cut].to_vec();
        crypto::decrypt_toc_block(&KEY, &mut expected, 0);

        let mut buf = vec![0u8; 20];
        assert_eq!(archive.read_at(toc.start + 4, &mut buf), 20);
        assert_eq!(&buf[..], &expected[4..24]);
        assert!(!archive.is_toc_cached());
    }

    #[test]
    fn test_truncated_toc_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let full = build_archive(&sample_files(), true);
        let toc = crate::header::parse_header(&full).unwrap().toc_range();

        let path = write_archive(dir.path(), "cut.rpf", &full[..(toc.start + 48) as usize]);
        let archive = RpfArchive::open(&path, RpfKey::from_slice(&KEY)).unwrap();

        assert!(archive.ensure_toc_decrypted().is_none());
        assert!(matches!(archive.toc.get(), Some(None)));

        let mut buf = vec![0u8; 16];
        for _ in 0..3 {
            assert_eq!(archive.read_at(toc.start, &mut buf), 16);
        }
        assert!(matches!(archive.toc.get(), Some(None)));
        assert!(!archive.is_toc_cached());
    }

    #[test]
    fn test_read_encrypted_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let files = [
            Fixture {
                name: "vehicles.ide",
                data: b"cars\nADMIRAL, admiral, car, ADMIRAL\nend\n",
                compress: false,
                encrypt: true,
            },
            Fixture {
                name: "carcols.dat",
                data: &[0x33; 200],
                compress: true,
                encrypt: true,
            },
        ];
        let bytes = build_archive(&files, true);
        let path = write_archive(dir.path(), "common.rpf", &bytes);
        let archive = RpfArchive::open(&path, RpfKey::from_slice(&KEY)).unwrap();

        let ide = archive.find("vehicles.ide").unwrap().clone();
        assert!(ide.is_encrypted);
        let start = ide.offset as usize;
        assert_ne!(&bytes[start..start + 16], &files[0].data[..16]);

        assert_eq!(archive.read_entry(&ide).unwrap(), files[0].data);
        assert_eq!(archive.read_file("carcols.dat").unwrap(), vec![0x33; 200]);
    }

    #[test]
    fn test_out_of_bounds_entry() {
        let dir = tempfile::tempdir().unwrap();
        let full = build_archive(&sample_files(), false);
        let path = write_archive(dir.path(), "cut.rpf", &full[..full.len() - 4]);
        let archive = RpfArchive::open(&path, None).unwrap();

        let last = archive.files().last().unwrap().clone();
        assert!(matches!(
            archive.read_entry(&last),
            Err(Error::EntryOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = build_archive(&sample_files(), false);
        bytes[..4].copy_from_slice(b"RPF3");
        let path = write_archive(dir.path(), "bad.rpf", &bytes);

        assert!(matches!(
            RpfArchive::open(&path, None),
            Err(Error::InvalidMagic(_))
        ));
    }
}
