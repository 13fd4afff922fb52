//! Table-of-contents records.
//!
//! The TOC is `entry_count` 16-byte records followed by a table of
//! NUL-terminated names. Record layout (all little-endian u32):
//!
//! | field        | file entry                                   | directory entry            |
//! |--------------|----------------------------------------------|----------------------------|
//! | name_offset  | offset into the name table                   | same                       |
//! | field1       | uncompressed size (top bit clear)            | top bit set                |
//! | field2       | bits 0-23 data offset, bits 24-31 resource   | bits 0-30 first child index|
//! | field3       | bit 0 compressed, bit 1 encrypted, 8-31 csize| bits 0-27 child count      |

use std::path::{Component, Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use liberty_common::BinaryReader;

use crate::header::{RpfHeader, TOC_OFFSET};
use crate::{Error, Result};

/// Size of one TOC record.
pub const TOC_RECORD_SIZE: usize = 16;

const DIRECTORY_FLAG: u32 = 0x8000_0000;

/// An entry (file or directory) of an RPF archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpfEntry {
    /// Path within the archive, `/`-separated.
    pub name: String,
    /// Byte offset of the entry data.
    pub offset: u32,
    /// Uncompressed size in bytes.
    pub size: u32,
    /// Stored size in bytes. Equals `size` when not compressed.
    pub compressed_size: u32,
    /// Resource type tag (top byte of field2).
    pub resource_type: u8,
    /// Whether this is a directory record.
    pub is_directory: bool,
    /// Whether the data is deflated.
    pub is_compressed: bool,
    /// Whether the data is ciphered.
    pub is_encrypted: bool,
}

impl RpfEntry {
    /// Number of bytes stored in the archive for this entry.
    #[inline]
    pub fn stored_len(&self) -> u32 {
        if self.compressed_size > 0 {
            self.compressed_size
        } else {
            self.size
        }
    }

    /// Larger of the two sizes; used for buffer accounting.
    #[inline]
    pub fn max_len(&self) -> u64 {
        self.size.max(self.compressed_size) as u64
    }

    /// Validate that the entry lies inside an archive of `archive_len` bytes.
    ///
    /// Bounds are checked when the entry is read, not when the TOC is
    /// parsed, so truncated archives still list.
    pub fn check_bounds(&self, archive_len: u64) -> Result<()> {
        let end = self.offset as u64 + self.max_len();
        if end > archive_len {
            return Err(Error::EntryOutOfBounds {
                name: self.name.clone(),
                end,
                len: archive_len,
            });
        }
        Ok(())
    }

    /// Relative output path for extraction.
    ///
    /// Rejects names that are empty, absolute or climb out of the output
    /// directory.
    pub fn output_path(&self) -> Result<PathBuf> {
        let path = Path::new(&self.name);
        let mut out = PathBuf::new();

        for component in path.components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                _ => return Err(Error::UnsafeEntryName(self.name.clone())),
            }
        }

        if out.as_os_str().is_empty() {
            return Err(Error::UnsafeEntryName(self.name.clone()));
        }
        Ok(out)
    }

    /// Get the file extension, if any.
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.name).extension().and_then(|e| e.to_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct TocRecord {
    name_offset: u32,
    field1: u32,
    field2: u32,
    field3: u32,
}

impl TocRecord {
    fn read(chunk: &[u8]) -> Self {
        Self {
            name_offset: LittleEndian::read_u32(&chunk[0..4]),
            field1: LittleEndian::read_u32(&chunk[4..8]),
            field2: LittleEndian::read_u32(&chunk[8..12]),
            field3: LittleEndian::read_u32(&chunk[12..16]),
        }
    }

    #[inline]
    fn is_directory(&self) -> bool {
        self.field1 & DIRECTORY_FLAG != 0
    }

    fn children(&self) -> (usize, usize) {
        (
            (self.field2 & 0x7FFF_FFFF) as usize,
            (self.field3 & 0x0FFF_FFFF) as usize,
        )
    }

    fn decode(&self) -> RpfEntry {
        if self.is_directory() {
            return RpfEntry {
                name: String::new(),
                offset: 0,
                size: 0,
                compressed_size: 0,
                resource_type: 0,
                is_directory: true,
                is_compressed: false,
                is_encrypted: false,
            };
        }

        let is_compressed = self.field3 & 0x01 != 0;
        RpfEntry {
            name: String::new(),
            offset: self.field2 & 0x00FF_FFFF,
            size: self.field1,
            compressed_size: if is_compressed {
                self.field3 >> 8
            } else {
                self.field1
            },
            resource_type: (self.field2 >> 24) as u8,
            is_directory: false,
            is_compressed,
            is_encrypted: self.field3 & 0x02 != 0,
        }
    }
}

/// List the entries of an archive held in memory.
///
/// `archive` is the whole archive (or a prefix of it); the TOC is read
/// from [`TOC_OFFSET`] as-is, so callers holding an encrypted archive must
/// decrypt the TOC region first. Records that fall past the end of the
/// buffer are dropped.
pub fn list_entries(archive: &[u8], header: &RpfHeader) -> Vec<RpfEntry> {
    let start = TOC_OFFSET as usize;
    if archive.len() <= start {
        return Vec::new();
    }

    let records_len = header.entry_count as usize * TOC_RECORD_SIZE;
    let toc_len = (header.toc_size as usize).max(records_len);
    let end = archive.len().min(start + toc_len);

    list_toc_entries(&archive[start..end], header.entry_count)
}

/// List entries from a plaintext TOC buffer.
pub fn list_toc_entries(toc: &[u8], entry_count: u32) -> Vec<RpfEntry> {
    let count = (entry_count as usize).min(toc.len() / TOC_RECORD_SIZE);
    let records: Vec<TocRecord> = toc
        .chunks_exact(TOC_RECORD_SIZE)
        .take(count)
        .map(TocRecord::read)
        .collect();

    let name_table = &toc[(count * TOC_RECORD_SIZE).min(toc.len())..];
    let names: Vec<Option<&str>> = records
        .iter()
        .map(|r| lookup_name(name_table, r.name_offset))
        .collect();

    let mut entries: Vec<RpfEntry> = records.iter().map(TocRecord::decode).collect();
    let mut resolved = vec![false; entries.len()];

    // Walk the directory tree from the root record.
    if records.first().is_some_and(TocRecord::is_directory) {
        let mut stack = vec![(0usize, String::new())];
        resolved[0] = true;

        while let Some((dir_idx, dir_path)) = stack.pop() {
            let (first, child_count) = records[dir_idx].children();
            let last = first.saturating_add(child_count).min(records.len());

            for child in first.max(dir_idx + 1)..last {
                if resolved[child] {
                    continue;
                }
                resolved[child] = true;

                let leaf = leaf_name(names[child], child);
                let path = if dir_path.is_empty() {
                    leaf
                } else {
                    format!("{dir_path}/{leaf}")
                };

                if records[child].is_directory() {
                    stack.push((child, path.clone()));
                }
                entries[child].name = path;
            }
        }
    }

    for (idx, entry) in entries.iter_mut().enumerate() {
        if !resolved[idx] {
            entry.name = leaf_name(names[idx], idx);
        }
    }

    entries
}

fn lookup_name(table: &[u8], offset: u32) -> Option<&str> {
    let offset = offset as usize;
    if offset >= table.len() {
        return None;
    }

    BinaryReader::new_at(table, offset)
        .read_cstring()
        .ok()
        .filter(|name| !name.is_empty())
}

/// Resolved name, or the legacy synthetic identity when the name table
/// does not yield one.
fn leaf_name(name: Option<&str>, index: usize) -> String {
    match name {
        Some(name) => name.replace('\\', "/").trim_matches('/').to_string(),
        None => format!("entry_{index}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::RPF2_MAGIC;

    fn record(name_offset: u32, f1: u32, f2: u32, f3: u32) -> Vec<u8> {
        [name_offset, f1, f2, f3]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }

    fn header(toc_size: u32, entry_count: u32) -> RpfHeader {
        RpfHeader {
            magic: RPF2_MAGIC,
            toc_size,
            entry_count,
            reserved: 0,
            encrypted: true,
        }
    }

    #[test]
    fn test_single_file_entry() {
        let mut archive = vec![0u8; TOC_OFFSET as usize];
        archive[..4].copy_from_slice(b"RPF2");
        // size=100, offset=0x10, resource type 3, plain
        archive.extend(record(0xFFFF, 100, 0x0300_0010, 0));
        archive.resize(TOC_OFFSET as usize + 0x100, 0);

        let entries = list_entries(&archive, &header(0x100, 1));

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert!(!entry.is_directory);
        assert_eq!(entry.size, 100);
        assert_eq!(entry.compressed_size, 100);
        assert_eq!(entry.offset, 0x10);
        assert_eq!(entry.resource_type, 3);
        assert!(!entry.is_compressed);
        assert!(!entry.is_encrypted);
        assert_eq!(entry.name, "entry_0");
    }

    #[test]
    fn test_compressed_and_encrypted_flags() {
        let toc = record(0, 4096, 0x0000_2000, (1000 << 8) | 0x03);
        let entries = list_toc_entries(&toc, 1);

        assert!(entries[0].is_compressed);
        assert!(entries[0].is_encrypted);
        assert_eq!(entries[0].compressed_size, 1000);
        assert_eq!(entries[0].stored_len(), 1000);
        assert_eq!(entries[0].max_len(), 4096);
    }

    #[test]
    fn test_directory_tree_names() {
        // 0: root dir -> children 1..3
        // 1: "data" dir -> child 3
        // 2: "readme.txt"
        // 3: "handling.dat"
        let names = b"\0data\0readme.txt\0handling.dat\0";
        let mut toc = Vec::new();
        toc.extend(record(0, DIRECTORY_FLAG, 1, 2));
        toc.extend(record(1, DIRECTORY_FLAG, 3, 1));
        toc.extend(record(6, 12, 0x100, 0));
        toc.extend(record(17, 34, 0x200, 0));
        toc.extend_from_slice(names);

        let entries = list_toc_entries(&toc, 4);

        assert!(entries[0].is_directory);
        assert_eq!(entries[1].name, "data");
        assert_eq!(entries[2].name, "readme.txt");
        assert_eq!(entries[3].name, "data/handling.dat");
    }

    #[test]
    fn test_records_past_buffer_are_dropped() {
        let toc = record(0, 1, 0, 0);
        let entries = list_toc_entries(&toc, 5);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_check_bounds() {
        let toc = record(0, 100, 0x10, 0);
        let entry = &list_toc_entries(&toc, 1)[0];

        assert!(entry.check_bounds(0x10 + 100).is_ok());
        assert!(matches!(
            entry.check_bounds(0x10 + 99),
            Err(Error::EntryOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_output_path_rejects_escape() {
        let mut entry = list_toc_entries(&record(0, 1, 0, 0), 1).remove(0);

        entry.name = "common/data/handling.dat".to_string();
        assert_eq!(
            entry.output_path().unwrap(),
            PathBuf::from("common").join("data").join("handling.dat")
        );

        entry.name = "../outside.dat".to_string();
        assert!(entry.output_path().is_err());

        entry.name = "/abs.dat".to_string();
        assert!(entry.output_path().is_err());
    }
}
