//! RPF2 archive header.
//!
//! The header is a fixed 20-byte little-endian record at offset 0. The
//! table of contents always starts at [`TOC_OFFSET`], whatever the header
//! says.

use std::fs::File;
use std::io::Read;
use std::ops::Range;
use std::path::Path;

use liberty_common::BinaryReader;
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::{Error, Result};

/// Primary archive tag ("RPF2").
pub const RPF2_MAGIC: [u8; 4] = *b"RPF2";

/// Byte-reversed tag seen on header-only dumps; tolerated by
/// [`peek_header`] but never fully parsed.
pub const RPF2_MAGIC_SWAPPED: [u8; 4] = *b"2FPR";

/// Size of the on-disk header.
pub const HEADER_SIZE: usize = 20;

/// Absolute offset of the table of contents.
pub const TOC_OFFSET: u64 = 0x800;

/// Header fields after the magic.
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
struct RawHeader {
    toc_size: U32,
    entry_count: U32,
    reserved: U32,
    encrypted: U32,
}

/// Parsed archive header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpfHeader {
    /// Tag the header was recognized by.
    pub magic: [u8; 4],
    /// Size of the table of contents in bytes.
    pub toc_size: u32,
    /// Number of 16-byte TOC records.
    pub entry_count: u32,
    /// Unused by this format version.
    pub reserved: u32,
    /// Whether the TOC region is ciphered.
    pub encrypted: bool,
}

impl RpfHeader {
    /// Absolute byte range covered by the TOC.
    #[inline]
    pub fn toc_range(&self) -> Range<u64> {
        TOC_OFFSET..TOC_OFFSET + self.toc_size as u64
    }

    /// Header produced for a tolerated-but-unparsed tag.
    fn synthetic(magic: [u8; 4]) -> Self {
        Self {
            magic,
            toc_size: 0,
            entry_count: 0,
            reserved: 0,
            encrypted: false,
        }
    }
}

/// Parse the fixed header. Only the primary tag is accepted.
pub fn parse_header(bytes: &[u8]) -> Result<RpfHeader> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::TruncatedHeader(bytes.len()));
    }

    let mut reader = BinaryReader::new(bytes);
    reader
        .expect_magic(&RPF2_MAGIC)
        .map_err(|_| Error::InvalidMagic(magic_of(bytes)))?;

    let raw: RawHeader = reader.read_struct()?;

    Ok(RpfHeader {
        magic: RPF2_MAGIC,
        toc_size: raw.toc_size.get(),
        entry_count: raw.entry_count.get(),
        reserved: raw.reserved.get(),
        encrypted: raw.encrypted.get() != 0,
    })
}

/// Header-only check.
///
/// Accepts everything [`parse_header`] accepts, and additionally maps the
/// secondary tag to a synthetic header with an empty TOC.
pub fn peek_header(bytes: &[u8]) -> Result<RpfHeader> {
    if bytes.len() >= 4 && magic_of(bytes) == RPF2_MAGIC_SWAPPED {
        return Ok(RpfHeader::synthetic(RPF2_MAGIC_SWAPPED));
    }
    parse_header(bytes)
}

/// Read and parse the header of an archive on disk.
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<RpfHeader> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; HEADER_SIZE];
    let mut filled = 0;

    while filled < HEADER_SIZE {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }

    parse_header(&buf[..filled])
}

/// Check extension and magic of a host file.
pub fn is_rpf_file<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    let has_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("rpf"));

    has_ext && path.is_file() && read_header(path).is_ok()
}

fn magic_of(bytes: &[u8]) -> [u8; 4] {
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    magic
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(magic: &[u8; 4], toc_size: u32, entries: u32, encrypted: u32) -> Vec<u8> {
        let mut out = magic.to_vec();
        for v in [toc_size, entries, 0, encrypted] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_parse_header() {
        let bytes = header_bytes(b"RPF2", 0x100, 1, 1);
        let header = parse_header(&bytes).unwrap();

        assert_eq!(header.toc_size, 0x100);
        assert_eq!(header.entry_count, 1);
        assert!(header.encrypted);
        assert_eq!(header.toc_range(), 0x800..0x900);
    }

    #[test]
    fn test_parse_rejects_unknown_magic() {
        let bytes = header_bytes(b"RPF7", 0x100, 1, 0);
        assert!(matches!(parse_header(&bytes), Err(Error::InvalidMagic(m)) if &m == b"RPF7"));
    }

    #[test]
    fn test_parse_rejects_short_header() {
        assert!(matches!(
            parse_header(b"RPF2\x00\x01"),
            Err(Error::TruncatedHeader(6))
        ));
    }

    #[test]
    fn test_parse_rejects_secondary_tag() {
        let bytes = header_bytes(b"2FPR", 0x100, 1, 0);
        assert!(parse_header(&bytes).is_err());
    }

    #[test]
    fn test_peek_secondary_tag_is_synthetic() {
        let header = peek_header(b"2FPR").unwrap();
        assert_eq!(header.magic, RPF2_MAGIC_SWAPPED);
        assert_eq!(header.entry_count, 0);
        assert_eq!(header.toc_size, 0);
        assert!(!header.encrypted);
    }

    #[test]
    fn test_is_rpf_file() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("common.RPF");
        let bad_ext = dir.path().join("common.img");
        std::fs::write(&good, header_bytes(b"RPF2", 0, 0, 0)).unwrap();
        std::fs::write(&bad_ext, header_bytes(b"RPF2", 0, 0, 0)).unwrap();

        assert!(is_rpf_file(&good));
        assert!(!is_rpf_file(&bad_ext));
        assert!(!is_rpf_file(dir.path().join("missing.rpf")));
    }
}
