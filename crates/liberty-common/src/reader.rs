//! Cursor over little-endian archive bytes.
//!
//! Archive headers, TOC records and resource headers are little-endian on
//! disk regardless of the host, so every numeric read here decodes
//! little-endian explicitly. Failed reads leave the cursor where it was.

use zerocopy::FromBytes;

use crate::{Error, Result};

/// A borrowing cursor over a byte slice.
///
/// # Example
///
/// ```
/// use liberty_common::BinaryReader;
///
/// let header = [0x52, 0x50, 0x46, 0x32, 0x00, 0x01, 0x00, 0x00];
/// let mut reader = BinaryReader::new(&header);
///
/// reader.expect_magic(b"RPF2").unwrap();
/// assert_eq!(reader.read_u32().unwrap(), 0x100);
/// assert!(reader.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    #[inline]
    pub const fn new(data: &'a [u8]) -> Self {
        Self::new_at(data, 0)
    }

    /// Start reading at `pos`, e.g. a name-table offset.
    #[inline]
    pub const fn new_at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    #[inline]
    pub const fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Unread tail of the buffer.
    #[inline]
    fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }

    /// Consume exactly `count` bytes.
    pub fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let rest = self.rest();
        let bytes = rest.get(..count).ok_or(Error::UnexpectedEof {
            needed: count,
            available: rest.len(),
        })?;
        self.pos += count;
        Ok(bytes)
    }

    #[inline]
    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        self.take_array().map(u16::from_le_bytes)
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        self.take_array().map(u32::from_le_bytes)
    }

    /// Read a fixed-layout record.
    ///
    /// `T` must spell out its byte order with zerocopy's little-endian
    /// wrapper types.
    pub fn read_struct<T: FromBytes>(&mut self) -> Result<T> {
        let bytes = self.take(std::mem::size_of::<T>())?;
        T::read_from_bytes(bytes).map_err(|_| Error::UnexpectedEof {
            needed: std::mem::size_of::<T>(),
            available: bytes.len(),
        })
    }

    /// Consume a tag and check it against `expected`.
    pub fn expect_magic(&mut self, expected: &[u8]) -> Result<()> {
        let start = self.pos;
        let found = self.take(expected.len())?;
        if found == expected {
            return Ok(());
        }

        self.pos = start;
        Err(Error::InvalidMagic {
            expected: expected.to_vec(),
            actual: found.to_vec(),
        })
    }

    /// Read a NUL-terminated UTF-8 string and step past the terminator.
    pub fn read_cstring(&mut self) -> Result<&'a str> {
        let rest = self.rest();
        let len = memchr::memchr(0, rest).ok_or(Error::MissingNullTerminator)?;
        let text = std::str::from_utf8(&rest[..len])?;
        self.pos += len + 1;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toc_record_fields() {
        let record = [0x10, 0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x80, 0x01, 0x00];
        let mut reader = BinaryReader::new(&record);

        assert_eq!(reader.read_u32().unwrap(), 0x10);
        assert_eq!(reader.read_u32().unwrap(), 0x8000_0064);
        assert_eq!(reader.read_u16().unwrap(), 1);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_name_table_lookup() {
        let names = b"\0common\0data\0";
        let mut reader = BinaryReader::new_at(names, 8);

        assert_eq!(reader.read_cstring().unwrap(), "data");
        assert!(reader.is_empty());
        assert_eq!(BinaryReader::new(names).read_cstring().unwrap(), "");
    }

    #[test]
    fn test_unterminated_name() {
        let mut reader = BinaryReader::new(b"handling.dat");
        assert!(matches!(
            reader.read_cstring(),
            Err(Error::MissingNullTerminator)
        ));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_magic_mismatch_keeps_position() {
        let mut reader = BinaryReader::new(b"RPF7");
        assert!(matches!(
            reader.expect_magic(b"RPF2"),
            Err(Error::InvalidMagic { .. })
        ));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_short_read() {
        let mut reader = BinaryReader::new(&[0x01, 0x02, 0x03]);

        assert!(matches!(
            reader.read_u32(),
            Err(Error::UnexpectedEof {
                needed: 4,
                available: 3
            })
        ));
        assert_eq!(reader.position(), 0);

        let mut past_end = BinaryReader::new_at(&[0x01], 5);
        assert!(past_end.is_empty());
        assert!(past_end.read_u16().is_err());
    }
}
