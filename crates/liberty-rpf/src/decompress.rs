//! Entry body decompression.
//!
//! Entries are inflated with zlib framing when the stream carries a zlib
//! header and as raw deflate otherwise. A stream that fails to inflate is
//! returned unchanged: callers always get bytes back.

use std::io::Read;

use flate2::read::{DeflateDecoder, ZlibDecoder};
use log::warn;

/// Inflate an entry body, falling back to the input on failure.
pub fn decompress_entry(data: Vec<u8>, expected_size: usize) -> Vec<u8> {
    match inflate(&data, expected_size) {
        Ok(output) => output,
        Err(e) => {
            warn!(
                "Inflate failed ({e}); keeping {} stored bytes (expected {expected_size})",
                data.len()
            );
            data
        }
    }
}

fn inflate(data: &[u8], expected_size: usize) -> std::io::Result<Vec<u8>> {
    let mut output = Vec::with_capacity(expected_size);

    if has_zlib_header(data) {
        if ZlibDecoder::new(data).read_to_end(&mut output).is_ok() {
            return Ok(output);
        }
        output.clear();
    }

    DeflateDecoder::new(data).read_to_end(&mut output)?;
    Ok(output)
}

/// CMF/FLG check from RFC 1950.
fn has_zlib_header(data: &[u8]) -> bool {
    data.len() >= 2
        && data[0] & 0x0F == 8
        && data[0] >> 4 <= 7
        && (u16::from(data[0]) << 8 | u16::from(data[1])) % 31 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    const TEXT: &[u8] = b"IDE objs 1, vehicles/admiral, admiral, car, 0, 0; repeated repeated repeated";

    #[test]
    fn test_zlib_stream() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(TEXT).unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(decompress_entry(compressed, TEXT.len()), TEXT);
    }

    #[test]
    fn test_raw_deflate_stream() {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(TEXT).unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(decompress_entry(compressed, TEXT.len()), TEXT);
    }

    #[test]
    fn test_corrupt_stream_returns_input() {
        let garbage = vec![0xFFu8; 37];
        assert_eq!(decompress_entry(garbage.clone(), 100), garbage);
    }
}
