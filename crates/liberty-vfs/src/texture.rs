//! Console/PC resource container conversion.
//!
//! Resource files start with a 16-byte header:
//!
//! | offset | size | field                             |
//! |--------|------|-----------------------------------|
//! | 0      | 4    | magic `RSC\x05` (0x05435352 LE)   |
//! | 4      | 4    | resource type (0x07 console, 0x08 PC) |
//! | 8      | 4    | flags                             |
//! | 12     | 2    | compression codec                 |
//! | 14     | 2    | padding                           |
//!
//! PC resources are little-endian, console resources big-endian. The
//! conversion rewrites the type and byte-swaps the buffer in 32-bit words;
//! texture data is not reswizzled.

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use liberty_common::BinaryReader;
use log::debug;

/// Resource container magic, little-endian.
pub const RSC_MAGIC: u32 = 0x0543_5352;

/// Size of the resource header.
pub const RSC_HEADER_SIZE: usize = 16;

const TYPE_CONSOLE: u32 = 0x07;
const TYPE_PC: u32 = 0x08;

/// Extension pairs (console, PC) served by conversion.
pub const CONVERTIBLE_EXTENSIONS: &[(&str, &str)] = &[
    (".xtd", ".wtd"),
    (".xdr", ".wdr"),
    (".xft", ".wft"),
    (".xbd", ".wbd"),
];

/// Target platform of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Console,
    Pc,
}

/// Resource header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RscHeader {
    pub magic: u32,
    pub resource_type: u32,
    pub flags: u32,
    pub codec: u16,
}

impl RscHeader {
    /// Parse a little-endian header.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut reader = BinaryReader::new(data);
        Some(Self {
            magic: reader.read_u32().ok()?,
            resource_type: reader.read_u32().ok()?,
            flags: reader.read_u32().ok()?,
            codec: reader.read_u16().ok()?,
        })
    }
}

/// PC extension matching a console extension.
pub fn pc_counterpart(console_ext: &str) -> Option<&'static str> {
    CONVERTIBLE_EXTENSIONS
        .iter()
        .find(|(console, _)| console.eq_ignore_ascii_case(console_ext))
        .map(|(_, pc)| *pc)
}

/// Platform implied by a file extension. Unknown extensions count as PC.
pub fn platform_from_extension(path: &Path) -> Platform {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()));

    match ext {
        Some(ext) if CONVERTIBLE_EXTENSIONS.iter().any(|(c, _)| *c == ext) => Platform::Console,
        _ => Platform::Pc,
    }
}

/// Platform recorded in a resource header, in either byte order.
/// Anything unrecognized counts as PC.
pub fn platform_from_header(data: &[u8]) -> Platform {
    let Some(header) = RscHeader::parse(data) else {
        return Platform::Pc;
    };

    let resource_type = if header.magic == RSC_MAGIC {
        header.resource_type
    } else if header.magic.swap_bytes() == RSC_MAGIC {
        header.resource_type.swap_bytes()
    } else {
        return Platform::Pc;
    };

    match resource_type {
        TYPE_CONSOLE => Platform::Console,
        _ => Platform::Pc,
    }
}

/// Convert a PC resource to console layout.
///
/// Returns `None` when the buffer cannot hold a header.
pub fn pc_to_console(data: &[u8]) -> Option<Vec<u8>> {
    if data.len() < RSC_HEADER_SIZE {
        debug!("Resource too small to convert ({} bytes)", data.len());
        return None;
    }

    let mut out = data.to_vec();
    if LittleEndian::read_u32(&out[4..8]) == TYPE_PC {
        LittleEndian::write_u32(&mut out[4..8], TYPE_CONSOLE);
    }
    swap_words(&mut out);
    Some(out)
}

/// Convert a console resource to PC layout.
///
/// Returns `None` when the buffer cannot hold a header.
pub fn console_to_pc(data: &[u8]) -> Option<Vec<u8>> {
    if data.len() < RSC_HEADER_SIZE {
        return None;
    }

    let mut out = data.to_vec();
    swap_words(&mut out);
    if LittleEndian::read_u32(&out[4..8]) == TYPE_CONSOLE {
        LittleEndian::write_u32(&mut out[4..8], TYPE_PC);
    }
    Some(out)
}

/// Byte-swap every complete 32-bit word; a trailing remainder is kept.
fn swap_words(data: &mut [u8]) {
    for word in data.chunks_exact_mut(4) {
        word.reverse();
    }
}
