//! Stable CRC32C names for derived files.
//!
//! Converted overlay textures and archive entries extracted to disk are
//! cached under a name computed from their source path, so the same
//! source always lands in the same cache file.

use std::path::Path;

#[inline]
pub fn hash_bytes(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// CRC32C of a host path's lossy UTF-8 form.
pub fn hash_path(path: &Path) -> u32 {
    hash_bytes(path.to_string_lossy().as_bytes())
}

/// Cache file name for `source`: eight hex digits plus `extension`
/// (which carries its own dot).
pub fn cache_file_name(source: &Path, extension: &str) -> String {
    format!("{:08x}{}", hash_path(source), extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_castagnoli_check_value() {
        assert_eq!(hash_bytes(b"123456789"), 0xE306_9283);
        assert_eq!(hash_bytes(&[]), 0);
    }

    #[test]
    fn test_cache_name_is_stable_per_source() {
        let handling = Path::new("mods/update/xbox360/textures/fonts.wtd");
        let other = Path::new("mods/update/xbox360/textures/hud.wtd");

        let name = cache_file_name(handling, ".xtd");
        assert_eq!(name, cache_file_name(handling, ".xtd"));
        assert_ne!(name, cache_file_name(other, ".xtd"));
        assert_eq!(name.len(), 8 + 4);
        assert!(name.ends_with(".xtd"));
    }
}
