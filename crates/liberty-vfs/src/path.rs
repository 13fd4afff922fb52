//! Guest path normalization.
//!
//! Every lookup in this crate is keyed by a normalized path: lowercase,
//! `/`-separated, without drive prefix and without leading or trailing
//! separators. `game:\Common\Data\handling.dat` and
//! `common/data/HANDLING.DAT` normalize to the same key.

/// Asset extensions tried when a guest path omits one.
///
/// Console (`x`) and PC (`w`) variants of each resource kind.
pub const ASSET_EXTENSIONS: &[&str] = &[
    ".xtd", ".wtd", ".xbd", ".wbd", ".xdr", ".wdr", ".xft", ".wft", ".xad", ".wad", ".xmd", ".wmd",
    ".xcd", ".wcd", ".xpd", ".wpd", ".xnd", ".wnd", ".xvd", ".wvd", ".xdd", ".wdd", ".xld", ".wld",
];

/// Normalize a guest path into a lookup key.
///
/// A drive prefix is a colon inside the first path segment (`game:`,
/// `d:`, `platform:`). Stacked prefixes are all removed, which keeps the
/// function idempotent.
pub fn normalize_path(path: &str) -> String {
    let lowered = path.to_ascii_lowercase().replace('\\', "/");
    let mut rest = lowered.as_str();

    loop {
        rest = rest.trim_start_matches('/');
        let first_segment = rest.split('/').next().unwrap_or_default();
        match first_segment.find(':') {
            Some(colon) => rest = &rest[colon + 1..],
            None => break,
        }
    }

    rest.trim_end_matches('/').to_string()
}

/// Extension of the last segment of a normalized key, including the dot.
pub fn key_extension(key: &str) -> Option<&str> {
    let leaf = key.rsplit('/').next().unwrap_or(key);
    leaf.rfind('.').filter(|&dot| dot > 0).map(|dot| &leaf[dot..])
}

/// Whether the last segment ends in one of [`ASSET_EXTENSIONS`].
pub fn has_known_extension(key: &str) -> bool {
    key_extension(key).is_some_and(|ext| ASSET_EXTENSIONS.contains(&ext))
}

/// Whether any segment of a normalized key climbs to its parent.
pub fn has_parent_segment(key: &str) -> bool {
    key.split('/').any(|segment| segment == "..")
}

/// Split `key` after `prefix` if it matches on a segment boundary.
///
/// Returns the remainder without its leading separator.
pub(crate) fn strip_segment_prefix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(key);
    }
    let rest = key.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_drive_and_separators() {
        assert_eq!(
            normalize_path("game:\\Common\\Data\\handling.dat"),
            "common/data/handling.dat"
        );
        assert_eq!(normalize_path("/common/data/"), "common/data");
        assert_eq!(normalize_path("platform:/textures/fonts"), "textures/fonts");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn test_parent_segments() {
        assert!(has_parent_segment(&normalize_path("game:\\..\\secret.txt")));
        assert!(has_parent_segment("common/../../etc"));
        assert!(!has_parent_segment("common/..data/x..y"));
        assert!(!has_parent_segment(""));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "game:\\Common\\Data\\handling.dat",
            "D:/a:b/c",
            "game:/platform:/textures//",
            "\\\\fxl_final\\shader.fxc",
            "update/TLAD/x.dat",
            "a/b:c",
            ":",
        ];
        for sample in samples {
            let once = normalize_path(sample);
            assert_eq!(normalize_path(&once), once, "sample {sample:?}");
        }
    }

    #[test]
    fn test_colon_after_first_segment_is_kept() {
        assert_eq!(normalize_path("data/a:b.dat"), "data/a:b.dat");
    }

    #[test]
    fn test_known_extension() {
        assert!(has_known_extension("textures/fonts.xtd"));
        assert!(!has_known_extension("textures/fonts"));
        assert!(!has_known_extension("data/gta.dat"));
        assert!(!has_known_extension("dir.xtd/fonts"));
        assert_eq!(key_extension("a/b.c/file"), None);
        assert_eq!(key_extension("a/.hidden"), None);
    }

    #[test]
    fn test_segment_prefix() {
        assert_eq!(strip_segment_prefix("data/gta.dat", "data"), Some("gta.dat"));
        assert_eq!(strip_segment_prefix("data", "data"), Some(""));
        assert_eq!(strip_segment_prefix("database/x", "data"), None);
    }
}
