//! Archive entry path helpers.

use crate::error::{ArchiverError, Result};

/// Normalizes a raw entry name into a relative `/`-separated path.
///
/// Backslashes count as separators, leading `/`, empty and `.` segments are
/// dropped and `..` is resolved lexically. A name that climbs above the
/// archive root yields [`ArchiverError::PathEscape`]. The archive root itself
/// (e.g. `./`) normalizes to the empty string.
pub fn normalize_entry_path(raw: &str) -> Result<String> {
    let unified = raw.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(ArchiverError::PathEscape { entry: raw.to_string() });
                }
            }
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

pub fn segment_count(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Drops the first `level` segments of `path`. When the path has no more than
/// `level` segments it is returned unchanged.
pub fn strip_segments(path: &str, level: usize) -> &str {
    if level == 0 || segment_count(path) <= level {
        return path;
    }
    let mut rest = path.trim_start_matches('/');
    for _ in 0..level {
        rest = match rest.split_once('/') {
            Some((_, tail)) => tail.trim_start_matches('/'),
            None => return path,
        };
    }
    rest
}

/// Parent of a normalized path (`""` for top-level entries).
pub fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

/// Last segment of a normalized path.
pub fn file_name_of(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separators_and_dots() {
        assert_eq!(normalize_entry_path("./dir//sub/./c.txt").unwrap(), "dir/sub/c.txt");
        assert_eq!(normalize_entry_path("/abs/x").unwrap(), "abs/x");
        assert_eq!(normalize_entry_path("win\\style\\f.txt").unwrap(), "win/style/f.txt");
        assert_eq!(normalize_entry_path("a/b/../c").unwrap(), "a/c");
        assert_eq!(normalize_entry_path("dir/").unwrap(), "dir");
        assert_eq!(normalize_entry_path("./").unwrap(), "");
    }

    #[test]
    fn escaping_paths_are_rejected() {
        for raw in ["../../etc/passwd", "a/../../b", "..\\evil.dll", ".."] {
            let err = normalize_entry_path(raw).unwrap_err();
            assert!(err.is_security_violation(), "{raw}");
        }
    }

    #[test]
    fn strip_bounds() {
        assert_eq!(strip_segments("dir/sub/c.txt", 0), "dir/sub/c.txt");
        assert_eq!(strip_segments("dir/sub/c.txt", 1), "sub/c.txt");
        assert_eq!(strip_segments("dir/sub/c.txt", 2), "c.txt");
        assert_eq!(strip_segments("dir/sub/c.txt", 3), "dir/sub/c.txt");
        assert_eq!(strip_segments("dir/sub/c.txt", 9), "dir/sub/c.txt");
        assert_eq!(strip_segments("a.txt", 1), "a.txt");
    }

    #[test]
    fn parent_and_name() {
        assert_eq!(parent_of("dir/sub/c.txt"), "dir/sub");
        assert_eq!(parent_of("a.txt"), "");
        assert_eq!(file_name_of("dir/sub/c.txt"), "c.txt");
        assert_eq!(file_name_of("a.txt"), "a.txt");
    }
}
