//! Cross-platform filesystem wrapper.
//!
//! On Unix we transparently re-export `std::fs` and apply permission bits as
//! stored in the archive. Elsewhere the mode helpers are no-ops, so callers can
//! use `crate::fsx::*` without `cfg` blocks at every call site.

use std::io;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

pub use std::fs::*;

#[cfg(unix)]
/// Set POSIX permission bits on Unix.
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
/// No-op on non-Unix targets: POSIX permission bits are not preserved.
pub fn set_unix_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Sets the modification time of a file or directory to `secs` since the epoch.
pub fn set_modified_time(path: &Path, secs: u64) -> io::Result<()> {
    let when = UNIX_EPOCH + Duration::from_secs(secs);
    let file = if path.is_dir() {
        #[cfg(unix)]
        {
            std::fs::File::open(path)?
        }
        #[cfg(not(unix))]
        {
            return Ok(());
        }
    } else {
        std::fs::OpenOptions::new().write(true).open(path)?
    };
    file.set_modified(when)
}

/// Permission bits from `meta`, `None` where the platform has none.
pub fn unix_mode(meta: &std::fs::Metadata) -> Option<u32> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Some(meta.permissions().mode() & 0o7777)
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        None
    }
}

/// Modification time of `meta` in whole seconds since the epoch.
pub fn mtime_secs(meta: &std::fs::Metadata) -> Option<u64> {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn mode_and_mtime_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        write(&path, b"x").unwrap();
        set_unix_permissions(&path, 0o751).unwrap();
        set_modified_time(&path, 1_234_567_890).unwrap();
        let meta = metadata(&path).unwrap();
        assert_eq!(unix_mode(&meta), Some(0o751));
        assert_eq!(mtime_secs(&meta), Some(1_234_567_890));

        set_modified_time(dir.path(), 1_000_000_000).unwrap();
        assert_eq!(mtime_secs(&metadata(dir.path()).unwrap()), Some(1_000_000_000));
    }

    #[test]
    fn reexports_std_fs_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.txt");
        write(&path, b"abc").unwrap();
        let file: crate::fsx::File = crate::fsx::OpenOptions::new().read(true).open(&path).unwrap();
        let meta: crate::fsx::Metadata = file.metadata().unwrap();
        assert_eq!(meta.len(), 3);
        assert!(unix_mode(&meta).is_some());
    }
}
