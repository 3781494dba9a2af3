//! Format sniffing. Detection is by content (gzip magic, a decodable TAR
//! header, a ZIP central directory); file extensions are only consulted when
//! choosing an output format.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::common::ArchiveFormat;
use crate::error::{ArchiverError, Result};
use crate::tar::TarContainer;
use crate::zipfile::ZipContainer;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn is_gzip_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Reads the first two bytes of `path` and compares them with the gzip magic.
pub fn has_gzip_magic(path: &Path) -> Result<bool> {
    let mut file = File::open(path).map_err(|e| ArchiverError::io_at(e, path))?;
    let mut magic = [0u8; 2];
    let mut filled = 0;
    while filled < magic.len() {
        match file.read(&mut magic[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ArchiverError::io_at(e, path)),
        }
    }
    Ok(is_gzip_magic(&magic[..filled]))
}

pub fn is_tar_file(path: &Path) -> bool {
    TarContainer::open(path).is_ok()
}

pub fn is_zip_file(path: &Path) -> bool {
    ZipContainer::open(path).is_ok()
}

/// Probes TAR first, then ZIP.
pub fn detect_format(path: &Path) -> Result<ArchiveFormat> {
    match TarContainer::open(path) {
        Ok(_) => return Ok(ArchiveFormat::Tar),
        Err(e) if !e.is_not_an_archive() => return Err(e),
        Err(_) => {}
    }
    match ZipContainer::open(path) {
        Ok(_) => Ok(ArchiveFormat::Zip),
        Err(e) if e.is_not_an_archive() => Err(ArchiverError::NotAnArchive {
            path: path.to_path_buf(),
            format: "TAR or ZIP",
        }),
        Err(e) => Err(e),
    }
}

/// Output format implied by a file name: `(format, gzip)`.
pub fn format_from_extension(path: &Path) -> Option<(ArchiveFormat, bool)> {
    let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some((ArchiveFormat::Tar, true))
    } else if name.ends_with(".tar") {
        Some((ArchiveFormat::Tar, false))
    } else if name.ends_with(".zip") || name.ends_with(".jar") {
        Some((ArchiveFormat::Zip, false))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn gzip_magic() {
        assert!(is_gzip_magic(&[0x1f, 0x8b, 0x08]));
        assert!(!is_gzip_magic(&[0x1f]));
        assert!(!is_gzip_magic(b"ustar"));
    }

    #[test]
    fn extension_mapping() {
        let f = |s: &str| format_from_extension(&PathBuf::from(s));
        assert_eq!(f("out.TAR.GZ"), Some((ArchiveFormat::Tar, true)));
        assert_eq!(f("out.tgz"), Some((ArchiveFormat::Tar, true)));
        assert_eq!(f("out.tar"), Some((ArchiveFormat::Tar, false)));
        assert_eq!(f("lib.jar"), Some((ArchiveFormat::Zip, false)));
        assert_eq!(f("notes.txt"), None);
    }

    #[test]
    fn text_file_is_neither_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readme.txt");
        std::fs::write(&path, "hello world\n".repeat(100)).unwrap();
        assert!(!is_tar_file(&path));
        assert!(!is_zip_file(&path));
        assert!(detect_format(&path).unwrap_err().is_not_an_archive());
    }
}
