use std::path::{Path, PathBuf};

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ArchiverError> = std::result::Result<T, E>;

/// The primary error type for all operations in the `archfs` crate.
#[derive(Debug, Error)]
pub enum ArchiverError {
    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened (empty when unknown).
    #[error("I/O error on path '{}': {source}", path.display())]
    Io { source: std::io::Error, path: PathBuf },

    /// The format sniff failed. Used as a predicate by format dispatch, not fatal.
    #[error("'{}' is not a {format} archive", path.display())]
    NotAnArchive { path: PathBuf, format: &'static str },

    /// Bad checksum, truncated block or an otherwise malformed structure.
    #[error("corrupt archive at byte {offset}: {reason}")]
    CorruptArchive { offset: u64, reason: String },

    /// A repositioned decoder landed on a different entry than requested.
    #[error("inconsistent archive: expected entry '{expected}', found '{found}'")]
    InconsistentArchive { expected: String, found: String },

    /// The stream ended in the middle of a header or a payload.
    #[error("unexpected end of archive at byte {offset}")]
    UnexpectedEof { offset: u64 },

    /// The entry would resolve outside the archive root or the extraction destination.
    #[error("security: entry '{entry}' escapes the destination root")]
    PathEscape { entry: String },

    /// A file and a directory claim the same path.
    #[error("entry '{entry}' conflicts with an existing entry of a different kind")]
    PathConflict { entry: String },

    /// The entry cannot be represented in the target format.
    #[error("invalid entry '{entry}': {reason}")]
    InvalidEntry { entry: String, reason: String },

    /// An error occurred when trying to strip a prefix from a file path.
    #[error("could not strip prefix '{}' from path '{}'", prefix.display(), path.display())]
    StripPrefix { prefix: PathBuf, path: PathBuf },

    /// An error reported by the `zip` crate.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A write method was called after `finish()`.
    #[error("archive writer has already been finished")]
    WriterFinished,

    /// Content was requested from a container that has been closed.
    #[error("archive has been closed")]
    ArchiveClosed,

    /// Adds the archive path to an error raised while working on that archive.
    #[error("{}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: Box<ArchiverError>,
    },
}

impl ArchiverError {
    pub(crate) fn io_at(source: std::io::Error, path: &Path) -> Self {
        ArchiverError::Io { source, path: path.to_path_buf() }
    }

    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        ArchiverError::CorruptArchive { offset, reason: reason.into() }
    }

    /// Wraps `self` with the archive path unless it already carries one.
    pub fn in_archive(self, path: &Path) -> Self {
        match self {
            ArchiverError::Io { source, path: p } if p.as_os_str().is_empty() => {
                ArchiverError::Io { source, path: path.to_path_buf() }
            }
            e @ (ArchiverError::Io { .. }
            | ArchiverError::NotAnArchive { .. }
            | ArchiverError::Archive { .. }) => e,
            e => ArchiverError::Archive { path: path.to_path_buf(), source: Box::new(e) },
        }
    }

    /// Strips `Archive` context wrappers.
    pub fn root(&self) -> &ArchiverError {
        match self {
            ArchiverError::Archive { source, .. } => source.root(),
            e => e,
        }
    }

    pub fn is_not_an_archive(&self) -> bool {
        matches!(self.root(), ArchiverError::NotAnArchive { .. })
    }

    pub fn is_security_violation(&self) -> bool {
        matches!(self.root(), ArchiverError::PathEscape { .. })
    }
}

// Generic IO error conversion that doesn't require a path
impl From<std::io::Error> for ArchiverError {
    fn from(err: std::io::Error) -> Self {
        ArchiverError::Io { source: err, path: PathBuf::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_archive_fills_missing_io_path() {
        let err: ArchiverError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        let err = err.in_archive(Path::new("/tmp/a.tar"));
        match err {
            ArchiverError::Io { path, .. } => assert_eq!(path, PathBuf::from("/tmp/a.tar")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn root_unwraps_context() {
        let err = ArchiverError::corrupt(512, "bad checksum").in_archive(Path::new("x.tar"));
        assert!(matches!(err.root(), ArchiverError::CorruptArchive { offset: 512, .. }));
        assert!(err.to_string().starts_with("x.tar: corrupt archive at byte 512"));
    }

    #[test]
    fn path_escape_is_security_violation() {
        let err = ArchiverError::PathEscape { entry: "../etc/passwd".into() };
        assert!(err.is_security_violation());
        assert!(!err.is_not_an_archive());
    }
}
