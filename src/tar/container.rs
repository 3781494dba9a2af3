//! `.tar` / `.tar.gz` container: format probe, single-pass enumeration and
//! random-access content retrieval through a cached decoder.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, warn};

use super::decoder::{EntryReader, TarDecoder};
use super::TarRecord;
use crate::archive::detect;
use crate::common::READ_RESERVE_LIMIT;
use crate::error::{ArchiverError, Result};

/// Byte source under a TAR decoder: the raw file or its gzip-decoded stream.
#[derive(Debug)]
pub enum TarSource {
    Plain(BufReader<File>),
    Gzip(GzDecoder<BufReader<File>>),
}

impl Read for TarSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            TarSource::Plain(r) => r.read(buf),
            TarSource::Gzip(r) => r.read(buf),
        }
    }
}

fn open_source(path: &Path, gzip: bool) -> Result<TarSource> {
    let file = File::open(path).map_err(|e| ArchiverError::io_at(e, path))?;
    let reader = BufReader::new(file);
    Ok(if gzip {
        TarSource::Gzip(GzDecoder::new(reader))
    } else {
        TarSource::Plain(reader)
    })
}

/// Whether a probe failure means "this is not a TAR stream" rather than an
/// I/O problem with an otherwise readable file.
/// Recovers the decoder error an [`EntryReader`] tunnelled through
/// `io::Error`, so truncation surfaces as [`ArchiverError::UnexpectedEof`].
fn payload_error(err: io::Error, path: &Path) -> ArchiverError {
    let kind = err.kind();
    match err.into_inner() {
        Some(inner) => match inner.downcast::<ArchiverError>() {
            Ok(decoded) => (*decoded).in_archive(path),
            Err(other) => ArchiverError::io_at(io::Error::new(kind, other), path),
        },
        None => ArchiverError::io_at(io::Error::from(kind), path),
    }
}

fn is_format_failure(err: &ArchiverError) -> bool {
    match err {
        ArchiverError::CorruptArchive { .. } | ArchiverError::UnexpectedEof { .. } => true,
        ArchiverError::Io { source, .. } => matches!(
            source.kind(),
            io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}

#[derive(Debug)]
pub struct TarContainer {
    path: PathBuf,
    gzip: bool,
    first: Option<TarRecord>,
    scanner: Option<TarDecoder<TarSource>>,
    cache: Option<TarDecoder<TarSource>>,
    closed: bool,
}

impl TarContainer {
    /// Opens `path`, detecting gzip framing by magic bytes, and decodes the
    /// first header as a validity probe. Anything that does not decode as TAR
    /// is reported as [`ArchiverError::NotAnArchive`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let gzip = detect::has_gzip_magic(path)?;
        let mut scanner = TarDecoder::new(open_source(path, gzip)?);
        let first = match scanner.next_record() {
            Ok(first) => first,
            Err(e) if is_format_failure(&e) => {
                debug!(path = %path.display(), reason = %e, "TAR probe failed");
                return Err(ArchiverError::NotAnArchive { path: path.to_path_buf(), format: "TAR" });
            }
            Err(e) => return Err(e.in_archive(path)),
        };
        debug!(path = %path.display(), gzip, "opened TAR archive");

        Ok(Self {
            path: path.to_path_buf(),
            gzip,
            first,
            scanner: Some(scanner),
            cache: None,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_compressed(&self) -> bool {
        self.gzip
    }

    /// Lazy, forward-only sequence of records. The underlying decoder advances
    /// as the iterator is consumed; a second call continues where the first one
    /// stopped (reopen the container to start over).
    pub fn entries(&mut self) -> TarEntries<'_> {
        TarEntries {
            path: &self.path,
            first: self.first.take(),
            decoder: self.scanner.as_mut(),
        }
    }

    /// Returns a reader over `record`'s payload.
    ///
    /// The cached decoder is reused when `record` lies at or ahead of its
    /// position; otherwise the file is reopened and scanned from the start.
    pub fn content(&mut self, record: &TarRecord) -> Result<EntryReader<'_, TarSource>> {
        if self.closed {
            return Err(ArchiverError::ArchiveClosed);
        }

        let needs_reopen = self
            .cache
            .as_ref()
            .map_or(true, |d| d.position() > record.header_offset);
        if needs_reopen {
            if self.cache.is_some() {
                debug!(entry = %record.name, "record behind cached position, reopening TAR stream");
            }
            self.cache = Some(TarDecoder::new(open_source(&self.path, self.gzip)?));
        }

        let seeked = match self.cache.as_mut() {
            Some(decoder) => decoder.seek_to_record(record),
            None => Err(ArchiverError::ArchiveClosed),
        };
        match seeked {
            Ok(true) => {}
            Ok(false) => {
                self.cache = None;
                return Err(ArchiverError::InconsistentArchive {
                    expected: record.name.clone(),
                    found: "<position past record>".to_string(),
                }
                .in_archive(&self.path));
            }
            Err(e) => {
                self.cache = None;
                warn!(entry = %record.name, error = %e, "failed to position on TAR entry");
                return Err(e.in_archive(&self.path));
            }
        }

        let decoder = self.cache.as_mut().ok_or(ArchiverError::ArchiveClosed)?;
        Ok(decoder.entry_reader())
    }

    /// Reads a record's payload fully into memory.
    pub fn read_content(&mut self, record: &TarRecord) -> Result<Vec<u8>> {
        let path = self.path.clone();
        let mut reader = self.content(record)?;
        let mut buf = Vec::with_capacity(record.size.min(READ_RESERVE_LIMIT) as usize);
        reader.read_to_end(&mut buf).map_err(|e| payload_error(e, &path))?;
        Ok(buf)
    }

    /// Releases both decoders. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if !self.closed {
            debug!(path = %self.path.display(), "closing TAR archive");
            self.scanner = None;
            self.cache = None;
            self.first = None;
            self.closed = true;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Iterator returned by [`TarContainer::entries`].
pub struct TarEntries<'a> {
    path: &'a Path,
    first: Option<TarRecord>,
    decoder: Option<&'a mut TarDecoder<TarSource>>,
}

impl Iterator for TarEntries<'_> {
    type Item = Result<TarRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(first) = self.first.take() {
            return Some(Ok(first));
        }
        let decoder = self.decoder.as_mut()?;
        match decoder.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.decoder = None;
                None
            }
            Err(e) => {
                self.decoder = None;
                Some(Err(e.in_archive(self.path)))
            }
        }
    }
}
