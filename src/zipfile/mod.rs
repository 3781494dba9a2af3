//! # ZIP Format
//!
//! Thin container over [`zip::ZipArchive`] exposing the same
//! open / enumerate / content-fetch shape as the TAR container, plus
//! [`ZipArchiveWriter`] for the serializing side.

pub mod writer;

pub use writer::ZipArchiveWriter;

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;
use zip::read::ZipFile;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::common::{EntryKind, EntryMetadata, READ_RESERVE_LIMIT};
use crate::error::{ArchiverError, Result};

/// Index-based handle to one ZIP entry, captured at enumeration time.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ZipEntryHandle {
    pub index: usize,
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub mode: Option<u32>,
    pub mtime: Option<u64>,
}

impl ZipEntryHandle {
    fn from_file(index: usize, file: &ZipFile<'_>) -> Self {
        Self {
            index,
            name: file.name().to_string(),
            kind: if file.is_dir() { EntryKind::Directory } else { EntryKind::File },
            size: file.size(),
            mode: file.unix_mode().map(|m| m & 0o777),
            mtime: extended_mtime(file.extra_data()).or_else(|| dos_to_unix(file.last_modified())),
        }
    }

    pub fn metadata(&self) -> EntryMetadata {
        EntryMetadata { kind: self.kind, size: self.size, mode: self.mode, mtime: self.mtime }
    }
}

/// Info-ZIP extended timestamp extra field ("UT").
pub(crate) const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;
/// Flag bit announcing that the field carries a modification time.
pub(crate) const MTIME_PRESENT: u8 = 0x01;

/// Unix mtime from an extended timestamp field in `extra`, if present.
fn extended_mtime(mut extra: &[u8]) -> Option<u64> {
    while extra.len() >= 4 {
        let id = u16::from_le_bytes([extra[0], extra[1]]);
        let len = usize::from(u16::from_le_bytes([extra[2], extra[3]]));
        let body = extra.get(4..4 + len)?;
        if id == EXTENDED_TIMESTAMP_ID {
            let (&flags, rest) = body.split_first()?;
            if flags & MTIME_PRESENT == 0 {
                return None;
            }
            let secs: [u8; 4] = rest.get(..4)?.try_into().ok()?;
            return Some(u64::from(u32::from_le_bytes(secs)));
        }
        extra = &extra[4 + len..];
    }
    None
}

/// DOS timestamps carry no zone; they are read as UTC.
fn dos_to_unix(dt: zip::DateTime) -> Option<u64> {
    let naive = NaiveDate::from_ymd_opt(i32::from(dt.year()), u32::from(dt.month()), u32::from(dt.day()))?
        .and_hms_opt(u32::from(dt.hour()), u32::from(dt.minute()), u32::from(dt.second()))?;
    u64::try_from(Utc.from_utc_datetime(&naive).timestamp()).ok()
}

fn is_format_failure(err: &ZipError) -> bool {
    match err {
        ZipError::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
        _ => true,
    }
}

#[derive(Debug)]
pub struct ZipContainer {
    path: PathBuf,
    archive: Option<ZipArchive<BufReader<File>>>,
}

impl ZipContainer {
    /// Opens `path` and reads the central directory. A file without a valid
    /// central directory yields [`ArchiverError::NotAnArchive`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ArchiverError::io_at(e, path))?;
        let archive = match ZipArchive::new(BufReader::new(file)) {
            Ok(archive) => archive,
            Err(e) if is_format_failure(&e) => {
                debug!(path = %path.display(), reason = %e, "ZIP probe failed");
                return Err(ArchiverError::NotAnArchive { path: path.to_path_buf(), format: "ZIP" });
            }
            Err(e) => return Err(ArchiverError::from(e).in_archive(path)),
        };
        debug!(path = %path.display(), entries = archive.len(), "opened ZIP archive");
        Ok(Self { path: path.to_path_buf(), archive: Some(archive) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.archive.as_ref().map_or(0, |a| a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn archive(&mut self) -> Result<&mut ZipArchive<BufReader<File>>> {
        self.archive.as_mut().ok_or(ArchiverError::ArchiveClosed)
    }

    /// Reads the central-directory record for entry `index`.
    pub fn entry(&mut self, index: usize) -> Result<ZipEntryHandle> {
        let path = self.path.clone();
        let file = self
            .archive()?
            .by_index(index)
            .map_err(|e| ArchiverError::from(e).in_archive(&path))?;
        Ok(ZipEntryHandle::from_file(index, &file))
    }

    /// Every entry in central-directory order; unreadable entries are
    /// reported individually.
    pub fn entries(&mut self) -> impl Iterator<Item = Result<ZipEntryHandle>> + '_ {
        (0..self.len()).map(move |index| self.entry(index))
    }

    /// Returns a reader over the (decompressed) content of `handle`.
    pub fn content(&mut self, handle: &ZipEntryHandle) -> Result<ZipFile<'_>> {
        let path = self.path.clone();
        let file = self
            .archive()?
            .by_index(handle.index)
            .map_err(|e| ArchiverError::from(e).in_archive(&path))?;
        if file.name() != handle.name {
            return Err(ArchiverError::InconsistentArchive {
                expected: handle.name.clone(),
                found: file.name().to_string(),
            }
            .in_archive(&path));
        }
        Ok(file)
    }

    pub fn read_content(&mut self, handle: &ZipEntryHandle) -> Result<Vec<u8>> {
        let path = self.path.clone();
        let mut buf = Vec::with_capacity(handle.size.min(READ_RESERVE_LIMIT) as usize);
        self.content(handle)?
            .read_to_end(&mut buf)
            .map_err(|e| ArchiverError::io_at(e, &path))?;
        Ok(buf)
    }

    /// Drops the archive handle. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.archive.take().is_some() {
            debug!(path = %self.path.display(), "closing ZIP archive");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.archive.is_none()
    }
}
