//! ZIP serializer. Unlike TAR, sizes and CRCs land in the central directory
//! written by [`ZipArchiveWriter::finish`], so entries need no declared size.
//!
//! File entries carry their mtime twice: as a DOS timestamp (2-second
//! resolution) and as an extended timestamp extra field with whole seconds.
//! Directory entries only get the DOS timestamp.

use std::io::{Seek, Write};

use chrono::{Datelike, TimeZone, Timelike, Utc};
use tracing::{debug, trace};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{EXTENDED_TIMESTAMP_ID, MTIME_PRESENT};
use crate::common::EntryDescriptor;
use crate::error::{ArchiverError, Result};

/// Largest entry the plain (non-ZIP64) headers can describe.
const ZIP32_LIMIT: u64 = u32::MAX as u64;

/// Converts Unix seconds to a DOS timestamp in UTC, clamped to 1980..=2107.
pub(crate) fn unix_to_dos(secs: u64) -> zip::DateTime {
    let Some(dt) = i64::try_from(secs).ok().and_then(|s| Utc.timestamp_opt(s, 0).single()) else {
        return latest_dos_time();
    };
    match dt.year() {
        y if y < 1980 => zip::DateTime::default(),
        y if y > 2107 => latest_dos_time(),
        y => zip::DateTime::from_date_and_time(
            y as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
        )
        .unwrap_or_default(),
    }
}

fn latest_dos_time() -> zip::DateTime {
    zip::DateTime::from_date_and_time(2107, 12, 31, 23, 59, 58).unwrap_or_default()
}

/// Extended timestamp extra field holding only the mtime. `None` past the
/// 32-bit range.
fn extended_timestamp(mtime: u64) -> Option<[u8; 9]> {
    let secs = u32::try_from(mtime).ok()?;
    let mut field = [0u8; 9];
    field[..2].copy_from_slice(&EXTENDED_TIMESTAMP_ID.to_le_bytes());
    field[2..4].copy_from_slice(&5u16.to_le_bytes());
    field[4] = MTIME_PRESENT;
    field[5..].copy_from_slice(&secs.to_le_bytes());
    Some(field)
}

pub struct ZipArchiveWriter<W: Write + Seek> {
    inner: Option<ZipWriter<W>>,
    method: CompressionMethod,
    current: Option<String>,
    entries: u64,
}

impl<W: Write + Seek> ZipArchiveWriter<W> {
    /// `compress` selects Deflated over Stored for file entries.
    pub fn new(out: W, compress: bool) -> Self {
        let method = if compress { CompressionMethod::Deflated } else { CompressionMethod::Stored };
        Self { inner: Some(ZipWriter::new(out)), method, current: None, entries: 0 }
    }

    pub fn entries_written(&self) -> u64 {
        self.entries
    }

    /// Starts a local file header. `size_hint` only decides whether ZIP64
    /// extensions are needed.
    pub fn begin_entry(&mut self, desc: &EntryDescriptor, size_hint: Option<u64>) -> Result<()> {
        let zip = self.inner.as_mut().ok_or(ArchiverError::WriterFinished)?;
        if let Some(open) = &self.current {
            return Err(ArchiverError::InvalidEntry {
                entry: desc.path.clone(),
                reason: format!("entry '{open}' has not been ended"),
            });
        }

        let mut name = desc.path.replace('\\', "/").trim_start_matches('/').to_string();
        if name.is_empty() {
            return Err(ArchiverError::InvalidEntry {
                entry: desc.path.clone(),
                reason: "empty entry path".to_string(),
            });
        }

        let options = FileOptions::default()
            .compression_method(self.method)
            .last_modified_time(unix_to_dos(desc.effective_mtime()))
            .unix_permissions(desc.effective_mode() & 0o777)
            .large_file(size_hint.map_or(false, |s| s >= ZIP32_LIMIT));

        if desc.kind.is_dir() {
            if !name.ends_with('/') {
                name.push('/');
            }
            zip.add_directory(name.clone(), options)?;
        } else if let Some(stamp) = extended_timestamp(desc.effective_mtime()) {
            zip.start_file_with_extra_data(name.clone(), options)?;
            zip.write_all(&stamp)?;
            zip.end_extra_data()?;
        } else {
            zip.start_file(name.clone(), options)?;
        }
        trace!(name = %name, "started ZIP entry");
        self.current = Some(name);
        Ok(())
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let zip = self.inner.as_mut().ok_or(ArchiverError::WriterFinished)?;
        if self.current.is_none() {
            return Err(ArchiverError::InvalidEntry {
                entry: String::new(),
                reason: "payload written without an open entry".to_string(),
            });
        }
        zip.write_all(data)?;
        Ok(())
    }

    /// The `zip` crate finalizes an entry's CRC and sizes when the next one
    /// starts or the archive finishes; this only closes our bookkeeping.
    pub fn end_entry(&mut self) -> Result<()> {
        if self.inner.is_none() {
            return Err(ArchiverError::WriterFinished);
        }
        self.current.take().ok_or_else(|| ArchiverError::InvalidEntry {
            entry: String::new(),
            reason: "no open entry".to_string(),
        })?;
        self.entries += 1;
        Ok(())
    }

    /// Writes the central directory and returns the underlying writer.
    pub fn finish(&mut self) -> Result<W> {
        if let Some(open) = &self.current {
            return Err(ArchiverError::InvalidEntry {
                entry: open.clone(),
                reason: "archive finished while entry still open".to_string(),
            });
        }
        let mut zip = self.inner.take().ok_or(ArchiverError::WriterFinished)?;
        let out = zip.finish()?;
        debug!(entries = self.entries, "finished ZIP archive");
        Ok(out)
    }
}
