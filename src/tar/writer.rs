//! Streaming TAR serializer.
//!
//! The header carries the entry size, so the caller declares it up front in
//! [`TarArchiveWriter::begin_entry`]; [`TarArchiveWriter::end_entry`] checks
//! that exactly that many bytes were written and pads to the block boundary.

use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, trace};

use super::header::{
    encode_header, padded_size, BLOCK_SIZE, LONG_LINK_NAME, NAME_FIELD_LEN, TYPE_DIRECTORY,
    TYPE_GNU_LONG_NAME, TYPE_REGULAR,
};
use crate::common::EntryDescriptor;
use crate::error::{ArchiverError, Result};

const ZERO_BLOCK: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];

enum Sink<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

impl<W: Write> Write for Sink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Plain(w) => w.write(buf),
            Sink::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(w) => w.flush(),
            Sink::Gzip(w) => w.flush(),
        }
    }
}

impl<W: Write> Sink<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Sink::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            }
            Sink::Gzip(encoder) => {
                let mut w = encoder.finish()?;
                w.flush()?;
                Ok(w)
            }
        }
    }
}

struct OpenEntry {
    name: String,
    declared: u64,
    written: u64,
}

pub struct TarArchiveWriter<W: Write> {
    sink: Option<Sink<W>>,
    current: Option<OpenEntry>,
    entries: u64,
}

impl<W: Write> TarArchiveWriter<W> {
    /// Wraps `out`; with `compress` the whole stream is gzip-framed.
    pub fn new(out: W, compress: bool) -> Self {
        let sink = if compress {
            Sink::Gzip(GzEncoder::new(out, Compression::default()))
        } else {
            Sink::Plain(out)
        };
        Self { sink: Some(sink), current: None, entries: 0 }
    }

    pub fn entries_written(&self) -> u64 {
        self.entries
    }

    /// Emits the header (and, for names over 100 bytes, a preceding GNU
    /// long-name record) for an entry of `size` payload bytes. Directories
    /// must declare size 0.
    pub fn begin_entry(&mut self, desc: &EntryDescriptor, size: u64) -> Result<()> {
        let sink = self.sink.as_mut().ok_or(ArchiverError::WriterFinished)?;
        let invalid = |reason: &str| ArchiverError::InvalidEntry {
            entry: desc.path.clone(),
            reason: reason.to_string(),
        };
        if let Some(open) = &self.current {
            return Err(invalid(&format!("entry '{}' has not been ended", open.name)));
        }

        let mut name = desc.path.replace('\\', "/").trim_start_matches('/').to_string();
        if name.is_empty() {
            return Err(invalid("empty entry path"));
        }
        let typeflag = if desc.kind.is_dir() {
            if size != 0 {
                return Err(invalid("directory entries carry no payload"));
            }
            if !name.ends_with('/') {
                name.push('/');
            }
            TYPE_DIRECTORY
        } else {
            TYPE_REGULAR
        };

        if name.len() > NAME_FIELD_LEN {
            let mut payload = name.as_bytes().to_vec();
            payload.push(0);
            let block = encode_header(
                LONG_LINK_NAME.as_bytes(),
                0o644,
                payload.len() as u64,
                0,
                TYPE_GNU_LONG_NAME,
            )?;
            sink.write_all(&block)?;
            sink.write_all(&payload)?;
            write_padding(sink, payload.len() as u64)?;
            trace!(name = %name, "wrote long-name record");
        }

        let short = &name.as_bytes()[..name.len().min(NAME_FIELD_LEN)];
        let block = encode_header(short, desc.effective_mode(), size, desc.effective_mtime(), typeflag)?;
        sink.write_all(&block)?;
        trace!(name = %name, size, "wrote header");

        self.current = Some(OpenEntry { name, declared: size, written: 0 });
        Ok(())
    }

    /// Streams payload bytes for the open entry.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let sink = self.sink.as_mut().ok_or(ArchiverError::WriterFinished)?;
        let open = self.current.as_mut().ok_or_else(|| ArchiverError::InvalidEntry {
            entry: String::new(),
            reason: "payload written without an open entry".to_string(),
        })?;
        let len = data.len() as u64;
        if open.written + len > open.declared {
            return Err(ArchiverError::InvalidEntry {
                entry: open.name.clone(),
                reason: format!("payload exceeds declared size of {} bytes", open.declared),
            });
        }
        sink.write_all(data)?;
        open.written += len;
        Ok(())
    }

    /// Closes the open entry, padding its payload to the next block boundary.
    pub fn end_entry(&mut self) -> Result<()> {
        let sink = self.sink.as_mut().ok_or(ArchiverError::WriterFinished)?;
        let open = self.current.take().ok_or_else(|| ArchiverError::InvalidEntry {
            entry: String::new(),
            reason: "no open entry".to_string(),
        })?;
        if open.written != open.declared {
            return Err(ArchiverError::InvalidEntry {
                entry: open.name,
                reason: format!("wrote {} of {} declared bytes", open.written, open.declared),
            });
        }
        write_padding(sink, open.written)?;
        self.entries += 1;
        Ok(())
    }

    /// Writes the end-of-archive marker and closes any gzip framing, returning
    /// the underlying writer. Every later call on this writer fails with
    /// [`ArchiverError::WriterFinished`].
    pub fn finish(&mut self) -> Result<W> {
        if let Some(open) = &self.current {
            return Err(ArchiverError::InvalidEntry {
                entry: open.name.clone(),
                reason: "archive finished while entry still open".to_string(),
            });
        }
        let mut sink = self.sink.take().ok_or(ArchiverError::WriterFinished)?;
        sink.write_all(&ZERO_BLOCK)?;
        sink.write_all(&ZERO_BLOCK)?;
        let out = sink.finish()?;
        debug!(entries = self.entries, "finished TAR archive");
        Ok(out)
    }
}

fn write_padding<W: Write>(sink: &mut W, len: u64) -> Result<()> {
    let padded = padded_size(len).ok_or_else(|| ArchiverError::InvalidEntry {
        entry: String::new(),
        reason: "entry size overflows".to_string(),
    })?;
    let pad = (padded - len) as usize;
    sink.write_all(&ZERO_BLOCK[..pad])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tar::TarDecoder;
    use std::io::{Cursor, Read};

    #[test]
    fn writes_padded_entries_and_trailer() {
        let mut w = TarArchiveWriter::new(Vec::new(), false);
        w.begin_entry(&EntryDescriptor::directory("docs").with_mtime(10), 0).unwrap();
        w.end_entry().unwrap();
        w.begin_entry(&EntryDescriptor::file("docs/a.txt").with_mtime(10), 3).unwrap();
        w.write(b"abc").unwrap();
        w.end_entry().unwrap();
        assert_eq!(w.entries_written(), 2);
        let out = w.finish().unwrap();
        assert_eq!(out.len(), 512 * 5);

        let mut dec = TarDecoder::new(Cursor::new(out));
        assert_eq!(dec.next_record().unwrap().unwrap().name, "docs/");
        let file = dec.next_record().unwrap().unwrap();
        assert_eq!(file.name, "docs/a.txt");
        assert_eq!(file.mode, 0o644);
        let mut body = String::new();
        dec.entry_reader().read_to_string(&mut body).unwrap();
        assert_eq!(body, "abc");
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let mut w = TarArchiveWriter::new(Vec::new(), false);
        w.begin_entry(&EntryDescriptor::file("a"), 2).unwrap();
        assert!(w.write(b"abc").is_err());
        w.write(b"a").unwrap();
        assert!(matches!(w.end_entry(), Err(ArchiverError::InvalidEntry { .. })));
    }

    #[test]
    fn writing_after_finish_fails() {
        let mut w = TarArchiveWriter::new(Vec::new(), true);
        w.finish().unwrap();
        assert!(matches!(w.finish(), Err(ArchiverError::WriterFinished)));
        assert!(matches!(
            w.begin_entry(&EntryDescriptor::file("late"), 0),
            Err(ArchiverError::WriterFinished)
        ));
    }
}
