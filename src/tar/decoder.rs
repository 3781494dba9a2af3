//! Forward-only TAR header decoder with skip-ahead repositioning.
//!
//! The decoder owns its byte source and an explicit cursor (`position`,
//! `entry_remaining`, `entry_padding`). A record's payload can be read through
//! [`TarDecoder::entry_reader`] until the next header is requested; whatever
//! payload and padding is left unread is skipped at that point.

use std::io::{self, Read};

use tracing::trace;

use super::header::{self, Block, BLOCK_SIZE, TYPE_GNU_LONG_LINK};
use super::TarRecord;
use crate::common::EntryKind;
use crate::error::{ArchiverError, Result};

/// Upper bound for a GNU long-name payload held in memory.
const MAX_LONG_NAME: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    AwaitingHeader,
    PayloadAvailable,
    Finished,
}

#[derive(Debug)]
pub struct TarDecoder<R: Read> {
    inner: R,
    position: u64,
    entry_remaining: u64,
    entry_padding: u64,
    state: DecoderState,
}

impl<R: Read> TarDecoder<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            position: 0,
            entry_remaining: 0,
            entry_padding: 0,
            state: DecoderState::AwaitingHeader,
        }
    }

    /// Number of bytes consumed from the underlying stream.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_finished(&self) -> bool {
        self.state == DecoderState::Finished
    }

    /// Decodes the next record, skipping any unread payload of the current one.
    /// Returns `Ok(None)` at end of archive.
    pub fn next_record(&mut self) -> Result<Option<TarRecord>> {
        if self.state == DecoderState::Finished {
            return Ok(None);
        }
        self.skip_rest_of_entry()?;

        let header_offset = self.position;
        let mut long_name: Option<Vec<u8>> = None;

        loop {
            let block_offset = self.position;
            let block = match self.read_block()? {
                Some(block) => block,
                None if long_name.is_some() => {
                    return Err(ArchiverError::UnexpectedEof { offset: self.position });
                }
                None => {
                    self.state = DecoderState::Finished;
                    return Ok(None);
                }
            };

            if header::is_zero_block(&block) {
                if long_name.is_some() {
                    return Err(ArchiverError::corrupt(
                        block_offset,
                        "zero block where the header following a long-name record was expected",
                    ));
                }
                trace!(offset = block_offset, "end-of-archive block");
                self.state = DecoderState::Finished;
                return Ok(None);
            }

            let fields = header::decode_header(&block, block_offset)?;
            let padding = header::padded_size(fields.size)
                .map(|p| p - fields.size)
                .ok_or_else(|| ArchiverError::corrupt(block_offset, "entry size overflows"))?;

            if fields.is_long_name() {
                let payload = self.read_payload_block(fields.size, padding, block_offset)?;
                trace!(offset = block_offset, len = payload.len(), "long-name record");
                long_name = Some(trim_nuls(payload));
                continue;
            }
            if fields.typeflag == TYPE_GNU_LONG_LINK {
                // Link targets are not part of the browse model.
                self.skip_exact(fields.size + padding)?;
                continue;
            }

            let kind = if fields.is_directory() { EntryKind::Directory } else { EntryKind::File };
            let name_bytes = long_name.take().unwrap_or(fields.name);
            let record = TarRecord {
                name: String::from_utf8_lossy(&name_bytes).into_owned(),
                mode: fields.mode,
                mtime: fields.mtime,
                size: fields.size,
                kind,
                header_offset,
                payload_offset: self.position,
            };
            trace!(name = %record.name, offset = header_offset, size = record.size, "decoded header");

            self.entry_remaining = fields.size;
            self.entry_padding = padding;
            self.state = DecoderState::PayloadAvailable;
            return Ok(Some(record));
        }
    }

    /// Repositions onto `record` by skipping forward. Returns `Ok(false)` when
    /// the record lies behind the current position (the caller must reopen).
    pub fn seek_to_record(&mut self, record: &TarRecord) -> Result<bool> {
        if record.header_offset < self.position {
            return Ok(false);
        }
        let gap = record.header_offset - self.position;
        self.skip_exact(gap)?;
        self.entry_remaining = 0;
        self.entry_padding = 0;
        self.state = DecoderState::AwaitingHeader;

        match self.next_record()? {
            Some(found) if found.name == record.name => Ok(true),
            Some(found) => Err(ArchiverError::InconsistentArchive {
                expected: record.name.clone(),
                found: found.name,
            }),
            None => Err(ArchiverError::InconsistentArchive {
                expected: record.name.clone(),
                found: "<end of archive>".to_string(),
            }),
        }
    }

    /// Reads payload bytes of the current record. Returns 0 at end of entry.
    pub fn read_payload(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.state != DecoderState::PayloadAvailable || self.entry_remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(self.entry_remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(ArchiverError::UnexpectedEof { offset: self.position });
        }
        self.position += n as u64;
        self.entry_remaining -= n as u64;
        Ok(n)
    }

    /// Borrows the decoder as a reader over the current record's payload.
    pub fn entry_reader(&mut self) -> EntryReader<'_, R> {
        EntryReader { decoder: self }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn skip_rest_of_entry(&mut self) -> Result<()> {
        if self.state == DecoderState::PayloadAvailable {
            let rest = self.entry_remaining + self.entry_padding;
            self.skip_exact(rest)?;
            self.entry_remaining = 0;
            self.entry_padding = 0;
            self.state = DecoderState::AwaitingHeader;
        }
        Ok(())
    }

    fn skip_exact(&mut self, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let copied = io::copy(&mut (&mut self.inner).take(n), &mut io::sink())?;
        self.position += copied;
        if copied < n {
            return Err(ArchiverError::UnexpectedEof { offset: self.position });
        }
        Ok(())
    }

    /// Reads one header block. `Ok(None)` on a clean end of stream at a block
    /// boundary past the first block.
    fn read_block(&mut self) -> Result<Option<Block>> {
        let mut block = [0u8; BLOCK_SIZE];
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match self.inner.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let start = self.position;
        self.position += filled as u64;
        match filled {
            0 if start > 0 => Ok(None),
            BLOCK_SIZE => Ok(Some(block)),
            _ => Err(ArchiverError::UnexpectedEof { offset: self.position }),
        }
    }

    fn read_payload_block(&mut self, size: u64, padding: u64, offset: u64) -> Result<Vec<u8>> {
        if size > MAX_LONG_NAME {
            return Err(ArchiverError::corrupt(offset, "long-name record too large"));
        }
        let len = usize::try_from(size)
            .map_err(|_| ArchiverError::corrupt(offset, "long-name record too large"))?;
        let mut payload = vec![0u8; len];
        match self.inner.read_exact(&mut payload) {
            Ok(()) => self.position += size,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(ArchiverError::UnexpectedEof { offset: self.position });
            }
            Err(e) => return Err(e.into()),
        }
        self.skip_exact(padding)?;
        Ok(payload)
    }
}

fn trim_nuls(mut bytes: Vec<u8>) -> Vec<u8> {
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes
}

/// Payload reader borrowed from a [`TarDecoder`].
pub struct EntryReader<'a, R: Read> {
    decoder: &'a mut TarDecoder<R>,
}

impl<R: Read> EntryReader<'_, R> {
    pub fn remaining(&self) -> u64 {
        self.decoder.entry_remaining
    }
}

impl<R: Read> Read for EntryReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read_payload(buf).map_err(|e| match e {
            ArchiverError::Io { source, .. } => source,
            other => io::Error::new(io::ErrorKind::UnexpectedEof, other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tar::header::{encode_header, TYPE_DIRECTORY, TYPE_GNU_LONG_NAME, TYPE_REGULAR};
    use std::io::Cursor;

    fn push_entry(out: &mut Vec<u8>, name: &[u8], typeflag: u8, payload: &[u8]) {
        out.extend_from_slice(&encode_header(name, 0o644, payload.len() as u64, 7, typeflag).unwrap());
        out.extend_from_slice(payload);
        let pad = header::padded_size(payload.len() as u64).unwrap() as usize - payload.len();
        out.extend(std::iter::repeat(0u8).take(pad));
    }

    fn finish(out: &mut Vec<u8>) {
        out.extend_from_slice(&[0u8; BLOCK_SIZE * 2]);
    }

    #[test]
    fn decodes_records_and_payload() {
        let mut tar = Vec::new();
        push_entry(&mut tar, b"dir/", TYPE_DIRECTORY, b"");
        push_entry(&mut tar, b"dir/a.txt", TYPE_REGULAR, b"hello");
        finish(&mut tar);

        let mut dec = TarDecoder::new(Cursor::new(tar));
        let dir = dec.next_record().unwrap().unwrap();
        assert_eq!(dir.kind, EntryKind::Directory);
        assert_eq!(dir.payload_offset, 512);

        let file = dec.next_record().unwrap().unwrap();
        assert_eq!(file.name, "dir/a.txt");
        assert_eq!(file.header_offset, 512);
        assert_eq!(file.payload_offset, 1024);

        let mut content = String::new();
        dec.entry_reader().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello");
        assert!(dec.next_record().unwrap().is_none());
        assert!(dec.is_finished());
    }

    #[test]
    fn unread_payload_is_skipped() {
        let mut tar = Vec::new();
        push_entry(&mut tar, b"big.bin", TYPE_REGULAR, &[7u8; 1500]);
        push_entry(&mut tar, b"next.txt", TYPE_REGULAR, b"x");
        finish(&mut tar);

        let mut dec = TarDecoder::new(Cursor::new(tar));
        dec.next_record().unwrap().unwrap();
        let mut two = [0u8; 2];
        let mut reader = dec.entry_reader();
        reader.read_exact(&mut two).unwrap();
        assert_eq!(reader.remaining(), 1498);
        let next = dec.next_record().unwrap().unwrap();
        assert_eq!(next.name, "next.txt");
        assert_eq!(next.header_offset, 512 + 1536);
    }

    #[test]
    fn long_name_resolves_and_keeps_first_header_offset() {
        let long = "d/".repeat(80) + "leaf.txt";
        let mut payload = long.as_bytes().to_vec();
        payload.push(0);
        let mut tar = Vec::new();
        push_entry(&mut tar, b"short.txt", TYPE_REGULAR, b"1");
        push_entry(&mut tar, LONG_LINK, TYPE_GNU_LONG_NAME, &payload);
        push_entry(&mut tar, &long.as_bytes()[..100], TYPE_REGULAR, b"22");
        finish(&mut tar);

        let mut dec = TarDecoder::new(Cursor::new(tar));
        dec.next_record().unwrap();
        let rec = dec.next_record().unwrap().unwrap();
        assert_eq!(rec.name, long);
        assert_eq!(rec.header_offset, 1024);
        assert_eq!(rec.payload_offset, 1024 + 512 + 512 + 512);
    }

    const LONG_LINK: &[u8] = b"././@LongLink";

    #[test]
    fn zero_block_after_long_name_is_corrupt() {
        let mut tar = Vec::new();
        push_entry(&mut tar, LONG_LINK, TYPE_GNU_LONG_NAME, b"whatever\0");
        finish(&mut tar);
        let err = TarDecoder::new(Cursor::new(tar)).next_record().unwrap_err();
        assert!(matches!(err, ArchiverError::CorruptArchive { offset: 1024, .. }));
    }

    #[test]
    fn oversized_long_name_is_corrupt() {
        let mut tar = encode_header(LONG_LINK, 0o644, 1 << 40, 0, TYPE_GNU_LONG_NAME).unwrap().to_vec();
        tar.extend_from_slice(b"name\0");
        let err = TarDecoder::new(Cursor::new(tar)).next_record().unwrap_err();
        assert!(matches!(err, ArchiverError::CorruptArchive { offset: 0, .. }));
    }

    #[test]
    fn zero_block_at_start_is_an_empty_archive() {
        let mut dec = TarDecoder::new(Cursor::new(vec![0u8; BLOCK_SIZE * 2]));
        assert!(dec.next_record().unwrap().is_none());
    }

    #[test]
    fn empty_stream_is_unexpected_eof() {
        let err = TarDecoder::new(Cursor::new(Vec::new())).next_record().unwrap_err();
        assert!(matches!(err, ArchiverError::UnexpectedEof { offset: 0 }));
    }

    #[test]
    fn truncated_payload_is_unexpected_eof() {
        let mut tar = Vec::new();
        push_entry(&mut tar, b"a.bin", TYPE_REGULAR, &[1u8; 100]);
        tar.truncate(512 + 40);
        let mut dec = TarDecoder::new(Cursor::new(tar));
        dec.next_record().unwrap().unwrap();
        let mut sink = Vec::new();
        assert!(dec.entry_reader().read_to_end(&mut sink).is_err());
    }

    #[test]
    fn seek_forward_and_refuse_backward() {
        let mut tar = Vec::new();
        push_entry(&mut tar, b"one", TYPE_REGULAR, b"1");
        push_entry(&mut tar, b"two", TYPE_REGULAR, b"2");
        push_entry(&mut tar, b"three", TYPE_REGULAR, b"3");
        finish(&mut tar);

        let mut scan = TarDecoder::new(Cursor::new(tar.clone()));
        let records: Vec<_> = std::iter::from_fn(|| scan.next_record().unwrap()).collect();

        let mut dec = TarDecoder::new(Cursor::new(tar));
        assert!(dec.seek_to_record(&records[2]).unwrap());
        let mut s = String::new();
        dec.entry_reader().read_to_string(&mut s).unwrap();
        assert_eq!(s, "3");
        assert!(!dec.seek_to_record(&records[0]).unwrap());
    }

    #[test]
    fn seek_detects_wrong_entry() {
        let mut tar = Vec::new();
        push_entry(&mut tar, b"one", TYPE_REGULAR, b"1");
        finish(&mut tar);
        let bogus = TarRecord {
            name: "other".into(),
            mode: 0o644,
            mtime: 0,
            size: 1,
            kind: EntryKind::File,
            header_offset: 0,
            payload_offset: 512,
        };
        let err = TarDecoder::new(Cursor::new(tar)).seek_to_record(&bogus).unwrap_err();
        assert!(matches!(err, ArchiverError::InconsistentArchive { .. }));
    }
}
