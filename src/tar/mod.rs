//! # TAR Format
//!
//! ustar-compatible reading and writing with the GNU long-name extension and
//! optional gzip framing.
//!
//! - [`header`]: the 512-byte header block codec.
//! - [`decoder`]: [`TarDecoder`], a forward/skip-ahead record decoder.
//! - [`container`]: [`TarContainer`], open/iterate/content-fetch over a `.tar` or `.tar.gz` file.
//! - [`writer`]: [`TarArchiveWriter`], the serializing side.

pub mod container;
pub mod decoder;
pub mod header;
pub mod writer;

pub use container::{TarContainer, TarSource};
pub use decoder::{EntryReader, TarDecoder};
pub use writer::TarArchiveWriter;

use serde::Serialize;

use crate::common::{EntryKind, EntryMetadata};

/// One decoded TAR header.
///
/// `header_offset` is the first header block belonging to the record (the
/// `@LongLink` block when the name came from one); `payload_offset` is where
/// the entry data starts. Both are offsets into the (decompressed) TAR stream.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TarRecord {
    pub name: String,
    pub mode: u32,
    pub mtime: u64,
    pub size: u64,
    pub kind: EntryKind,
    pub header_offset: u64,
    pub payload_offset: u64,
}

impl TarRecord {
    pub fn metadata(&self) -> EntryMetadata {
        EntryMetadata {
            kind: self.kind,
            size: self.size,
            mode: Some(self.mode),
            mtime: Some(self.mtime),
        }
    }
}
