//! # Archive Browsing
//!
//! Format-independent view of an archive as a directory tree.
//!
//! A format plugs in through [`ArchiveBackend`]: it enumerates raw entries once
//! and serves content for the handles it produced. [`ArchiveTree`] builds the
//! directory hierarchy on top of that. [`open`] sniffs the format of a file and
//! returns a tree over the matching backend.

pub mod detect;
pub mod path;
mod tree;

pub use tree::{ArchiveTree, NodeId};

use std::fmt;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::common::{ArchiveFormat, EntryMetadata};
use crate::error::{ArchiverError, Result};
use crate::tar::{TarContainer, TarRecord};
use crate::zipfile::{ZipContainer, ZipEntryHandle};

/// One entry as enumerated by a backend, before path normalization.
#[derive(Debug, Clone)]
pub struct RawEntry<H> {
    pub path: String,
    pub metadata: EntryMetadata,
    pub handle: H,
}

/// Per-format enumeration and content-fetch primitives.
pub trait ArchiveBackend {
    /// Format-specific entry handle kept by leaf nodes.
    type Handle: Clone + fmt::Debug;

    fn archive_path(&self) -> &Path;

    fn format(&self) -> ArchiveFormat;

    /// Enumerates every entry once, in archive order. Per-entry failures are
    /// passed to `visit`; an `Err` return means enumeration could not start.
    fn scan(&mut self, visit: &mut dyn FnMut(Result<RawEntry<Self::Handle>>)) -> Result<()>;

    fn open_entry(&mut self, handle: &Self::Handle) -> Result<Box<dyn Read + '_>>;

    /// Releases the archive handle. Must be idempotent.
    fn close(&mut self) -> Result<()>;
}

impl ArchiveBackend for TarContainer {
    type Handle = TarRecord;

    fn archive_path(&self) -> &Path {
        self.path()
    }

    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Tar
    }

    fn scan(&mut self, visit: &mut dyn FnMut(Result<RawEntry<TarRecord>>)) -> Result<()> {
        if self.is_closed() {
            return Err(ArchiverError::ArchiveClosed);
        }
        for record in self.entries() {
            visit(record.map(|record| RawEntry {
                path: record.name.clone(),
                metadata: record.metadata(),
                handle: record,
            }));
        }
        Ok(())
    }

    fn open_entry(&mut self, handle: &TarRecord) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(self.content(handle)?))
    }

    fn close(&mut self) -> Result<()> {
        TarContainer::close(self)
    }
}

impl ArchiveBackend for ZipContainer {
    type Handle = ZipEntryHandle;

    fn archive_path(&self) -> &Path {
        self.path()
    }

    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn scan(&mut self, visit: &mut dyn FnMut(Result<RawEntry<ZipEntryHandle>>)) -> Result<()> {
        if self.is_closed() {
            return Err(ArchiverError::ArchiveClosed);
        }
        for entry in self.entries() {
            visit(entry.map(|handle| RawEntry {
                path: handle.name.clone(),
                metadata: handle.metadata(),
                handle,
            }));
        }
        Ok(())
    }

    fn open_entry(&mut self, handle: &ZipEntryHandle) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(self.content(handle)?))
    }

    fn close(&mut self) -> Result<()> {
        ZipContainer::close(self)
    }
}

/// Either supported container, for callers that sniff the format at runtime.
pub enum AnyBackend {
    Tar(TarContainer),
    Zip(ZipContainer),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyHandle {
    Tar(TarRecord),
    Zip(ZipEntryHandle),
}

impl ArchiveBackend for AnyBackend {
    type Handle = AnyHandle;

    fn archive_path(&self) -> &Path {
        match self {
            AnyBackend::Tar(c) => c.path(),
            AnyBackend::Zip(c) => c.path(),
        }
    }

    fn format(&self) -> ArchiveFormat {
        match self {
            AnyBackend::Tar(_) => ArchiveFormat::Tar,
            AnyBackend::Zip(_) => ArchiveFormat::Zip,
        }
    }

    fn scan(&mut self, visit: &mut dyn FnMut(Result<RawEntry<AnyHandle>>)) -> Result<()> {
        match self {
            AnyBackend::Tar(c) => c.scan(&mut |entry| {
                visit(entry.map(|e| RawEntry { path: e.path, metadata: e.metadata, handle: AnyHandle::Tar(e.handle) }))
            }),
            AnyBackend::Zip(c) => c.scan(&mut |entry| {
                visit(entry.map(|e| RawEntry { path: e.path, metadata: e.metadata, handle: AnyHandle::Zip(e.handle) }))
            }),
        }
    }

    fn open_entry(&mut self, handle: &AnyHandle) -> Result<Box<dyn Read + '_>> {
        match (self, handle) {
            (AnyBackend::Tar(c), AnyHandle::Tar(h)) => c.open_entry(h),
            (AnyBackend::Zip(c), AnyHandle::Zip(h)) => c.open_entry(h),
            (backend, handle) => Err(ArchiverError::InvalidEntry {
                entry: format!("{handle:?}"),
                reason: format!("handle does not belong to this {} archive", backend.format()),
            }),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            AnyBackend::Tar(c) => ArchiveBackend::close(c),
            AnyBackend::Zip(c) => ArchiveBackend::close(c),
        }
    }
}

/// A browsable archive of either format.
pub type Archive = ArchiveTree<AnyBackend>;

/// Opens `path` as TAR (plain or gzip) or, failing that, as ZIP.
///
/// Returns [`ArchiverError::NotAnArchive`] when neither probe succeeds.
pub fn open(path: impl AsRef<Path>) -> Result<Archive> {
    let path = path.as_ref();
    let backend = match TarContainer::open(path) {
        Ok(tar) => AnyBackend::Tar(tar),
        Err(e) if e.is_not_an_archive() => match ZipContainer::open(path) {
            Ok(zip) => AnyBackend::Zip(zip),
            Err(e) if e.is_not_an_archive() => {
                return Err(ArchiverError::NotAnArchive {
                    path: path.to_path_buf(),
                    format: "TAR or ZIP",
                })
            }
            Err(e) => return Err(e),
        },
        Err(e) => return Err(e),
    };
    debug!(path = %path.display(), format = %backend.format(), "opened archive");
    Ok(ArchiveTree::new(backend))
}
