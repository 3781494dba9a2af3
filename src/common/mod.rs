//! Common utilities and types module.
// Shared structs, constants and mode helpers used by both archive formats.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default mode for file entries written without explicit permissions.
pub const DEFAULT_FILE_MODE: u32 = 0o644;
/// Default mode for directory entries written without explicit permissions.
pub const DEFAULT_DIR_MODE: u32 = 0o755;
/// Largest up-front reservation for an in-memory entry read. Declared sizes
/// come from the archive and are not trusted beyond this.
pub const READ_RESERVE_LIMIT: u64 = 64 * 1024;

const EXEC_BITS: u32 = 0o111;
const WRITE_BITS: u32 = 0o222;

/// Whether an archive entry is a regular file or a directory.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn is_dir(self) -> bool {
        self == EntryKind::Directory
    }

    pub fn default_mode(self) -> u32 {
        match self {
            EntryKind::File => DEFAULT_FILE_MODE,
            EntryKind::Directory => DEFAULT_DIR_MODE,
        }
    }
}

/// The two on-disk formats handled by this crate.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Tar,
    Zip,
}

impl ArchiveFormat {
    pub fn name(self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "TAR",
            ArchiveFormat::Zip => "ZIP",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the writer does with entries that describe symbolic links.
///
/// There is intentionally no `Default`: callers must pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPolicy {
    /// Leave link entries out of the archive entirely.
    Skip,
    /// Store the link target's content under the link's path.
    FollowTarget,
}

/// Executable / read-only view of Unix permission bits.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceAttributes {
    pub executable: bool,
    pub read_only: bool,
}

impl ResourceAttributes {
    pub fn from_mode(mode: u32) -> Self {
        Self {
            executable: mode & EXEC_BITS != 0,
            read_only: mode & WRITE_BITS == 0,
        }
    }

    /// Applies these attributes to `base`: sets `0o111` when executable,
    /// clears `0o222` when read-only.
    pub fn apply_to_mode(self, base: u32) -> u32 {
        let mut mode = base;
        if self.executable {
            mode |= EXEC_BITS;
        }
        if self.read_only {
            mode &= !WRITE_BITS;
        }
        mode
    }
}

/// Metadata for a single file or directory entry about to be written.
///
/// Constructed per entry right before serialization and not retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDescriptor {
    /// Archive path, `/`-separated, relative.
    pub path: String,
    pub kind: EntryKind,
    /// Seconds since the Unix epoch. `None` means "now".
    pub mtime: Option<u64>,
    /// Unix permission bits. `None` means the kind's default mode.
    pub mode: Option<u32>,
    pub is_link: bool,
}

impl EntryDescriptor {
    pub fn file(path: impl Into<String>) -> Self {
        Self { path: path.into(), kind: EntryKind::File, mtime: None, mode: None, is_link: false }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self { path: path.into(), kind: EntryKind::Directory, mtime: None, mode: None, is_link: false }
    }

    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = Some(mtime);
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets the mode from the kind's default mode adjusted by `attrs`.
    pub fn with_attributes(mut self, attrs: ResourceAttributes) -> Self {
        self.mode = Some(attrs.apply_to_mode(self.kind.default_mode()));
        self
    }

    pub fn as_link(mut self) -> Self {
        self.is_link = true;
        self
    }

    pub fn effective_mode(&self) -> u32 {
        self.mode.unwrap_or_else(|| self.kind.default_mode()) & 0o7777
    }

    pub fn effective_mtime(&self) -> u64 {
        self.mtime.unwrap_or_else(|| chrono::Utc::now().timestamp().max(0) as u64)
    }
}

/// Size, mode and modification time of an entry as stored in an archive.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMetadata {
    pub kind: EntryKind,
    pub size: u64,
    pub mode: Option<u32>,
    pub mtime: Option<u64>,
}

impl EntryMetadata {
    pub fn attributes(&self) -> Option<ResourceAttributes> {
        self.mode.map(ResourceAttributes::from_mode)
    }
}
