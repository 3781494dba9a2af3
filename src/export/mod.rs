//! # Export Module
//!
//! Serializes entries into a TAR, TAR+gzip or ZIP archive.
//!
//! [`ArchiveWriter`] dispatches to the format writers and keeps a running
//! [`ArchiveSummary`]. [`export_paths`] walks files and directories on disk and
//! writes them through an `ArchiveWriter` into a temporary file that only
//! replaces the destination once the archive is complete.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::common::{ArchiveFormat, EntryDescriptor, EntryKind, LinkPolicy};
use crate::error::{ArchiverError, Result};
use crate::fsx;
use crate::tar::TarArchiveWriter;
use crate::zipfile::ZipArchiveWriter;

const COPY_BUFFER: usize = 64 * 1024;

/// How an archive is written. `link_policy` has no default on purpose: the
/// caller decides between skipping links and storing their targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    pub format: ArchiveFormat,
    /// Gzip framing for TAR, Deflate for ZIP entries.
    pub compress: bool,
    pub link_policy: LinkPolicy,
}

impl WriterOptions {
    pub fn new(format: ArchiveFormat, link_policy: LinkPolicy) -> Self {
        Self { format, compress: false, link_policy }
    }

    pub fn compressed(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }
}

/// Payload for [`ArchiveWriter::write_entry`].
pub enum EntryContent<'a> {
    Directory,
    Bytes(&'a [u8]),
    /// Exactly `len` bytes are read from `reader`.
    Stream { reader: &'a mut dyn Read, len: u64 },
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct WrittenEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub crc32: u32,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub format: ArchiveFormat,
    pub compressed: bool,
    pub entries: Vec<WrittenEntry>,
    pub skipped_links: usize,
}

impl ArchiveSummary {
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

enum FormatWriter<W: Write + Seek> {
    Tar(TarArchiveWriter<W>),
    Zip(ZipArchiveWriter<W>),
}

impl<W: Write + Seek> FormatWriter<W> {
    fn begin(&mut self, desc: &EntryDescriptor, size: u64) -> Result<()> {
        match self {
            FormatWriter::Tar(w) => w.begin_entry(desc, size),
            FormatWriter::Zip(w) => w.begin_entry(desc, Some(size)),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        match self {
            FormatWriter::Tar(w) => w.write(data),
            FormatWriter::Zip(w) => w.write(data),
        }
    }

    fn end(&mut self) -> Result<()> {
        match self {
            FormatWriter::Tar(w) => w.end_entry(),
            FormatWriter::Zip(w) => w.end_entry(),
        }
    }

    fn finish(&mut self) -> Result<W> {
        match self {
            FormatWriter::Tar(w) => w.finish(),
            FormatWriter::Zip(w) => w.finish(),
        }
    }
}

/// Append-only archive writer over a single output stream.
pub struct ArchiveWriter<W: Write + Seek> {
    inner: FormatWriter<W>,
    link_policy: LinkPolicy,
    summary: ArchiveSummary,
    output: Option<W>,
    finished: bool,
}

impl ArchiveWriter<BufWriter<File>> {
    /// Creates (or truncates) `dest` and writes an archive into it. A failed
    /// write leaves a partial file behind; see [`export_paths`] for atomic output.
    pub fn create(dest: &Path, opts: &WriterOptions) -> Result<Self> {
        let file = File::create(dest).map_err(|e| ArchiverError::io_at(e, dest))?;
        Ok(Self::new(BufWriter::new(file), opts))
    }
}

impl<W: Write + Seek> ArchiveWriter<W> {
    pub fn new(out: W, opts: &WriterOptions) -> Self {
        let inner = match opts.format {
            ArchiveFormat::Tar => FormatWriter::Tar(TarArchiveWriter::new(out, opts.compress)),
            ArchiveFormat::Zip => FormatWriter::Zip(ZipArchiveWriter::new(out, opts.compress)),
        };
        Self {
            inner,
            link_policy: opts.link_policy,
            summary: ArchiveSummary {
                format: opts.format,
                compressed: opts.compress,
                entries: Vec::new(),
                skipped_links: 0,
            },
            output: None,
            finished: false,
        }
    }

    /// Writes one entry. Returns `Ok(false)` when the entry is a link and the
    /// link policy is [`LinkPolicy::Skip`]; under [`LinkPolicy::FollowTarget`]
    /// `content` must be the link target's content.
    pub fn write_entry(&mut self, desc: &EntryDescriptor, content: EntryContent<'_>) -> Result<bool> {
        if self.finished {
            return Err(ArchiverError::WriterFinished);
        }
        if desc.is_link && self.link_policy == LinkPolicy::Skip {
            debug!(entry = %desc.path, "skipping link");
            self.summary.skipped_links += 1;
            return Ok(false);
        }
        let mismatch = |reason: &str| ArchiverError::InvalidEntry {
            entry: desc.path.clone(),
            reason: reason.to_string(),
        };

        let (size, crc32) = match content {
            EntryContent::Directory => {
                if !desc.kind.is_dir() {
                    return Err(mismatch("file entry without content"));
                }
                self.inner.begin(desc, 0)?;
                (0, 0)
            }
            EntryContent::Bytes(data) => {
                if desc.kind.is_dir() {
                    return Err(mismatch("directory entry with content"));
                }
                self.inner.begin(desc, data.len() as u64)?;
                self.inner.write(data)?;
                (data.len() as u64, crc32fast::hash(data))
            }
            EntryContent::Stream { reader, len } => {
                if desc.kind.is_dir() {
                    return Err(mismatch("directory entry with content"));
                }
                self.inner.begin(desc, len)?;
                let mut hasher = crc32fast::Hasher::new();
                let mut limited = reader.take(len);
                let mut buf = vec![0u8; COPY_BUFFER];
                let mut copied = 0u64;
                loop {
                    let n = match limited.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    };
                    hasher.update(&buf[..n]);
                    self.inner.write(&buf[..n])?;
                    copied += n as u64;
                }
                if copied != len {
                    return Err(mismatch(&format!("source ended after {copied} of {len} bytes")));
                }
                (len, hasher.finalize())
            }
        };
        self.inner.end()?;

        self.summary.entries.push(WrittenEntry {
            path: desc.path.clone(),
            kind: desc.kind,
            size,
            crc32,
        });
        Ok(true)
    }

    /// Writes the format trailer (TAR end blocks and gzip footer, or the ZIP
    /// central directory). Any call after the first fails with
    /// [`ArchiverError::WriterFinished`].
    pub fn finish(&mut self) -> Result<ArchiveSummary> {
        if self.finished {
            return Err(ArchiverError::WriterFinished);
        }
        self.finished = true;
        let mut out = self.inner.finish()?;
        out.flush()?;
        self.output = Some(out);
        Ok(self.summary.clone())
    }

    /// The output stream, available once [`ArchiveWriter::finish`] succeeded.
    pub fn into_inner(self) -> Option<W> {
        self.output
    }
}

/// Entry name for a path relative to the export base: `/`-separated, no `.`.
fn entry_name(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Returns the longest common ancestor directory shared by all provided paths.
/// If the slice is empty, an empty `PathBuf` is returned.
pub(crate) fn common_parent(paths: &[PathBuf]) -> PathBuf {
    if paths.is_empty() {
        return PathBuf::new();
    }

    let mut prefix: Vec<Component> = paths[0].components().collect();
    for p in &paths[1..] {
        let comps: Vec<Component> = p.components().collect();
        let mut idx = 0usize;
        while idx < prefix.len() && idx < comps.len() && prefix[idx] == comps[idx] {
            idx += 1;
        }
        prefix.truncate(idx);
        if prefix.is_empty() {
            break;
        }
    }

    let mut out = PathBuf::new();
    for c in prefix {
        out.push(c.as_os_str());
    }
    out
}

/// Archives `inputs` (files and directories, recursively) into `dest`.
///
/// Entry paths are relative to the parent of the inputs, so a directory
/// input `photos/` yields entries `photos/...`. The archive is written to a
/// temporary file next to `dest` and renamed over it only after `finish()`
/// succeeded.
pub fn export_paths(inputs: &[PathBuf], dest: &Path, opts: &WriterOptions) -> Result<ArchiveSummary> {
    let mut roots = Vec::with_capacity(inputs.len());
    for input in inputs {
        roots.push(input.canonicalize().map_err(|e| ArchiverError::io_at(e, input))?);
    }
    let mut base = common_parent(&roots);
    if roots.contains(&base) {
        base = base.parent().map(Path::to_path_buf).unwrap_or_default();
    }

    let dest_dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let dest_dir = dest_dir.canonicalize().map_err(|e| ArchiverError::io_at(e, &dest_dir))?;
    let temp = NamedTempFile::new_in(&dest_dir).map_err(|e| ArchiverError::io_at(e, &dest_dir))?;
    let temp_path = temp.path().to_path_buf();
    let dest_abs = dest.file_name().map(|name| dest_dir.join(name));

    let mut writer = ArchiveWriter::new(BufWriter::new(temp), opts);
    let follow = opts.link_policy == LinkPolicy::FollowTarget;

    for root in &roots {
        for entry in WalkDir::new(root).follow_links(follow).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                ArchiverError::Io { source: e.into(), path }
            })?;
            let path = entry.path();
            if path == temp_path || Some(path) == dest_abs.as_deref() {
                continue;
            }

            let rel = path.strip_prefix(&base).map_err(|_| ArchiverError::StripPrefix {
                prefix: base.clone(),
                path: path.to_path_buf(),
            })?;
            let name = entry_name(rel);
            if name.is_empty() {
                continue;
            }

            if entry.path_is_symlink() && !follow {
                writer.write_entry(&EntryDescriptor::file(name).as_link(), EntryContent::Bytes(&[]))?;
                continue;
            }

            let meta = entry.metadata().map_err(|e| ArchiverError::Io {
                source: e.into(),
                path: path.to_path_buf(),
            })?;
            let mut desc = if meta.is_dir() {
                EntryDescriptor::directory(name)
            } else {
                EntryDescriptor::file(name)
            };
            if let Some(mode) = fsx::unix_mode(&meta) {
                desc = desc.with_mode(mode);
            }
            if let Some(mtime) = fsx::mtime_secs(&meta) {
                desc = desc.with_mtime(mtime);
            }
            if entry.path_is_symlink() {
                desc = desc.as_link();
            }

            if meta.is_dir() {
                writer.write_entry(&desc, EntryContent::Directory)?;
            } else if meta.is_file() {
                let mut file = File::open(path).map_err(|e| ArchiverError::io_at(e, path))?;
                writer
                    .write_entry(&desc, EntryContent::Stream { reader: &mut file, len: meta.len() })
                    .map_err(|e| e.in_archive(path))?;
            } else {
                warn!(path = %path.display(), "skipping special file");
            }
        }
    }

    let summary = writer.finish().map_err(|e| e.in_archive(dest))?;
    let buffered = writer.into_inner().ok_or(ArchiverError::WriterFinished)?;
    let temp = buffered
        .into_inner()
        .map_err(|e| ArchiverError::io_at(e.into_error(), dest))?;
    temp.persist(dest).map_err(|e| ArchiverError::io_at(e.error, dest))?;

    info!(
        path = %dest.display(),
        entries = summary.entries.len(),
        skipped_links = summary.skipped_links,
        "archive written"
    );
    Ok(summary)
}
