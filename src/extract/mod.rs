//! # Extraction Module
//!
//! Writes the contents of an [`ArchiveTree`] onto the filesystem.
//!
//! Every destination is checked twice before anything is written: lexically
//! (no `..` may climb out of the destination root) and against the canonical
//! location of the nearest existing ancestor (no symlinked directory inside the
//! destination may redirect the write). A symlink already sitting at the
//! destination path itself is never written through. Entries failing these
//! checks are reported as [`ArchiverError::PathEscape`] and skipped; the rest
//! of the archive is still extracted.

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::archive::path::segment_count;
use crate::archive::{self, ArchiveBackend, ArchiveTree};
use crate::error::{ArchiverError, Result};
use crate::fsx as fs;

/// What to do when a file already exists at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    #[default]
    Overwrite,
    Skip,
    Fail,
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub strip_level: usize,
    pub overwrite: OverwritePolicy,
    pub restore_permissions: bool,
    pub restore_mtime: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            strip_level: 0,
            overwrite: OverwritePolicy::Overwrite,
            restore_permissions: true,
            restore_mtime: true,
        }
    }
}

/// Outcome of an extraction. Per-entry failures end up in `errors`; an `Err`
/// from the extract functions means nothing could be extracted at all.
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub files: Vec<PathBuf>,
    pub directories: Vec<PathBuf>,
    /// Entries left alone because the destination already existed.
    pub skipped: Vec<String>,
    pub errors: Vec<ArchiverError>,
}

impl ExtractReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn security_violations(&self) -> usize {
        self.errors.iter().filter(|e| e.is_security_violation()).count()
    }
}

/// Maps an archive path onto `root`, which must already be canonical.
pub fn resolve_destination(root: &Path, entry_path: &str) -> Result<PathBuf> {
    let escape = || ArchiverError::PathEscape { entry: entry_path.to_string() };

    let mut target = root.to_path_buf();
    let mut depth = 0usize;
    for segment in entry_path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if depth == 0 {
                    return Err(escape());
                }
                target.pop();
                depth -= 1;
            }
            s if s.contains(':') => return Err(escape()),
            s => {
                target.push(s);
                depth += 1;
            }
        }
    }
    if !target.starts_with(root) {
        return Err(escape());
    }
    if fs::symlink_metadata(&target).map_or(false, |m| m.file_type().is_symlink()) {
        return Err(escape());
    }

    let mut ancestor = target.parent();
    while let Some(dir) = ancestor {
        if dir.exists() {
            let canonical = dir.canonicalize().map_err(|e| ArchiverError::io_at(e, dir))?;
            if !canonical.starts_with(root) {
                return Err(escape());
            }
            break;
        }
        ancestor = dir.parent();
    }
    Ok(target)
}

/// Extracts every node of `tree` below `dest`, creating `dest` if needed.
pub fn extract_tree<B: ArchiveBackend>(
    tree: &mut ArchiveTree<B>,
    dest: &Path,
    opts: &ExtractOptions,
) -> Result<ExtractReport> {
    fs::create_dir_all(dest).map_err(|e| ArchiverError::io_at(e, dest))?;
    let root = dest.canonicalize().map_err(|e| ArchiverError::io_at(e, dest))?;
    tree.set_strip_level(opts.strip_level);

    let mut report = ExtractReport::default();
    for problem in tree.take_problems() {
        report.errors.push(problem.in_archive(tree.backend().archive_path()));
    }

    let mut dir_attrs = Vec::new();
    for node in tree.walk() {
        let is_dir = tree.is_directory(node);
        if is_dir && opts.strip_level > 0 && segment_count(tree.raw_path(node)) <= opts.strip_level {
            continue;
        }
        let rel = tree.full_path(node);
        let target = match resolve_destination(&root, &rel) {
            Ok(target) => target,
            Err(e) => {
                warn!(entry = %rel, "security: entry escapes destination");
                report.errors.push(e);
                continue;
            }
        };
        let meta = tree.metadata(node);

        if is_dir {
            match fs::create_dir_all(&target) {
                Ok(()) => {
                    dir_attrs.push((target.clone(), meta));
                    report.directories.push(target);
                }
                Err(e) => report.errors.push(ArchiverError::io_at(e, &target)),
            }
            continue;
        }

        if target.exists() {
            match opts.overwrite {
                OverwritePolicy::Skip => {
                    debug!(entry = %rel, "destination exists, skipping");
                    report.skipped.push(rel);
                    continue;
                }
                OverwritePolicy::Fail => {
                    let err = io::Error::new(io::ErrorKind::AlreadyExists, "destination already exists");
                    report.errors.push(ArchiverError::io_at(err, &target));
                    continue;
                }
                OverwritePolicy::Overwrite => {}
            }
        }
        if let Some(parent) = target.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                report.errors.push(ArchiverError::io_at(e, parent));
                continue;
            }
        }

        let mut reader = match tree.try_content(node) {
            Ok(Some(reader)) => reader,
            Ok(None) => continue,
            Err(e) => {
                warn!(entry = %rel, error = %e, "failed to read archive entry");
                report.errors.push(e);
                continue;
            }
        };
        let written = fs::File::create(&target).and_then(|file| {
            let mut out = BufWriter::new(file);
            io::copy(&mut reader, &mut out)?;
            out.flush()
        });
        drop(reader);
        if let Err(e) = written {
            let _ = fs::remove_file(&target);
            report.errors.push(ArchiverError::io_at(e, &target));
            continue;
        }

        if let Err(e) = restore_attributes(&target, meta.mode, meta.mtime, opts) {
            report.errors.push(ArchiverError::io_at(e, &target));
        }
        report.files.push(target);
    }

    // Children come after their parents in `walk` order; apply directory
    // attributes bottom-up so a read-only parent is set last.
    for (dir, meta) in dir_attrs.into_iter().rev() {
        if let Err(e) = restore_attributes(&dir, meta.mode, meta.mtime, opts) {
            report.errors.push(ArchiverError::io_at(e, &dir));
        }
    }

    debug!(
        files = report.files.len(),
        directories = report.directories.len(),
        errors = report.errors.len(),
        "extraction finished"
    );
    Ok(report)
}

fn restore_attributes(path: &Path, mode: Option<u32>, mtime: Option<u64>, opts: &ExtractOptions) -> io::Result<()> {
    // Timestamps first: a read-only mode would block opening the file.
    if opts.restore_mtime {
        if let Some(mtime) = mtime {
            fs::set_modified_time(path, mtime)?;
        }
    }
    if opts.restore_permissions {
        if let Some(mode) = mode {
            fs::set_unix_permissions(path, mode)?;
        }
    }
    Ok(())
}

/// Opens `archive_path` (TAR, TAR+gzip or ZIP) and extracts it below `dest`.
pub fn extract_archive(archive_path: &Path, dest: &Path, opts: &ExtractOptions) -> Result<ExtractReport> {
    let mut tree = archive::open(archive_path)?;
    let report = extract_tree(&mut tree, dest, opts);
    tree.close();
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        for entry in ["../../etc/passwd", "a/../../x", "..\\..\\boot.ini", "C:/windows"] {
            let err = resolve_destination(&root, entry).unwrap_err();
            assert!(err.is_security_violation(), "{entry}");
        }
        assert_eq!(resolve_destination(&root, "a/./b/../c.txt").unwrap(), root.join("a").join("c.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_escape_is_rejected() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();
        let err = resolve_destination(&root, "link/evil.sh").unwrap_err();
        assert!(err.is_security_violation());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_at_destination_is_not_written_through() {
        use crate::common::{ArchiveFormat, EntryDescriptor, LinkPolicy};
        use crate::export::{ArchiveWriter, EntryContent, WriterOptions};

        let outside = tempfile::tempdir().unwrap();
        let victim = outside.path().join("victim.txt");
        fs::write(&victim, "original").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("drop.tar");
        let mut writer =
            ArchiveWriter::create(&archive_path, &WriterOptions::new(ArchiveFormat::Tar, LinkPolicy::Skip)).unwrap();
        for (name, body) in [("config.txt", "pwned"), ("other.txt", "fine")] {
            writer.write_entry(&EntryDescriptor::file(name), EntryContent::Bytes(body.as_bytes())).unwrap();
        }
        writer.finish().unwrap();
        drop(writer);

        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        std::os::unix::fs::symlink(&victim, dest.join("config.txt")).unwrap();

        let report = extract_archive(&archive_path, &dest, &ExtractOptions::default()).unwrap();
        assert_eq!(report.security_violations(), 1);
        assert_eq!(fs::read_to_string(&victim).unwrap(), "original");
        assert!(fs::symlink_metadata(dest.join("config.txt")).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(dest.join("other.txt")).unwrap(), "fine");

        let root = dest.canonicalize().unwrap();
        assert!(resolve_destination(&root, "config.txt").unwrap_err().is_security_violation());
    }
}
