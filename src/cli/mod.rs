use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::archive::detect;
use crate::common::{ArchiveFormat, LinkPolicy};
use crate::export::WriterOptions;
use crate::extract::{ExtractOptions, OverwritePolicy};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log lifecycle events (equivalent to RUST_LOG=debug).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Create a TAR, TAR+gzip or ZIP archive from files and directories.
    #[command(alias = "c")]
    Create {
        /// One or more input files or directories to add to the archive.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// The path for the output archive file (e.g., backup.tar.gz).
        #[arg(short, long)]
        output: PathBuf,

        /// Archive format. Inferred from the output extension when omitted.
        #[arg(long, value_enum)]
        format: Option<FormatArg>,

        /// Compress the archive: gzip framing for TAR, Deflate entries for ZIP.
        #[arg(long, visible_alias = "gzip")]
        compress: bool,

        /// What to do with symbolic links.
        #[arg(long, value_enum, default_value_t = LinkArg::Skip)]
        links: LinkArg,
    },

    /// Extract an archive into a directory.
    #[command(alias = "x")]
    Extract {
        /// The archive file to extract.
        #[arg(required = true)]
        archive: PathBuf,

        /// The directory where files will be extracted.
        #[arg(short, long)]
        output: PathBuf,

        /// Drop this many leading path segments from every entry.
        #[arg(long, default_value_t = 0)]
        strip: usize,

        /// Leave files that already exist untouched.
        #[arg(long)]
        keep_existing: bool,

        /// Do not restore permissions and modification times.
        #[arg(long)]
        no_attributes: bool,
    },

    /// List the contents of an archive without extracting it.
    #[command(alias = "l")]
    List {
        /// The archive file to list contents of.
        #[arg(required = true)]
        archive: PathBuf,

        /// Drop this many leading path segments from every listed path.
        #[arg(long, default_value_t = 0)]
        strip: usize,

        /// Show kind, mode, size and modification time.
        #[arg(short, long)]
        long: bool,

        /// Print the listing as JSON.
        #[arg(long, conflicts_with = "long")]
        json: bool,
    },
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum FormatArg {
    Tar,
    Zip,
}

impl From<FormatArg> for ArchiveFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Tar => ArchiveFormat::Tar,
            FormatArg::Zip => ArchiveFormat::Zip,
        }
    }
}

/// Symbolic link handling for `create`.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkArg {
    /// Leave links out of the archive.
    Skip,
    /// Store the content of the link target.
    Follow,
}

impl From<LinkArg> for LinkPolicy {
    fn from(value: LinkArg) -> Self {
        match value {
            LinkArg::Skip => LinkPolicy::Skip,
            LinkArg::Follow => LinkPolicy::FollowTarget,
        }
    }
}

/// Resolves writer options from the flags and the output file name.
///
/// An explicit `--format` wins; otherwise `.zip`/`.jar` select ZIP, `.tar`
/// selects TAR and `.tar.gz`/`.tgz` select TAR with gzip. Anything else
/// defaults to TAR.
pub fn writer_options(output: &Path, format: Option<FormatArg>, compress: bool, links: LinkArg) -> WriterOptions {
    let inferred = detect::format_from_extension(output);
    let (format, gzip) = match (format, inferred) {
        (Some(explicit), Some((fmt, gz))) if ArchiveFormat::from(explicit) == fmt => (fmt, gz),
        (Some(explicit), _) => (explicit.into(), false),
        (None, Some(inferred)) => inferred,
        (None, None) => (ArchiveFormat::Tar, false),
    };
    WriterOptions::new(format, links.into()).compressed(compress || gzip)
}

pub fn extract_options(strip: usize, keep_existing: bool, no_attributes: bool) -> ExtractOptions {
    ExtractOptions {
        strip_level: strip,
        overwrite: if keep_existing { OverwritePolicy::Skip } else { OverwritePolicy::Overwrite },
        restore_permissions: !no_attributes,
        restore_mtime: !no_attributes,
    }
}

/// Parses command-line arguments using `clap`.
pub fn run() -> Result<Args, Box<dyn std::error::Error>> {
    Ok(Args::parse())
}
