//! # archfs Core Library
//!
//! Browse TAR and ZIP archives as lazily-built directory trees, extract them
//! safely, and write resource trees back out as archives.
//!
//! ## Key Modules
//!
//! - [`tar`]: ustar/GNU TAR header codec, decoder, container and writer.
//! - [`zipfile`]: ZIP container and writer on top of the `zip` crate.
//! - [`archive`]: the shared [`archive::ArchiveTree`] browsing model and format sniffing.
//! - [`extract`]: zip-slip-safe extraction of a tree onto the filesystem.
//! - [`export`]: the format-dispatching [`export::ArchiveWriter`] and filesystem export.
//!
//! ## Examples
//!
//! ```no_run
//! let mut tree = archfs::archive::open("backup.tar.gz")?;
//! let root = tree.root_node();
//! for child in tree.children(root) {
//!     println!("{}", tree.label(child));
//! }
//! tree.close();
//! # Ok::<(), archfs::ArchiverError>(())
//! ```

pub mod archive;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod error;
pub mod export;
pub mod extract;
pub use error::ArchiverError;

// Cross-platform filesystem wrapper
pub mod fsx;

pub mod tar;
pub mod zipfile;
