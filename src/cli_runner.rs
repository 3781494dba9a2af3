//! Command dispatch for the `archfs` binary.

use std::path::Path;

use chrono::{TimeZone, Utc};
use serde::Serialize;

use crate::archive;
use crate::cli::{self, Args, Commands};
use crate::common::EntryKind;
use crate::error::ArchiverError;
use crate::export;
use crate::extract;

/// Public entry for running CLI logic on parsed arguments.
pub fn run_cli_app(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        Commands::Create { inputs, output, format, compress, links } => {
            let opts = cli::writer_options(&output, format, compress, links);
            let summary = export::export_paths(&inputs, &output, &opts)?;
            println!(
                "Created {} ({} archive, {} entries, {} bytes)",
                output.display(),
                summary.format,
                summary.entries.len(),
                summary.total_bytes()
            );
            if summary.skipped_links > 0 {
                println!("Skipped {} symbolic link(s)", summary.skipped_links);
            }
        }
        Commands::Extract { archive, output, strip, keep_existing, no_attributes } => {
            let opts = cli::extract_options(strip, keep_existing, no_attributes);
            let report = extract::extract_archive(&archive, &output, &opts)?;
            for err in &report.errors {
                print_entry_warning(err);
            }
            println!(
                "Extracted {} files and {} directories into {}",
                report.files.len(),
                report.directories.len(),
                output.display()
            );
            if !report.skipped.is_empty() {
                println!("Kept {} existing file(s)", report.skipped.len());
            }
        }
        Commands::List { archive, strip, long, json } => list_archive(&archive, strip, long, json)?,
    }
    Ok(())
}

#[derive(Serialize)]
struct ListedEntry {
    path: String,
    kind: EntryKind,
    size: u64,
    mode: Option<u32>,
    mtime: Option<u64>,
}

fn list_archive(path: &Path, strip: usize, long: bool, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut tree = archive::open(path)?;
    tree.set_strip_level(strip);

    let mut listed = Vec::new();
    for node in tree.walk() {
        let meta = tree.metadata(node);
        let mut display = tree.full_path(node);
        if meta.kind.is_dir() {
            display.push('/');
        }
        listed.push(ListedEntry { path: display, kind: meta.kind, size: meta.size, mode: meta.mode, mtime: meta.mtime });
    }
    let problems = tree.take_problems();
    tree.close();

    if json {
        println!("{}", serde_json::to_string_pretty(&listed)?);
    } else {
        for entry in &listed {
            if long {
                println!(
                    "{} {} {:>12} {} {}",
                    if entry.kind.is_dir() { 'd' } else { '-' },
                    entry.mode.map_or_else(|| "----".to_string(), |m| format!("{m:04o}")),
                    entry.size,
                    format_mtime(entry.mtime),
                    entry.path
                );
            } else {
                println!("{}", entry.path);
            }
        }
    }
    for err in &problems {
        print_entry_warning(err);
    }
    Ok(())
}

fn format_mtime(mtime: Option<u64>) -> String {
    mtime
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .map_or_else(|| "-".repeat(16), |dt| dt.format("%Y-%m-%d %H:%M").to_string())
}

fn print_entry_warning(err: &ArchiverError) {
    if err.is_security_violation() {
        eprintln!("Security warning: {}", err);
    } else {
        eprintln!("Warning: {}", err);
    }
}
