//! `ragchat build` and `ragchat add`.
//!
//! Both print a short report on stdout; progress goes to the log on stderr.

use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::rag::{BuildReport, IndexStatus, RagService};

/// Build the index from the documents directory.
///
/// Without `force`, a persisted index that still matches the documents is
/// reused; with it, the index is always rebuilt.
pub async fn run_build(service: &RagService, force: bool) -> Result<()> {
    match service.ensure_index(force).await? {
        IndexStatus::Built(report) => {
            println!("build");
            print_report(&report);
        }
        IndexStatus::Loaded { entries } => {
            println!("index up to date ({} entries)", entries);
        }
        IndexStatus::Stale { entries } => {
            println!(
                "index is stale ({} entries); run `ragchat build --force` to rebuild",
                entries
            );
        }
    }
    println!("ok");
    Ok(())
}

/// Extract `files` and append them to the index.
pub async fn run_add(service: &RagService, files: &[PathBuf]) -> Result<()> {
    if files.is_empty() {
        bail!("no files given");
    }
    for f in files {
        if !f.is_file() {
            bail!("not a file: {}", f.display());
        }
    }

    // Appending to a stale or mismatched index would mix embedding spaces.
    service.load_index()?;

    let report = service.add_files(files).await?;
    println!("add");
    print_report(&report);
    println!("ok");
    Ok(())
}

fn print_report(report: &BuildReport) {
    println!("  documents: {}", report.documents);
    println!("  chunks:    {}", report.chunks);
    println!("  entries:   {}", report.entries);
    if !report.skipped.is_empty() {
        println!("  skipped:   {}", report.skipped.len());
        for id in &report.skipped {
            println!("    {}", id);
        }
    }
}
