//! Index status overview.
//!
//! Summarizes the persisted index without loading any provider: manifest,
//! on-disk size, per-source chunk counts and whether the documents changed
//! since the build. Used by `ragchat status`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ragchat_core::index::{SimilarityIndex, CHUNKS_FILE, MANIFEST_FILE};
use ragchat_core::models::Chunk;

use crate::config::Config;
use crate::ingest;

/// Run the status command: read the index directory and print a summary.
pub fn run_status(config: &Config) -> Result<()> {
    let dir = &config.index.path;

    println!("ragchat index status");
    println!("======================");
    println!();
    println!("  Index:       {}", dir.display());

    if !dir.join(MANIFEST_FILE).exists() {
        println!("  State:       not built (run `ragchat build`)");
        println!();
        return Ok(());
    }

    let manifest = SimilarityIndex::read_manifest(dir)
        .with_context(|| format!("Failed to read index manifest in {}", dir.display()))?;

    println!("  Size:        {}", format_bytes(dir_size(dir)));
    println!("  Built:       {}", format_relative(manifest.built_at));
    println!("  Provider:    {} ({} dims)", manifest.provider_id, manifest.dims);
    println!(
        "  Chunking:    {} chars, {} overlap",
        manifest.chunk_size, manifest.chunk_overlap
    );
    println!("  Entries:     {}", manifest.entries);

    let docs = &config.documents;
    let freshness = if !docs.path.is_dir() {
        "unknown (documents directory missing)".to_string()
    } else {
        let current = ingest::corpus_fingerprint(&docs.path, &docs.extensions)?;
        if manifest.fingerprint.as_deref() == Some(current.as_str()) {
            "up to date".to_string()
        } else {
            "stale (documents changed since build)".to_string()
        }
    };
    println!("  Documents:   {}", freshness);

    let chunks: Vec<Chunk> = serde_json::from_slice(
        &std::fs::read(dir.join(CHUNKS_FILE))
            .with_context(|| format!("Failed to read {}", CHUNKS_FILE))?,
    )
    .with_context(|| format!("Failed to parse {}", CHUNKS_FILE))?;

    let by_source = chunks_by_source(&chunks);
    if !by_source.is_empty() {
        println!();
        println!("  By source:");
        println!("  {:<48} {:>8}", "SOURCE", "CHUNKS");
        println!("  {}", "-".repeat(57));
        for (source, count) in &by_source {
            println!("  {:<48} {:>8}", source, count);
        }
    }

    println!();
    Ok(())
}

fn chunks_by_source(chunks: &[Chunk]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for c in chunks {
        *counts.entry(c.source_id.as_str()).or_insert(0) += 1;
    }
    counts
}

fn dir_size(dir: &Path) -> u64 {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a timestamp relative to now (e.g. "3 hours ago").
fn format_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();

    if delta < 0 {
        ts.format("%Y-%m-%d %H:%M").to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_relative() {
        assert_eq!(format_relative(Utc::now()), "just now");
        let earlier = Utc::now() - chrono::Duration::hours(3);
        assert_eq!(format_relative(earlier), "3 hours ago");
    }

    #[test]
    fn test_chunks_by_source() {
        let chunk = |s: &str, i| Chunk {
            text: String::new(),
            source_id: s.to_string(),
            sequence_index: i,
        };
        let chunks = vec![chunk("b.pdf", 0), chunk("a.md", 0), chunk("b.pdf", 1)];
        let counts: Vec<(&str, usize)> = chunks_by_source(&chunks).into_iter().collect();
        assert_eq!(counts, vec![("a.md", 1), ("b.pdf", 2)]);
    }
}
