//! Document ingestion: scan the documents directory, extract text, chunk
//! and embed.
//!
//! Scanning is deterministic (paths sorted) so the same corpus always
//! produces the same chunk order and the same index. A document that fails
//! extraction is logged and skipped; it never aborts the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ragchat_core::chunk::Chunker;
use ragchat_core::embedding::EmbeddingProvider;
use ragchat_core::models::{Chunk, Document};
use ragchat_core::{RagError, Result};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::extract::{extension, TextExtractor};
use crate::retry::{with_retry, RetryPolicy};

/// Documents that were extracted, plus the files that were skipped.
#[derive(Debug, Default)]
pub struct LoadedDocuments {
    pub documents: Vec<Document>,
    /// `(source_id, reason)` for every skipped file.
    pub skipped: Vec<(String, String)>,
}

/// Files under `root` whose extension is in `extensions`, sorted by path.
///
/// Hidden files and directories are ignored.
pub fn scan_documents(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(RagError::Configuration(format!(
            "documents directory does not exist: {}",
            root.display()
        )));
    }

    let mut paths = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
    for entry in walker {
        let entry = entry.map_err(|e| RagError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let eligible = extension(entry.path())
            .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
            .unwrap_or(false);
        if eligible {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

/// Citation id for `path`: its path relative to `root`, with `/` separators.
/// Files outside `root` are identified by their file name.
pub fn source_id(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string()),
    }
}

/// Extract every file in `paths`, skipping (and logging) failures.
pub fn load_files(root: &Path, paths: &[PathBuf], extractor: &dyn TextExtractor) -> LoadedDocuments {
    let mut loaded = LoadedDocuments::default();
    for path in paths {
        let id = source_id(root, path);
        match extractor.extract(path) {
            Ok(text) if text.trim().is_empty() => {
                tracing::warn!(source_id = %id, "skipping document with no extractable text");
                loaded.skipped.push((id, "no extractable text".to_string()));
            }
            Ok(text) => {
                tracing::debug!(source_id = %id, chars = text.chars().count(), "extracted document");
                loaded.documents.push(Document {
                    source_id: id,
                    path: Some(path.clone()),
                    text,
                });
            }
            Err(e) => {
                tracing::warn!(source_id = %id, error = %e, "skipping document");
                loaded.skipped.push((id, e.to_string()));
            }
        }
    }
    loaded
}

/// Scan `root` and extract every eligible document.
pub fn load_documents(
    root: &Path,
    extensions: &[String],
    extractor: &dyn TextExtractor,
) -> Result<LoadedDocuments> {
    let paths = scan_documents(root, extensions)?;
    let loaded = load_files(root, &paths, extractor);
    tracing::info!(
        root = %root.display(),
        found = paths.len(),
        loaded = loaded.documents.len(),
        skipped = loaded.skipped.len(),
        "loaded documents"
    );
    Ok(loaded)
}

/// SHA-256 over the relative path and bytes of every eligible file.
///
/// Any added, removed, renamed or edited document changes the fingerprint.
pub fn corpus_fingerprint(root: &Path, extensions: &[String]) -> Result<String> {
    let paths = scan_documents(root, extensions)?;
    let mut hasher = Sha256::new();
    for path in &paths {
        let id = source_id(root, path);
        let bytes = std::fs::read(path)?;
        hasher.update((id.len() as u64).to_le_bytes());
        hasher.update(id.as_bytes());
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Chunk `documents` and embed the chunks in batches of `batch_size`.
///
/// Returns chunks and vectors in matching order, ready for
/// [`SimilarityIndex::build`](ragchat_core::index::SimilarityIndex::build).
pub async fn embed_documents(
    chunker: &Chunker,
    provider: &Arc<dyn EmbeddingProvider>,
    documents: &[Document],
    batch_size: usize,
    policy: &RetryPolicy,
) -> Result<(Vec<Chunk>, Vec<Vec<f32>>)> {
    let chunks: Vec<Chunk> = documents
        .iter()
        .flat_map(|d| chunker.split(&d.text, &d.source_id))
        .collect();

    let batch_size = batch_size.max(1);
    let total_batches = chunks.len().div_ceil(batch_size);
    let mut vectors = Vec::with_capacity(chunks.len());

    for (i, batch) in chunks.chunks(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = with_retry(policy, "embed batch", || provider.embed_batch(&texts)).await?;
        if embedded.len() != texts.len() {
            return Err(RagError::Provider {
                provider: provider.provider_id().to_string(),
                message: format!("expected {} vectors, got {}", texts.len(), embedded.len()),
            });
        }
        vectors.extend(embedded);
        tracing::info!(
            batch = i + 1,
            batches = total_batches,
            embedded = vectors.len(),
            total = chunks.len(),
            "embedding chunks"
        );
    }

    Ok((chunks, vectors))
}
