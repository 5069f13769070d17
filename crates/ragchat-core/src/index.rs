//! Exact nearest-neighbour similarity index with on-disk persistence.
//!
//! Vectors are L2-normalized when they enter the index and queries are
//! normalized the same way, so the inner product used for ranking equals
//! cosine similarity. Storage is one contiguous `Vec<f32>` scanned linearly;
//! ties keep insertion order so a reloaded index ranks identically.
//!
//! # On-disk layout
//!
//! ```text
//! <dir>/
//!   manifest.json   sidecar: provider, dims, chunking, entry count, fingerprint
//!   chunks.json     chunk metadata in index order
//!   vectors.bin     entries × dims little-endian f32
//! ```
//!
//! [`SimilarityIndex::load`] validates the manifest against the running
//! configuration before reading any vectors.
//!
//! # Concurrency
//!
//! [`SharedIndex`] owns the active index behind an `Arc`. Searches clone the
//! `Arc` and run without holding any lock; rebuilds construct a new index and
//! swap the pointer.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::embedding::{blob_to_vec, dot, normalize, vec_to_blob};
use crate::error::{RagError, Result};
use crate::models::{Chunk, RetrievalResult};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const VECTORS_FILE: &str = "vectors.bin";

const FORMAT_VERSION: u32 = 1;

/// Sidecar record persisted next to the index data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub provider_id: String,
    pub dims: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub entries: usize,
    /// Hash of the source corpus the index was built from, for staleness checks.
    #[serde(default)]
    pub fingerprint: Option<String>,
    pub built_at: DateTime<Utc>,
}

/// What the running process requires of an index before it will search it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub provider_id: String,
    pub dims: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl IndexSpec {
    pub fn manifest(&self, entries: usize, fingerprint: Option<String>) -> IndexManifest {
        IndexManifest {
            format_version: FORMAT_VERSION,
            provider_id: self.provider_id.clone(),
            dims: self.dims,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            entries,
            fingerprint,
            built_at: Utc::now(),
        }
    }

    /// Check a persisted manifest against this spec.
    pub fn validate(&self, manifest: &IndexManifest) -> Result<()> {
        if manifest.format_version != FORMAT_VERSION {
            return Err(RagError::IndexMismatch(format!(
                "index format version {} (expected {})",
                manifest.format_version, FORMAT_VERSION
            )));
        }
        if manifest.dims != self.dims {
            return Err(RagError::DimensionMismatch {
                expected: self.dims,
                actual: manifest.dims,
            });
        }
        if manifest.provider_id != self.provider_id {
            return Err(RagError::IndexMismatch(format!(
                "index was built with provider '{}', configured provider is '{}'",
                manifest.provider_id, self.provider_id
            )));
        }
        if manifest.chunk_size != self.chunk_size || manifest.chunk_overlap != self.chunk_overlap {
            return Err(RagError::IndexMismatch(format!(
                "index was built with chunking {}/{}, configured chunking is {}/{}",
                manifest.chunk_size, manifest.chunk_overlap, self.chunk_size, self.chunk_overlap
            )));
        }
        Ok(())
    }
}

/// Ordered collection of `(Chunk, vector)` pairs supporting top-K search.
#[derive(Debug, Clone, Default)]
pub struct SimilarityIndex {
    dims: Option<usize>,
    chunks: Vec<Chunk>,
    /// `chunks.len() × dims` normalized components.
    vectors: Vec<f32>,
}

impl SimilarityIndex {
    /// An empty index whose dimensionality is fixed by the first `build`/`add`.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty index with dimensionality declared up front.
    pub fn with_dims(dims: usize) -> Self {
        Self {
            dims: Some(dims),
            ..Self::default()
        }
    }

    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Distinct source ids, in first-seen order.
    pub fn source_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.chunks
            .iter()
            .map(|c| c.source_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Replace the index contents with `chunks` and their aligned `vectors`.
    pub fn build(&mut self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<()> {
        let dims = self.check_batch(&chunks, &vectors)?;
        check_identities(&[], &chunks)?;
        self.dims = dims.or(self.dims);
        self.chunks.clear();
        self.vectors.clear();
        self.push_all(chunks, vectors);
        Ok(())
    }

    /// Append `chunks` and their aligned `vectors`.
    ///
    /// A chunk whose `(source_id, sequence_index)` is already indexed rejects
    /// the whole batch with [`RagError::InvalidArgument`].
    pub fn add(&mut self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<()> {
        let dims = self.check_batch(&chunks, &vectors)?;
        check_identities(&self.chunks, &chunks)?;
        self.dims = dims.or(self.dims);
        self.push_all(chunks, vectors);
        Ok(())
    }

    /// Validate a batch without mutating the index. Returns the batch dimensionality.
    fn check_batch(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<Option<usize>> {
        if chunks.len() != vectors.len() {
            return Err(RagError::InvalidArgument(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        let expected = match (self.dims, vectors.first()) {
            (Some(d), _) => d,
            (None, Some(first)) => first.len(),
            (None, None) => return Ok(None),
        };
        if expected == 0 {
            return Err(RagError::InvalidArgument(
                "vectors must have at least one dimension".to_string(),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(RagError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }
        Ok(Some(expected))
    }

    /// Drop every entry belonging to one of `source_ids`. Returns how many were removed.
    pub fn remove_sources(&mut self, source_ids: &HashSet<&str>) -> usize {
        let Some(dims) = self.dims else {
            return 0;
        };
        let before = self.len();
        let chunks = std::mem::take(&mut self.chunks);
        let vectors = std::mem::take(&mut self.vectors);
        for (chunk, v) in chunks.into_iter().zip(vectors.chunks_exact(dims)) {
            if !source_ids.contains(chunk.source_id.as_str()) {
                self.chunks.push(chunk);
                self.vectors.extend_from_slice(v);
            }
        }
        before - self.len()
    }

    fn push_all(&mut self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) {
        self.vectors.reserve(vectors.iter().map(Vec::len).sum());
        for mut v in vectors {
            normalize(&mut v);
            self.vectors.extend_from_slice(&v);
        }
        self.chunks.extend(chunks);
    }

    /// Return up to `k` entries most similar to `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be > 0".to_string()));
        }
        let Some(dims) = self.dims else {
            return Ok(Vec::new());
        };
        if query.len() != dims {
            return Err(RagError::DimensionMismatch {
                expected: dims,
                actual: query.len(),
            });
        }

        let mut q = query.to_vec();
        normalize(&mut q);

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(dims)
            .map(|v| dot(&q, v))
            .enumerate()
            .collect();

        // Stable sort: equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| RetrievalResult {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect())
    }

    /// Write the index and its manifest into `dir`, creating it if needed.
    ///
    /// Each file is written to a temporary name and renamed into place.
    pub fn persist(&self, dir: &Path, manifest: &IndexManifest) -> Result<()> {
        if let Some(dims) = self.dims {
            if manifest.dims != dims {
                return Err(RagError::DimensionMismatch {
                    expected: dims,
                    actual: manifest.dims,
                });
            }
        }
        if manifest.entries != self.len() {
            return Err(RagError::InvalidArgument(format!(
                "manifest records {} entries, index holds {}",
                manifest.entries,
                self.len()
            )));
        }

        fs::create_dir_all(dir)?;
        write_atomic(dir, VECTORS_FILE, &vec_to_blob(&self.vectors))?;
        write_atomic(dir, CHUNKS_FILE, &serde_json::to_vec(&self.chunks)?)?;
        // Manifest last: a directory without one is never loaded.
        write_atomic(dir, MANIFEST_FILE, &serde_json::to_vec_pretty(manifest)?)?;
        Ok(())
    }

    /// Read only the manifest of a persisted index.
    pub fn read_manifest(dir: &Path) -> Result<IndexManifest> {
        let bytes = fs::read(dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Load a persisted index, refusing it if its manifest does not match `spec`.
    pub fn load(dir: &Path, spec: &IndexSpec) -> Result<(Self, IndexManifest)> {
        let manifest = Self::read_manifest(dir)?;
        spec.validate(&manifest)?;

        let chunks: Vec<Chunk> = serde_json::from_slice(&fs::read(dir.join(CHUNKS_FILE))?)?;
        let blob = fs::read(dir.join(VECTORS_FILE))?;

        if chunks.len() != manifest.entries {
            return Err(RagError::CorruptIndex(format!(
                "manifest records {} entries, {} holds {}",
                manifest.entries,
                CHUNKS_FILE,
                chunks.len()
            )));
        }
        let expected_bytes = manifest.entries * manifest.dims * 4;
        if blob.len() != expected_bytes {
            return Err(RagError::CorruptIndex(format!(
                "{} is {} bytes, expected {}",
                VECTORS_FILE,
                blob.len(),
                expected_bytes
            )));
        }

        let index = Self {
            dims: Some(manifest.dims),
            chunks,
            vectors: blob_to_vec(&blob),
        };
        Ok((index, manifest))
    }
}

/// Reject `incoming` if it repeats a `(source_id, sequence_index)` pair,
/// either within itself or against `existing`.
fn check_identities(existing: &[Chunk], incoming: &[Chunk]) -> Result<()> {
    if incoming.is_empty() {
        return Ok(());
    }
    let mut seen: HashSet<(&str, usize)> = existing
        .iter()
        .map(|c| (c.source_id.as_str(), c.sequence_index))
        .collect();
    for c in incoming {
        if !seen.insert((c.source_id.as_str(), c.sequence_index)) {
            return Err(RagError::InvalidArgument(format!(
                "chunk {}#{} is already indexed",
                c.source_id, c.sequence_index
            )));
        }
    }
    Ok(())
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let tmp = dir.join(format!("{}.tmp", name));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, dir.join(name))?;
    Ok(())
}

/// Process-wide handle to the active index.
///
/// `current` hands out an `Arc` snapshot; `swap` installs a new index
/// without waiting for in-flight searches. Appends copy the current index,
/// extend the copy and swap it in, serialized by a writer mutex.
#[derive(Debug, Default)]
pub struct SharedIndex {
    active: RwLock<Option<Arc<SimilarityIndex>>>,
    writer: Mutex<()>,
}

impl SharedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(index: SimilarityIndex) -> Self {
        Self {
            active: RwLock::new(Some(Arc::new(index))),
            writer: Mutex::new(()),
        }
    }

    /// Snapshot of the active index, if one has been installed.
    pub fn current(&self) -> Option<Arc<SimilarityIndex>> {
        self.active.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.active.read().is_some()
    }

    /// Install `index`, returning the previous one.
    pub fn swap(&self, index: SimilarityIndex) -> Option<Arc<SimilarityIndex>> {
        let _guard = self.writer.lock();
        self.active.write().replace(Arc::new(index))
    }

    /// Append to a copy of the active index (or to a fresh one) and swap it in.
    ///
    /// Sources already in the index are replaced: their previous entries are
    /// dropped before the new chunks are added. Returns the new snapshot.
    pub fn append(&self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Arc<SimilarityIndex>> {
        let _guard = self.writer.lock();
        let mut next = match self.active.read().as_ref() {
            Some(current) => SimilarityIndex::clone(current),
            None => SimilarityIndex::new(),
        };
        let incoming: HashSet<&str> = chunks.iter().map(|c| c.source_id.as_str()).collect();
        let replaced = next.remove_sources(&incoming);
        if replaced > 0 {
            tracing::debug!(replaced, "replacing entries of re-added sources");
        }
        next.add(chunks, vectors)?;
        let next = Arc::new(next);
        *self.active.write() = Some(next.clone());
        Ok(next)
    }

    /// Search the active index.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        let index = self.current().ok_or(RagError::IndexNotReady)?;
        index.search(query, k)
    }
}
