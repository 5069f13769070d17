//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helper functions for vector serialization and
//! similarity computation.
//!
//! Concrete provider implementations (OpenAI, Gemini, Ollama, fastembed)
//! live in the `ragchat` app crate.

use async_trait::async_trait;

use crate::error::{RagError, Result};

/// Trait for embedding providers.
///
/// Every backend exposes the same capability: text in, fixed-length vector
/// out. The core never depends on a particular backend.
///
/// # Errors
///
/// - [`RagError::QuotaExceeded`]: rate or usage limit hit.
/// - [`RagError::TransientNetwork`]: retryable network failure or timeout.
/// - [`RagError::InvalidInput`]: a text exceeds [`max_input_chars`](EmbeddingProvider::max_input_chars).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier of backend and model (e.g. `"openai:text-embedding-3-small"`).
    ///
    /// Recorded in the index manifest; an index built by one provider is
    /// never searched with vectors from another.
    fn provider_id(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Longest text, in characters, the provider accepts. `None` means unbounded.
    fn max_input_chars(&self) -> Option<usize> {
        None
    }

    /// Embed a batch of texts, returning one vector per text in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Provider {
                provider: self.provider_id().to_string(),
                message: "empty embedding response".to_string(),
            })
    }
}

/// Reject texts longer than the provider accepts, before any call is made.
pub fn check_inputs(provider: &dyn EmbeddingProvider, texts: &[String]) -> Result<()> {
    let Some(limit) = provider.max_input_chars() else {
        return Ok(());
    };
    for (i, text) in texts.iter().enumerate() {
        let len = text.chars().count();
        if len > limit {
            return Err(RagError::InvalidInput(format!(
                "text #{} is {} chars, {} accepts at most {}",
                i,
                len,
                provider.provider_id(),
                limit
            )));
        }
    }
    Ok(())
}

/// Verify a provider response: one vector per input, each of `dims` length.
pub fn check_outputs(provider: &dyn EmbeddingProvider, inputs: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if vectors.len() != inputs {
        return Err(RagError::Provider {
            provider: provider.provider_id().to_string(),
            message: format!("expected {} embeddings, got {}", inputs, vectors.len()),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != provider.dims()) {
        return Err(RagError::DimensionMismatch {
            expected: provider.dims(),
            actual: bad.len(),
        });
    }
    Ok(())
}

/// Encode a float vector as little-endian f32 bytes.
///
/// # Example
///
/// ```rust
/// use ragchat_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode bytes written by [`vec_to_blob`]. Trailing bytes that do not form
/// a whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Scale `v` to unit length in place. Zero vectors are left unchanged.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
