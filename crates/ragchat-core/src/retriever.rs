//! Query-time retrieval: embed the query, search the active index.

use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result, Stage};
use crate::index::SharedIndex;
use crate::models::RetrievalResult;

/// Wraps the shared index and the embedding provider it was built with.
///
/// Query embeddings are not cached.
#[derive(Clone)]
pub struct Retriever {
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<SharedIndex>,
}

impl Retriever {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, index: Arc<SharedIndex>) -> Self {
        Self { provider, index }
    }

    /// Top-`k` chunks for `query`, best first.
    ///
    /// Failures are tagged with the stage that produced them.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        // Checked before embedding so an unready service costs no provider call.
        let index = self.index.current().ok_or(RagError::IndexNotReady)?;

        let query_vec = self
            .provider
            .embed(query)
            .await
            .map_err(|e| e.at_stage(Stage::Embedding))?;

        let results = index
            .search(&query_vec, k)
            .map_err(|e| e.at_stage(Stage::Search))?;

        tracing::debug!(k, hits = results.len(), "retrieved chunks");
        Ok(results)
    }
}
