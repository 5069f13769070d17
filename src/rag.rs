//! The question-answering service.
//!
//! [`RagService`] owns every piece of process-wide state: the active
//! similarity index, the conversation memory and the provider handles. It
//! is created once at startup (empty memory, index loaded or built by
//! [`RagService::ensure_index`]) and shared behind an `Arc` by the CLI and
//! the HTTP server.
//!
//! # Answer flow
//!
//! ```text
//! history ──▶ rewrite_question ──▶ keep_tail ──▶ retrieve(top_k)
//!                                                    │
//!   memory.append_exchange ◀── generate ◀── assemble_context
//! ```
//!
//! Memory is written only after generation succeeds. Provider calls are
//! retried per [`RetryPolicy`], and the whole call is bounded by
//! `server.request_timeout_secs`.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use ragchat_core::chunk::Chunker;
use ragchat_core::embedding::EmbeddingProvider;
use ragchat_core::generation::Generator;
use ragchat_core::index::{IndexManifest, IndexSpec, SharedIndex, SimilarityIndex, MANIFEST_FILE};
use ragchat_core::memory::{ConversationMemory, InMemoryConversationMemory};
use ragchat_core::models::{Answer, Document, Turn};
use ragchat_core::prompt::{assemble_context, keep_tail, rewrite_question, INSTRUCTION};
use ragchat_core::retriever::Retriever;
use ragchat_core::{RagError, Result};
use serde::Serialize;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::extract::{FileExtractor, TextExtractor};
use crate::generation::create_generator;
use crate::ingest;
use crate::retry::{with_retry, RetryPolicy};

/// Outcome of an index build or append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub documents: usize,
    pub chunks: usize,
    /// Entries in the active index afterwards.
    pub entries: usize,
    /// Source ids skipped during extraction.
    pub skipped: Vec<String>,
}

/// What [`RagService::ensure_index`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStatus {
    /// The persisted index matched the corpus and was loaded.
    Loaded { entries: usize },
    /// The index was (re)built from the documents directory.
    Built(BuildReport),
    /// The corpus changed but automatic rebuild is off; the old index is served.
    Stale { entries: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub index_ready: bool,
    pub entries: usize,
    pub provider_id: String,
    pub generator_model: String,
    pub sessions: usize,
}

pub struct RagService {
    config: Config,
    provider: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn Generator>,
    extractor: Arc<dyn TextExtractor>,
    index: Arc<SharedIndex>,
    retriever: Retriever,
    memory: InMemoryConversationMemory,
    chunker: Chunker,
    spec: IndexSpec,
    embed_policy: RetryPolicy,
    generate_policy: RetryPolicy,
    /// Serializes builds and appends so persisted files match the active index.
    build_lock: tokio::sync::Mutex<()>,
}

impl RagService {
    /// Create the service with the providers named in `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let provider = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Self::new(config, provider, generator)
    }

    /// Create the service with explicit providers. No index is installed yet.
    pub fn new(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        crate::config::validate(&config)?;
        let chunker = config.chunking.chunker()?;
        if let Some(limit) = provider.max_input_chars() {
            if limit < chunker.chunk_size() {
                return Err(RagError::Configuration(format!(
                    "provider {} accepts at most {} chars, smaller than chunk_size {}",
                    provider.provider_id(),
                    limit,
                    chunker.chunk_size()
                )));
            }
        }
        let spec = IndexSpec {
            provider_id: provider.provider_id().to_string(),
            dims: provider.dims(),
            chunk_size: chunker.chunk_size(),
            chunk_overlap: chunker.chunk_overlap(),
        };
        let index = Arc::new(SharedIndex::new());
        Ok(Self {
            retriever: Retriever::new(provider.clone(), index.clone()),
            memory: InMemoryConversationMemory::new(config.memory.max_turns),
            embed_policy: RetryPolicy::for_embedding(&config.embedding),
            generate_policy: RetryPolicy::for_generation(&config.generation),
            extractor: Arc::new(FileExtractor),
            build_lock: tokio::sync::Mutex::new(()),
            config,
            provider,
            generator,
            index,
            chunker,
            spec,
        })
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn index_dir(&self) -> &Path {
        &self.config.index.path
    }

    // ============ Index lifecycle ============

    /// Load the persisted index, if one exists, after validating its manifest.
    ///
    /// Returns `Ok(None)` when there is nothing on disk. A manifest that does
    /// not match the running provider or chunking is an error: the caller
    /// must rebuild rather than serve from it.
    pub fn load_index(&self) -> Result<Option<IndexManifest>> {
        if !self.index_dir().join(MANIFEST_FILE).exists() {
            return Ok(None);
        }
        let (index, manifest) = SimilarityIndex::load(self.index_dir(), &self.spec)?;
        self.index.swap(index);
        tracing::info!(
            path = %self.index_dir().display(),
            entries = manifest.entries,
            provider = %manifest.provider_id,
            "loaded index"
        );
        Ok(Some(manifest))
    }

    /// Make sure an index is being served.
    ///
    /// - `force`, or nothing on disk: build from the documents directory.
    /// - manifest mismatch: error; the service refuses to serve.
    /// - corpus fingerprint changed: rebuild when `index.auto_rebuild`,
    ///   otherwise warn and serve the existing index.
    pub async fn ensure_index(&self, force: bool) -> Result<IndexStatus> {
        if force {
            tracing::info!("forced index rebuild");
            return Ok(IndexStatus::Built(self.rebuild_from_documents().await?));
        }

        let Some(manifest) = self.load_index()? else {
            tracing::info!(path = %self.index_dir().display(), "no index on disk, building");
            return Ok(IndexStatus::Built(self.rebuild_from_documents().await?));
        };

        let docs = &self.config.documents;
        if !docs.path.is_dir() {
            tracing::warn!(
                path = %docs.path.display(),
                "documents directory missing, serving existing index"
            );
            return Ok(IndexStatus::Loaded {
                entries: manifest.entries,
            });
        }

        let fingerprint = ingest::corpus_fingerprint(&docs.path, &docs.extensions)?;
        if manifest.fingerprint.as_deref() == Some(fingerprint.as_str()) {
            return Ok(IndexStatus::Loaded {
                entries: manifest.entries,
            });
        }

        if self.config.index.auto_rebuild {
            tracing::info!("documents changed since the index was built, rebuilding");
            Ok(IndexStatus::Built(self.rebuild_from_documents().await?))
        } else {
            tracing::warn!("documents changed since the index was built; auto_rebuild is off");
            Ok(IndexStatus::Stale {
                entries: manifest.entries,
            })
        }
    }

    /// Extract, chunk and embed the documents directory, then persist and swap.
    pub async fn rebuild_from_documents(&self) -> Result<BuildReport> {
        let docs = &self.config.documents;
        let loaded = ingest::load_documents(&docs.path, &docs.extensions, self.extractor.as_ref())?;
        if loaded.documents.is_empty() {
            return Err(RagError::InvalidArgument(format!(
                "No documents found in {}",
                docs.path.display()
            )));
        }
        let fingerprint = ingest::corpus_fingerprint(&docs.path, &docs.extensions)?;
        let mut report = self.build(&loaded.documents, Some(fingerprint)).await?;
        report.skipped = loaded.skipped.into_iter().map(|(id, _)| id).collect();
        Ok(report)
    }

    /// Replace the index with one built from `documents`.
    ///
    /// An empty slice yields an empty index: every answer then goes through
    /// the empty-context path. The new index is persisted before it is
    /// swapped in; searches in flight keep using the previous one.
    pub async fn build_index(&self, documents: &[Document]) -> Result<BuildReport> {
        self.build(documents, None).await
    }

    async fn build(&self, documents: &[Document], fingerprint: Option<String>) -> Result<BuildReport> {
        let _guard = self.build_lock.lock().await;
        let started = Instant::now();

        let (chunks, vectors) = ingest::embed_documents(
            &self.chunker,
            &self.provider,
            documents,
            self.config.embedding.batch_size,
            &self.embed_policy,
        )
        .await?;
        let chunk_count = chunks.len();

        let mut index = SimilarityIndex::with_dims(self.spec.dims);
        index.build(chunks, vectors)?;
        let manifest = self.spec.manifest(index.len(), fingerprint);
        index.persist(self.index_dir(), &manifest)?;
        let entries = index.len();
        self.index.swap(index);

        tracing::info!(
            documents = documents.len(),
            chunks = chunk_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            path = %self.index_dir().display(),
            "index built"
        );
        Ok(BuildReport {
            documents: documents.len(),
            chunks: chunk_count,
            entries,
            skipped: Vec::new(),
        })
    }

    /// Append `documents` to the active index (creating one if needed) and persist it.
    ///
    /// Documents whose source id is already indexed replace their previous
    /// entries. The persisted corpus fingerprint is carried over unchanged:
    /// an append never marks pending edits in the documents directory as
    /// indexed.
    pub async fn add_documents(&self, documents: &[Document]) -> Result<BuildReport> {
        let _guard = self.build_lock.lock().await;

        let (chunks, vectors) = ingest::embed_documents(
            &self.chunker,
            &self.provider,
            documents,
            self.config.embedding.batch_size,
            &self.embed_policy,
        )
        .await?;
        let chunk_count = chunks.len();

        let fingerprint = if self.index_dir().join(MANIFEST_FILE).exists() {
            SimilarityIndex::read_manifest(self.index_dir())?.fingerprint
        } else {
            None
        };
        let snapshot = self.index.append(chunks, vectors)?;
        let manifest = self.spec.manifest(snapshot.len(), fingerprint);
        snapshot.persist(self.index_dir(), &manifest)?;

        tracing::info!(
            documents = documents.len(),
            chunks = chunk_count,
            entries = snapshot.len(),
            "documents added to index"
        );
        Ok(BuildReport {
            documents: documents.len(),
            chunks: chunk_count,
            entries: snapshot.len(),
            skipped: Vec::new(),
        })
    }

    /// Extract `paths` and append them. Files that fail extraction are skipped.
    pub async fn add_files(&self, paths: &[std::path::PathBuf]) -> Result<BuildReport> {
        let loaded = ingest::load_files(&self.config.documents.path, paths, self.extractor.as_ref());
        let mut report = self.add_documents(&loaded.documents).await?;
        report.skipped = loaded.skipped.into_iter().map(|(id, _)| id).collect();
        Ok(report)
    }

    // ============ Answering ============

    /// Answer `question` for `session_id`.
    ///
    /// With `use_memory`, prior turns of the session are folded into the
    /// retrieval query and the exchange is recorded once the answer is
    /// produced. On any failure, including timeout, memory is unchanged.
    pub async fn answer(&self, session_id: &str, question: &str, use_memory: bool) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidArgument("question must not be empty".to_string()));
        }

        let timeout = self.config.server.request_timeout();
        let started = Instant::now();
        let answer = tokio::time::timeout(timeout, self.answer_inner(session_id, question, use_memory))
            .await
            .map_err(|_| {
                RagError::TransientNetwork(format!("answer timed out after {:?}", timeout))
            })??;

        // Recorded after the timeout boundary so a cancelled call never writes.
        if use_memory {
            self.memory
                .append_exchange(session_id, question, &answer.answer);
        }

        tracing::info!(
            session_id,
            use_memory,
            sources = answer.sources.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "answered question"
        );
        Ok(answer)
    }

    async fn answer_inner(&self, session_id: &str, question: &str, use_memory: bool) -> Result<Answer> {
        let history = if use_memory {
            self.memory.history(session_id)
        } else {
            Vec::new()
        };
        let standalone = rewrite_question(&history, question, self.config.memory.rewrite_turns);
        let query = match self.provider.max_input_chars() {
            Some(limit) => keep_tail(&standalone, limit),
            None => standalone.as_str(),
        };

        let top_k = self.config.retrieval.top_k;
        let results = with_retry(&self.embed_policy, "retrieve", || {
            self.retriever.retrieve(query, top_k)
        })
        .await?;

        let context = assemble_context(&results, self.config.retrieval.context_budget_chars);
        if context.is_empty() {
            tracing::debug!(session_id, "no context retrieved, generating without context");
        }

        let answer = with_retry(&self.generate_policy, "generate", || {
            self.generator.generate(INSTRUCTION, &context.text, &standalone)
        })
        .await?;

        Ok(Answer {
            answer,
            sources: context.sources,
            standalone_question: standalone,
        })
    }

    // ============ Sessions ============

    pub fn clear_session(&self, session_id: &str) {
        self.memory.clear(session_id);
        tracing::info!(session_id, "session cleared");
    }

    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        self.memory.history(session_id)
    }

    /// Drop sessions idle for longer than `memory.idle_ttl_secs`. Returns the count dropped.
    pub fn evict_idle_sessions(&self) -> usize {
        let ttl = self.config.memory.idle_ttl_secs;
        if ttl == 0 {
            return 0;
        }
        let cutoff = Utc::now() - chrono::Duration::seconds(ttl as i64);
        self.memory.evict_idle(cutoff)
    }

    pub fn health(&self) -> Health {
        let entries = self.index.current().map(|i| i.len()).unwrap_or(0);
        Health {
            index_ready: self.index.is_ready(),
            entries,
            provider_id: self.spec.provider_id.clone(),
            generator_model: self.generator.model_name().to_string(),
            sessions: self.memory.session_count(),
        }
    }

    /// Distinct source ids in the active index.
    pub fn indexed_sources(&self) -> BTreeSet<String> {
        self.index
            .current()
            .map(|i| i.source_ids().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }
}
