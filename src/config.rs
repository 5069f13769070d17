//! TOML configuration.
//!
//! Every section is optional; missing keys fall back to the defaults below,
//! which match a local, zero-API-key setup (fastembed embeddings, an
//! OpenAI-compatible chat model for generation).
//!
//! ```toml
//! [documents]
//! path = "./documents"
//!
//! [index]
//! path = "./vector_store"
//! auto_rebuild = true
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [retrieval]
//! top_k = 7
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-3.5-turbo"
//! ```
//!
//! API keys are never read from this file: the OpenAI backends use
//! `OPENAI_API_KEY` and the Gemini backends use `GOOGLE_API_KEY`.

use anyhow::{Context, Result};
use ragchat_core::chunk::{Chunker, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use ragchat_core::RagError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub documents: DocumentsConfig,
    pub index: IndexConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub memory: MemoryConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DocumentsConfig {
    pub path: PathBuf,
    /// File extensions (lowercase, no dot) picked up when scanning `path`.
    pub extensions: Vec<String>,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./documents"),
            extensions: ["pdf", "docx", "md", "txt"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub path: PathBuf,
    /// Rebuild on startup when the documents no longer match the index fingerprint.
    pub auto_rebuild: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./vector_store"),
            auto_rebuild: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn chunker(&self) -> Result<Chunker, RagError> {
        Chunker::new(self.chunk_size, self.chunk_overlap)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Upper bound on the assembled context, in characters.
    pub context_budget_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 7,
            context_budget_chars: 12_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    /// Turns kept per session; the oldest are evicted first.
    pub max_turns: usize,
    /// Turns folded into a follow-up question.
    pub rewrite_turns: usize,
    /// Sessions idle longer than this are dropped by the server. `0` disables.
    pub idle_ttl_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            rewrite_turns: 5,
            idle_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `local`, `openai`, `gemini` or `ollama`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    /// Base URL override (Ollama, OpenAI-compatible servers).
    pub url: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// Longest accepted input in characters; provider default when unset.
    pub max_input_chars: Option<usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 3,
            timeout_secs: 30,
            max_input_chars: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    /// `openai`, `gemini` or `ollama`.
    pub provider: String,
    pub model: Option<String>,
    pub url: Option<String>,
    pub temperature: f32,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            url: None,
            temperature: 0.7,
            max_retries: 2,
            timeout_secs: 60,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Whole-request bound for `answer`, retries included.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

const EMBEDDING_PROVIDERS: &[&str] = &["local", "openai", "gemini", "ollama"];
const GENERATION_PROVIDERS: &[&str] = &["openai", "gemini", "ollama"];

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints. Failures are [`RagError::Configuration`].
pub fn validate(config: &Config) -> Result<(), RagError> {
    config.chunking.chunker()?;

    if config.retrieval.top_k == 0 {
        return Err(RagError::Configuration(
            "retrieval.top_k must be >= 1".to_string(),
        ));
    }
    if config.retrieval.context_budget_chars == 0 {
        return Err(RagError::Configuration(
            "retrieval.context_budget_chars must be > 0".to_string(),
        ));
    }
    if config.memory.max_turns == 0 {
        return Err(RagError::Configuration(
            "memory.max_turns must be >= 1".to_string(),
        ));
    }
    if config.embedding.batch_size == 0 {
        return Err(RagError::Configuration(
            "embedding.batch_size must be >= 1".to_string(),
        ));
    }
    if config.embedding.dims == Some(0) {
        return Err(RagError::Configuration(
            "embedding.dims must be > 0".to_string(),
        ));
    }
    for (key, secs) in [
        ("embedding.timeout_secs", config.embedding.timeout_secs),
        ("generation.timeout_secs", config.generation.timeout_secs),
        ("server.request_timeout_secs", config.server.request_timeout_secs),
    ] {
        if secs == 0 {
            return Err(RagError::Configuration(format!("{} must be > 0", key)));
        }
    }
    if !EMBEDDING_PROVIDERS.contains(&config.embedding.provider.as_str()) {
        return Err(RagError::Configuration(format!(
            "Unknown embedding provider: '{}'. Must be one of: {}",
            config.embedding.provider,
            EMBEDDING_PROVIDERS.join(", ")
        )));
    }
    if !GENERATION_PROVIDERS.contains(&config.generation.provider.as_str()) {
        return Err(RagError::Configuration(format!(
            "Unknown generation provider: '{}'. Must be one of: {}",
            config.generation.provider,
            GENERATION_PROVIDERS.join(", ")
        )));
    }
    if let Some(limit) = config.embedding.max_input_chars {
        if limit < config.chunking.chunk_size {
            return Err(RagError::Configuration(format!(
                "embedding.max_input_chars ({}) is smaller than chunking.chunk_size ({})",
                limit, config.chunking.chunk_size
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.top_k, 7);
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.generation.provider, "openai");
        assert_eq!(config.server.bind, "0.0.0.0:8000");
        assert!(config.index.auto_rebuild);
    }

    #[test]
    fn test_partial_sections() {
        let config = parse_config(
            r#"
[chunking]
chunk_size = 500

[embedding]
provider = "gemini"
dims = 768
"#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.embedding.dims, Some(768));
        assert_eq!(config.embedding.batch_size, 64);
    }

    #[test]
    fn test_overlap_not_smaller_than_size() {
        let err = parse_config("[chunking]\nchunk_size = 200\nchunk_overlap = 200\n").unwrap_err();
        let root = err.downcast_ref::<RagError>().unwrap();
        assert!(matches!(root, RagError::Configuration(_)));
    }

    #[test]
    fn test_unknown_providers_rejected() {
        assert!(parse_config("[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config("[generation]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_zero_top_k_rejected() {
        assert!(parse_config("[retrieval]\ntop_k = 0\n").is_err());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        for text in [
            "[embedding]\ntimeout_secs = 0\n",
            "[generation]\ntimeout_secs = 0\n",
            "[server]\nrequest_timeout_secs = 0\n",
        ] {
            let err = parse_config(text).unwrap_err();
            let root = err.downcast_ref::<RagError>().unwrap();
            assert!(matches!(root, RagError::Configuration(_)), "{}", text);
        }
    }

    #[test]
    fn test_input_limit_below_chunk_size_rejected() {
        assert!(parse_config("[embedding]\nmax_input_chars = 512\n").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
