//! Embedding provider implementations.
//!
//! Concrete backends for the core [`EmbeddingProvider`] trait:
//! - **[`OpenAIProvider`]**: `POST /v1/embeddings` on the OpenAI API (or a compatible server).
//! - **[`GeminiProvider`]**: `batchEmbedContents` on the Google Generative Language API.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **[`LocalProvider`]**: runs models locally via fastembed; no network calls after model download.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the backend named by
//! `embedding.provider`.
//!
//! # Failure Classification
//!
//! Every backend makes a single attempt per call; retry with backoff is
//! applied by the caller (see [`crate::retry`]). Responses are mapped onto
//! the core error taxonomy:
//! - HTTP 429 → [`RagError::QuotaExceeded`]
//! - HTTP 408, 5xx, connect/timeout errors → [`RagError::TransientNetwork`]
//! - HTTP 400/413 mentioning input length → [`RagError::InvalidInput`]
//! - anything else → [`RagError::Provider`] (not retried)

use async_trait::async_trait;
use ragchat_core::embedding::{check_inputs, check_outputs, EmbeddingProvider};
use ragchat_core::{RagError, Result};
use reqwest::StatusCode;
use std::sync::Arc;

use crate::config::EmbeddingConfig;

/// Rough characters-per-token ratio used to turn token limits into character limits.
const CHARS_PER_TOKEN: usize = 4;

/// Create the [`EmbeddingProvider`] selected by configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"local"` | [`LocalProvider`] (requires `local-embeddings-fastembed`) |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"gemini"` | [`GeminiProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "gemini" => Ok(Arc::new(GeminiProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(RagError::Configuration(
            "Local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        other => Err(RagError::Configuration(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| RagError::Configuration(format!("failed to build HTTP client: {}", e)))
}

/// Map a non-success HTTP response onto the error taxonomy.
pub(crate) fn classify_status(provider: &str, status: StatusCode, body: &str) -> RagError {
    let detail = format!("{} API error {}: {}", provider, status, body);
    let lower = body.to_lowercase();

    if status == StatusCode::TOO_MANY_REQUESTS
        || lower.contains("insufficient_quota")
        || lower.contains("resource_exhausted")
    {
        return RagError::QuotaExceeded(detail);
    }
    if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        return RagError::TransientNetwork(detail);
    }
    if (status == StatusCode::BAD_REQUEST || status == StatusCode::PAYLOAD_TOO_LARGE)
        && (lower.contains("too long")
            || lower.contains("maximum context length")
            || lower.contains("too many tokens")
            || lower.contains("exceeds"))
    {
        return RagError::InvalidInput(detail);
    }
    RagError::Provider {
        provider: provider.to_string(),
        message: detail,
    }
}

/// Map a transport-level failure onto the error taxonomy.
pub(crate) fn classify_transport(provider: &str, err: reqwest::Error) -> RagError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        RagError::TransientNetwork(format!("{} request failed: {}", provider, err))
    } else {
        RagError::Provider {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

/// POST `body` as JSON and return the parsed JSON response.
async fn post_json(
    provider: &str,
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let response = request
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| classify_transport(provider, e))?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(classify_status(provider, status, &body_text));
    }

    response
        .json()
        .await
        .map_err(|e| classify_transport(provider, e))
}

fn parse_float_array(value: &serde_json::Value, provider: &str) -> Result<Vec<f32>> {
    let values = value
        .as_array()
        .ok_or_else(|| invalid_response(provider, "embedding is not an array"))?;
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| invalid_response(provider, "non-numeric embedding value"))
        })
        .collect()
}

fn invalid_response(provider: &str, what: &str) -> RagError {
    RagError::Provider {
        provider: provider.to_string(),
        message: format!("invalid response: {}", what),
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable. `embedding.url`
/// points the provider at an OpenAI-compatible server instead.
pub struct OpenAIProvider {
    id: String,
    model: String,
    dims: usize,
    max_input_chars: usize,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if `OPENAI_API_KEY` is not set.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RagError::Configuration("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "text-embedding-3-small".to_string());
        let dims = config.dims.unwrap_or(match model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        });
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            id: format!("openai:{}", model),
            model,
            dims,
            max_input_chars: config.max_input_chars.unwrap_or(8191 * CHARS_PER_TOKEN),
            url,
            api_key,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_input_chars(&self) -> Option<usize> {
        Some(self.max_input_chars)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        check_inputs(self, texts)?;

        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        // Only the v3 models accept a shortened output size.
        if self.model.starts_with("text-embedding-3") {
            body["dimensions"] = serde_json::json!(self.dims);
        }

        let request = self
            .client
            .post(format!("{}/embeddings", self.url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key));
        let json = post_json("OpenAI", request, &body).await?;
        let vectors = parse_openai_response(&json)?;
        check_outputs(self, texts.len(), &vectors)?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid_response("OpenAI", "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| invalid_response("OpenAI", "missing embedding"))?;
        indexed.push((index, parse_float_array(embedding, "OpenAI")?));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Gemini Provider ============

/// Embedding provider using the Google Generative Language API.
///
/// Requires the `GOOGLE_API_KEY` environment variable. Free-tier keys hit
/// quota limits quickly; those surface as [`RagError::QuotaExceeded`].
pub struct GeminiProvider {
    id: String,
    model: String,
    dims: usize,
    max_input_chars: usize,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY").map_err(|_| {
            RagError::Configuration("GOOGLE_API_KEY environment variable not set".to_string())
        })?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "gemini-embedding-001".to_string());
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());

        Ok(Self {
            id: format!("gemini:{}", model),
            model,
            dims: config.dims.unwrap_or(768),
            max_input_chars: config.max_input_chars.unwrap_or(2048 * CHARS_PER_TOKEN),
            url,
            api_key,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_input_chars(&self) -> Option<usize> {
        Some(self.max_input_chars)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        check_inputs(self, texts)?;

        let model_path = format!("models/{}", self.model);
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|t| {
                serde_json::json!({
                    "model": model_path,
                    "content": { "parts": [{ "text": t }] },
                    "outputDimensionality": self.dims,
                })
            })
            .collect();
        let body = serde_json::json!({ "requests": requests });

        let request = self
            .client
            .post(format!(
                "{}/{}:batchEmbedContents",
                self.url.trim_end_matches('/'),
                model_path
            ))
            .header("x-goog-api-key", &self.api_key);
        let json = post_json("Gemini", request, &body).await?;
        let vectors = parse_gemini_response(&json)?;
        check_outputs(self, texts.len(), &vectors)?;
        Ok(vectors)
    }
}

fn parse_gemini_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| invalid_response("Gemini", "missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| {
            let values = e
                .get("values")
                .ok_or_else(|| invalid_response("Gemini", "missing values"))?;
            parse_float_array(values, "Gemini")
        })
        .collect()
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured Ollama URL (default: `http://localhost:11434`).
/// Requires an embedding model to be pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    id: String,
    model: String,
    dims: usize,
    max_input_chars: Option<usize>,
    url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "nomic-embed-text".to_string());
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            id: format!("ollama:{}", model),
            model,
            dims: config.dims.unwrap_or(768),
            max_input_chars: config.max_input_chars,
            url,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_input_chars(&self) -> Option<usize> {
        self.max_input_chars
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        check_inputs(self, texts)?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')));
        let json = post_json("Ollama", request, &body).await.map_err(|e| match e {
            RagError::TransientNetwork(msg) => RagError::TransientNetwork(format!(
                "{} (is Ollama running at {}?)",
                msg, self.url
            )),
            other => other,
        })?;
        let vectors = parse_ollama_response(&json)?;
        check_outputs(self, texts.len(), &vectors)?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| invalid_response("Ollama", "missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| parse_float_array(e, "Ollama"))
        .collect()
}

// ============ Local Provider (fastembed) ============

/// Embedding provider for local inference with fastembed.
///
/// The model is downloaded from Hugging Face on first use and cached; it is
/// loaded once per process and reused. Inference runs on the blocking pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    id: String,
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<parking_lot::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        // Fail on unknown model names now rather than at first use.
        config_to_fastembed_model(&model_name)?;
        Ok(Self {
            id: format!("local:{}", model_name),
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(parking_lot::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let fastembed_model = config_to_fastembed_model(&self.model_name)?;
        let slot = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();
        let count = texts.len();

        let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = slot.lock();
            if guard.is_none() {
                tracing::info!("loading local embedding model");
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model)
                        .with_show_download_progress(true),
                )
                .map_err(|e| {
                    RagError::Configuration(format!(
                        "Failed to initialize local embedding model: {}",
                        e
                    ))
                })?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| invalid_response("local", "model not loaded"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| RagError::Provider {
                    provider: "local".to_string(),
                    message: format!("Local embedding failed: {}", e),
                })
        })
        .await
        .map_err(|e| RagError::Provider {
            provider: "local".to_string(),
            message: format!("embedding task failed: {}", e),
        })??;

        check_outputs(self, count, &vectors)?;
        Ok(vectors)
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| "all-minilm-l6-v2".to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 384,
    });

    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(RagError::Configuration(format!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ))),
    }
}
