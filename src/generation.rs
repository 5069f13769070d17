//! Generation backends.
//!
//! Implementations of the core [`Generator`] trait:
//! - **[`OpenAIGenerator`]**: `POST /v1/chat/completions` (OpenAI or a compatible server).
//! - **[`GeminiGenerator`]**: `generateContent` on the Google Generative Language API.
//! - **[`OllamaGenerator`]**: a local Ollama instance's `/api/chat` endpoint.
//!
//! All backends send the instruction and the assembled context as the system
//! message and the question as the user message. Gemini has no system role
//! in older models, so it receives the instruction through
//! `systemInstruction`.

use async_trait::async_trait;
use ragchat_core::error::GenerationFailure;
use ragchat_core::generation::Generator;
use ragchat_core::{RagError, Result};
use reqwest::StatusCode;
use std::sync::Arc;

use crate::config::GenerationConfig;

/// Create the [`Generator`] selected by `generation.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => Err(RagError::Configuration(format!(
            "Unknown generation provider: {}",
            other
        ))),
    }
}

/// System prompt: instruction followed by the retrieved context.
///
/// An empty context is sent as such; the instruction tells the model to
/// answer that it does not know.
pub fn system_prompt(instruction: &str, context: &str) -> String {
    format!("{}\n\nContext:\n{}", instruction, context)
}

fn http_client(config: &GenerationConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| RagError::Configuration(format!("failed to build HTTP client: {}", e)))
}

fn classify_status(provider: &str, status: StatusCode, body: &str) -> RagError {
    let message = format!("{} API error {}: {}", provider, status, body);
    let lower = body.to_lowercase();
    let kind = if status == StatusCode::TOO_MANY_REQUESTS
        || lower.contains("insufficient_quota")
        || lower.contains("resource_exhausted")
    {
        GenerationFailure::Quota
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        GenerationFailure::Auth
    } else if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        GenerationFailure::Network
    } else {
        GenerationFailure::Other
    };
    RagError::generation(kind, message)
}

fn classify_transport(provider: &str, err: reqwest::Error) -> RagError {
    let kind = if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        GenerationFailure::Network
    } else {
        GenerationFailure::Other
    };
    RagError::generation(kind, format!("{} request failed: {}", provider, err))
}

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

fn missing(provider: &str, what: &str) -> RagError {
    RagError::generation(
        GenerationFailure::Other,
        format!("invalid {} response: missing {}", provider, what),
    )
}

// ============ OpenAI ============

/// Chat-completions generator. Requires `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RagError::Configuration("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            temperature: config.temperature,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, instruction: &str, context: &str, question: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": system_prompt(instruction, context) },
                { "role": "user", "content": question },
            ],
        });
        let request = self
            .client
            .post(format!("{}/chat/completions", self.url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key));
        let json = post_json("OpenAI", request, &body).await?;
        parse_openai_chat(&json)
    }
}

fn parse_openai_chat(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| missing("OpenAI", "choices[0].message.content"))
}

// ============ Gemini ============

/// Gemini `generateContent` generator. Requires `GOOGLE_API_KEY`.
pub struct GeminiGenerator {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    client: reqwest::Client,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY").map_err(|_| {
            RagError::Configuration("GOOGLE_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "gemini-1.5-flash".to_string()),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            api_key,
            temperature: config.temperature,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, instruction: &str, context: &str, question: &str) -> Result<String> {
        let body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": system_prompt(instruction, context) }] },
            "contents": [{ "role": "user", "parts": [{ "text": question }] }],
            "generationConfig": { "temperature": self.temperature },
        });
        let request = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.url.trim_end_matches('/'),
                self.model
            ))
            .header("x-goog-api-key", &self.api_key);
        let json = post_json("Gemini", request, &body).await?;
        parse_gemini_content(&json)
    }
}

fn parse_gemini_content(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| missing("Gemini", "candidates[0].content.parts"))?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    Ok(text.trim().to_string())
}

// ============ Ollama ============

/// Ollama `/api/chat` generator (non-streaming).
pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone().unwrap_or_else(|| "llama3".to_string()),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            temperature: config.temperature,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, instruction: &str, context: &str, question: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "options": { "temperature": self.temperature },
            "messages": [
                { "role": "system", "content": system_prompt(instruction, context) },
                { "role": "user", "content": question },
            ],
        });
        let request = self
            .client
            .post(format!("{}/api/chat", self.url.trim_end_matches('/')));
        let json = post_json("Ollama", request, &body).await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| missing("Ollama", "message.content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_with_empty_context() {
        let prompt = system_prompt("Answer only from context.", "");
        assert_eq!(prompt, "Answer only from context.\n\nContext:\n");
    }

    #[test]
    fn test_classify_generation_failures() {
        let quota = classify_status("OpenAI", StatusCode::TOO_MANY_REQUESTS, "");
        assert!(matches!(
            quota,
            RagError::Generation {
                kind: GenerationFailure::Quota,
                ..
            }
        ));
        let auth = classify_status("OpenAI", StatusCode::UNAUTHORIZED, "invalid key");
        assert!(matches!(
            auth,
            RagError::Generation {
                kind: GenerationFailure::Auth,
                ..
            }
        ));
        assert!(!auth.is_retryable());
        let network = classify_status("Gemini", StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(network.is_retryable());
    }

    #[test]
    fn test_parse_openai_chat() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "  Friday.\n" } }]
        });
        assert_eq!(parse_openai_chat(&json).unwrap(), "Friday.");
        assert!(parse_openai_chat(&serde_json::json!({ "choices": [] })).is_err());
    }

    #[test]
    fn test_parse_gemini_content_joins_parts() {
        let json = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello " }, { "text": "world" }] } }]
        });
        assert_eq!(parse_gemini_content(&json).unwrap(), "Hello world");
    }

    #[test]
    fn test_ollama_generator_defaults() {
        let config = GenerationConfig {
            provider: "ollama".to_string(),
            ..GenerationConfig::default()
        };
        let generator = create_generator(&config).unwrap();
        assert_eq!(generator.model_name(), "llama3");
    }
}
