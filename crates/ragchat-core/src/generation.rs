//! Generation capability trait.
//!
//! Concrete backends (OpenAI chat, Gemini, Ollama) live in the `ragchat`
//! app crate.

use async_trait::async_trait;

use crate::error::Result;

/// A language model that answers `question` from `context` under `instruction`.
///
/// Failures are reported as [`RagError::Generation`](crate::error::RagError::Generation)
/// with a [`GenerationFailure`](crate::error::GenerationFailure) sub-kind.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-3.5-turbo"`).
    fn model_name(&self) -> &str;

    async fn generate(&self, instruction: &str, context: &str, question: &str) -> Result<String>;
}
