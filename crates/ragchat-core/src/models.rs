//! Core data models used throughout ragchat.
//!
//! These types represent the documents, chunks, retrieval results and
//! conversation turns that flow through the indexing and answering pipeline.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Extracted text of one source file. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Stable identifier reported as a citation (file name relative to the documents root).
    pub source_id: String,
    /// Where the text came from, if it was read from disk.
    pub path: Option<PathBuf>,
    /// Raw extracted text.
    pub text: String,
}

impl Document {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            path: None,
            text: text.into(),
        }
    }
}

/// A bounded, overlapping segment of a document; the unit of retrieval.
///
/// Identity is `(source_id, sequence_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_id: String,
    pub sequence_index: usize,
}

/// A chunk returned by a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Question,
    Answer,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::Question => "USER",
            Role::Answer => "ASSISTANT",
        }
    }
}

/// One entry of a session transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Result of a successful `answer` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    /// Distinct source ids of the chunks that were placed in the context.
    pub sources: BTreeSet<String>,
    /// The query actually sent to retrieval (the question itself when memory is off).
    pub standalone_question: String,
}
