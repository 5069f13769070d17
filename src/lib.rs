//! # ragchat
//!
//! Retrieval-augmented question answering over a private document folder.
//!
//! Documents are extracted, split into overlapping chunks, embedded and
//! stored in a persistent similarity index. Questions are embedded the same
//! way; the closest chunks become the context a language model answers
//! from, and the answer cites the documents they came from. Follow-up
//! questions are resolved against the session's recent conversation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │  Documents  │──▶│ Extract+Chunk │──▶│ Similarity index │
//! │ pdf/docx/md │   │    +Embed     │   │  (vector_store/) │
//! └─────────────┘   └──────────────┘   └────────┬─────────┘
//!                                               │
//!                         ┌─────────────────────┤
//!                         ▼                     ▼
//!                    ┌──────────┐         ┌──────────┐
//!                    │   CLI    │         │   HTTP   │
//!                    │(ragchat) │         │  /chat   │
//!                    └──────────┘         └──────────┘
//! ```
//!
//! The index, chunker, retriever, memory and prompt assembly live in
//! `ragchat-core`; this crate supplies the providers, extraction and the
//! service around them.
//!
//! ## Quick Start
//!
//! ```bash
//! ragchat build                  # index ./documents
//! ragchat ask "What is the deadline?"
//! ragchat chat                   # conversation with memory
//! ragchat serve                  # HTTP on 0.0.0.0:8000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding backends (local, OpenAI, Gemini, Ollama) |
//! | [`generation`] | Generation backends (OpenAI, Gemini, Ollama) |
//! | [`extract`] | Text extraction from pdf, docx, md, txt |
//! | [`ingest`] | Document scanning, fingerprinting, batch embedding |
//! | [`retry`] | Retry with backoff and per-attempt timeout |
//! | [`rag`] | The question-answering service |
//! | [`server`] | HTTP server |
//! | [`build_cmd`], [`chat`], [`stats`] | CLI commands |

pub mod build_cmd;
pub mod chat;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod rag;
pub mod retry;
pub mod server;
pub mod stats;

pub use ragchat_core::{RagError, Result};
