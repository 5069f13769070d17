//! # ragchat core
//!
//! The retrieval-and-context pipeline behind ragchat: data models, chunking,
//! the embedding and generation traits, the similarity index, retrieval,
//! conversation memory and prompt assembly.
//!
//! This crate contains no HTTP clients, async runtime or configuration
//! parsing; those live in the `ragchat` app crate, which supplies concrete
//! providers through the traits defined here.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod memory;
pub mod models;
pub mod prompt;
pub mod retriever;

pub use error::{RagError, Result};
