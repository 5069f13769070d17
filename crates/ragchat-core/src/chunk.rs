//! Sliding-window text chunker.
//!
//! Splits document text into [`Chunk`]s of `chunk_size` characters, each
//! window starting `chunk_size - chunk_overlap` characters after the previous
//! one, so adjacent chunks share exactly `chunk_overlap` characters. The last
//! chunk may be shorter. Sizes count Unicode scalar values, so a window never
//! splits a multi-byte character.
//!
//! Splitting is lazy: [`Chunker::split`] returns a [`ChunkIter`] that can be
//! cloned to restart from the beginning. Output is fully determined by the
//! text and the two size parameters, which keeps rebuilt indexes reproducible.

use crate::error::{RagError, Result};
use crate::models::Chunk;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::Configuration(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }

    /// Lazily split `text` into chunks attributed to `source_id`.
    pub fn split<'a>(&self, text: &'a str, source_id: &'a str) -> ChunkIter<'a> {
        ChunkIter {
            text,
            source_id,
            chunk_size: self.chunk_size,
            step: self.step(),
            start: 0,
            sequence_index: 0,
            done: text.is_empty(),
        }
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Iterator over the chunks of one document. A clone forks the iterator at
/// its current position; a clone taken before the first `next` replays the
/// whole sequence.
#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    text: &'a str,
    source_id: &'a str,
    chunk_size: usize,
    step: usize,
    /// Byte offset of the next window.
    start: usize,
    sequence_index: usize,
    done: bool,
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        let rest = &self.text[self.start..];
        let end = byte_offset_after(rest, self.chunk_size);
        let chunk = Chunk {
            text: rest[..end].to_string(),
            source_id: self.source_id.to_string(),
            sequence_index: self.sequence_index,
        };

        if end == rest.len() {
            self.done = true;
        } else {
            self.start += byte_offset_after(rest, self.step);
            self.sequence_index += 1;
        }

        Some(chunk)
    }
}

/// Byte offset just past the first `chars` characters of `s` (or `s.len()`).
fn byte_offset_after(s: &str, chars: usize) -> usize {
    s.char_indices()
        .nth(chars)
        .map(|(offset, _)| offset)
        .unwrap_or(s.len())
}
