//! Prompt pieces: the fixed answering instruction, follow-up rewriting and
//! context assembly.

use std::collections::BTreeSet;

use crate::models::{RetrievalResult, Turn};

/// Instruction sent with every generation request.
pub const INSTRUCTION: &str = "You are a helpful assistant that answers questions using only the \
provided context. If the context does not contain the answer, say that you don't know. \
Do not make up information.";

/// Fold the last `max_turns` turns of `history` into a standalone query.
///
/// The rewrite is literal: prior turns, oldest first, followed by the
/// current question. With no usable history the question is returned as is.
pub fn rewrite_question(history: &[Turn], question: &str, max_turns: usize) -> String {
    if history.is_empty() || max_turns == 0 {
        return question.to_string();
    }
    let start = history.len().saturating_sub(max_turns);
    let transcript = history[start..]
        .iter()
        .map(|t| format!("{}: {}", t.role.label(), t.text))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Previous conversation:\n{}\n\nCurrent question: {}",
        transcript, question
    )
}

/// Keep the last `max_chars` characters of `text`.
///
/// Rewritten queries end with the current question, so trimming from the
/// front drops the oldest history first.
pub fn keep_tail(text: &str, max_chars: usize) -> &str {
    let len = text.chars().count();
    if len <= max_chars {
        return text;
    }
    let skip = len - max_chars;
    match text.char_indices().nth(skip) {
        Some((offset, _)) => &text[offset..],
        None => "",
    }
}

/// Context string handed to the generator plus the sources it cites.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    pub sources: BTreeSet<String>,
    /// How many retrieved chunks made it into `text`.
    pub included: usize,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.included == 0
    }
}

const SEPARATOR: &str = "\n\n";

/// Build the context from `results` (best first) within `budget_chars`.
///
/// Each chunk is prefixed with its source. Chunks are taken in relevance
/// order and assembly stops at the first one that does not fit, so only the
/// least relevant chunks are ever dropped.
pub fn assemble_context(results: &[RetrievalResult], budget_chars: usize) -> AssembledContext {
    let mut ctx = AssembledContext::default();
    let mut used = 0usize;

    for r in results {
        let block = format!("[source: {}]\n{}", r.chunk.source_id, r.chunk.text);
        let cost = block.chars().count() + if ctx.included > 0 { SEPARATOR.len() } else { 0 };
        if used + cost > budget_chars {
            tracing::debug!(
                dropped = results.len() - ctx.included,
                budget_chars,
                "context budget reached"
            );
            break;
        }
        if ctx.included > 0 {
            ctx.text.push_str(SEPARATOR);
        }
        ctx.text.push_str(&block);
        ctx.sources.insert(r.chunk.source_id.clone());
        ctx.included += 1;
        used += cost;
    }

    ctx
}
