//! Session-scoped conversation memory.
//!
//! [`ConversationMemory`] is the contract; [`InMemoryConversationMemory`] is
//! the default backend. It keeps every session in process memory only:
//! transcripts are empty when the process starts and are discarded when it
//! exits. A backend that survives restarts implements the same trait.
//!
//! Locking is two-level. The session map is locked just long enough to find
//! or insert a session; each session then has its own mutex, so appends to
//! different sessions never contend.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::models::{Role, Turn};

pub const DEFAULT_MAX_TURNS: usize = 50;

pub trait ConversationMemory: Send + Sync {
    fn append(&self, session_id: &str, role: Role, text: &str);

    /// Record a question and its answer as one step; no reader sees only half.
    fn append_exchange(&self, session_id: &str, question: &str, answer: &str) {
        self.append(session_id, Role::Question, question);
        self.append(session_id, Role::Answer, answer);
    }

    /// Turns of `session_id`, oldest first. Unknown sessions have no turns.
    fn history(&self, session_id: &str) -> Vec<Turn>;

    fn clear(&self, session_id: &str);

    fn session_count(&self) -> usize;
}

#[derive(Debug)]
struct Session {
    turns: Vec<Turn>,
    last_active: DateTime<Utc>,
}

impl Session {
    fn new() -> Self {
        Self {
            turns: Vec::new(),
            last_active: Utc::now(),
        }
    }

    fn push(&mut self, turn: Turn, max_turns: usize) {
        self.last_active = turn.timestamp;
        self.turns.push(turn);
        if self.turns.len() > max_turns {
            let excess = self.turns.len() - max_turns;
            self.turns.drain(..excess);
        }
    }
}

#[derive(Debug)]
pub struct InMemoryConversationMemory {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    max_turns: usize,
}

impl InMemoryConversationMemory {
    /// `max_turns` bounds each transcript; the oldest turns are evicted first.
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns: max_turns.max(1),
        }
    }

    fn session(&self, session_id: &str) -> Arc<Mutex<Session>> {
        if let Some(s) = self.sessions.read().get(session_id) {
            return s.clone();
        }
        self.sessions
            .write()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new())))
            .clone()
    }

    /// Drop sessions whose last turn is older than `cutoff`. Returns how many were dropped.
    pub fn evict_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.lock().last_active >= cutoff);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = sessions.len(), "evicted idle sessions");
        }
        evicted
    }
}

impl Default for InMemoryConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl ConversationMemory for InMemoryConversationMemory {
    fn append(&self, session_id: &str, role: Role, text: &str) {
        let session = self.session(session_id);
        session.lock().push(Turn::new(role, text), self.max_turns);
    }

    fn append_exchange(&self, session_id: &str, question: &str, answer: &str) {
        let session = self.session(session_id);
        let mut s = session.lock();
        s.push(Turn::new(Role::Question, question), self.max_turns);
        s.push(Turn::new(Role::Answer, answer), self.max_turns);
    }

    fn history(&self, session_id: &str) -> Vec<Turn> {
        let session = match self.sessions.read().get(session_id) {
            Some(s) => s.clone(),
            None => return Vec::new(),
        };
        let turns = session.lock().turns.clone();
        turns
    }

    fn clear(&self, session_id: &str) {
        let removed = self.sessions.write().remove(session_id);
        if let Some(session) = removed {
            // A concurrent append holding the old Arc finishes on a detached session.
            session.lock().turns.clear();
        }
    }

    fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}
