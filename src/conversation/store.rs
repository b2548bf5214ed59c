//! Append-only conversation store
//!
//! The map from id to conversation is the only shared mutable state in the
//! turn pipeline. Reads and writes are synchronous and never suspend.

use super::ConversationId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Per-conversation turn cap used when none is configured
pub const DEFAULT_MAX_TURNS: usize = 200;

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    /// Label used when a turn is rendered into a prompt or history listing
    pub fn label(self) -> &'static str {
        match self {
            Speaker::User => "Usuário",
            Speaker::Assistant => "EVA",
        }
    }
}

/// One recorded message. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub content: String,
    pub is_user: bool,
}

impl Turn {
    pub fn new(content: impl Into<String>, is_user: bool) -> Self {
        Self {
            content: content.into(),
            is_user,
        }
    }

    pub fn speaker(&self) -> Speaker {
        if self.is_user {
            Speaker::User
        } else {
            Speaker::Assistant
        }
    }

    /// Render as `"<Speaker>: <content>"`
    pub fn render(&self) -> String {
        format!("{}: {}", self.speaker().label(), self.content)
    }

    /// Inverse of [`Turn::render`]
    #[cfg(test)]
    pub fn parse_rendered(line: &str) -> Option<Self> {
        [Speaker::User, Speaker::Assistant]
            .into_iter()
            .find_map(|speaker| {
                line.strip_prefix(speaker.label())
                    .and_then(|rest| rest.strip_prefix(": "))
                    .map(|content| Turn::new(content, speaker == Speaker::User))
            })
    }
}

/// Ordered turn history of one conversation
#[derive(Debug, Clone)]
pub struct Conversation {
    pub messages: Vec<Turn>,
    pub last_updated: DateTime<Utc>,
}

impl Conversation {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    fn push(&mut self, turn: Turn, max_turns: usize) {
        self.messages.push(turn);
        self.last_updated = Utc::now();

        if self.messages.len() > max_turns {
            let excess = self.messages.len() - max_turns;
            self.messages.drain(..excess);
            // Keep the retained window starting on a user turn
            if self.messages.len() > 1 && self.messages.first().is_some_and(|t| !t.is_user) {
                self.messages.remove(0);
            }
        }
    }
}

/// In-memory store of all live conversations
pub struct ConversationStore {
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
    max_turns: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl ConversationStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            max_turns: max_turns.max(2),
        }
    }

    /// Append a turn, creating the conversation on first use. Never fails.
    pub fn append(&self, id: &ConversationId, content: impl Into<String>, is_user: bool) {
        let mut conversations = self
            .conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        conversations
            .entry(id.clone())
            .or_insert_with(Conversation::new)
            .push(Turn::new(content, is_user), self.max_turns);
    }

    /// Turns in append order; empty for an unknown id
    pub fn history(&self, id: &ConversationId) -> Vec<Turn> {
        self.conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    /// History rendered one entry per turn
    pub fn rendered_history(&self, id: &ConversationId) -> Vec<String> {
        self.history(id).iter().map(Turn::render).collect()
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop every conversation not updated since `cutoff`.
    ///
    /// Returns the ids that were removed.
    pub fn evict_idle(&self, cutoff: DateTime<Utc>) -> Vec<ConversationId> {
        let mut conversations = self
            .conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let stale: Vec<ConversationId> = conversations
            .iter()
            .filter(|(_, c)| c.last_updated < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            conversations.remove(id);
        }
        stale
    }
}
