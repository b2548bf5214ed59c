//! Conversation identifiers

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Shortest id accepted on lookup routes
const MIN_LOOKUP_LEN: usize = 5;

/// Opaque partition key for a conversation.
///
/// Generated randomly by the backend on the first turn of a session and
/// echoed back by the client afterwards. Not a secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationId(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("conversation id must be at least 5 characters")]
pub struct InvalidConversationId;

impl ConversationId {
    /// Create a fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wrap a client-supplied id as-is.
    ///
    /// Returns `None` for blank input so callers can treat an empty form
    /// field the same as an absent one.
    pub fn from_client(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ConversationId {
    type Err = InvalidConversationId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.chars().count() < MIN_LOOKUP_LEN {
            return Err(InvalidConversationId);
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
