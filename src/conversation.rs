//! Conversation state
//!
//! Short-lived, in-memory multi-turn history keyed by an opaque
//! conversation identifier. Nothing here survives a process restart.

mod id;
mod store;

pub use id::ConversationId;
pub use store::{ConversationStore, Turn, DEFAULT_MAX_TURNS};
