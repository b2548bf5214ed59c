//! HTTP API for the EVA assistant

mod handlers;
mod types;

pub use handlers::create_router;

use crate::conversation::ConversationStore;
use crate::orchestrator::ConversationOrchestrator;
use crate::tools::ToolGateway;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub store: Arc<ConversationStore>,
    pub tools: ToolGateway,
}
