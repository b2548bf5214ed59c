//! API request and response types

use crate::tools::ConnectionState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Response to `POST /api/chat/conversation`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationResponse {
    pub conversation_id: String,
}

/// JSON body accepted by `POST /api/chat/generate` for text-only turns
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Response to `POST /api/chat/generate`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Response to `GET /api/chat/history/:conversationId`
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub history: Vec<String>,
}

/// Response to `GET /api/health`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub tool_gateway: ConnectionState,
    pub conversations: usize,
}

/// Field name to problem description
pub type FieldErrors = BTreeMap<&'static str, String>;

/// Body of a 400 response
#[derive(Debug, Serialize)]
pub struct ValidationErrorResponse {
    pub message: String,
    pub errors: FieldErrors,
}

/// Body of a 500 response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    pub error: String,
}
