//! External plant-knowledge tool and image hosting
//!
//! The tool process is reached through a [`ToolGateway`], which owns the
//! connection lifecycle and turns every failure into a [`ToolCallResult`].
//! The channel itself sits behind the [`ToolConnector`]/[`ToolChannel`]
//! seams so the gateway can be driven by a mock in tests.

mod gateway;
mod mcp;
mod payload;
mod upload;

pub use gateway::{ConnectionState, ToolGateway};
pub use mcp::McpConnector;
#[cfg(test)]
pub use payload::Hardiness;
pub use payload::{PlantRecord, ToolPayload};
pub use upload::{HttpImageHost, ImageHost, UploadError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

/// Argument map passed to a tool
pub type ToolArguments = Map<String, Value>;

/// Why a tool call produced no payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFailureReason {
    NotConnected,
    CallFailed,
    MalformedResponse,
}

impl ToolFailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolFailureReason::NotConnected => "not_connected",
            ToolFailureReason::CallFailed => "call_failed",
            ToolFailureReason::MalformedResponse => "malformed_response",
        }
    }
}

/// Outcome of [`ToolGateway::call_tool`]. Every call ends in one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallResult {
    Success(ToolPayload),
    Failed(ToolFailureReason),
}

impl ToolCallResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ToolCallResult::Success(_))
    }

    pub fn payload(&self) -> Option<&ToolPayload> {
        match self {
            ToolCallResult::Success(payload) => Some(payload),
            ToolCallResult::Failed(_) => None,
        }
    }

    pub fn failure_reason(&self) -> Option<ToolFailureReason> {
        match self {
            ToolCallResult::Success(_) => None,
            ToolCallResult::Failed(reason) => Some(*reason),
        }
    }
}

/// Channel and connect level failures. Never crosses `call_tool`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("failed to spawn tool process: {0}")]
    Spawn(String),
    #[error("tool handshake failed: {0}")]
    Handshake(String),
    #[error("tool transport error: {0}")]
    Transport(String),
    #[error("tool returned an unexpected response: {0}")]
    MalformedResponse(String),
    #[error("connect attempt cancelled: {0}")]
    Cancelled(String),
}

impl ToolError {
    pub(crate) fn failure_reason(&self) -> ToolFailureReason {
        match self {
            ToolError::MalformedResponse(_) => ToolFailureReason::MalformedResponse,
            _ => ToolFailureReason::CallFailed,
        }
    }
}

/// One content item of a raw tool response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawToolContent {
    Text(String),
    /// Image, audio, resource or anything else that is not text
    NonText(&'static str),
}

/// Tool response before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToolResponse {
    pub is_error: bool,
    pub content: Vec<RawToolContent>,
}

impl RawToolResponse {
    #[cfg(test)]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: vec![RawToolContent::Text(text.into())],
        }
    }
}

/// An established request/response channel to the tool process
#[async_trait]
pub trait ToolChannel: Send + Sync {
    async fn call(&self, name: &str, arguments: ToolArguments)
        -> Result<RawToolResponse, ToolError>;

    /// Close the channel and stop the process. Safe to call twice.
    async fn close(&self);
}

/// Resolves with a description once the remote process has gone away.
///
/// A dropped sender counts as an exit.
pub type ExitSignal = oneshot::Receiver<String>;

/// A freshly established channel plus its exit notification
pub struct ToolConnection {
    pub channel: Arc<dyn ToolChannel>,
    pub exited: ExitSignal,
}

/// Spawns the tool process and performs the protocol handshake
#[async_trait]
pub trait ToolConnector: Send + Sync {
    async fn connect(&self) -> Result<ToolConnection, ToolError>;
}
