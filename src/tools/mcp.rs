//! MCP client over the tool process's stdio

use super::{
    RawToolContent, RawToolResponse, ToolArguments, ToolChannel, ToolConnection, ToolConnector,
    ToolError,
};
use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParam, RawContent},
    service::{Peer, RunningServiceCancellationToken, ServiceError},
    transport::TokioChildProcess,
    RoleClient, ServiceExt,
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::process::Command;
use tokio::sync::oneshot;

/// Spawns the tool as a child process and speaks MCP over its stdio
pub struct McpConnector {
    program: String,
    args: Vec<String>,
}

impl McpConnector {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl ToolConnector for McpConnector {
    async fn connect(&self) -> Result<ToolConnection, ToolError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);

        let transport =
            TokioChildProcess::new(command).map_err(|e| ToolError::Spawn(e.to_string()))?;
        let service = ()
            .serve(transport)
            .await
            .map_err(|e| ToolError::Handshake(e.to_string()))?;

        let peer = service.peer().clone();
        let cancel = service.cancellation_token();
        let (exit_tx, exited) = oneshot::channel();
        let program = self.program.clone();

        // The service task ends when the process closes its stdio or we cancel
        tokio::spawn(async move {
            let reason = match service.waiting().await {
                Ok(quit) => format!("{quit:?}"),
                Err(e) => e.to_string(),
            };
            tracing::debug!(program = %program, reason = %reason, "tool service finished");
            let _ = exit_tx.send(reason);
        });

        Ok(ToolConnection {
            channel: Arc::new(McpChannel {
                peer,
                cancel: Mutex::new(Some(cancel)),
            }),
            exited,
        })
    }
}

struct McpChannel {
    peer: Peer<RoleClient>,
    cancel: Mutex<Option<RunningServiceCancellationToken>>,
}

#[async_trait]
impl ToolChannel for McpChannel {
    async fn call(
        &self,
        name: &str,
        arguments: ToolArguments,
    ) -> Result<RawToolResponse, ToolError> {
        let result = self
            .peer
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(arguments),
            })
            .await
            .map_err(|e| match e {
                ServiceError::UnexpectedResponse => ToolError::MalformedResponse(e.to_string()),
                other => ToolError::Transport(other.to_string()),
            })?;

        Ok(RawToolResponse {
            is_error: result.is_error.unwrap_or(false),
            content: result
                .content
                .into_iter()
                .map(|c| match c.raw {
                    RawContent::Text(text) => RawToolContent::Text(text.text),
                    RawContent::Image(_) => RawToolContent::NonText("image"),
                    RawContent::Audio(_) => RawToolContent::NonText("audio"),
                    RawContent::Resource(_) => RawToolContent::NonText("resource"),
                    RawContent::ResourceLink(_) => RawToolContent::NonText("resource_link"),
                })
                .collect(),
        })
    }

    async fn close(&self) {
        let token = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }
}
