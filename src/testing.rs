//! Mock collaborators for tests
//!
//! These mocks record what they were asked and answer from queues, so the
//! turn pipeline can be exercised without network or child processes.

use crate::llm::{ContentBlock, LlmError, LlmRequest, LlmResponse, LlmService, Usage};
use crate::tools::{
    ImageHost, RawToolResponse, ToolArguments, ToolChannel, ToolConnection, ToolConnector,
    ToolError, UploadError,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

// ============================================================================
// Mock LLM
// ============================================================================

/// LLM that answers from a queue; an empty queue is a network error
#[derive(Default)]
pub struct MockLlm {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    requests: Mutex<Vec<LlmRequest>>,
    delay: Mutex<Duration>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_text(&self, text: impl Into<String>) {
        self.responses.lock().unwrap().push_back(Ok(LlmResponse {
            content: vec![ContentBlock::text(text)],
            usage: Usage::default(),
        }));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmService for MockLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        // Take the response before sleeping so queued order matches call order
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")));
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        response
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

// ============================================================================
// Mock tool channel
// ============================================================================

/// Tool channel answering from a queue; an empty queue is a transport error
#[derive(Default)]
pub struct MockChannel {
    responses: Mutex<VecDeque<Result<RawToolResponse, ToolError>>>,
    calls: Mutex<Vec<(String, ToolArguments)>>,
    closes: Mutex<usize>,
    exit: Mutex<Option<oneshot::Sender<String>>>,
    delay: Mutex<Duration>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_response(&self, response: Result<RawToolResponse, ToolError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn recorded_calls(&self) -> Vec<(String, ToolArguments)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        *self.closes.lock().unwrap()
    }

    /// Fire the exit notification as if the process had died
    pub fn simulate_exit(&self, reason: &str) {
        if let Some(tx) = self.exit.lock().unwrap().take() {
            let _ = tx.send(reason.to_string());
        }
    }

    fn arm_exit(&self) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        *self.exit.lock().unwrap() = Some(tx);
        rx
    }
}

#[async_trait]
impl ToolChannel for MockChannel {
    async fn call(
        &self,
        name: &str,
        arguments: ToolArguments,
    ) -> Result<RawToolResponse, ToolError> {
        self.calls.lock().unwrap().push((name.to_string(), arguments));
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ToolError::Transport("No mock response queued".to_string())));
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        response
    }

    async fn close(&self) {
        *self.closes.lock().unwrap() += 1;
    }
}

/// Connector handing out queued channels
#[derive(Default)]
pub struct MockConnector {
    outcomes: Mutex<VecDeque<Result<Arc<MockChannel>, ToolError>>>,
    connects: Mutex<usize>,
    delay: Mutex<Duration>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_channel(&self, channel: Arc<MockChannel>) {
        self.outcomes.lock().unwrap().push_back(Ok(channel));
    }

    pub fn queue_error(&self, error: ToolError) {
        self.outcomes.lock().unwrap().push_back(Err(error));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn connect_count(&self) -> usize {
        *self.connects.lock().unwrap()
    }
}

#[async_trait]
impl ToolConnector for MockConnector {
    async fn connect(&self) -> Result<ToolConnection, ToolError> {
        *self.connects.lock().unwrap() += 1;
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ToolError::Spawn("No mock channel queued".to_string())));
        let channel = outcome?;
        let exited = channel.arm_exit();
        Ok(ToolConnection { channel, exited })
    }
}

// ============================================================================
// Mock image host
// ============================================================================

/// Image host returning a fixed URL or a fixed error
pub struct MockImageHost {
    outcome: Result<String, UploadError>,
    uploads: Mutex<Vec<(usize, String, String)>>,
}

impl MockImageHost {
    pub fn returning(url: impl Into<String>) -> Self {
        Self {
            outcome: Ok(url.into()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: UploadError) -> Self {
        Self {
            outcome: Err(error),
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// `(byte count, file name, mime type)` per upload
    pub fn recorded_uploads(&self) -> Vec<(usize, String, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageHost for MockImageHost {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime_type: &str,
    ) -> Result<String, UploadError> {
        self.uploads.lock().unwrap().push((
            bytes.len(),
            file_name.to_string(),
            mime_type.to_string(),
        ));
        self.outcome.clone()
    }
}
