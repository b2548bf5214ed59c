//! Connection lifecycle for the external tool process
//!
//! ```text
//! Disconnected --connect()--> Connecting --ok--> Connected
//!      ^                          |                 |
//!      +--------- failure --------+                 |
//!      +------- process exit / disconnect() --------+
//! ```
//!
//! Concurrent `connect()` calls share one in-flight attempt. Every
//! attempt carries a generation number so a late exit notification or a
//! connect that finishes after `disconnect()` cannot clobber newer state.

use super::{
    payload, ExitSignal, ToolArguments, ToolCallResult, ToolChannel, ToolConnection,
    ToolConnector, ToolError, ToolFailureReason,
};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound on a single tool call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

type ConnectAttempt = Shared<BoxFuture<'static, Result<(), ToolError>>>;

/// Externally visible connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

enum GatewayState {
    Disconnected,
    Connecting {
        generation: u64,
        attempt: ConnectAttempt,
    },
    Connected {
        generation: u64,
        channel: Arc<dyn ToolChannel>,
    },
}

/// What to do once a connect attempt has resolved
enum Settled {
    Live(ExitSignal),
    Stale(Arc<dyn ToolChannel>),
    Failed(ToolError),
}

struct Inner {
    connector: Arc<dyn ToolConnector>,
    state: Mutex<GatewayState>,
    generations: AtomicU64,
    call_timeout: Duration,
}

/// Never-failing entry point to the tool process. Cheap to clone.
#[derive(Clone)]
pub struct ToolGateway {
    inner: Arc<Inner>,
}

impl ToolGateway {
    pub fn new(connector: Arc<dyn ToolConnector>) -> Self {
        Self::with_call_timeout(connector, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_call_timeout(connector: Arc<dyn ToolConnector>, call_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                state: Mutex::new(GatewayState::Disconnected),
                generations: AtomicU64::new(0),
                call_timeout,
            }),
        }
    }

    /// Gateway with no tool process behind it; every connect fails
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoToolConfigured))
    }

    pub fn state(&self) -> ConnectionState {
        match &*self.inner.lock_state() {
            GatewayState::Disconnected => ConnectionState::Disconnected,
            GatewayState::Connecting { .. } => ConnectionState::Connecting,
            GatewayState::Connected { .. } => ConnectionState::Connected,
        }
    }

    /// Connect if not already connected.
    ///
    /// Joins the in-flight attempt when one exists. The attempt runs on its
    /// own task, so dropping this future does not abandon it.
    pub async fn connect(&self) -> Result<(), ToolError> {
        let attempt = {
            let mut state = self.inner.lock_state();
            match &*state {
                GatewayState::Connected { .. } => {
                    tracing::debug!("tool channel already connected");
                    return Ok(());
                }
                GatewayState::Connecting { attempt, .. } => {
                    tracing::debug!("joining in-flight tool connect");
                    attempt.clone()
                }
                GatewayState::Disconnected => {
                    let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
                    let inner = Arc::clone(&self.inner);
                    let handle = tokio::spawn(inner.establish(generation));
                    let attempt = async move {
                        handle
                            .await
                            .unwrap_or_else(|e| Err(ToolError::Cancelled(e.to_string())))
                    }
                    .boxed()
                    .shared();
                    *state = GatewayState::Connecting {
                        generation,
                        attempt: attempt.clone(),
                    };
                    tracing::info!(generation, "connecting to tool process");
                    attempt
                }
            }
        };
        attempt.await
    }

    /// Invoke a tool. Returns immediately with `NotConnected` unless connected.
    pub async fn call_tool(&self, name: &str, arguments: ToolArguments) -> ToolCallResult {
        let channel = match &*self.inner.lock_state() {
            GatewayState::Connected { channel, .. } => Arc::clone(channel),
            _ => {
                tracing::debug!(tool = name, "tool call skipped, not connected");
                return ToolCallResult::Failed(ToolFailureReason::NotConnected);
            }
        };

        let start = Instant::now();
        let outcome =
            tokio::time::timeout(self.inner.call_timeout, channel.call(name, arguments)).await;
        let duration_ms = start.elapsed().as_millis();

        let result = match outcome {
            Ok(Ok(raw)) => payload::decode(raw),
            Ok(Err(e)) => {
                tracing::warn!(tool = name, duration_ms, error = %e, "tool call failed");
                ToolCallResult::Failed(e.failure_reason())
            }
            Err(_) => {
                tracing::warn!(tool = name, duration_ms, "tool call timed out");
                ToolCallResult::Failed(ToolFailureReason::CallFailed)
            }
        };

        match result.failure_reason() {
            None => tracing::info!(tool = name, duration_ms, "tool call succeeded"),
            Some(reason) => {
                tracing::info!(
                    tool = name,
                    duration_ms,
                    reason = reason.as_str(),
                    "tool call degraded"
                );
            }
        }
        result
    }

    /// Close the channel if any. Always leaves the gateway disconnected.
    pub async fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.inner.lock_state(), GatewayState::Disconnected);
        match previous {
            GatewayState::Connected {
                generation,
                channel,
            } => {
                channel.close().await;
                tracing::info!(generation, "tool channel disconnected");
            }
            GatewayState::Connecting { generation, .. } => {
                tracing::info!(generation, "abandoned in-flight tool connect");
            }
            GatewayState::Disconnected => {
                tracing::debug!("disconnect requested while already disconnected");
            }
        }
    }

    /// Keep the gateway connected, retrying with exponential backoff.
    ///
    /// Runs until `shutdown` is cancelled.
    pub fn spawn_supervisor(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            let mut attempt: u32 = 0;
            loop {
                let wait = if gateway.state() == ConnectionState::Connected {
                    attempt = 0;
                    backoff = INITIAL_BACKOFF;
                    INITIAL_BACKOFF
                } else {
                    attempt += 1;
                    match gateway.connect().await {
                        Ok(()) => {
                            if attempt > 1 {
                                tracing::info!(attempt, "tool process reconnected");
                            }
                            INITIAL_BACKOFF
                        }
                        Err(e) => {
                            tracing::warn!(
                                attempt,
                                error = %e,
                                retry_in_secs = backoff.as_secs(),
                                "tool connect failed"
                            );
                            let wait = backoff;
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                            wait
                        }
                    }
                };

                tokio::select! {
                    () = shutdown.cancelled() => {
                        tracing::debug!("tool supervisor stopped");
                        return;
                    }
                    () = tokio::time::sleep(wait) => {}
                }
            }
        })
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn establish(self: Arc<Self>, generation: u64) -> Result<(), ToolError> {
        let outcome = self.connector.connect().await;
        match self.settle(generation, outcome) {
            Settled::Live(exited) => {
                tracing::info!(generation, "tool channel connected");
                tokio::spawn(Arc::clone(&self).watch_exit(generation, exited));
                Ok(())
            }
            Settled::Stale(channel) => {
                channel.close().await;
                Err(ToolError::Cancelled(
                    "gateway was disconnected while connecting".to_string(),
                ))
            }
            Settled::Failed(e) => {
                tracing::warn!(generation, error = %e, "tool connect failed");
                Err(e)
            }
        }
    }

    fn settle(&self, generation: u64, outcome: Result<ToolConnection, ToolError>) -> Settled {
        let mut state = self.lock_state();
        let current = matches!(
            &*state,
            GatewayState::Connecting { generation: g, .. } if *g == generation
        );
        match outcome {
            Ok(connection) if current => {
                *state = GatewayState::Connected {
                    generation,
                    channel: connection.channel,
                };
                Settled::Live(connection.exited)
            }
            Ok(connection) => Settled::Stale(connection.channel),
            Err(e) => {
                if current {
                    *state = GatewayState::Disconnected;
                }
                Settled::Failed(e)
            }
        }
    }

    async fn watch_exit(self: Arc<Self>, generation: u64, exited: ExitSignal) {
        let reason = exited
            .await
            .unwrap_or_else(|_| "exit notifier dropped".to_string());

        let mut state = self.lock_state();
        if matches!(
            &*state,
            GatewayState::Connected { generation: g, .. } if *g == generation
        ) {
            *state = GatewayState::Disconnected;
            tracing::warn!(generation, reason = %reason, "tool process exited");
        }
    }
}

struct NoToolConfigured;

#[async_trait]
impl ToolConnector for NoToolConfigured {
    async fn connect(&self) -> Result<ToolConnection, ToolError> {
        Err(ToolError::Spawn("no tool command configured".to_string()))
    }
}
