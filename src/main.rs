//! EVA - plant care assistant backend
//!
//! Serves the chat API, keeps short-lived conversation history in memory
//! and consults an external plant knowledge tool when a turn calls for it.

mod api;
mod compose;
mod config;
mod conversation;
mod intent;
mod llm;
mod orchestrator;
mod prompt;
#[cfg(test)]
mod testing;
mod tools;

use api::{create_router, AppState};
use config::Config;
use conversation::ConversationStore;
use llm::{GeminiService, LlmService, LoggingService};
use orchestrator::{ConversationOrchestrator, ToolNames};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tools::{HttpImageHost, McpConnector, ToolGateway};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eva_chat=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };

    // Language model
    let gemini: Arc<dyn LlmService> = Arc::new(GeminiService::new(&config.gemini)?);
    let llm: Arc<dyn LlmService> = Arc::new(LoggingService::new(gemini));
    tracing::info!(model = %llm.model_id(), "language model configured");

    // Tool process
    let gateway = match &config.tool {
        Some(tool) => {
            tracing::info!(command = %tool.command, args = ?tool.args, "plant tool configured");
            ToolGateway::new(Arc::new(McpConnector::new(
                tool.command.clone(),
                tool.args.clone(),
            )))
        }
        None => {
            tracing::warn!("EVA_TOOL_COMMAND not set, plant lookups disabled");
            ToolGateway::disabled()
        }
    };

    let background = CancellationToken::new();
    if config.tool.is_some() {
        if config.tool_reconnect {
            gateway.spawn_supervisor(background.clone());
        } else {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                if let Err(e) = gateway.connect().await {
                    tracing::warn!(error = %e, "initial tool connect failed");
                }
            });
        }
    }

    let images = Arc::new(HttpImageHost::new(
        config.image_upload_url.clone(),
        UPLOAD_TIMEOUT,
    )?);
    if config.image_upload_url.is_none() {
        tracing::warn!("EVA_IMAGE_UPLOAD_URL not set, image identification disabled");
    }

    // Conversations
    let store = Arc::new(ConversationStore::new(config.history_max_turns));
    let orchestrator = Arc::new(ConversationOrchestrator::new(
        Arc::clone(&store),
        llm,
        gateway.clone(),
        images,
        ToolNames {
            search: config.search_tool.clone(),
            identify: config.identify_tool.clone(),
        },
    ));
    spawn_eviction_sweeper(
        Arc::clone(&orchestrator),
        config.conversation_ttl,
        config.eviction_interval,
        background.clone(),
    );

    let state = AppState {
        orchestrator,
        store,
        tools: gateway.clone(),
    };

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("EVA server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    background.cancel();
    gateway.disconnect().await;
    tracing::info!("EVA server stopped");

    Ok(())
}

/// Periodically drop conversations idle for longer than `ttl`
fn spawn_eviction_sweeper(
    orchestrator: Arc<ConversationOrchestrator>,
    ttl: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let Ok(ttl) = chrono::Duration::from_std(ttl) else {
        tracing::warn!(?ttl, "conversation TTL out of range, eviction disabled");
        return;
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(interval) => {}
            }
            let evicted = orchestrator.evict_idle(chrono::Utc::now() - ttl);
            if evicted > 0 {
                tracing::info!(
                    evicted,
                    remaining = orchestrator.tracked_conversations(),
                    "evicted idle conversations"
                );
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
