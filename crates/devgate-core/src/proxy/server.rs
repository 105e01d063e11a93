//! Axum server: shared state, router construction, and lifecycle.

use crate::proxy::config::ProxyConfig;
use crate::proxy::monitor::TelemetryMonitor;
use crate::proxy::upstream::client::BackendClient;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// Shared per-request state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub upstream: Arc<BackendClient>,
    pub monitor: Arc<TelemetryMonitor>,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> Self {
        let monitor = Arc::new(TelemetryMonitor::new(config.telemetry_enabled));
        Self {
            config: Arc::new(config),
            upstream: Arc::new(BackendClient::new()),
            monitor,
        }
    }
}

/// Build the proxy router with all routes and middleware attached.
pub fn build_proxy_router(state: AppState) -> Router<()> {
    use crate::proxy::handlers;

    Router::new()
        // Anthropic protocol
        .route("/v1/messages", post(handlers::anthropic::handle_messages))
        .route(
            "/v1/messages/count_tokens",
            post(handlers::anthropic::handle_count_tokens),
        )
        // OpenAI protocol
        .route(
            "/v1/chat/completions",
            post(handlers::openai::handle_chat_completions),
        )
        .route("/v1/completions", post(handlers::openai::handle_completions))
        .route("/completions", post(handlers::openai::handle_completions))
        .route("/v1/models", get(handlers::openai::handle_list_models))
        // Utility
        .route("/health", get(handlers::common::handle_health))
        .route("/stats", get(handlers::common::handle_stats))
        .route("/metrics", get(handlers::common::handle_metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(crate::proxy::middleware::cors_layer())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::proxy::middleware::auth_middleware,
        ))
        .with_state(state)
}

/// Axum server instance.
pub struct AxumServer {
    config: ProxyConfig,
}

impl AxumServer {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        tracing::info!("Starting devgate server on {}", addr);

        let state = AppState::new(self.config);

        // Backends may still be starting; log reachability but never block.
        state.upstream.probe(&state.config.backend.url).await;
        if let Some(vision) = &state.config.vision {
            state.upstream.probe(&vision.url).await;
        }

        let app = build_proxy_router(state);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
