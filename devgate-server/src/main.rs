//! Devgate Server - Headless Daemon
//!
//! A pure Rust HTTP server that translates Anthropic Messages and OpenAI
//! Chat Completions traffic onto an OpenAI-compatible Mistral-family backend
//! (Devstral, Codestral) behind vLLM.
//!
//! Configuration is environment-driven; `VLLM_URL` is the only required
//! variable.

use anyhow::Result;
use devgate_core::proxy::{prometheus, AxumServer, ProxyConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ProxyConfig::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    prometheus::init_metrics();

    info!("Devgate starting on {}:{}", config.host, config.port);
    info!("Backend: {} (model {})", config.backend.url, config.backend.model);
    match &config.vision {
        Some(vision) => info!("Vision backend: {} (model {})", vision.url, vision.model),
        None => info!("Vision backend: none (images will be stripped)"),
    }
    if !config.auth_enabled() {
        info!("API_KEY not set; inbound authentication is disabled");
    }

    AxumServer::new(config).run().await.map_err(|e| anyhow::anyhow!("{e}"))?;

    Ok(())
}
