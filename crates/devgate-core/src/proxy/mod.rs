//! Proxy module - translating reverse proxy service
//!
//! This module provides the full proxy pipeline:
//! - Anthropic Messages and OpenAI Chat Completions endpoints
//! - Anthropic ⇄ OpenAI request/response/stream translation
//! - Mistral tokenizer compatibility fixes (tool-call IDs, message sequence)
//! - Backend selection (default vs. vision) and dispatch
//! - Request monitoring and Prometheus metrics

pub mod common;
pub mod config;
pub mod handlers;
pub mod mappers;
pub mod middleware;
pub mod monitor;
pub mod prometheus;
pub mod server;
pub mod upstream;

pub use config::{BackendConfig, ProxyConfig};
pub use monitor::TelemetryMonitor;
pub use server::{build_proxy_router, AppState, AxumServer};
pub use upstream::client::BackendClient;
