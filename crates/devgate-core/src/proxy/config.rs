//! Proxy configuration, derived from the environment.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// A single upstream inference server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the OpenAI-compatible server (no trailing slash).
    pub url: String,
    /// API key sent upstream. Optional for unauthenticated backends.
    pub api_key: Option<String>,
    /// Model name passed through to the backend.
    pub model: String,
}

impl BackendConfig {
    pub fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.url)
    }

    pub fn completions_url(&self) -> String {
        format!("{}/v1/completions", self.url)
    }
}

/// Proxy server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Interface to bind to.
    pub host: String,

    /// TCP port to listen on.
    pub port: u16,

    /// Gateway API key. Empty disables inbound authentication.
    pub api_key: String,

    /// Default backend (Devstral/Codestral behind vLLM).
    pub backend: BackendConfig,

    /// Optional vision backend for image-bearing requests.
    pub vision: Option<BackendConfig>,

    /// Enable the in-memory telemetry ring buffer.
    #[serde(default = "default_true")]
    pub telemetry_enabled: bool,

    /// Optional external telemetry sink URL.
    #[serde(default)]
    pub telemetry_endpoint: Option<String>,
}

fn default_true() -> bool {
    true
}

const DEFAULT_PORT: u16 = 3456;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_MODEL: &str = "devstral-small";

impl ProxyConfig {
    /// Load configuration from environment variables.
    ///
    /// `VLLM_URL` is required; everything else has defaults or is optional.
    pub fn from_env() -> AppResult<Self> {
        let backend_url = std::env::var("VLLM_URL")
            .map_err(|_| AppError::Config("VLLM_URL is required".to_string()))?;
        let backend_url = normalize_url(&backend_url)?;

        let backend = BackendConfig {
            url: backend_url,
            api_key: non_empty_env("VLLM_API_KEY"),
            model: std::env::var("VLLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        };

        let vision = match non_empty_env("VISION_URL") {
            Some(url) => Some(BackendConfig {
                url: normalize_url(&url)?,
                api_key: non_empty_env("VISION_API_KEY"),
                model: std::env::var("VISION_MODEL")
                    .unwrap_or_else(|_| "pixtral-12b".to_string()),
            }),
            None => None,
        };

        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            api_key: std::env::var("API_KEY").unwrap_or_default(),
            backend,
            vision,
            telemetry_enabled: std::env::var("TELEMETRY_ENABLED")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            telemetry_endpoint: non_empty_env("TELEMETRY_ENDPOINT"),
        })
    }

    /// Whether inbound requests must present the gateway key.
    pub fn auth_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn normalize_url(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim().trim_end_matches('/').to_string();
    url::Url::parse(&trimmed)
        .map_err(|e| AppError::Config(format!("Invalid backend URL '{trimmed}': {e}")))?;
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_url_strips_trailing_slash() {
        assert_eq!(normalize_url("http://vllm:8000/").unwrap(), "http://vllm:8000");
    }

    #[test]
    fn normalize_url_rejects_garbage() {
        assert!(normalize_url("not a url").is_err());
    }

    #[test]
    fn chat_completions_url_is_joined() {
        let backend = BackendConfig {
            url: "http://vllm:8000".to_string(),
            api_key: None,
            model: "devstral-small".to_string(),
        };
        assert_eq!(backend.chat_completions_url(), "http://vllm:8000/v1/chat/completions");
    }
}
