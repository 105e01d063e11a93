//! HTTP client for OpenAI-compatible backends.
//!
//! Two operations: a unary JSON POST and a raw streaming POST. Both compose
//! the outbound Authorization header from the backend config and the
//! client's inbound credentials.

use crate::error::{AppError, AppResult};
use crate::proxy::config::BackendConfig;
use bytes::Bytes;
use futures::Stream;
use reqwest::Client;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

/// Hosts under this suffix are trusted cluster peers: the backend's own key
/// is used regardless of what the client sent.
const INTERNAL_CLUSTER_SUFFIX: &str = ".cluster.local";

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct BackendClient {
    http: Client,
}

impl Default for BackendClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendClient {
    #[allow(clippy::expect_used, reason = "HTTP client is required for the proxy to function")]
    pub fn new() -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .expect("Failed to create HTTP client");

        Self { http }
    }

    /// POST a JSON body and parse the JSON response.
    ///
    /// Non-2xx responses become [`AppError::Backend`] with the body capped at
    /// 500 chars; the full diagnostic context goes to the log.
    pub async fn call(&self, url: &str, body: &Value, auth: Option<&str>) -> AppResult<Value> {
        let response = self.post(url, body, auth).await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_else(|_| format!("HTTP {status}"));
            log_upstream_error(url, status.as_u16(), body, &text);
            return Err(AppError::backend(status.as_u16(), &text));
        }

        Ok(response.json().await?)
    }

    /// POST a JSON body and return the raw response byte stream.
    ///
    /// The stream is lazy and single-consumer; dropping it releases the
    /// underlying connection. Line reassembly and UTF-8 handling are the
    /// consumer's concern — multi-byte sequences never straddle the `\n`
    /// boundaries the SSE glue splits on.
    pub async fn stream(
        &self,
        url: &str,
        body: &Value,
        auth: Option<&str>,
    ) -> AppResult<Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>> {
        let response = self.post(url, body, auth).await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_else(|_| format!("HTTP {status}"));
            log_upstream_error(url, status.as_u16(), body, &text);
            return Err(AppError::backend(status.as_u16(), &text));
        }

        Ok(Box::pin(response.bytes_stream()))
    }

    async fn post(
        &self,
        url: &str,
        body: &Value,
        auth: Option<&str>,
    ) -> AppResult<reqwest::Response> {
        let mut request = self.http.post(url).header("Content-Type", "application/json");
        if let Some(auth) = auth {
            request = request.header("Authorization", with_bearer(auth));
        }
        Ok(request.json(body).send().await?)
    }

    /// Reachability probe used at startup. Never an error — backends may come
    /// up after the proxy does.
    pub async fn probe(&self, base_url: &str) -> bool {
        let url = format!("{base_url}/health");
        match self.http.get(&url).timeout(HEALTH_PROBE_TIMEOUT).send().await {
            Ok(resp) => {
                tracing::info!("Backend {} reachable (HTTP {})", base_url, resp.status());
                true
            }
            Err(e) => {
                tracing::warn!("Backend {} not reachable: {}", base_url, e);
                false
            }
        }
    }
}

/// Compose the outbound Authorization value.
///
/// Internal cluster hosts always use the backend's configured key. External
/// hosts prefer the configured key and fall back to the client's inbound
/// header.
pub fn compose_auth(backend: &BackendConfig, inbound: Option<&str>) -> Option<String> {
    if is_internal_host(&backend.url) {
        return backend.api_key.clone();
    }
    backend.api_key.clone().or_else(|| inbound.map(|s| s.to_string()))
}

fn is_internal_host(base_url: &str) -> bool {
    url::Url::parse(base_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.ends_with(INTERNAL_CLUSTER_SUFFIX)))
        .unwrap_or(false)
}

fn with_bearer(token: &str) -> String {
    if token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bearer {token}")
    }
}

fn log_upstream_error(url: &str, status: u16, body: &Value, error_text: &str) {
    let messages = body.get("messages").and_then(|m| m.as_array());
    let message_count = messages.map(|m| m.len()).unwrap_or(0);
    let last_role = messages
        .and_then(|m| m.last())
        .and_then(|m| m.get("role"))
        .and_then(|r| r.as_str())
        .unwrap_or("none");
    let has_tool_calls = messages
        .map(|m| m.iter().any(|msg| msg.get("tool_calls").is_some()))
        .unwrap_or(false);

    let preview: String = error_text.chars().take(500).collect();
    tracing::error!(
        upstream = url,
        status = status,
        model = body.get("model").and_then(|m| m.as_str()).unwrap_or("unknown"),
        message_count = message_count,
        last_role = last_role,
        has_tool_calls = has_tool_calls,
        "Upstream error: {}",
        preview
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str, key: Option<&str>) -> BackendConfig {
        BackendConfig {
            url: url.to_string(),
            api_key: key.map(|k| k.to_string()),
            model: "devstral-small".to_string(),
        }
    }

    #[test]
    fn internal_host_always_uses_backend_key() {
        let b = backend("http://vllm.inference.cluster.local:8000", Some("backend-key"));
        let auth = compose_auth(&b, Some("Bearer client-key"));
        assert_eq!(auth.as_deref(), Some("backend-key"));
    }

    #[test]
    fn internal_host_without_key_sends_nothing() {
        let b = backend("http://vllm.inference.cluster.local:8000", None);
        assert_eq!(compose_auth(&b, Some("Bearer client-key")), None);
    }

    #[test]
    fn external_host_prefers_backend_key() {
        let b = backend("https://api.example.com", Some("backend-key"));
        assert_eq!(compose_auth(&b, Some("client-key")).as_deref(), Some("backend-key"));
    }

    #[test]
    fn external_host_falls_back_to_inbound() {
        let b = backend("https://api.example.com", None);
        assert_eq!(
            compose_auth(&b, Some("Bearer client-key")).as_deref(),
            Some("Bearer client-key")
        );
    }

    #[test]
    fn bearer_prefix_is_added_once() {
        assert_eq!(with_bearer("abc"), "Bearer abc");
        assert_eq!(with_bearer("Bearer abc"), "Bearer abc");
    }
}
