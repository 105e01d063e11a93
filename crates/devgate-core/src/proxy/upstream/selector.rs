//! Backend selection by payload inspection.
//!
//! Image-bearing requests go to the vision backend when one is configured;
//! everything else (including image requests with no vision backend, after
//! stripping) goes to the default.

use crate::proxy::config::{BackendConfig, ProxyConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Default,
    Vision,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Default => "default",
            BackendKind::Vision => "vision",
        }
    }
}

/// Pick the backend for a request. `has_image` is computed by the caller
/// from the parsed payload (Anthropic `image` blocks or OpenAI `image_url`
/// parts).
pub fn select_backend(config: &ProxyConfig, has_image: bool) -> (&BackendConfig, BackendKind) {
    if has_image {
        if let Some(vision) = &config.vision {
            return (vision, BackendKind::Vision);
        }
    }
    (&config.backend, BackendKind::Default)
}
