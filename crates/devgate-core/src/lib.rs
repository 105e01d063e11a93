//! # Devgate Core
//!
//! Core logic for the devgate translating proxy: a reverse proxy that sits
//! between AI coding clients speaking the Anthropic Messages API or the
//! OpenAI Chat Completions API and an OpenAI-compatible inference server
//! backed by a Mistral-family model (Devstral, Codestral).
//!
//! The translation pipeline lives under [`proxy`]:
//!
//! ```text
//! devgate-core/src/proxy/
//! ├── mappers/     — request/response/stream translation between dialects
//! ├── upstream/    — backend client and backend selection
//! ├── handlers/    — axum route handlers
//! ├── common/      — tool-ID normalization, Mistral tool-call parsing,
//! │                  token counting, user labeling, image stripping
//! ├── middleware/  — gateway auth, CORS
//! ├── server.rs    — router construction and server lifecycle
//! ├── monitor.rs   — in-memory telemetry ring buffer
//! └── prometheus.rs — metric registration and recording
//! ```

pub mod error;
pub mod proxy;

pub use error::{AppError, AppResult};
