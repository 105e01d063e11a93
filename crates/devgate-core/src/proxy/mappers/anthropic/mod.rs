//! Anthropic dialect: models and the Anthropic ⇄ OpenAI transforms.

pub mod models;
pub mod request;
pub mod response;
pub mod sse_stream;
pub mod streaming;

pub use models::{AnthropicRequest, AnthropicResponse};
pub use request::transform_anthropic_request;
pub use response::transform_response;
pub use sse_stream::create_anthropic_sse_stream;
pub use streaming::StreamTranslator;
