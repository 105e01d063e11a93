//! OpenAI dialect: models and the OpenAI → OpenAI normalization pipeline.

pub mod models;
pub mod pipeline;

pub use models::{OpenAIRequest, OpenAIResponse, OpenAIStreamChunk};
pub use pipeline::apply_mistral_fixes;
