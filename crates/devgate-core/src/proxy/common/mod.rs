//! Shared building blocks for the translation pipeline.

pub mod image_strip;
pub mod mistral;
pub mod token_count;
pub mod tool_id;
pub mod tool_name;
pub mod user_label;

pub use mistral::{is_mistral_model, parse_tool_calls, TOOL_CALLS_MARKER};
pub use tool_id::{is_normalized_tool_id, normalize_tool_id, synthesize_tool_id};
pub use tool_name::sanitize_tool_name;
