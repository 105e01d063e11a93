//! Image removal for non-vision dispatch.
//!
//! When no vision backend is configured (or the request is routed to the
//! default backend), image blocks must not reach a text-only Mistral model.
//! Historical images become numbered placeholders so the conversation keeps
//! its shape; nothing is ever fetched from a URL.

use crate::proxy::mappers::anthropic::models::{
    AnthropicMessage, ContentBlock, MessageContent,
};
use crate::proxy::mappers::openai::models::{ContentPart, OpenAIContent, OpenAIMessage};

fn placeholder(n: usize) -> String {
    format!("[Image {n} - previously analyzed]")
}

/// Replace every Anthropic `image` block with a textual placeholder.
pub fn strip_images_anthropic(messages: Vec<AnthropicMessage>) -> Vec<AnthropicMessage> {
    let mut image_no = 0usize;
    messages
        .into_iter()
        .map(|mut msg| {
            if let MessageContent::Array(blocks) = msg.content {
                let blocks = blocks
                    .into_iter()
                    .map(|block| match block {
                        ContentBlock::Image { .. } => {
                            image_no += 1;
                            ContentBlock::Text { text: placeholder(image_no) }
                        }
                        other => other,
                    })
                    .collect();
                msg.content = MessageContent::Array(blocks);
            }
            msg
        })
        .collect()
}

/// Replace every OpenAI `image_url` part with a textual placeholder.
pub fn strip_images_openai(messages: Vec<OpenAIMessage>) -> Vec<OpenAIMessage> {
    let mut image_no = 0usize;
    messages
        .into_iter()
        .map(|mut msg| {
            if let Some(OpenAIContent::Parts(parts)) = msg.content {
                let parts = parts
                    .into_iter()
                    .map(|part| match part {
                        ContentPart::ImageUrl { .. } => {
                            image_no += 1;
                            ContentPart::Text { text: placeholder(image_no) }
                        }
                        text => text,
                    })
                    .collect();
                msg.content = Some(OpenAIContent::Parts(parts));
            }
            msg
        })
        .collect()
}

/// Whether any Anthropic message carries an image block.
pub fn anthropic_has_image(messages: &[AnthropicMessage]) -> bool {
    messages.iter().any(|msg| match &msg.content {
        MessageContent::Array(blocks) => {
            blocks.iter().any(|b| matches!(b, ContentBlock::Image { .. }))
        }
        MessageContent::String(_) => false,
    })
}

/// Whether any OpenAI message carries an `image_url` part.
pub fn openai_has_image(messages: &[OpenAIMessage]) -> bool {
    messages.iter().any(|msg| match &msg.content {
        Some(OpenAIContent::Parts(parts)) => {
            parts.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. }))
        }
        _ => false,
    })
}
