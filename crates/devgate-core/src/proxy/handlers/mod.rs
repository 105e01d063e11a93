//! Route handlers: parse, select, transform, dispatch, observe, respond.

pub mod anthropic;
pub mod common;
pub mod openai;
