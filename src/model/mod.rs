//! Model client module for the reasoning backend.

mod client;

pub use client::{
    extract_json_from_response, parse_json_content, MessageBuilder, ModelClient, ModelConfig,
    ModelError, ReasoningBackend,
};
