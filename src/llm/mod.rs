//! OpenAI-compatible chat-completion client.

pub mod client;
pub mod types;

pub use client::{ChatClient, LlmError, OpenAiClient};
pub use types::ChatMessage;
