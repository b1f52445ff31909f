//! OpenAI-compatible chat-completion client for MCP Bridge.

mod client;
mod provider;

pub use client::ApiClient;
pub use provider::InferenceProvider;
