//! Shared chat-completion types and error hierarchy for MCP Bridge.

pub mod chat;
pub mod error;
pub mod history;
pub mod provider;
pub mod util;

pub use chat::*;
pub use error::{ApiError, BridgeError, ConfigError, LogError, RegistryError};
pub use history::{CompletionRecord, InteractionLog, TokenCounts, ToolCallRecord};
pub use provider::Provider;
pub use util::BoxFuture;
