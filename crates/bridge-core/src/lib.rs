//! Conversation orchestration for MCP Bridge.
//!
//! The [`Orchestrator`] runs the multi-turn tool-calling loop; the
//! [`BridgeService`] bundles it with the client registry's admin operations.

mod orchestrator;
mod service;

pub use orchestrator::{
    Completion, ConversationEvent, DispatchError, Orchestrator, OrchestratorConfig, Phase,
};
pub use service::{BridgeService, ServerStatus};
