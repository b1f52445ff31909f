//! Interaction history for MCP Bridge.
//!
//! The backend is chosen once at startup from [`HistoryConfig`]; [`History`]
//! then serves both as the orchestrator's log sink and as the read side for
//! listing past completions.

pub mod memory;
pub mod store;
pub mod types;

pub use memory::MemoryHistory;
pub use store::FileHistory;
pub use types::{HistoryEntry, HistorySummary, ToolCallEntry};

use bridge_types::{BoxFuture, CompletionRecord, InteractionLog, LogError, ToolCallRecord};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of entries returned by [`History::recent`].
pub const DEFAULT_RECENT_LIMIT: usize = 100;

/// Which history backend to use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HistoryConfig {
    /// Nothing is recorded.
    #[default]
    None,
    Memory,
    File {
        /// Falls back to the directory passed to [`History::open`].
        #[serde(default)]
        directory: Option<PathBuf>,
    },
}

/// The selected history backend.
pub enum History {
    Disabled,
    Memory(MemoryHistory),
    File(FileHistory),
}

impl History {
    /// Open the backend described by `config`. `default_dir` is used for the
    /// file backend when no directory is configured.
    pub async fn open(config: &HistoryConfig, default_dir: &Path) -> Result<Self, LogError> {
        Ok(match config {
            HistoryConfig::None => History::Disabled,
            HistoryConfig::Memory => History::Memory(MemoryHistory::new()),
            HistoryConfig::File { directory } => {
                let dir = directory
                    .clone()
                    .unwrap_or_else(|| default_dir.to_path_buf());
                tracing::info!("Recording history to {}", dir.display());
                History::File(FileHistory::new(dir).await?)
            }
        })
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, History::Disabled)
    }

    /// Most recent completions first, at most `limit`.
    pub async fn recent(&self, limit: usize) -> Result<Vec<HistorySummary>, LogError> {
        match self {
            History::Disabled => Ok(Vec::new()),
            History::Memory(m) => Ok(m.recent(limit)),
            History::File(f) => f.recent(limit).await,
        }
    }

    /// A completion with its tool calls ordered by timestamp. `id` may be a
    /// unique prefix.
    pub async fn get(&self, id: &str) -> Result<HistoryEntry, LogError> {
        match self {
            History::Disabled => Err(LogError::NotFound { id: id.to_string() }),
            History::Memory(m) => m.get(id),
            History::File(f) => f.get(id).await,
        }
    }
}

impl InteractionLog for History {
    fn record_completion<'a>(
        &'a self,
        record: &'a CompletionRecord,
    ) -> BoxFuture<'a, Result<(), LogError>> {
        match self {
            History::Disabled => Box::pin(async { Ok(()) }),
            History::Memory(m) => m.record_completion(record),
            History::File(f) => f.record_completion(record),
        }
    }

    fn record_tool_call<'a>(
        &'a self,
        record: &'a ToolCallRecord,
    ) -> BoxFuture<'a, Result<(), LogError>> {
        match self {
            History::Disabled => Box::pin(async { Ok(()) }),
            History::Memory(m) => m.record_tool_call(record),
            History::File(f) => f.record_tool_call(record),
        }
    }

    fn finalize_completion<'a>(
        &'a self,
        completion_id: &'a str,
        final_response: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<(), LogError>> {
        match self {
            History::Disabled => Box::pin(async { Ok(()) }),
            History::Memory(m) => m.finalize_completion(completion_id, final_response),
            History::File(f) => f.finalize_completion(completion_id, final_response),
        }
    }
}
