//! History data types.

use bridge_types::util::preview;
use bridge_types::{CompletionRecord, TokenCounts, ToolCallRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One logged conversation: the first request/reply pair, every successful
/// tool call, and the final reply once the conversation settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub completion_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub model: String,
    pub request: Value,
    pub response: Value,
    /// `None` while the conversation is still running or if it failed.
    #[serde(default)]
    pub final_response: Option<Value>,
    pub tokens: TokenCounts,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallEntry>,
}

/// A tool call recorded against a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallEntry {
    pub id: String,
    pub tool_name: String,
    pub arguments: String,
    pub result: Value,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Start an entry from the snapshot taken on the first inference reply.
    pub fn from_record(record: &CompletionRecord) -> Self {
        let now = Utc::now();
        Self {
            completion_id: record.completion_id.clone(),
            created_at: now,
            updated_at: now,
            model: record.model.clone(),
            request: record.request.clone(),
            response: record.response.clone(),
            final_response: None,
            tokens: record.tokens,
            tool_calls: Vec::new(),
        }
    }

    pub fn push_tool_call(&mut self, record: &ToolCallRecord) {
        let now = Utc::now();
        self.tool_calls.push(ToolCallEntry {
            id: record.id.clone(),
            tool_name: record.tool_name.clone(),
            arguments: record.arguments.clone(),
            result: record.result.clone(),
            created_at: now,
        });
        self.updated_at = now;
    }

    pub fn finalize(&mut self, final_response: &Value) {
        self.final_response = Some(final_response.clone());
        self.updated_at = Utc::now();
    }

    /// Order tool calls by when they were recorded. Stable, so calls logged
    /// in the same instant keep insertion order.
    pub fn sort_tool_calls(&mut self) {
        self.tool_calls.sort_by_key(|c| c.created_at);
    }

    /// Short prefix of the completion id for display.
    pub fn short_id(&self) -> &str {
        short(&self.completion_id)
    }

    /// The first user message of the request, trimmed for listing.
    pub fn preview(&self) -> String {
        let Some(messages) = self.request.get("messages").and_then(Value::as_array) else {
            return String::new();
        };
        for msg in messages {
            if msg.get("role").and_then(Value::as_str) != Some("user") {
                continue;
            }
            let text = match msg.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(parts)) => parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join(" "),
                _ => continue,
            };
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return preview(trimmed, 77);
            }
        }
        String::new()
    }

    /// Build a summary for listing.
    pub fn to_summary(&self) -> HistorySummary {
        HistorySummary {
            completion_id: self.completion_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            model: self.model.clone(),
            total_tokens: self.tokens.total_tokens,
            tool_call_count: self.tool_calls.len(),
            finished: self.final_response.is_some(),
            preview: self.preview(),
        }
    }
}

/// Lightweight summary for history listing.
#[derive(Debug, Clone, Serialize)]
pub struct HistorySummary {
    pub completion_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub model: String,
    pub total_tokens: u64,
    pub tool_call_count: usize,
    pub finished: bool,
    pub preview: String,
}

impl HistorySummary {
    pub fn short_id(&self) -> &str {
        short(&self.completion_id)
    }

    /// Human-readable age string (e.g. "2h ago", "3d ago").
    pub fn age(&self) -> String {
        let minutes = (Utc::now() - self.created_at).num_minutes();
        if minutes < 1 {
            "just now".to_string()
        } else if minutes < 60 {
            format!("{minutes}m ago")
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
