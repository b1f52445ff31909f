//! In-process history, lost on exit.

use crate::types::{HistoryEntry, HistorySummary};
use bridge_types::{BoxFuture, CompletionRecord, InteractionLog, LogError, ToolCallRecord};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// History kept in a map keyed by completion id.
#[derive(Default)]
pub struct MemoryHistory {
    entries: Mutex<HashMap<String, HistoryEntry>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, HistoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Most recent completions first.
    pub fn recent(&self, limit: usize) -> Vec<HistorySummary> {
        let mut summaries: Vec<_> = self.entries().values().map(HistoryEntry::to_summary).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries.truncate(limit);
        summaries
    }

    /// Look up a completion by id or unique id prefix.
    pub fn get(&self, id: &str) -> Result<HistoryEntry, LogError> {
        let entries = self.entries();
        let mut entry = match entries.get(id) {
            Some(entry) => entry.clone(),
            None => {
                let matches: Vec<_> = entries
                    .values()
                    .filter(|e| e.completion_id.starts_with(id))
                    .collect();
                match matches.as_slice() {
                    [] => return Err(LogError::NotFound { id: id.to_string() }),
                    [entry] => (*entry).clone(),
                    _ => {
                        return Err(LogError::AmbiguousPrefix {
                            prefix: id.to_string(),
                            count: matches.len(),
                        });
                    }
                }
            }
        };
        entry.sort_tool_calls();
        Ok(entry)
    }

    fn update(
        &self,
        completion_id: &str,
        f: impl FnOnce(&mut HistoryEntry),
    ) -> Result<(), LogError> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(completion_id)
            .ok_or_else(|| LogError::NotFound {
                id: completion_id.to_string(),
            })?;
        f(entry);
        Ok(())
    }
}

impl InteractionLog for MemoryHistory {
    fn record_completion<'a>(
        &'a self,
        record: &'a CompletionRecord,
    ) -> BoxFuture<'a, Result<(), LogError>> {
        Box::pin(async move {
            self.entries().insert(
                record.completion_id.clone(),
                HistoryEntry::from_record(record),
            );
            Ok(())
        })
    }

    fn record_tool_call<'a>(
        &'a self,
        record: &'a ToolCallRecord,
    ) -> BoxFuture<'a, Result<(), LogError>> {
        Box::pin(async move { self.update(&record.completion_id, |e| e.push_tool_call(record)) })
    }

    fn finalize_completion<'a>(
        &'a self,
        completion_id: &'a str,
        final_response: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<(), LogError>> {
        Box::pin(async move { self.update(completion_id, |e| e.finalize(final_response)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_types::TokenCounts;
    use serde_json::json;

    fn record(id: &str) -> CompletionRecord {
        CompletionRecord {
            completion_id: id.to_string(),
            model: "m".to_string(),
            request: json!({"messages": [{"role": "user", "content": id}]}),
            response: json!({}),
            tokens: TokenCounts::default(),
        }
    }

    fn tool(completion_id: &str, id: &str) -> ToolCallRecord {
        ToolCallRecord {
            id: id.to_string(),
            completion_id: completion_id.to_string(),
            tool_name: "t".to_string(),
            arguments: "{}".to_string(),
            result: json!(null),
        }
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let history = MemoryHistory::new();
        history.record_completion(&record("abc-1")).await.unwrap();
        history.record_tool_call(&tool("abc-1", "c1")).await.unwrap();
        history.record_tool_call(&tool("abc-1", "c2")).await.unwrap();
        history
            .finalize_completion("abc-1", &json!({"content": "bye"}))
            .await
            .unwrap();

        let entry = history.get("abc-1").unwrap();
        assert_eq!(entry.tool_calls.len(), 2);
        assert_eq!(entry.tool_calls[0].id, "c1");
        assert_eq!(entry.final_response, Some(json!({"content": "bye"})));
    }

    #[tokio::test]
    async fn tool_call_for_unknown_completion_fails() {
        let history = MemoryHistory::new();
        let result = history.record_tool_call(&tool("ghost", "c1")).await;
        assert!(matches!(result, Err(LogError::NotFound { .. })));
    }

    #[tokio::test]
    async fn get_by_prefix() {
        let history = MemoryHistory::new();
        history.record_completion(&record("aaaa-1")).await.unwrap();
        history.record_completion(&record("aaaa-2")).await.unwrap();
        history.record_completion(&record("bbbb-1")).await.unwrap();

        assert_eq!(history.get("bbbb").unwrap().completion_id, "bbbb-1");
        assert!(matches!(
            history.get("aaaa"),
            Err(LogError::AmbiguousPrefix { count: 2, .. })
        ));
        assert!(matches!(history.get("cccc"), Err(LogError::NotFound { .. })));
    }

    #[tokio::test]
    async fn recent_is_limited() {
        let history = MemoryHistory::new();
        for i in 0..5 {
            history
                .record_completion(&record(&format!("id-{i}")))
                .await
                .unwrap();
        }
        assert_eq!(history.recent(3).len(), 3);
        assert_eq!(history.recent(100).len(), 5);
    }
}
