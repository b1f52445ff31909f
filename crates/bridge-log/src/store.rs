//! Persistent history backed by JSON files.

use crate::types::{HistoryEntry, HistorySummary};
use bridge_types::{BoxFuture, CompletionRecord, InteractionLog, LogError, ToolCallRecord};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// File-based history. Each completion is a JSON file in `dir`.
pub struct FileHistory {
    dir: PathBuf,
    /// Serializes read-modify-write cycles on entry files.
    write_lock: tokio::sync::Mutex<()>,
}

impl FileHistory {
    /// Create a new store, ensuring the history directory exists.
    pub async fn new(dir: PathBuf) -> Result<Self, LogError> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save an entry to disk (atomic write: .tmp → rename).
    pub async fn save(&self, entry: &HistoryEntry) -> Result<(), LogError> {
        let path = self.entry_path(&entry.completion_id)?;
        let tmp_path = path.with_extension("tmp");
        let json = serde_json::to_string_pretty(entry)?;
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    /// Load an entry by exact completion id.
    pub async fn load(&self, id: &str) -> Result<HistoryEntry, LogError> {
        let path = self.entry_path(id)?;
        if !path.exists() {
            return Err(LogError::NotFound { id: id.to_string() });
        }
        let data = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Load an entry by id prefix. Errors if ambiguous (multiple matches).
    pub async fn load_by_prefix(&self, prefix: &str) -> Result<HistoryEntry, LogError> {
        let prefix_lower = prefix.to_lowercase();
        let mut matches = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            let Some(stem) = name_str.strip_suffix(".json") else {
                continue;
            };
            if stem.to_lowercase().starts_with(&prefix_lower) && Uuid::parse_str(stem).is_ok() {
                matches.push(stem.to_string());
            }
        }

        match matches.as_slice() {
            [] => Err(LogError::NotFound {
                id: prefix.to_string(),
            }),
            [id] => self.load(id).await,
            _ => Err(LogError::AmbiguousPrefix {
                prefix: prefix.to_string(),
                count: matches.len(),
            }),
        }
    }

    /// Look up a completion by id or unique id prefix, tool calls ordered
    /// by timestamp.
    pub async fn get(&self, id: &str) -> Result<HistoryEntry, LogError> {
        let mut entry = match self.load(id).await {
            Ok(entry) => entry,
            Err(LogError::NotFound { .. }) => self.load_by_prefix(id).await?,
            Err(e) => return Err(e),
        };
        entry.sort_tool_calls();
        Ok(entry)
    }

    /// List all entries, newest first. Unreadable files are skipped.
    pub async fn list(&self) -> Result<Vec<HistorySummary>, LogError> {
        let mut summaries = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if !name_str.ends_with(".json") {
                continue;
            }
            match tokio::fs::read_to_string(entry.path()).await {
                Ok(data) => match serde_json::from_str::<HistoryEntry>(&data) {
                    Ok(history) => summaries.push(history.to_summary()),
                    Err(e) => tracing::warn!("Failed to parse history {}: {}", name_str, e),
                },
                Err(e) => tracing::warn!("Failed to read history {}: {}", name_str, e),
            }
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    /// The `limit` most recent completions.
    pub async fn recent(&self, limit: usize) -> Result<Vec<HistorySummary>, LogError> {
        let mut summaries = self.list().await?;
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn update(
        &self,
        completion_id: &str,
        f: impl FnOnce(&mut HistoryEntry),
    ) -> Result<(), LogError> {
        let _guard = self.write_lock.lock().await;
        let mut entry = self.load(completion_id).await?;
        f(&mut entry);
        self.save(&entry).await
    }

    /// Completion ids are UUIDs; anything else would escape the directory.
    fn entry_path(&self, id: &str) -> Result<PathBuf, LogError> {
        let id = Uuid::parse_str(id).map_err(|_| LogError::NotFound { id: id.to_string() })?;
        Ok(self.dir.join(format!("{id}.json")))
    }
}

impl InteractionLog for FileHistory {
    fn record_completion<'a>(
        &'a self,
        record: &'a CompletionRecord,
    ) -> BoxFuture<'a, Result<(), LogError>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            self.save(&HistoryEntry::from_record(record)).await
        })
    }

    fn record_tool_call<'a>(
        &'a self,
        record: &'a ToolCallRecord,
    ) -> BoxFuture<'a, Result<(), LogError>> {
        Box::pin(self.update(&record.completion_id, move |e| e.push_tool_call(record)))
    }

    fn finalize_completion<'a>(
        &'a self,
        completion_id: &'a str,
        final_response: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<(), LogError>> {
        Box::pin(self.update(completion_id, move |e| e.finalize(final_response)))
    }
}
