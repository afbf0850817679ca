//! Per-sync stream configuration.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TypeDedupeError};

use super::identifier::{ColumnId, StreamId};
use super::types::AirbyteType;

/// What happens to records after they land in the final table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportType {
    Append,
    Dedupe,
}

impl std::fmt::Display for ImportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportType::Append => write!(f, "append"),
            ImportType::Dedupe => write!(f, "dedupe"),
        }
    }
}

/// Everything the engine needs to know about one stream for this sync.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub id: StreamId,
    pub post_import_action: ImportType,
    pub primary_key: Vec<ColumnId>,
    pub cursor: Option<ColumnId>,
    pub columns: IndexMap<ColumnId, AirbyteType>,
    pub generation_id: i64,
    /// Non-zero when this sync replaces the table's contents.
    pub minimum_generation_id: i64,
    pub sync_id: i64,
}

impl StreamConfig {
    /// Minimal config with no columns or keys, mostly useful in tests.
    pub fn new(id: StreamId, post_import_action: ImportType) -> Self {
        Self {
            id,
            post_import_action,
            primary_key: Vec::new(),
            cursor: None,
            columns: IndexMap::new(),
            generation_id: 0,
            minimum_generation_id: 0,
            sync_id: 0,
        }
    }

    pub fn with_generations(mut self, generation_id: i64, minimum_generation_id: i64) -> Self {
        self.generation_id = generation_id;
        self.minimum_generation_id = minimum_generation_id;
        self
    }

    /// True when this sync replaces the final table rather than appending to it.
    pub fn is_truncate_sync(&self) -> bool {
        self.minimum_generation_id != 0
    }
}

/// All streams of a sync, in catalog order.
#[derive(Debug, Clone, Default)]
pub struct ParsedCatalog {
    pub streams: Vec<StreamConfig>,
}

impl ParsedCatalog {
    pub fn new(streams: Vec<StreamConfig>) -> Self {
        Self { streams }
    }

    /// Look up a stream by the namespace and name the user declared.
    pub fn get_stream(&self, namespace: &str, name: &str) -> Result<&StreamConfig> {
        self.streams
            .iter()
            .find(|s| s.id.original_namespace == namespace && s.id.original_name == name)
            .ok_or_else(|| TypeDedupeError::stream_not_found(namespace, name))
    }

    pub fn get_stream_by_id(&self, id: &StreamId) -> Result<&StreamConfig> {
        self.get_stream(&id.original_namespace, &id.original_name)
    }
}

/// Identifies a stream in sync summaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl StreamDescriptor {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

/// Terminal status of a stream at the end of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    #[default]
    Complete,
    Incomplete,
}

/// What the platform reports about one stream once the sync finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamSyncSummary {
    /// Records written this sync. `None` means unknown.
    pub records_written: Option<i64>,
    pub terminal_status: StreamStatus,
}

impl StreamSyncSummary {
    pub fn new(records_written: Option<i64>, terminal_status: StreamStatus) -> Self {
        Self {
            records_written,
            terminal_status,
        }
    }

    pub fn complete(records_written: i64) -> Self {
        Self::new(Some(records_written), StreamStatus::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ns: &str, name: &str) -> StreamConfig {
        StreamConfig::new(
            StreamId::new(ns, name, "airbyte_internal", name, ns, name),
            ImportType::Append,
        )
    }

    #[test]
    fn test_get_stream_by_original_identity() {
        let catalog = ParsedCatalog::new(vec![config("a", "users"), config("b", "users")]);
        let found = catalog.get_stream("b", "users").unwrap();
        assert_eq!(found.id.final_namespace, "b");
        assert!(catalog.get_stream_by_id(&found.id).is_ok());
    }

    #[test]
    fn test_get_stream_not_found() {
        let catalog = ParsedCatalog::new(vec![config("a", "users")]);
        let err = catalog.get_stream("a", "orders").unwrap_err();
        assert!(matches!(err, TypeDedupeError::StreamNotFound { .. }));
        assert!(err.to_string().contains("a.orders"));
    }

    #[test]
    fn test_truncate_sync() {
        assert!(!config("a", "b").is_truncate_sync());
        assert!(config("a", "b").with_generations(3, 3).is_truncate_sync());
    }

    #[test]
    fn test_default_summary_is_complete_with_unknown_count() {
        let summary = StreamSyncSummary::default();
        assert_eq!(summary.records_written, None);
        assert_eq!(summary.terminal_status, StreamStatus::Complete);
    }

    #[test]
    fn test_summary_deserializes() {
        let summary: StreamSyncSummary =
            serde_json::from_str(r#"{"records_written": 5, "terminal_status": "INCOMPLETE"}"#)
                .unwrap();
        assert_eq!(
            summary,
            StreamSyncSummary::new(Some(5), StreamStatus::Incomplete)
        );
    }
}
