//! Wire model of the configured catalog a sync starts from.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ImportType;
use crate::error::Result;

/// The streams selected for a sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredCatalog {
    pub streams: Vec<ConfiguredStream>,
}

impl ConfiguredCatalog {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

/// One stream plus how this sync writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredStream {
    pub stream: AirbyteStream,

    #[serde(default)]
    pub destination_sync_mode: DestinationSyncMode,

    /// Path to the cursor field. Only top-level fields are supported.
    #[serde(default)]
    pub cursor_field: Vec<String>,

    /// One path per key column. Only top-level fields are supported.
    #[serde(default)]
    pub primary_key: Vec<Vec<String>>,

    #[serde(default)]
    pub generation_id: i64,

    #[serde(default)]
    pub minimum_generation_id: i64,

    #[serde(default)]
    pub sync_id: i64,
}

/// A source stream as declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirbyteStream {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub json_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationSyncMode {
    #[default]
    Append,
    Overwrite,
    AppendDedup,
}

impl DestinationSyncMode {
    pub fn import_type(&self) -> ImportType {
        match self {
            DestinationSyncMode::AppendDedup => ImportType::Dedupe,
            DestinationSyncMode::Append | DestinationSyncMode::Overwrite => ImportType::Append,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_defaults() {
        let catalog = ConfiguredCatalog::from_json(
            r#"{"streams": [{
                "stream": {"name": "users", "json_schema": {"type": "object"}},
                "destination_sync_mode": "append_dedup",
                "primary_key": [["id"]],
                "cursor_field": ["updated_at"],
                "sync_mode": "incremental"
            }]}"#,
        )
        .unwrap();

        let stream = &catalog.streams[0];
        assert_eq!(stream.stream.name, "users");
        assert_eq!(stream.stream.namespace, None);
        assert_eq!(stream.destination_sync_mode, DestinationSyncMode::AppendDedup);
        assert_eq!(stream.primary_key, vec![vec!["id".to_string()]]);
        assert_eq!(stream.generation_id, 0);
        assert_eq!(stream.minimum_generation_id, 0);
    }

    #[test]
    fn test_sync_mode_to_import_type() {
        assert_eq!(DestinationSyncMode::AppendDedup.import_type(), ImportType::Dedupe);
        assert_eq!(DestinationSyncMode::Overwrite.import_type(), ImportType::Append);
        assert_eq!(DestinationSyncMode::Append.import_type(), ImportType::Append);
    }

    #[test]
    fn test_unknown_sync_mode_is_an_error() {
        let err = ConfiguredCatalog::from_json(
            r#"{"streams": [{
                "stream": {"name": "users", "json_schema": {}},
                "destination_sync_mode": "mirror"
            }]}"#,
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
