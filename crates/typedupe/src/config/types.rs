//! Configuration type definitions.

use serde::{Deserialize, Serialize};

use crate::core::identifier::DEFAULT_MAX_IDENTIFIER_LENGTH;
use crate::valve::DEFAULT_INTERVALS_MS;

/// Environment variable consulted when `td_threads` is not configured.
pub const TD_THREADS_ENV: &str = "TD_THREADS";

/// Worker count used when neither config nor environment sets one.
pub const DEFAULT_TD_THREADS: usize = 8;

/// Effective worker count from the environment, falling back to
/// [`DEFAULT_TD_THREADS`].
pub fn default_td_threads() -> usize {
    parse_td_threads(std::env::var(TD_THREADS_ENV).ok().as_deref())
}

/// Worker count for a raw `TD_THREADS` value. Unparseable or zero values
/// are ignored.
pub fn parse_td_threads(value: Option<&str>) -> usize {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_TD_THREADS)
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeDedupeConfig {
    /// Where raw and final tables live.
    #[serde(default)]
    pub destination: DestinationConfig,

    /// Typing and deduping behavior.
    #[serde(default)]
    pub typing_deduping: TypingDedupingConfig,
}

/// Destination naming configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Namespace holding every raw table (default: "airbyte_internal").
    #[serde(default = "default_raw_namespace")]
    pub raw_namespace: String,

    /// Namespace for streams that do not declare one (default: "public").
    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    /// Longest identifier the destination accepts (default: 128).
    #[serde(default = "default_max_identifier_length")]
    pub max_identifier_length: usize,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            raw_namespace: default_raw_namespace(),
            default_namespace: default_namespace(),
            max_identifier_length: default_max_identifier_length(),
        }
    }
}

/// Typing and deduping configuration.
/// Optional fields distinguish "not set" from an explicit value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypingDedupingConfig {
    /// Concurrent per-stream tasks. Falls back to `TD_THREADS`, then 8.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub td_threads: Option<usize>,

    /// Only create schemas and run migrations (default: false).
    #[serde(default)]
    pub disable_type_dedupe: bool,

    /// Type and dedupe during the sync, throttled by the valve (default: false).
    #[serde(default)]
    pub incremental_typing_deduping: bool,

    /// Valve back-off intervals in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valve_intervals_ms: Option<Vec<i64>>,
}

impl TypingDedupingConfig {
    pub fn get_td_threads(&self) -> usize {
        self.td_threads.unwrap_or_else(default_td_threads)
    }

    pub fn get_valve_intervals_ms(&self) -> Vec<i64> {
        self.valve_intervals_ms
            .clone()
            .unwrap_or_else(|| DEFAULT_INTERVALS_MS.to_vec())
    }
}

// Default value functions for serde
fn default_raw_namespace() -> String {
    "airbyte_internal".to_string()
}

fn default_namespace() -> String {
    "public".to_string()
}

fn default_max_identifier_length() -> usize {
    DEFAULT_MAX_IDENTIFIER_LENGTH
}
