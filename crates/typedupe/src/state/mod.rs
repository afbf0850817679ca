//! Destination state gathered at the start of a sync.
//!
//! The orchestrator reads one [`DestinationInitialStatus`] per stream through
//! a [`DestinationHandler`], lets migrations rewrite the opaque per-stream
//! [`DestinationState`], and writes the states back in one batch.

pub mod handler;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::StreamConfig;

pub use handler::DestinationHandler;

/// Destination-specific state persisted between syncs.
///
/// The engine only needs to know whether a soft reset is pending. Everything
/// else is opaque and round-trips through the handler.
pub trait DestinationState: Clone + std::fmt::Debug + Send + Sync + 'static {
    fn needs_soft_reset(&self) -> bool;

    /// Copy of this state with the soft-reset flag replaced.
    fn with_soft_reset(&self, needs_soft_reset: bool) -> Self;
}

/// State for destinations that track nothing beyond the soft-reset flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MinimumDestinationState {
    pub needs_soft_reset: bool,
}

impl DestinationState for MinimumDestinationState {
    fn needs_soft_reset(&self) -> bool {
        self.needs_soft_reset
    }

    fn with_soft_reset(&self, needs_soft_reset: bool) -> Self {
        Self { needs_soft_reset }
    }
}

/// Processing status of a raw table when the sync started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InitialRawTableStatus {
    pub raw_table_exists: bool,
    pub has_unprocessed_records: bool,
    /// Extraction time of the newest record already typed and deduped.
    pub max_processed_timestamp: Option<DateTime<Utc>>,
}

impl InitialRawTableStatus {
    pub fn new(
        raw_table_exists: bool,
        has_unprocessed_records: bool,
        max_processed_timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            raw_table_exists,
            has_unprocessed_records,
            max_processed_timestamp,
        }
    }

    /// Combine the statuses of a raw table and its temp raw table.
    ///
    /// Takes the earlier of the two max-processed timestamps and ORs the
    /// unprocessed flags, so no record in either table is skipped.
    pub fn merge(&self, other: &InitialRawTableStatus) -> InitialRawTableStatus {
        let max_processed_timestamp = match (self.max_processed_timestamp, other.max_processed_timestamp) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        };
        InitialRawTableStatus {
            raw_table_exists: self.raw_table_exists || other.raw_table_exists,
            has_unprocessed_records: self.has_unprocessed_records || other.has_unprocessed_records,
            max_processed_timestamp,
        }
    }
}

/// Everything known about one stream's destination tables at sync start.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationInitialStatus<S> {
    pub stream_config: StreamConfig,
    pub is_final_table_present: bool,
    pub initial_raw_table_status: InitialRawTableStatus,
    pub initial_temp_raw_table_status: InitialRawTableStatus,
    pub is_schema_mismatch: bool,
    pub is_final_table_empty: bool,
    pub destination_state: S,
    /// Generation of the rows currently in the final table, if known.
    pub final_table_generation_id: Option<i64>,
    /// Generation of the rows in a leftover `_airbyte_tmp` final table.
    pub final_temp_table_generation_id: Option<i64>,
}

impl<S: DestinationState> DestinationInitialStatus<S> {
    /// Status with no temp raw table and unknown generations.
    pub fn new(
        stream_config: StreamConfig,
        is_final_table_present: bool,
        initial_raw_table_status: InitialRawTableStatus,
        is_schema_mismatch: bool,
        is_final_table_empty: bool,
        destination_state: S,
    ) -> Self {
        Self {
            stream_config,
            is_final_table_present,
            initial_raw_table_status,
            initial_temp_raw_table_status: InitialRawTableStatus::default(),
            is_schema_mismatch,
            is_final_table_empty,
            destination_state,
            final_table_generation_id: None,
            final_temp_table_generation_id: None,
        }
    }

    /// Status of a stream whose tables don't exist yet.
    pub fn empty(stream_config: StreamConfig, destination_state: S) -> Self {
        Self::new(
            stream_config,
            false,
            InitialRawTableStatus::default(),
            false,
            true,
            destination_state,
        )
    }

    /// Raw and temp raw table statuses merged.
    pub fn merged_raw_table_status(&self) -> InitialRawTableStatus {
        self.initial_raw_table_status
            .merge(&self.initial_temp_raw_table_status)
    }
}
