//! SQL generation strategy implemented once per destination.
//!
//! - [`SqlGenerator`]: builds identifiers and the SQL batches the orchestrator
//!   hands to a [`DestinationHandler`](crate::state::DestinationHandler)
//!
//! # Design Pattern
//!
//! This is a **Strategy**: the orchestrator only ever talks to
//! `Arc<dyn SqlGenerator>` and never sees dialect details. Generation is pure
//! text building, so the trait is synchronous. Default methods provide the
//! **Template Method** skeletons (e.g. [`SqlGenerator::prepare_tables_for_soft_reset`]).

use chrono::{DateTime, Utc};

use crate::error::TypeDedupeError;

use super::identifier::{ColumnId, StreamId};
use super::sql::Sql;
use super::stream::StreamConfig;

/// Final table suffix for direct writes.
pub const NO_SUFFIX: &str = "";
/// Final table suffix for tables that replace the real one at commit.
pub const TMP_OVERWRITE_TABLE_SUFFIX: &str = "_airbyte_tmp";
/// Final table suffix used while rebuilding a table during a soft reset.
pub const SOFT_RESET_SUFFIX: &str = "_ab_soft_reset";

/// SQL syntax strategy for one destination.
///
/// Every `Sql`-returning method returns ordered transactions of non-empty
/// statements, never executing anything itself.
pub trait SqlGenerator: Send + Sync {
    /// Build the identifiers for a stream.
    ///
    /// `raw_namespace_override` is the namespace holding all raw tables.
    fn build_stream_id(&self, namespace: &str, name: &str, raw_namespace_override: &str)
        -> StreamId;

    /// Build a column identifier, appending `suffix` before any truncation.
    fn build_column_id_with_suffix(&self, name: &str, suffix: &str) -> ColumnId;

    fn build_column_id(&self, name: &str) -> ColumnId {
        self.build_column_id_with_suffix(name, "")
    }

    /// Create the final table.
    ///
    /// With `force` the table is dropped and recreated if it exists. Without
    /// it, creation must fail if the table already exists.
    fn create_table(&self, stream: &StreamConfig, suffix: &str, force: bool) -> Sql;

    /// Create a schema if it does not exist.
    fn create_schema(&self, schema: &str) -> Sql;

    /// Type and dedupe raw records into the final table.
    ///
    /// Only raw records extracted after `min_raw_timestamp` are considered
    /// when it is set. `use_expensive_safe_casting` selects casts that record
    /// per-value errors instead of failing the statement.
    fn update_table(
        &self,
        stream: &StreamConfig,
        final_suffix: &str,
        min_raw_timestamp: Option<DateTime<Utc>>,
        use_expensive_safe_casting: bool,
    ) -> Sql;

    /// Replace the final table with `<final table><final_suffix>`.
    fn overwrite_final_table(&self, stream: &StreamId, final_suffix: &str) -> Sql;

    /// Copy a V1 raw table into the V2 raw table for `stream_id`.
    fn migrate_from_v1_to_v2(&self, stream_id: &StreamId, namespace: &str, table_name: &str)
        -> Sql;

    /// Mark every raw record as unprocessed.
    fn clear_loaded_at(&self, stream_id: &StreamId) -> Sql;

    /// Whether a failed fast `update_table` should be retried with safe casting.
    fn should_retry(&self, _error: &TypeDedupeError) -> bool {
        true
    }

    /// Create an empty soft-reset table and mark all raw records unprocessed.
    fn prepare_tables_for_soft_reset(&self, stream: &StreamConfig) -> Sql {
        Sql::concat([
            self.create_table(stream, SOFT_RESET_SUFFIX, true),
            self.clear_loaded_at(&stream.id),
        ])
    }
}
