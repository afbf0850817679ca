//! Core value types and the SQL generation strategy.
//!
//! - [`types`]: column type model parsed from JSON schemas
//! - [`identifier`]: stream and column identifiers, quoting
//! - [`sql`]: transaction-grouped SQL batches
//! - [`stream`]: per-sync stream configuration and sync summaries
//! - [`traits`]: the [`SqlGenerator`] strategy
//!
//! Nothing here performs I/O. Destinations implement [`SqlGenerator`] and the
//! orchestrator consumes the values these modules define.

pub mod identifier;
pub mod sql;
pub mod stream;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use identifier::{quote_ident, truncate_identifier, validate_identifier, ColumnId, StreamId};
pub use sql::Sql;
pub use stream::{
    ImportType, ParsedCatalog, StreamConfig, StreamDescriptor, StreamStatus, StreamSyncSummary,
};
pub use traits::{SqlGenerator, NO_SUFFIX, SOFT_RESET_SUFFIX, TMP_OVERWRITE_TABLE_SUFFIX};
pub use types::{AirbyteProtocolType, AirbyteType, Struct, Union};
