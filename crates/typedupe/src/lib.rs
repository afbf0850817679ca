//! # typedupe
//!
//! Typing and deduping engine for ELT destinations.
//!
//! Records land in per-stream raw tables as untyped JSON. This library turns
//! them into typed, optionally deduplicated final tables:
//!
//! - **Catalog parsing** with deterministic stream and column name collision handling
//! - **Schema preparation and migrations**, including lock-step destination state migrations
//! - **Table preparation**: direct writes, soft resets, or temp tables swapped in at commit
//! - **Concurrent typing and deduping** with a fast path and a safe-casting fallback
//! - **Incremental throttling** through a per-stream back-off valve
//!
//! SQL text comes from a destination's [`SqlGenerator`]; execution and
//! state inspection from its [`DestinationHandler`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use typedupe::{
//!     CatalogParser, ConfiguredCatalog, DefaultTyperDeduper, DestinationHandler,
//!     MinimumDestinationState, NoOpDestinationV1V2Migrator, SqlGenerator, TypeDedupeConfig,
//!     TyperDeduper,
//! };
//!
//! async fn sync(
//!     generator: Arc<dyn SqlGenerator>,
//!     handler: Arc<dyn DestinationHandler<MinimumDestinationState>>,
//! ) -> typedupe::Result<()> {
//!     let config = TypeDedupeConfig::load("typedupe.yaml")?;
//!     let catalog = ConfiguredCatalog::load("catalog.json")?;
//!     let parsed = CatalogParser::new(
//!         generator.clone(),
//!         &config.destination.default_namespace,
//!         &config.destination.raw_namespace,
//!     )
//!     .parse_catalog(&catalog)?;
//!
//!     let td = DefaultTyperDeduper::new(
//!         generator,
//!         handler,
//!         parsed,
//!         Arc::new(NoOpDestinationV1V2Migrator),
//!         Vec::new(),
//!     )
//!     .with_td_threads(config.typing_deduping.get_td_threads());
//!
//!     td.prepare_schemas_and_run_migrations().await?;
//!     td.prepare_final_tables().await?;
//!     // ... write raw records ...
//!     let summaries = HashMap::new();
//!     td.type_and_dedupe(&summaries).await?;
//!     td.commit_final_tables(&summaries).await?;
//!     td.cleanup().await;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod core;
pub mod error;
pub mod migrations;
pub mod orchestrator;
pub mod state;
pub mod valve;

// Re-exports for convenient access
pub use catalog::{CatalogParser, ConfiguredCatalog, ConfiguredStream, DestinationSyncMode};
pub use config::{DestinationConfig, TypeDedupeConfig, TypingDedupingConfig};
pub use crate::core::{
    AirbyteProtocolType, AirbyteType, ColumnId, ImportType, ParsedCatalog, Sql, SqlGenerator,
    StreamConfig, StreamDescriptor, StreamId, StreamStatus, StreamSyncSummary,
};
pub use error::{Result, TypeDedupeError};
pub use migrations::{
    BaseDestinationV1V2Migrator, DestinationV1V2Migrator, Migration, MigrationResult,
    NoOpDestinationV1V2Migrator, NoOpV2TableMigrator, V2TableMigrator,
};
pub use orchestrator::{
    DefaultTyperDeduper, NoOpTyperDeduper, NoOpTyperDeduperWithV1V2Migrations, SyncSummaries,
    TyperDeduper,
};
pub use state::{
    DestinationHandler, DestinationInitialStatus, DestinationState, InitialRawTableStatus,
    MinimumDestinationState,
};
pub use valve::TypeAndDedupeOperationValve;
