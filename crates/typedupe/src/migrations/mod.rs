//! Destination migrations run before normal typing and deduping.
//!
//! Two kinds exist:
//!
//! - Legacy table migrations ([`DestinationV1V2Migrator`], [`V2TableMigrator`])
//!   that move tables written by older destination versions into place.
//! - Raw-table [`Migration`]s that inspect a stream's initial status and
//!   rewrite its [`DestinationState`]. The orchestrator runs them in order,
//!   each one across all streams before the next starts.
//!
//! Every migration must be idempotent: a sync interrupted halfway runs the
//! same migrations again next time.

pub mod v1v2;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::core::{SqlGenerator, StreamConfig, StreamId};
use crate::error::{Result, TypeDedupeError};
use crate::orchestrator::stream_label;
use crate::orchestrator::tasks::{log_all_and_return_first, WorkerPool};
use crate::state::{DestinationHandler, DestinationInitialStatus, DestinationState};

pub use v1v2::{
    BaseDestinationV1V2Migrator, DestinationV1V2Migrator, NamespacedTableName,
    NoOpDestinationV1V2Migrator, NoOpV2TableMigrator, V1RawTableInspector, V2TableMigrator,
};

/// Outcome of one migration on one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationResult<S> {
    pub updated_destination_state: S,
    /// The migration changed the destination enough that the initial status
    /// must be gathered again.
    pub invalidate_initial_state: bool,
}

impl<S> MigrationResult<S> {
    pub fn new(updated_destination_state: S, invalidate_initial_state: bool) -> Self {
        Self {
            updated_destination_state,
            invalidate_initial_state,
        }
    }
}

/// A raw-table migration.
#[async_trait]
pub trait Migration<S: DestinationState>: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Migrate `stream` if its current status requires it.
    ///
    /// Returns the state to persist. A migration with nothing to do returns
    /// the current state unchanged and `invalidate_initial_state = false`.
    async fn migrate_if_necessary(
        &self,
        destination_handler: &dyn DestinationHandler<S>,
        stream: &StreamConfig,
        state: &DestinationInitialStatus<S>,
    ) -> Result<MigrationResult<S>>;
}

/// Runs every migration a destination declares, in order.
pub struct MigrationRunner<S: DestinationState> {
    pub sql_generator: Arc<dyn SqlGenerator>,
    pub destination_handler: Arc<dyn DestinationHandler<S>>,
    pub v1v2_migrator: Arc<dyn DestinationV1V2Migrator<S>>,
    pub v2_table_migrator: Arc<dyn V2TableMigrator>,
    pub migrations: Vec<Arc<dyn Migration<S>>>,
}

impl<S: DestinationState> Clone for MigrationRunner<S> {
    fn clone(&self) -> Self {
        Self {
            sql_generator: self.sql_generator.clone(),
            destination_handler: self.destination_handler.clone(),
            v1v2_migrator: self.v1v2_migrator.clone(),
            v2_table_migrator: self.v2_table_migrator.clone(),
            migrations: self.migrations.clone(),
        }
    }
}

/// Wrap a migration failure, leaving already-wrapped errors alone.
fn not_migrated(migration: &str, stream: &StreamId, error: TypeDedupeError) -> TypeDedupeError {
    match error {
        TypeDedupeError::TableNotMigrated(_) => error,
        other => TypeDedupeError::TableNotMigrated(format!(
            "{} failed for stream {}: {}",
            migration,
            stream_label(stream),
            other
        )),
    }
}

impl<S: DestinationState> MigrationRunner<S> {
    /// Run legacy table migrations, gather initial state, then run the raw
    /// table migrations in lock-step.
    ///
    /// Returns one status per stream carrying the migrated destination state.
    pub async fn run(
        &self,
        pool: &WorkerPool,
        streams: &[StreamConfig],
    ) -> Result<Vec<DestinationInitialStatus<S>>> {
        self.run_legacy_table_migrations(pool, streams).await?;
        let initial_statuses = self.destination_handler.gather_initial_state(streams).await?;
        self.run_in_lockstep(pool, initial_statuses).await
    }

    /// V1 to V2 then V2 table migration, all streams in parallel.
    pub async fn run_legacy_table_migrations(
        &self,
        pool: &WorkerPool,
        streams: &[StreamConfig],
    ) -> Result<()> {
        let jobs: Vec<_> = streams
            .iter()
            .map(|stream| {
                let sql_generator = self.sql_generator.clone();
                let handler = self.destination_handler.clone();
                let v1v2_migrator = self.v1v2_migrator.clone();
                let v2_table_migrator = self.v2_table_migrator.clone();
                let stream = stream.clone();
                let label = stream_label(&stream.id);
                let work = async move {
                    v1v2_migrator
                        .migrate_if_necessary(sql_generator.as_ref(), handler.as_ref(), &stream)
                        .await?;
                    v2_table_migrator
                        .migrate_if_necessary(&stream)
                        .await
                        .map_err(|e| not_migrated("V2 table migration", &stream.id, e))
                };
                (label, work)
            })
            .collect();

        log_all_and_return_first(
            "The following errors were thrown attempting to run migrations:",
            pool.run_all(jobs).await,
        )?;
        Ok(())
    }

    /// Run each migration on every stream before starting the next one.
    ///
    /// Streams whose migration invalidated their initial status are
    /// re-gathered together in one call.
    pub async fn run_in_lockstep(
        &self,
        pool: &WorkerPool,
        mut current: Vec<DestinationInitialStatus<S>>,
    ) -> Result<Vec<DestinationInitialStatus<S>>> {
        for migration in &self.migrations {
            info!("Running migration {}", migration.name());

            let jobs: Vec<_> = current
                .iter()
                .map(|status| {
                    let migration = migration.clone();
                    let handler = self.destination_handler.clone();
                    let status = status.clone();
                    let label = stream_label(&status.stream_config.id);
                    let work = async move {
                        let result = migration
                            .migrate_if_necessary(handler.as_ref(), &status.stream_config, &status)
                            .await
                            .map_err(|e| {
                                not_migrated(migration.name(), &status.stream_config.id, e)
                            })?;
                        Ok::<_, TypeDedupeError>((status.stream_config.id.clone(), result))
                    };
                    (label, work)
                })
                .collect();

            let results = log_all_and_return_first(
                "The following errors were thrown attempting to run migrations:",
                pool.run_all(jobs).await,
            )?;
            let mut results_by_stream: HashMap<StreamId, MigrationResult<S>> =
                results.into_iter().map(|(_, result)| result).collect();

            let invalidated: Vec<StreamConfig> = current
                .iter()
                .filter(|status| {
                    results_by_stream
                        .get(&status.stream_config.id)
                        .map(|r| r.invalidate_initial_state)
                        .unwrap_or(false)
                })
                .map(|status| status.stream_config.clone())
                .collect();

            let mut refetched: HashMap<StreamId, DestinationInitialStatus<S>> = HashMap::new();
            if !invalidated.is_empty() {
                let names: Vec<String> = invalidated.iter().map(|s| stream_label(&s.id)).collect();
                info!("Refetching initial state for streams: {}", names.join(", "));
                for status in self.destination_handler.gather_initial_state(&invalidated).await? {
                    refetched.insert(status.stream_config.id.clone(), status);
                }
            }

            current = current
                .into_iter()
                .map(|status| {
                    let id = status.stream_config.id.clone();
                    let result = results_by_stream.remove(&id).ok_or_else(|| {
                        TypeDedupeError::IllegalState(format!(
                            "Migration {} returned no result for stream {}",
                            migration.name(),
                            id
                        ))
                    })?;
                    let mut next = if result.invalidate_initial_state {
                        refetched.remove(&id).ok_or_else(|| {
                            TypeDedupeError::IllegalState(format!(
                                "Refetched initial state is missing stream {}",
                                id
                            ))
                        })?
                    } else {
                        status
                    };
                    next.destination_state = result.updated_destination_state;
                    Ok(next)
                })
                .collect::<Result<Vec<_>>>()?;
        }

        Ok(current)
    }
}
