//! Typing and deduping orchestrator.
//!
//! A sync drives a [`TyperDeduper`] through five phases, in order:
//!
//! 1. [`prepare_schemas_and_run_migrations`](TyperDeduper::prepare_schemas_and_run_migrations)
//! 2. [`prepare_final_tables`](TyperDeduper::prepare_final_tables)
//! 3. [`type_and_dedupe_stream`](TyperDeduper::type_and_dedupe_stream), any number of
//!    times while raw records arrive, then
//!    [`type_and_dedupe`](TyperDeduper::type_and_dedupe) once at the end
//! 4. [`commit_final_tables`](TyperDeduper::commit_final_tables)
//! 5. [`cleanup`](TyperDeduper::cleanup), on success and failure alike
//!
//! Each phase fans out one task per stream on a bounded [`WorkerPool`] and
//! waits for all of them. Per-stream failures are logged and the first one is
//! returned once every stream has finished. A stream whose tables could not be
//! set up is skipped for the rest of the sync; other streams carry on.

pub mod noop;
pub mod tasks;
pub mod transaction;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::default_td_threads;
use crate::core::{
    ParsedCatalog, Sql, SqlGenerator, StreamConfig, StreamDescriptor, StreamId, StreamStatus,
    StreamSyncSummary, NO_SUFFIX, TMP_OVERWRITE_TABLE_SUFFIX,
};
use crate::error::{Result, TypeDedupeError};
use crate::migrations::{
    DestinationV1V2Migrator, Migration, MigrationRunner, NoOpV2TableMigrator, V2TableMigrator,
};
use crate::state::{DestinationHandler, DestinationInitialStatus, DestinationState, InitialRawTableStatus};

pub use noop::{NoOpTyperDeduper, NoOpTyperDeduperWithV1V2Migrations};
pub use tasks::WorkerPool;

use tasks::log_all_and_return_first;

/// Sync summaries keyed by stream.
pub type SyncSummaries = HashMap<StreamDescriptor, StreamSyncSummary>;

/// The lifecycle every destination drives during a sync.
#[async_trait]
pub trait TyperDeduper: Send + Sync {
    /// Create schemas, run migrations and commit the migrated states.
    ///
    /// Must run before [`prepare_final_tables`](Self::prepare_final_tables).
    async fn prepare_schemas_and_run_migrations(&self) -> Result<()>;

    /// Create, soft-reset or redirect each stream's final table.
    ///
    /// May only be called once.
    async fn prepare_final_tables(&self) -> Result<()>;

    /// Type and dedupe one stream.
    ///
    /// With `must_run = false` the call returns immediately if another type
    /// and dedupe of the same stream is in flight. With `true` it waits.
    async fn type_and_dedupe_stream(&self, namespace: &str, name: &str, must_run: bool)
        -> Result<()>;

    /// Type and dedupe every stream that has something to process.
    async fn type_and_dedupe(&self, summaries: &SyncSummaries) -> Result<()>;

    /// Shared lock held by raw table writers.
    ///
    /// Type and dedupe takes the exclusive side, so it never runs while a
    /// guard returned here is alive.
    async fn raw_table_insert_lock(&self, namespace: &str, name: &str)
        -> Result<OwnedRwLockReadGuard<()>>;

    /// Swap temp final tables into place for streams that finished.
    async fn commit_final_tables(&self, summaries: &SyncSummaries) -> Result<()>;

    /// Shut down the worker pool. Never fails.
    async fn cleanup(&self);
}

/// Create every raw and final namespace in one batch.
pub(crate) async fn prepare_schemas<S: DestinationState>(
    sql_generator: &dyn SqlGenerator,
    destination_handler: &dyn DestinationHandler<S>,
    catalog: &ParsedCatalog,
) -> Result<()> {
    let mut schemas: Vec<&str> = Vec::new();
    let raw = catalog.streams.iter().map(|s| s.id.raw_namespace.as_str());
    let fin = catalog.streams.iter().map(|s| s.id.final_namespace.as_str());
    for schema in raw.chain(fin) {
        if !schemas.contains(&schema) {
            schemas.push(schema);
        }
    }

    debug!("Creating schemas: {}", schemas.join(", "));
    let sql = Sql::concat(schemas.into_iter().map(|s| sql_generator.create_schema(s)));
    destination_handler.execute(&sql).await
}

/// Persist each status's destination state.
pub(crate) async fn commit_states<S: DestinationState>(
    destination_handler: &dyn DestinationHandler<S>,
    statuses: &[DestinationInitialStatus<S>],
    transform: impl Fn(&S) -> S,
) -> Result<()> {
    let states: HashMap<StreamId, S> = statuses
        .iter()
        .map(|s| (s.stream_config.id.clone(), transform(&s.destination_state)))
        .collect();
    destination_handler.commit_destination_states(&states).await
}

pub(crate) fn stream_label(id: &StreamId) -> String {
    format!("{}.{}", id.original_namespace, id.original_name)
}

/// State shared between the orchestrator and its tasks.
struct Inner<S: DestinationState> {
    sql_generator: Arc<dyn SqlGenerator>,
    destination_handler: Arc<dyn DestinationHandler<S>>,
    parsed_catalog: ParsedCatalog,
    runner: MigrationRunner<S>,

    /// Statuses after migrations; `None` until schemas are prepared.
    initial_statuses: Mutex<Option<Vec<DestinationInitialStatus<S>>>>,
    /// Streams writing into a temp final table; `None` until tables are prepared.
    overwrite_streams_with_tmp_table: Mutex<Option<HashSet<StreamId>>>,
    streams_with_successful_setup: Mutex<HashSet<(String, String)>>,
    initial_raw_table_status: Mutex<HashMap<StreamId, InitialRawTableStatus>>,
    streams_with_failed_type_and_dedupe: Mutex<HashSet<StreamId>>,

    /// Serializes type and dedupe per stream.
    internal_td_locks: Mutex<HashMap<StreamId, Arc<Mutex<()>>>>,
    /// Readers are raw table writers; the writer is type and dedupe.
    external_td_locks: Mutex<HashMap<StreamId, Arc<RwLock<()>>>>,
}

impl<S: DestinationState> Inner<S> {
    async fn setup_succeeded(&self, id: &StreamId) -> bool {
        self.streams_with_successful_setup
            .lock()
            .await
            .contains(&id.as_pair())
    }

    async fn final_table_suffix(&self, id: &StreamId) -> &'static str {
        match self.overwrite_streams_with_tmp_table.lock().await.as_ref() {
            Some(tmp) if tmp.contains(id) => TMP_OVERWRITE_TABLE_SUFFIX,
            _ => NO_SUFFIX,
        }
    }

    async fn internal_lock(&self, id: &StreamId) -> Arc<Mutex<()>> {
        self.internal_td_locks
            .lock()
            .await
            .entry(id.clone())
            .or_default()
            .clone()
    }

    async fn external_lock(&self, id: &StreamId) -> Arc<RwLock<()>> {
        self.external_td_locks
            .lock()
            .await
            .entry(id.clone())
            .or_default()
            .clone()
    }

    /// Prepare one stream's final table.
    async fn prepare_table(&self, status: DestinationInitialStatus<S>) -> Result<()> {
        let stream = &status.stream_config;
        let id = &stream.id;
        let label = stream_label(id);

        if status.is_final_table_present {
            info!("Final Table exists for stream {}", label);
            if stream.is_truncate_sync() {
                let generation_mismatch =
                    status.final_table_generation_id != Some(stream.generation_id);
                if status.is_schema_mismatch || (!status.is_final_table_empty && generation_mismatch)
                {
                    {
                        let mut tmp = self.overwrite_streams_with_tmp_table.lock().await;
                        if let Some(tmp) = tmp.as_mut() {
                            tmp.insert(id.clone());
                        }
                    }
                    if status.final_temp_table_generation_id == Some(stream.generation_id) {
                        info!(
                            "Temp final table for stream {} already holds generation {}, reusing it",
                            label, stream.generation_id
                        );
                    } else {
                        // Replace any tmp table left over from an older generation.
                        self.destination_handler
                            .execute(&self.sql_generator.create_table(
                                stream,
                                TMP_OVERWRITE_TABLE_SUFFIX,
                                true,
                            ))
                            .await?;
                    }
                    info!(
                        "Using temp final table for stream {}, will overwrite existing table at end of sync",
                        label
                    );
                } else {
                    info!(
                        "Final Table for stream {} matches the expected schema and generation, writing to table directly",
                        label
                    );
                }
            } else if status.is_schema_mismatch || status.destination_state.needs_soft_reset() {
                transaction::execute_soft_reset(
                    self.sql_generator.as_ref(),
                    self.destination_handler.as_ref(),
                    stream,
                )
                .await?;
            }
        } else {
            info!("Final Table does not exist for stream {}, creating.", label);
            // Not forced: if someone else created it meanwhile, fail loudly.
            self.destination_handler
                .execute(&self.sql_generator.create_table(stream, NO_SUFFIX, false))
                .await?;
        }

        self.initial_raw_table_status
            .lock()
            .await
            .insert(id.clone(), status.merged_raw_table_status());
        self.streams_with_successful_setup
            .lock()
            .await
            .insert(id.as_pair());
        self.internal_lock(id).await;
        self.external_lock(id).await;
        Ok(())
    }

    /// Type and dedupe one stream under its locks.
    async fn type_and_dedupe_task(&self, stream: StreamConfig, must_run: bool) -> Result<()> {
        let id = &stream.id;
        let label = stream_label(id);

        if !self.setup_succeeded(id).await {
            warn!(
                "Skipping typing and deduping for {} because we could not set up the tables for this stream.",
                label
            );
            return Ok(());
        }

        let internal_lock = self.internal_lock(id).await;
        let _internal_guard = if must_run {
            internal_lock.lock_owned().await
        } else {
            match internal_lock.try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    info!(
                        "Another task is already typing and deduping {}. Skipping it here.",
                        label
                    );
                    return Ok(());
                }
            }
        };

        let external_lock = self.external_lock(id).await;
        let external_guard = external_lock.write_owned().await;

        let raw_status = self
            .initial_raw_table_status
            .lock()
            .await
            .get(id)
            .copied()
            .unwrap_or_default();
        let suffix = self.final_table_suffix(id).await;

        let result = transaction::execute_type_and_dedupe(
            self.sql_generator.as_ref(),
            self.destination_handler.as_ref(),
            &stream,
            raw_status.max_processed_timestamp,
            suffix,
        )
        .await;

        drop(external_guard);
        info!("Allowing other tasks to proceed for {}", label);

        let mut failed = self.streams_with_failed_type_and_dedupe.lock().await;
        match &result {
            Ok(()) => {
                failed.remove(id);
            }
            Err(e) => {
                error!("Error occurred while typing and deduping stream {}: {}", label, e);
                failed.insert(id.clone());
            }
        }
        result
    }

    async fn commit_final_table(&self, id: StreamId, suffix: &'static str) -> Result<()> {
        let label = stream_label(&id);
        info!("Overwriting final table with tmp table for stream {}", label);
        let sql = self.sql_generator.overwrite_final_table(&id, suffix);
        self.destination_handler.execute(&sql).await.map_err(|e| {
            error!("Error occurred while committing final table for stream {}: {}", label, e);
            e
        })
    }
}

/// The production [`TyperDeduper`].
pub struct DefaultTyperDeduper<S: DestinationState> {
    inner: Arc<Inner<S>>,
    pool: WorkerPool,
}

impl<S: DestinationState> DefaultTyperDeduper<S> {
    /// Build an orchestrator with a no-op V2 table migrator and the default
    /// worker count.
    pub fn new(
        sql_generator: Arc<dyn SqlGenerator>,
        destination_handler: Arc<dyn DestinationHandler<S>>,
        parsed_catalog: ParsedCatalog,
        v1v2_migrator: Arc<dyn DestinationV1V2Migrator<S>>,
        migrations: Vec<Arc<dyn Migration<S>>>,
    ) -> Self {
        Self::with_v2_table_migrator(
            sql_generator,
            destination_handler,
            parsed_catalog,
            v1v2_migrator,
            Arc::new(NoOpV2TableMigrator),
            migrations,
        )
    }

    pub fn with_v2_table_migrator(
        sql_generator: Arc<dyn SqlGenerator>,
        destination_handler: Arc<dyn DestinationHandler<S>>,
        parsed_catalog: ParsedCatalog,
        v1v2_migrator: Arc<dyn DestinationV1V2Migrator<S>>,
        v2_table_migrator: Arc<dyn V2TableMigrator>,
        migrations: Vec<Arc<dyn Migration<S>>>,
    ) -> Self {
        let runner = MigrationRunner {
            sql_generator: sql_generator.clone(),
            destination_handler: destination_handler.clone(),
            v1v2_migrator,
            v2_table_migrator,
            migrations,
        };
        let inner = Inner {
            sql_generator,
            destination_handler,
            parsed_catalog,
            runner,
            initial_statuses: Mutex::new(None),
            overwrite_streams_with_tmp_table: Mutex::new(None),
            streams_with_successful_setup: Mutex::new(HashSet::new()),
            initial_raw_table_status: Mutex::new(HashMap::new()),
            streams_with_failed_type_and_dedupe: Mutex::new(HashSet::new()),
            internal_td_locks: Mutex::new(HashMap::new()),
            external_td_locks: Mutex::new(HashMap::new()),
        };
        Self {
            inner: Arc::new(inner),
            pool: WorkerPool::new(default_td_threads()),
        }
    }

    /// Override the number of concurrent per-stream tasks.
    pub fn with_td_threads(mut self, td_threads: usize) -> Self {
        self.pool = WorkerPool::new(td_threads.max(1));
        self
    }

    pub fn parsed_catalog(&self) -> &ParsedCatalog {
        &self.inner.parsed_catalog
    }

    /// Spawn a type and dedupe task per stream and wait for them.
    async fn run_type_and_dedupe_tasks(
        &self,
        streams: Vec<StreamConfig>,
        must_run: bool,
    ) -> Vec<(String, Result<()>)> {
        let jobs: Vec<_> = streams
            .into_iter()
            .map(|stream| {
                let inner = self.inner.clone();
                let label = stream_label(&stream.id);
                (label, async move { inner.type_and_dedupe_task(stream, must_run).await })
            })
            .collect();
        self.pool.run_all(jobs).await
    }
}

#[async_trait]
impl<S: DestinationState> TyperDeduper for DefaultTyperDeduper<S> {
    async fn prepare_schemas_and_run_migrations(&self) -> Result<()> {
        let inner = &self.inner;

        info!("Phase 1: Preparing schemas and running migrations");
        prepare_schemas(
            inner.sql_generator.as_ref(),
            inner.destination_handler.as_ref(),
            &inner.parsed_catalog,
        )
        .await?;

        let statuses = inner
            .runner
            .run(&self.pool, &inner.parsed_catalog.streams)
            .await?;

        // Committed now so an interrupted sync still remembers a pending soft reset.
        commit_states(inner.destination_handler.as_ref(), &statuses, |s| s.clone()).await?;
        *inner.initial_statuses.lock().await = Some(statuses);
        Ok(())
    }

    async fn prepare_final_tables(&self) -> Result<()> {
        let inner = &self.inner;

        let statuses = inner.initial_statuses.lock().await.clone().ok_or_else(|| {
            TypeDedupeError::IllegalState(
                "Schemas must be prepared and migrations run before preparing tables.".to_string(),
            )
        })?;

        {
            let mut tmp = inner.overwrite_streams_with_tmp_table.lock().await;
            if tmp.is_some() {
                return Err(TypeDedupeError::IllegalState(
                    "Tables were already prepared.".to_string(),
                ));
            }
            *tmp = Some(HashSet::new());
        }

        info!("Phase 2: Preparing tables");
        let jobs: Vec<_> = statuses
            .iter()
            .cloned()
            .map(|status| {
                let inner = inner.clone();
                let label = stream_label(&status.stream_config.id);
                (label, async move { inner.prepare_table(status).await })
            })
            .collect();

        log_all_and_return_first(
            "The following errors were thrown attempting to prepare tables:",
            self.pool.run_all(jobs).await,
        )?;

        commit_states(inner.destination_handler.as_ref(), &statuses, |s| {
            s.with_soft_reset(false)
        })
        .await
    }

    async fn type_and_dedupe_stream(
        &self,
        namespace: &str,
        name: &str,
        must_run: bool,
    ) -> Result<()> {
        let stream = self.inner.parsed_catalog.get_stream(namespace, name)?.clone();
        let results = self.run_type_and_dedupe_tasks(vec![stream], must_run).await;
        log_all_and_return_first(
            &format!(
                "The following errors were thrown while typing and deduping {}.{}:",
                namespace, name
            ),
            results,
        )?;
        Ok(())
    }

    async fn type_and_dedupe(&self, summaries: &SyncSummaries) -> Result<()> {
        let inner = &self.inner;
        info!("Phase 3: Typing and deduping all tables");

        let mut to_run = Vec::new();
        for stream in &inner.parsed_catalog.streams {
            let label = stream_label(&stream.id);
            if !inner.setup_succeeded(&stream.id).await {
                continue;
            }

            let summary = summaries
                .get(&stream.id.as_stream_descriptor())
                .copied()
                .unwrap_or_default();
            let nonzero_records = summary.records_written.map(|n| n > 0).unwrap_or(true);
            let unprocessed_records_preexist = inner
                .initial_raw_table_status
                .lock()
                .await
                .get(&stream.id)
                .map(|s| s.has_unprocessed_records)
                .unwrap_or(false);
            let complete = summary.terminal_status == StreamStatus::Complete;

            if nonzero_records || unprocessed_records_preexist || complete {
                to_run.push(stream.clone());
            } else {
                info!(
                    "Skipping typing and deduping for stream {} because it had no records during this sync, no unprocessed records from a previous sync, and did not complete.",
                    label
                );
            }
        }

        let results = self.run_type_and_dedupe_tasks(to_run, true).await;
        log_all_and_return_first(
            "The following errors were thrown while typing and deduping tables:",
            results,
        )?;
        Ok(())
    }

    async fn raw_table_insert_lock(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<OwnedRwLockReadGuard<()>> {
        let stream = self.inner.parsed_catalog.get_stream(namespace, name)?;
        Ok(self.inner.external_lock(&stream.id).await.read_owned().await)
    }

    async fn commit_final_tables(&self, summaries: &SyncSummaries) -> Result<()> {
        let inner = &self.inner;
        info!("Phase 4: Committing final tables");

        let mut jobs = Vec::new();
        for stream in &inner.parsed_catalog.streams {
            let id = &stream.id;
            let label = stream_label(id);

            if !inner.setup_succeeded(id).await {
                warn!(
                    "Skipping committing final table for {} because we could not set up the tables for this stream.",
                    label
                );
                continue;
            }
            if stream.minimum_generation_id != stream.generation_id {
                continue;
            }
            if inner
                .streams_with_failed_type_and_dedupe
                .lock()
                .await
                .contains(id)
            {
                warn!(
                    "Skipping committing final table for {} because typing and deduping failed.",
                    label
                );
                continue;
            }
            let summary = summaries
                .get(&id.as_stream_descriptor())
                .copied()
                .unwrap_or_default();
            if summary.terminal_status != StreamStatus::Complete {
                info!(
                    "Skipping committing final table for {} because the stream did not complete.",
                    label
                );
                continue;
            }

            let suffix = inner.final_table_suffix(id).await;
            if suffix.is_empty() {
                continue;
            }

            let inner = inner.clone();
            let id = id.clone();
            jobs.push((label, async move { inner.commit_final_table(id, suffix).await }));
        }

        log_all_and_return_first(
            "The following errors were thrown while committing final tables:",
            self.pool.run_all(jobs).await,
        )?;
        Ok(())
    }

    async fn cleanup(&self) {
        info!("Phase 5: Cleaning up typing and deduping worker pool");
        self.pool.shutdown();
    }
}
