//! Orchestrators for destinations that do not type and dedupe.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tracing::info;

use super::{commit_states, prepare_schemas, SyncSummaries, TyperDeduper, WorkerPool};
use crate::config::default_td_threads;
use crate::core::{ParsedCatalog, SqlGenerator};
use crate::error::Result;
use crate::migrations::{
    DestinationV1V2Migrator, Migration, MigrationRunner, NoOpV2TableMigrator, V2TableMigrator,
};
use crate::state::{DestinationHandler, DestinationState};

/// Does nothing. Every operation succeeds immediately.
#[derive(Debug, Default)]
pub struct NoOpTyperDeduper {
    lock: Arc<RwLock<()>>,
}

impl NoOpTyperDeduper {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TyperDeduper for NoOpTyperDeduper {
    async fn prepare_schemas_and_run_migrations(&self) -> Result<()> {
        Ok(())
    }

    async fn prepare_final_tables(&self) -> Result<()> {
        Ok(())
    }

    async fn type_and_dedupe_stream(&self, _: &str, _: &str, _: bool) -> Result<()> {
        Ok(())
    }

    async fn type_and_dedupe(&self, _: &SyncSummaries) -> Result<()> {
        Ok(())
    }

    async fn raw_table_insert_lock(&self, _: &str, _: &str) -> Result<OwnedRwLockReadGuard<()>> {
        // Nobody ever takes the write side.
        Ok(self.lock.clone().read_owned().await)
    }

    async fn commit_final_tables(&self, _: &SyncSummaries) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) {}
}

/// Creates schemas and runs migrations, but never types or dedupes.
///
/// Used by destinations with typing and deduping disabled that still need
/// their raw tables migrated to the current layout.
pub struct NoOpTyperDeduperWithV1V2Migrations<S: DestinationState> {
    sql_generator: Arc<dyn SqlGenerator>,
    destination_handler: Arc<dyn DestinationHandler<S>>,
    parsed_catalog: ParsedCatalog,
    runner: MigrationRunner<S>,
    pool: WorkerPool,
    lock: Arc<RwLock<()>>,
}

impl<S: DestinationState> NoOpTyperDeduperWithV1V2Migrations<S> {
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
        Self {
            sql_generator,
            destination_handler,
            parsed_catalog,
            runner,
            pool: WorkerPool::new(default_td_threads()),
            lock: Arc::new(RwLock::new(())),
        }
    }

    pub fn with_td_threads(mut self, td_threads: usize) -> Self {
        self.pool = WorkerPool::new(td_threads.max(1));
        self
    }
}

#[async_trait]
impl<S: DestinationState> TyperDeduper for NoOpTyperDeduperWithV1V2Migrations<S> {
    async fn prepare_schemas_and_run_migrations(&self) -> Result<()> {
        info!("Typing and deduping is disabled; preparing schemas and running migrations only");
        prepare_schemas(
            self.sql_generator.as_ref(),
            self.destination_handler.as_ref(),
            &self.parsed_catalog,
        )
        .await?;

        let statuses = self
            .runner
            .run(&self.pool, &self.parsed_catalog.streams)
            .await?;
        commit_states(self.destination_handler.as_ref(), &statuses, |s| s.clone()).await?;
        Ok(())
    }

    async fn prepare_final_tables(&self) -> Result<()> {
        info!("Skipping final table preparation: typing and deduping is disabled");
        Ok(())
    }

    async fn type_and_dedupe_stream(&self, _: &str, _: &str, _: bool) -> Result<()> {
        Ok(())
    }

    async fn type_and_dedupe(&self, _: &SyncSummaries) -> Result<()> {
        info!("Skipping typing and deduping: it is disabled");
        Ok(())
    }

    async fn raw_table_insert_lock(&self, _: &str, _: &str) -> Result<OwnedRwLockReadGuard<()>> {
        Ok(self.lock.clone().read_owned().await)
    }

    async fn commit_final_tables(&self, _: &SyncSummaries) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) {
        self.pool.shutdown();
    }
}
