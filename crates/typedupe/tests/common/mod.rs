//! Shared fixtures for orchestrator tests.
//!
//! `MockSqlGenerator` renders every operation as short pseudo-SQL naming the
//! tables involved, and `RecordingHandler` records every batch it is asked to
//! execute so tests can assert on exactly what ran.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use typedupe::{
    ColumnId, DestinationHandler, DestinationInitialStatus, DestinationState, ImportType,
    InitialRawTableStatus, Migration, MigrationResult, ParsedCatalog, Sql, SqlGenerator,
    StreamConfig, StreamId, TypeDedupeError, V2TableMigrator,
};

pub struct MockSqlGenerator;

impl SqlGenerator for MockSqlGenerator {
    fn build_stream_id(&self, namespace: &str, name: &str, raw_namespace: &str) -> StreamId {
        StreamId::new(namespace, name, raw_namespace, name, namespace, name)
    }

    fn build_column_id_with_suffix(&self, name: &str, suffix: &str) -> ColumnId {
        let full = format!("{}{}", name, suffix);
        ColumnId::new(full.clone(), name, full.to_lowercase())
    }

    fn create_table(&self, stream: &StreamConfig, suffix: &str, _force: bool) -> Sql {
        Sql::of(format!("CREATE TABLE {}", stream.id.final_table_id("", suffix)))
    }

    fn create_schema(&self, schema: &str) -> Sql {
        Sql::of(format!("CREATE SCHEMA {}", schema))
    }

    fn update_table(
        &self,
        stream: &StreamConfig,
        final_suffix: &str,
        min_raw_timestamp: Option<DateTime<Utc>>,
        use_expensive_safe_casting: bool,
    ) -> Sql {
        let casting = if use_expensive_safe_casting {
            "WITH"
        } else {
            "WITHOUT"
        };
        let mut statement = format!(
            "UPDATE TABLE {} {} SAFER CASTING",
            stream.id.final_table_id("", final_suffix),
            casting
        );
        if let Some(ts) = min_raw_timestamp {
            statement.push_str(&format!(
                " WHERE extracted_at > {}",
                ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
            ));
        }
        Sql::of(statement)
    }

    fn overwrite_final_table(&self, stream: &StreamId, final_suffix: &str) -> Sql {
        Sql::of(format!(
            "OVERWRITE TABLE {} FROM {}",
            stream.final_table_id("", ""),
            stream.final_table_id("", final_suffix)
        ))
    }

    fn migrate_from_v1_to_v2(&self, stream: &StreamId, namespace: &str, table_name: &str) -> Sql {
        Sql::of(format!(
            "MIGRATE TABLE {}.{} TO {}",
            namespace,
            table_name,
            stream.raw_table_id("")
        ))
    }

    fn clear_loaded_at(&self, stream: &StreamId) -> Sql {
        Sql::of(format!("CLEAR LOADED AT {}", stream.raw_table_id("")))
    }

    fn prepare_tables_for_soft_reset(&self, stream: &StreamConfig) -> Sql {
        Sql::of(format!(
            "PREPARE {} FOR SOFT RESET",
            stream.id.final_table_id("", "")
        ))
    }
}

/// [`MockSqlGenerator`] for a destination whose failures are never retryable.
pub struct NonRetryingSqlGenerator;

impl SqlGenerator for NonRetryingSqlGenerator {
    fn build_stream_id(&self, namespace: &str, name: &str, raw_namespace: &str) -> StreamId {
        MockSqlGenerator.build_stream_id(namespace, name, raw_namespace)
    }

    fn build_column_id_with_suffix(&self, name: &str, suffix: &str) -> ColumnId {
        MockSqlGenerator.build_column_id_with_suffix(name, suffix)
    }

    fn create_table(&self, stream: &StreamConfig, suffix: &str, force: bool) -> Sql {
        MockSqlGenerator.create_table(stream, suffix, force)
    }

    fn create_schema(&self, schema: &str) -> Sql {
        MockSqlGenerator.create_schema(schema)
    }

    fn update_table(
        &self,
        stream: &StreamConfig,
        final_suffix: &str,
        min_raw_timestamp: Option<DateTime<Utc>>,
        use_expensive_safe_casting: bool,
    ) -> Sql {
        MockSqlGenerator.update_table(
            stream,
            final_suffix,
            min_raw_timestamp,
            use_expensive_safe_casting,
        )
    }

    fn overwrite_final_table(&self, stream: &StreamId, final_suffix: &str) -> Sql {
        MockSqlGenerator.overwrite_final_table(stream, final_suffix)
    }

    fn migrate_from_v1_to_v2(&self, stream: &StreamId, namespace: &str, table_name: &str) -> Sql {
        MockSqlGenerator.migrate_from_v1_to_v2(stream, namespace, table_name)
    }

    fn clear_loaded_at(&self, stream: &StreamId) -> Sql {
        MockSqlGenerator.clear_loaded_at(stream)
    }

    fn should_retry(&self, _error: &TypeDedupeError) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockState {
    pub needs_soft_reset: bool,
    pub soft_reset_migration_completed: bool,
    pub non_soft_reset_migration_completed: bool,
}

impl MockState {
    pub fn new(
        needs_soft_reset: bool,
        soft_reset_migration_completed: bool,
        non_soft_reset_migration_completed: bool,
    ) -> Self {
        Self {
            needs_soft_reset,
            soft_reset_migration_completed,
            non_soft_reset_migration_completed,
        }
    }
}

impl DestinationState for MockState {
    fn needs_soft_reset(&self) -> bool {
        self.needs_soft_reset
    }

    fn with_soft_reset(&self, needs_soft_reset: bool) -> Self {
        Self {
            needs_soft_reset,
            ..*self
        }
    }
}

/// Records every call. Statements containing a registered pattern fail.
#[derive(Default)]
pub struct RecordingHandler {
    executed: Mutex<Vec<Vec<Vec<String>>>>,
    committed: Mutex<Vec<HashMap<StreamId, MockState>>>,
    gathered: Mutex<Vec<Vec<StreamId>>>,
    statuses: Mutex<Vec<DestinationInitialStatus<MockState>>>,
    fail_on: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn new(statuses: Vec<DestinationInitialStatus<MockState>>) -> Self {
        let handler = Self::default();
        handler.set_statuses(statuses);
        handler
    }

    pub fn set_statuses(&self, statuses: Vec<DestinationInitialStatus<MockState>>) {
        *self.statuses.lock().unwrap() = statuses;
    }

    pub fn fail_statements_containing(&self, pattern: &str) {
        self.fail_on.lock().unwrap().push(pattern.to_string());
    }

    pub fn stop_failing(&self) {
        self.fail_on.lock().unwrap().clear();
    }

    /// Executed batches so far, sorted so parallel tasks compare stably.
    pub fn executed(&self) -> Vec<Vec<Vec<String>>> {
        let mut executed = self.executed.lock().unwrap().clone();
        executed.sort();
        executed
    }

    pub fn committed(&self) -> Vec<HashMap<StreamId, MockState>> {
        self.committed.lock().unwrap().clone()
    }

    pub fn gathered(&self) -> Vec<Vec<StreamId>> {
        self.gathered.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.executed.lock().unwrap().clear();
        self.committed.lock().unwrap().clear();
        self.gathered.lock().unwrap().clear();
    }

    pub fn has_no_interactions(&self) -> bool {
        self.executed.lock().unwrap().is_empty()
            && self.committed.lock().unwrap().is_empty()
            && self.gathered.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl DestinationHandler<MockState> for RecordingHandler {
    async fn execute(&self, sql: &Sql) -> typedupe::Result<()> {
        let transactions = sql.transactions().to_vec();
        self.executed.lock().unwrap().push(transactions.clone());

        let fail_on = self.fail_on.lock().unwrap().clone();
        for statement in transactions.iter().flatten() {
            if fail_on.iter().any(|p| statement.contains(p.as_str())) {
                return Err(TypeDedupeError::Sql(format!("injected failure: {}", statement)));
            }
        }
        Ok(())
    }

    async fn gather_initial_state(
        &self,
        streams: &[StreamConfig],
    ) -> typedupe::Result<Vec<DestinationInitialStatus<MockState>>> {
        self.gathered
            .lock()
            .unwrap()
            .push(streams.iter().map(|s| s.id.clone()).collect());

        let statuses = self.statuses.lock().unwrap();
        streams
            .iter()
            .map(|stream| {
                statuses
                    .iter()
                    .find(|s| s.stream_config.id == stream.id)
                    .cloned()
                    .ok_or_else(|| {
                        TypeDedupeError::IllegalState(format!("no status for {}", stream.id))
                    })
            })
            .collect()
    }

    async fn commit_destination_states(
        &self,
        states: &HashMap<StreamId, MockState>,
    ) -> typedupe::Result<()> {
        self.committed.lock().unwrap().push(states.clone());
        Ok(())
    }
}

/// Expected batches, sorted the same way [`RecordingHandler::executed`] is.
pub fn batches(sqls: Vec<Sql>) -> Vec<Vec<Vec<String>>> {
    let mut batches: Vec<_> = sqls.into_iter().map(Sql::into_transactions).collect();
    batches.sort();
    batches
}

pub fn of(statement: &str) -> Sql {
    Sql::of(statement)
}

fn stream_id(namespace: &str, name: &str) -> StreamId {
    StreamId::new(namespace, name, "airbyte_internal", name, namespace, name)
}

/// Truncate sync: replaces the table's contents at commit.
pub fn overwrite_stream() -> StreamConfig {
    StreamConfig::new(stream_id("overwrite_ns", "overwrite_stream"), ImportType::Append)
        .with_generations(1, 1)
}

pub fn append_stream() -> StreamConfig {
    StreamConfig::new(stream_id("append_ns", "append_stream"), ImportType::Append)
}

pub fn dedup_stream() -> StreamConfig {
    StreamConfig::new(stream_id("dedup_ns", "dedup_stream"), ImportType::Dedupe)
}

pub fn all_streams() -> Vec<StreamConfig> {
    vec![overwrite_stream(), append_stream(), dedup_stream()]
}

pub fn parsed_catalog() -> ParsedCatalog {
    ParsedCatalog::new(all_streams())
}

/// Same status for every stream.
pub fn statuses(
    is_final_table_present: bool,
    raw_status: InitialRawTableStatus,
    is_schema_mismatch: bool,
    is_final_table_empty: bool,
    state: MockState,
) -> Vec<DestinationInitialStatus<MockState>> {
    all_streams()
        .into_iter()
        .map(|config| {
            DestinationInitialStatus::new(
                config,
                is_final_table_present,
                raw_status,
                is_schema_mismatch,
                is_final_table_empty,
                state,
            )
        })
        .collect()
}

/// Same state for every stream, keyed as the handler receives it.
pub fn states(state: MockState) -> HashMap<StreamId, MockState> {
    all_streams()
        .into_iter()
        .map(|config| (config.id, state))
        .collect()
}

pub fn schemas_sql() -> Sql {
    Sql::separately([
        "CREATE SCHEMA airbyte_internal",
        "CREATE SCHEMA overwrite_ns",
        "CREATE SCHEMA append_ns",
        "CREATE SCHEMA dedup_ns",
    ])
}

/// Marks every stream as needing a soft reset and runs `MIGRATE <raw table>`.
pub struct MigrationRequiringSoftReset;

#[async_trait]
impl Migration<MockState> for MigrationRequiringSoftReset {
    async fn migrate_if_necessary(
        &self,
        destination_handler: &dyn DestinationHandler<MockState>,
        stream: &StreamConfig,
        state: &DestinationInitialStatus<MockState>,
    ) -> typedupe::Result<MigrationResult<MockState>> {
        destination_handler
            .execute(&Sql::of(format!("MIGRATE {}", stream.id.raw_table_id(""))))
            .await?;
        Ok(MigrationResult::new(
            MockState::new(
                true,
                true,
                state.destination_state.non_soft_reset_migration_completed,
            ),
            false,
        ))
    }
}

/// Flags its own completion without touching the soft-reset flag.
pub struct MigrationNotRequiringSoftReset;

#[async_trait]
impl Migration<MockState> for MigrationNotRequiringSoftReset {
    async fn migrate_if_necessary(
        &self,
        _destination_handler: &dyn DestinationHandler<MockState>,
        _stream: &StreamConfig,
        state: &DestinationInitialStatus<MockState>,
    ) -> typedupe::Result<MigrationResult<MockState>> {
        let current = state.destination_state;
        Ok(MigrationResult::new(
            MockState::new(
                current.needs_soft_reset,
                current.soft_reset_migration_completed,
                true,
            ),
            false,
        ))
    }
}

/// Requests a re-gather of initial state for one stream.
pub struct InvalidatingMigration {
    pub stream_name: &'static str,
}

#[async_trait]
impl Migration<MockState> for InvalidatingMigration {
    async fn migrate_if_necessary(
        &self,
        _destination_handler: &dyn DestinationHandler<MockState>,
        stream: &StreamConfig,
        state: &DestinationInitialStatus<MockState>,
    ) -> typedupe::Result<MigrationResult<MockState>> {
        let invalidate = stream.id.original_name == self.stream_name;
        Ok(MigrationResult::new(state.destination_state, invalidate))
    }
}

/// Fails the V2 table migration of one stream.
pub struct FailingV2TableMigrator {
    pub stream_name: &'static str,
}

#[async_trait]
impl V2TableMigrator for FailingV2TableMigrator {
    async fn migrate_if_necessary(&self, stream: &StreamConfig) -> typedupe::Result<()> {
        if stream.id.original_name == self.stream_name {
            return Err(TypeDedupeError::Sql(format!(
                "cannot alter {}",
                stream.id.final_table_id("", "")
            )));
        }
        Ok(())
    }
}
