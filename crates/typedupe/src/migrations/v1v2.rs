//! Legacy table migrations.
//!
//! [`BaseDestinationV1V2Migrator`] copies a V1 raw table into the V2 raw
//! table when the V1 table exists and the V2 one does not. The decision is a
//! fixed skeleton; the destination supplies the table checks through
//! [`V1RawTableInspector`].

use async_trait::async_trait;
use tracing::info;

use crate::core::{SqlGenerator, StreamConfig};
use crate::error::{Result, TypeDedupeError};
use crate::state::{DestinationHandler, DestinationState};

pub const COLUMN_NAME_AB_RAW_ID: &str = "_airbyte_raw_id";
pub const COLUMN_NAME_AB_EXTRACTED_AT: &str = "_airbyte_extracted_at";
pub const COLUMN_NAME_AB_LOADED_AT: &str = "_airbyte_loaded_at";
pub const COLUMN_NAME_DATA: &str = "_airbyte_data";
pub const COLUMN_NAME_AB_META: &str = "_airbyte_meta";
pub const COLUMN_NAME_AB_GENERATION_ID: &str = "_airbyte_generation_id";

pub const LEGACY_RAW_TABLE_COLUMNS: [&str; 3] =
    ["_airbyte_ab_id", "_airbyte_data", "_airbyte_emitted_at"];

/// Raw table columns, newest layout first.
pub const V2_RAW_TABLE_COLUMN_LAYOUTS: [&[&str]; 3] = [
    &[
        COLUMN_NAME_AB_RAW_ID,
        COLUMN_NAME_AB_EXTRACTED_AT,
        COLUMN_NAME_AB_LOADED_AT,
        COLUMN_NAME_DATA,
        COLUMN_NAME_AB_META,
        COLUMN_NAME_AB_GENERATION_ID,
    ],
    &[
        COLUMN_NAME_AB_RAW_ID,
        COLUMN_NAME_AB_EXTRACTED_AT,
        COLUMN_NAME_AB_LOADED_AT,
        COLUMN_NAME_DATA,
        COLUMN_NAME_AB_META,
    ],
    // Written before _airbyte_meta existed.
    &[
        COLUMN_NAME_AB_RAW_ID,
        COLUMN_NAME_AB_EXTRACTED_AT,
        COLUMN_NAME_AB_LOADED_AT,
        COLUMN_NAME_DATA,
    ],
];

/// A `(namespace, table)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacedTableName {
    pub namespace: String,
    pub table_name: String,
}

impl NamespacedTableName {
    pub fn new(namespace: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            table_name: table_name.into(),
        }
    }
}

/// Moves V1 raw tables into the V2 layout.
#[async_trait]
pub trait DestinationV1V2Migrator<S: DestinationState>: Send + Sync {
    async fn migrate_if_necessary(
        &self,
        sql_generator: &dyn SqlGenerator,
        destination_handler: &dyn DestinationHandler<S>,
        stream: &StreamConfig,
    ) -> Result<()>;
}

/// Migrates existing final tables of older V2 destinations.
#[async_trait]
pub trait V2TableMigrator: Send + Sync {
    async fn migrate_if_necessary(&self, stream: &StreamConfig) -> Result<()>;
}

/// Destination-specific table checks used by [`BaseDestinationV1V2Migrator`].
#[async_trait]
pub trait V1RawTableInspector: Send + Sync {
    /// Dialect-specific table description.
    type TableDefinition: Send + Sync;

    async fn does_airbyte_internal_namespace_exist(&self, stream: &StreamConfig) -> Result<bool>;

    async fn get_table_if_exists(
        &self,
        namespace: &str,
        table_name: &str,
    ) -> Result<Option<Self::TableDefinition>>;

    /// Whether `table` has exactly `columns`.
    fn schema_matches_expectation(&self, table: &Self::TableDefinition, columns: &[&str]) -> bool;

    /// Where the V1 destination kept this stream's raw records.
    fn convert_to_v1_raw_name(&self, stream: &StreamConfig) -> NamespacedTableName;

    fn does_v1_raw_table_match_expected_schema(&self, table: &Self::TableDefinition) -> bool {
        self.schema_matches_expectation(table, &LEGACY_RAW_TABLE_COLUMNS)
    }
}

/// The V1 to V2 migration skeleton.
pub struct BaseDestinationV1V2Migrator<I> {
    inspector: I,
}

impl<I: V1RawTableInspector> BaseDestinationV1V2Migrator<I> {
    pub fn new(inspector: I) -> Self {
        Self { inspector }
    }

    /// True when no valid V2 raw table exists but a valid V1 one does.
    pub async fn should_migrate(&self, stream: &StreamConfig) -> Result<bool> {
        let v1_raw_table = self.inspector.convert_to_v1_raw_name(stream);
        info!(
            "Checking whether v1 raw table {} in dataset {} exists",
            v1_raw_table.table_name, v1_raw_table.namespace
        );

        let no_valid_v2_raw_table_exists = !self.does_valid_v2_raw_table_already_exist(stream).await?;
        let a_valid_v1_raw_table_exists = self
            .does_valid_v1_raw_table_exist(&v1_raw_table.namespace, &v1_raw_table.table_name)
            .await?;
        info!(
            "Migration Info: No existing v2 raw tables: {}, A v1 raw table exists: {}",
            no_valid_v2_raw_table_exists, a_valid_v1_raw_table_exists
        );

        Ok(no_valid_v2_raw_table_exists && a_valid_v1_raw_table_exists)
    }

    async fn does_valid_v2_raw_table_already_exist(&self, stream: &StreamConfig) -> Result<bool> {
        if !self
            .inspector
            .does_airbyte_internal_namespace_exist(stream)
            .await?
        {
            return Ok(false);
        }

        match self
            .inspector
            .get_table_if_exists(&stream.id.raw_namespace, &stream.id.raw_name)
            .await?
        {
            Some(table) => {
                let matches = V2_RAW_TABLE_COLUMN_LAYOUTS
                    .iter()
                    .any(|columns| self.inspector.schema_matches_expectation(&table, columns));
                if !matches {
                    return Err(TypeDedupeError::UnexpectedSchema(format!(
                        "Destination V2 Raw Table {} does not match expected Schema",
                        stream.id.raw_table_id("")
                    )));
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn does_valid_v1_raw_table_exist(&self, namespace: &str, table_name: &str) -> Result<bool> {
        Ok(self
            .inspector
            .get_table_if_exists(namespace, table_name)
            .await?
            .map(|table| self.inspector.does_v1_raw_table_match_expected_schema(&table))
            .unwrap_or(false))
    }

    async fn migrate<S: DestinationState>(
        &self,
        sql_generator: &dyn SqlGenerator,
        destination_handler: &dyn DestinationHandler<S>,
        stream: &StreamConfig,
    ) -> Result<()> {
        let v1_raw_table = self.inspector.convert_to_v1_raw_name(stream);
        let sql = sql_generator.migrate_from_v1_to_v2(
            &stream.id,
            &v1_raw_table.namespace,
            &v1_raw_table.table_name,
        );
        destination_handler.execute(&sql).await.map_err(|e| {
            TypeDedupeError::TableNotMigrated(format!(
                "Attempted and failed to migrate stream {}: {}",
                stream.id.final_name, e
            ))
        })
    }
}

#[async_trait]
impl<S, I> DestinationV1V2Migrator<S> for BaseDestinationV1V2Migrator<I>
where
    S: DestinationState,
    I: V1RawTableInspector,
{
    async fn migrate_if_necessary(
        &self,
        sql_generator: &dyn SqlGenerator,
        destination_handler: &dyn DestinationHandler<S>,
        stream: &StreamConfig,
    ) -> Result<()> {
        info!(
            "Assessing whether migration is necessary for stream {}",
            stream.id.final_name
        );
        if self.should_migrate(stream).await? {
            info!("Starting v2 Migration for stream {}", stream.id.final_name);
            self.migrate(sql_generator, destination_handler, stream)
                .await?;
            info!(
                "V2 Migration completed successfully for stream {}",
                stream.id.final_name
            );
        } else {
            info!("No Migration Required for stream: {}", stream.id.final_name);
        }
        Ok(())
    }
}

/// For destinations that never had a V1 layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpDestinationV1V2Migrator;

#[async_trait]
impl<S: DestinationState> DestinationV1V2Migrator<S> for NoOpDestinationV1V2Migrator {
    async fn migrate_if_necessary(
        &self,
        _sql_generator: &dyn SqlGenerator,
        _destination_handler: &dyn DestinationHandler<S>,
        _stream: &StreamConfig,
    ) -> Result<()> {
        // Nothing to migrate
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpV2TableMigrator;

#[async_trait]
impl V2TableMigrator for NoOpV2TableMigrator {
    async fn migrate_if_necessary(&self, _stream: &StreamConfig) -> Result<()> {
        Ok(())
    }
}
