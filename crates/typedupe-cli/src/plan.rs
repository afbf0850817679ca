//! Dry-run planning: drive the full lifecycle against an empty destination
//! and record every SQL batch it would run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use typedupe::core::{quote_ident, truncate_identifier};
use typedupe::{
    AirbyteProtocolType, AirbyteType, CatalogParser, ColumnId, ConfiguredCatalog,
    DefaultTyperDeduper, DestinationHandler, DestinationInitialStatus, ImportType,
    MinimumDestinationState, NoOpDestinationV1V2Migrator, NoOpTyperDeduperWithV1V2Migrations,
    ParsedCatalog, Result, Sql, SqlGenerator, StreamConfig, StreamId, TypeAndDedupeOperationValve,
    TypeDedupeConfig, TyperDeduper,
};

const QUOTE: &str = "\"";

// Metadata columns every final table carries.
const RAW_ID: &str = "_airbyte_raw_id";
const EXTRACTED_AT: &str = "_airbyte_extracted_at";
const LOADED_AT: &str = "_airbyte_loaded_at";
const META: &str = "_airbyte_meta";
const GENERATION_ID: &str = "_airbyte_generation_id";
const DATA: &str = "_airbyte_data";

/// Postgres-flavoured generator used for plans.
///
/// Identifiers keep their case and are truncated to `max_identifier_length`
/// characters.
#[derive(Debug, Clone)]
pub struct PlanSqlGenerator {
    max_identifier_length: usize,
}

impl PlanSqlGenerator {
    pub fn new(max_identifier_length: usize) -> Self {
        Self {
            max_identifier_length,
        }
    }

    fn truncate(&self, name: &str) -> String {
        truncate_identifier(name, self.max_identifier_length)
    }

    fn typed_column(column: &ColumnId, airbyte_type: &AirbyteType, safe: bool) -> String {
        let extract = format!("{}->>{}", quote_ident(DATA, QUOTE), sql_literal(&column.original_name));
        let sql_type = column_type(airbyte_type);
        if safe {
            format!("SAFE_CAST({} AS {})", extract, sql_type)
        } else {
            format!("CAST({} AS {})", extract, sql_type)
        }
    }

    fn timestamp_filter(min_raw_timestamp: Option<DateTime<Utc>>) -> String {
        match min_raw_timestamp {
            Some(ts) => format!(
                " AND {} > '{}'",
                quote_ident(EXTRACTED_AT, QUOTE),
                ts.to_rfc3339_opts(SecondsFormat::Micros, true)
            ),
            None => String::new(),
        }
    }

    fn dedupe_statement(&self, stream: &StreamConfig, final_table: &str) -> Option<String> {
        if stream.post_import_action != ImportType::Dedupe || stream.primary_key.is_empty() {
            return None;
        }
        let pk = stream
            .primary_key
            .iter()
            .map(|c| c.name_quoted(QUOTE))
            .collect::<Vec<_>>()
            .join(", ");
        let mut order = Vec::new();
        if let Some(cursor) = &stream.cursor {
            order.push(format!("{} DESC NULLS LAST", cursor.name_quoted(QUOTE)));
        }
        order.push(format!("{} DESC", quote_ident(EXTRACTED_AT, QUOTE)));

        Some(format!(
            "DELETE FROM {t} WHERE {id} IN (SELECT {id} FROM (SELECT {id}, ROW_NUMBER() OVER (PARTITION BY {pk} ORDER BY {order}) AS row_number FROM {t}) AS ranked WHERE row_number > 1)",
            t = final_table,
            id = quote_ident(RAW_ID, QUOTE),
            pk = pk,
            order = order.join(", ")
        ))
    }
}

impl SqlGenerator for PlanSqlGenerator {
    fn build_stream_id(&self, namespace: &str, name: &str, raw_namespace_override: &str) -> StreamId {
        StreamId::new(
            self.truncate(namespace),
            self.truncate(name),
            self.truncate(raw_namespace_override),
            self.truncate(&StreamId::concatenate_raw_table_name(namespace, name)),
            namespace,
            name,
        )
    }

    fn build_column_id_with_suffix(&self, name: &str, suffix: &str) -> ColumnId {
        let full = self.truncate(&format!("{}{}", name, suffix));
        let canonical = full.to_lowercase();
        ColumnId::new(full, name, canonical)
    }

    fn create_table(&self, stream: &StreamConfig, suffix: &str, force: bool) -> Sql {
        let table = stream.id.final_table_id(QUOTE, suffix);
        let mut columns = vec![
            format!("{} VARCHAR NOT NULL", quote_ident(RAW_ID, QUOTE)),
            format!("{} TIMESTAMPTZ NOT NULL", quote_ident(EXTRACTED_AT, QUOTE)),
            format!("{} JSONB NOT NULL", quote_ident(META, QUOTE)),
            format!("{} BIGINT", quote_ident(GENERATION_ID, QUOTE)),
        ];
        columns.extend(
            stream
                .columns
                .iter()
                .map(|(column, airbyte_type)| format!("{} {}", column.name_quoted(QUOTE), column_type(airbyte_type))),
        );
        let create = format!("CREATE TABLE {} ({})", table, columns.join(", "));

        if force {
            Sql::transactionally([format!("DROP TABLE IF EXISTS {}", table), create])
        } else {
            Sql::of(create)
        }
    }

    fn create_schema(&self, schema: &str) -> Sql {
        Sql::of(format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema, QUOTE)))
    }

    fn update_table(
        &self,
        stream: &StreamConfig,
        final_suffix: &str,
        min_raw_timestamp: Option<DateTime<Utc>>,
        use_expensive_safe_casting: bool,
    ) -> Sql {
        let final_table = stream.id.final_table_id(QUOTE, final_suffix);
        let raw_table = stream.id.raw_table_id(QUOTE);
        let filter = Self::timestamp_filter(min_raw_timestamp);
        let unloaded = format!("{} IS NULL", quote_ident(LOADED_AT, QUOTE));

        let mut target_columns = vec![
            quote_ident(RAW_ID, QUOTE),
            quote_ident(EXTRACTED_AT, QUOTE),
            quote_ident(META, QUOTE),
            quote_ident(GENERATION_ID, QUOTE),
        ];
        let mut selected = vec![
            quote_ident(RAW_ID, QUOTE),
            quote_ident(EXTRACTED_AT, QUOTE),
            "'{}'::JSONB".to_string(),
            stream.generation_id.to_string(),
        ];
        for (column, airbyte_type) in &stream.columns {
            target_columns.push(column.name_quoted(QUOTE));
            selected.push(Self::typed_column(column, airbyte_type, use_expensive_safe_casting));
        }

        let mut statements = vec![format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} WHERE {}{}",
            final_table,
            target_columns.join(", "),
            selected.join(", "),
            raw_table,
            unloaded,
            filter
        )];
        statements.extend(self.dedupe_statement(stream, &final_table));
        statements.push(format!(
            "UPDATE {} SET {} = NOW() WHERE {}{}",
            raw_table,
            quote_ident(LOADED_AT, QUOTE),
            unloaded,
            filter
        ));
        Sql::transactionally(statements)
    }

    fn overwrite_final_table(&self, stream: &StreamId, final_suffix: &str) -> Sql {
        Sql::transactionally([
            format!("DROP TABLE IF EXISTS {}", stream.final_table_id(QUOTE, "")),
            format!(
                "ALTER TABLE {} RENAME TO {}",
                stream.final_table_id(QUOTE, final_suffix),
                stream.final_name_quoted(QUOTE)
            ),
        ])
    }

    fn migrate_from_v1_to_v2(&self, stream_id: &StreamId, namespace: &str, table_name: &str) -> Sql {
        let raw_table = stream_id.raw_table_id(QUOTE);
        Sql::transactionally([
            format!(
                "CREATE TABLE IF NOT EXISTS {} ({} VARCHAR NOT NULL, {} JSONB, {} TIMESTAMPTZ NOT NULL, {} TIMESTAMPTZ)",
                raw_table,
                quote_ident(RAW_ID, QUOTE),
                quote_ident(DATA, QUOTE),
                quote_ident(EXTRACTED_AT, QUOTE),
                quote_ident(LOADED_AT, QUOTE)
            ),
            format!(
                "INSERT INTO {} SELECT \"_airbyte_ab_id\", \"_airbyte_data\"::JSONB, \"_airbyte_emitted_at\", NULL FROM {}.{}",
                raw_table,
                quote_ident(namespace, QUOTE),
                quote_ident(table_name, QUOTE)
            ),
        ])
    }

    fn clear_loaded_at(&self, stream_id: &StreamId) -> Sql {
        Sql::of(format!(
            "UPDATE {} SET {} = NULL",
            stream_id.raw_table_id(QUOTE),
            quote_ident(LOADED_AT, QUOTE)
        ))
    }
}

/// Postgres column type for an Airbyte type.
pub fn column_type(airbyte_type: &AirbyteType) -> &'static str {
    match airbyte_type {
        AirbyteType::Primitive(p) => match p {
            AirbyteProtocolType::String => "VARCHAR",
            AirbyteProtocolType::Date => "DATE",
            AirbyteProtocolType::TimeWithoutTimezone => "TIME",
            AirbyteProtocolType::TimeWithTimezone => "TIMETZ",
            AirbyteProtocolType::TimestampWithoutTimezone => "TIMESTAMP",
            AirbyteProtocolType::TimestampWithTimezone => "TIMESTAMPTZ",
            AirbyteProtocolType::Number => "NUMERIC",
            AirbyteProtocolType::Integer => "BIGINT",
            AirbyteProtocolType::Boolean => "BOOLEAN",
            AirbyteProtocolType::Unknown => "JSONB",
        },
        AirbyteType::Union(u) => match u.choose_type() {
            AirbyteType::Union(_) => "JSONB",
            chosen => column_type(&chosen),
        },
        AirbyteType::Struct(_) | AirbyteType::Array(_) | AirbyteType::UnsupportedOneOf(_) => {
            "JSONB"
        }
    }
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// One batch the destination would have executed.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedBatch {
    pub phase: &'static str,
    pub sql: Sql,
}

/// Destination with no tables and no state. Records instead of executing.
#[derive(Debug, Default)]
pub struct DryRunHandler {
    phase: Mutex<&'static str>,
    batches: Mutex<Vec<PlannedBatch>>,
    committed_states: Mutex<usize>,
}

impl DryRunHandler {
    pub async fn enter_phase(&self, phase: &'static str) {
        *self.phase.lock().await = phase;
    }

    pub async fn batches(&self) -> Vec<PlannedBatch> {
        self.batches.lock().await.clone()
    }

    pub async fn committed_states(&self) -> usize {
        *self.committed_states.lock().await
    }
}

#[async_trait]
impl DestinationHandler<MinimumDestinationState> for DryRunHandler {
    async fn execute(&self, sql: &Sql) -> Result<()> {
        if sql.is_empty() {
            return Ok(());
        }
        let phase = *self.phase.lock().await;
        debug!("[{}] would execute {} transaction(s)", phase, sql.transactions().len());
        self.batches.lock().await.push(PlannedBatch {
            phase,
            sql: sql.clone(),
        });
        Ok(())
    }

    async fn gather_initial_state(
        &self,
        streams: &[StreamConfig],
    ) -> Result<Vec<DestinationInitialStatus<MinimumDestinationState>>> {
        Ok(streams
            .iter()
            .map(|s| DestinationInitialStatus::empty(s.clone(), MinimumDestinationState::default()))
            .collect())
    }

    async fn commit_destination_states(
        &self,
        states: &HashMap<StreamId, MinimumDestinationState>,
    ) -> Result<()> {
        *self.committed_states.lock().await += states.len();
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedColumn {
    pub name: String,
    pub original_name: String,
    #[serde(rename = "type")]
    pub sql_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedStream {
    pub namespace: String,
    pub name: String,
    pub final_table: String,
    pub raw_table: String,
    pub import_type: ImportType,
    pub primary_key: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub generation_id: i64,
    pub minimum_generation_id: i64,
    pub columns: Vec<PlannedColumn>,
}

impl PlannedStream {
    fn from_config(stream: &StreamConfig) -> Self {
        Self {
            namespace: stream.id.original_namespace.clone(),
            name: stream.id.original_name.clone(),
            final_table: stream.id.final_table_id(QUOTE, ""),
            raw_table: stream.id.raw_table_id(QUOTE),
            import_type: stream.post_import_action,
            primary_key: stream.primary_key.iter().map(|c| c.name.clone()).collect(),
            cursor: stream.cursor.as_ref().map(|c| c.name.clone()),
            generation_id: stream.generation_id,
            minimum_generation_id: stream.minimum_generation_id,
            columns: stream
                .columns
                .iter()
                .map(|(column, airbyte_type)| PlannedColumn {
                    name: column.name.clone(),
                    original_name: column.original_name.clone(),
                    sql_type: column_type(airbyte_type),
                })
                .collect(),
        }
    }
}

/// Everything a sync would do against an empty destination.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub config_hash: String,
    pub td_threads: usize,
    pub type_dedupe_enabled: bool,
    pub incremental_typing_deduping: bool,
    pub streams: Vec<PlannedStream>,
    pub batches: Vec<PlannedBatch>,
    pub committed_states: usize,
}

impl PlanReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable rendering, one phase at a time.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Plan for {} stream(s) (td_threads: {}, typing and deduping: {})\n",
            self.streams.len(),
            self.td_threads,
            if self.type_dedupe_enabled { "enabled" } else { "disabled" }
        );

        out.push_str("\nStreams:\n");
        for stream in &self.streams {
            out.push_str(&format!(
                "  {}.{} -> {} (raw {}), {}\n",
                stream.namespace, stream.name, stream.final_table, stream.raw_table, stream.import_type
            ));
            for column in &stream.columns {
                let mut flags = Vec::new();
                if stream.primary_key.contains(&column.name) {
                    flags.push("pk");
                }
                if stream.cursor.as_deref() == Some(column.name.as_str()) {
                    flags.push("cursor");
                }
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", flags.join(", "))
                };
                out.push_str(&format!("    {} {}{}\n", column.name, column.sql_type, flags));
            }
        }

        let mut current_phase = "";
        for batch in &self.batches {
            if batch.phase != current_phase {
                current_phase = batch.phase;
                out.push_str(&format!("\n{}:\n", current_phase));
            }
            for transaction in batch.sql.as_sql_strings("BEGIN", "COMMIT") {
                out.push_str(&format!("  {};\n", transaction));
            }
        }

        out.push_str(&format!("\nDestination states committed: {}\n", self.committed_states));
        out
    }
}

pub fn parse_catalog(
    config: &TypeDedupeConfig,
    catalog: &ConfiguredCatalog,
    sql_generator: Arc<dyn SqlGenerator>,
) -> Result<ParsedCatalog> {
    CatalogParser::new(
        sql_generator,
        &config.destination.default_namespace,
        &config.destination.raw_namespace,
    )
    .parse_catalog(catalog)
}

/// Run every lifecycle phase against a [`DryRunHandler`].
pub async fn build_plan(config: &TypeDedupeConfig, catalog: &ConfiguredCatalog) -> Result<PlanReport> {
    let sql_generator: Arc<dyn SqlGenerator> =
        Arc::new(PlanSqlGenerator::new(config.destination.max_identifier_length));
    let parsed = parse_catalog(config, catalog, sql_generator.clone())?;
    let streams: Vec<PlannedStream> = parsed.streams.iter().map(PlannedStream::from_config).collect();

    let handler = Arc::new(DryRunHandler::default());
    let td_settings = &config.typing_deduping;
    let td_threads = td_settings.get_td_threads();
    let type_dedupe_enabled = !td_settings.disable_type_dedupe;

    let td: Box<dyn TyperDeduper> = if type_dedupe_enabled {
        Box::new(
            DefaultTyperDeduper::new(
                sql_generator,
                handler.clone(),
                parsed.clone(),
                Arc::new(NoOpDestinationV1V2Migrator),
                Vec::new(),
            )
            .with_td_threads(td_threads),
        )
    } else {
        Box::new(
            NoOpTyperDeduperWithV1V2Migrations::new(
                sql_generator,
                handler.clone(),
                parsed.clone(),
                Arc::new(NoOpDestinationV1V2Migrator),
                Vec::new(),
            )
            .with_td_threads(td_threads),
        )
    };

    let mut valve = TypeAndDedupeOperationValve::with_clock(
        td_settings.incremental_typing_deduping,
        &td_settings.get_valve_intervals_ms(),
        Arc::new(Utc::now),
    );

    let result = run_lifecycle(td.as_ref(), &handler, &parsed, &mut valve).await;
    td.cleanup().await;
    result?;

    let mut batches = handler.batches().await;
    // Streams run concurrently; sort within each phase for a stable plan.
    batches.sort_by(|a, b| {
        phase_rank(a.phase)
            .cmp(&phase_rank(b.phase))
            .then_with(|| a.sql.transactions().cmp(b.sql.transactions()))
    });

    Ok(PlanReport {
        config_hash: config.hash(),
        td_threads,
        type_dedupe_enabled,
        incremental_typing_deduping: td_settings.incremental_typing_deduping,
        streams,
        batches,
        committed_states: handler.committed_states().await,
    })
}

const PHASES: [&str; 5] = [
    "prepare_schemas_and_run_migrations",
    "prepare_final_tables",
    "incremental_type_and_dedupe",
    "type_and_dedupe",
    "commit_final_tables",
];

fn phase_rank(phase: &str) -> usize {
    PHASES.iter().position(|p| *p == phase).unwrap_or(PHASES.len())
}

async fn run_lifecycle(
    td: &dyn TyperDeduper,
    handler: &DryRunHandler,
    parsed: &ParsedCatalog,
    valve: &mut TypeAndDedupeOperationValve,
) -> Result<()> {
    handler.enter_phase(PHASES[0]).await;
    td.prepare_schemas_and_run_migrations().await?;

    handler.enter_phase(PHASES[1]).await;
    td.prepare_final_tables().await?;

    if valve.is_enabled() {
        handler.enter_phase(PHASES[2]).await;
        for stream in &parsed.streams {
            let descriptor = stream.id.as_stream_descriptor();
            valve.add_stream_if_absent(descriptor.clone());
            if valve.ready_to_type_and_dedupe(&descriptor) {
                td.type_and_dedupe_stream(&stream.id.original_namespace, &stream.id.original_name, false)
                    .await?;
                valve.update_time_and_increase_interval(&descriptor);
            }
        }
    }

    // No records are written during a plan, so every stream reports an
    // unknown count and completes.
    let summaries = HashMap::new();
    handler.enter_phase(PHASES[3]).await;
    td.type_and_dedupe(&summaries).await?;

    handler.enter_phase(PHASES[4]).await;
    td.commit_final_tables(&summaries).await?;

    info!("Plan complete for {} stream(s)", parsed.streams.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use typedupe::ConfiguredCatalog;

    const CATALOG: &str = r#"{
        "streams": [
            {
                "stream": {
                    "name": "users",
                    "namespace": "app",
                    "json_schema": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "integer"},
                            "updated_at": {"type": "string", "format": "date-time"},
                            "tags": {"type": "array", "items": {"type": "string"}}
                        }
                    }
                },
                "destination_sync_mode": "append_dedup",
                "primary_key": [["id"]],
                "cursor_field": ["updated_at"]
            },
            {
                "stream": {
                    "name": "events",
                    "json_schema": {"type": "object", "properties": {"name": {"type": "string"}}}
                },
                "destination_sync_mode": "overwrite",
                "generation_id": 4,
                "minimum_generation_id": 4
            }
        ]
    }"#;

    fn users() -> StreamConfig {
        let generator: Arc<dyn SqlGenerator> = Arc::new(PlanSqlGenerator::new(63));
        let catalog = ConfiguredCatalog::from_json(CATALOG).unwrap();
        parse_catalog(&TypeDedupeConfig::default(), &catalog, generator)
            .unwrap()
            .streams
            .remove(0)
    }

    #[test]
    fn test_stream_id_uses_raw_table_naming() {
        let id = PlanSqlGenerator::new(63).build_stream_id("app", "users", "airbyte_internal");
        assert_eq!(id.final_table_id(QUOTE, ""), "\"app\".\"users\"");
        assert_eq!(
            id.raw_table_id(QUOTE),
            "\"airbyte_internal\".\"app_raw__stream_users\""
        );
    }

    #[test]
    fn test_column_ids_are_truncated() {
        let column = PlanSqlGenerator::new(5).build_column_id_with_suffix("CustomerName", "_1");
        assert_eq!(column.name, "Custo");
        assert_eq!(column.canonical_name, "custo");
        assert_eq!(column.original_name, "CustomerName");
    }

    #[test]
    fn test_column_types() {
        assert_eq!(column_type(&AirbyteType::Primitive(AirbyteProtocolType::Integer)), "BIGINT");
        assert_eq!(
            column_type(&AirbyteType::Primitive(AirbyteProtocolType::TimestampWithTimezone)),
            "TIMESTAMPTZ"
        );
        assert_eq!(column_type(&AirbyteType::Array(Box::new(AirbyteType::unknown()))), "JSONB");
    }

    #[test]
    fn test_forced_create_drops_first() {
        let stream = users();
        let sql = PlanSqlGenerator::new(63).create_table(&stream, "_airbyte_tmp", true);
        let transactions = sql.transactions();
        assert_eq!(transactions.len(), 1);
        assert_eq!(
            transactions[0][0],
            "DROP TABLE IF EXISTS \"app\".\"users_airbyte_tmp\""
        );
        assert!(transactions[0][1].starts_with("CREATE TABLE \"app\".\"users_airbyte_tmp\""));
        assert!(transactions[0][1].contains("\"id\" BIGINT"));
    }

    #[test]
    fn test_dedupe_update_partitions_by_primary_key() {
        let stream = users();
        let ts: DateTime<Utc> = "2024-03-01T00:00:00Z".parse().unwrap();
        let sql = PlanSqlGenerator::new(63).update_table(&stream, "", Some(ts), true);
        let statements = &sql.transactions()[0];
        assert_eq!(statements.len(), 3);
        assert!(statements[0].contains("SAFE_CAST(\"_airbyte_data\"->>'id' AS BIGINT)"));
        assert!(statements[0].contains("\"_airbyte_extracted_at\" > '2024-03-01T00:00:00.000000Z'"));
        assert!(statements[1].contains("PARTITION BY \"id\" ORDER BY \"updated_at\" DESC NULLS LAST"));
        assert!(statements[2].starts_with("UPDATE \"airbyte_internal\".\"app_raw__stream_users\""));
    }

    #[tokio::test]
    async fn test_plan_for_empty_destination() {
        let catalog = ConfiguredCatalog::from_json(CATALOG).unwrap();
        let mut config = TypeDedupeConfig::default();
        config.typing_deduping.td_threads = Some(2);

        let plan = build_plan(&config, &catalog).await.unwrap();
        assert_eq!(plan.streams.len(), 2);
        assert_eq!(plan.streams[1].namespace, "public");

        let phases: Vec<&str> = plan.batches.iter().map(|b| b.phase).collect();
        assert_eq!(
            phases,
            vec![
                "prepare_schemas_and_run_migrations",
                "prepare_final_tables",
                "prepare_final_tables",
                "type_and_dedupe",
                "type_and_dedupe",
            ]
        );
        // Once after migrations and once after table preparation.
        assert_eq!(plan.committed_states, 4);
        assert!(plan.render().contains("CREATE SCHEMA IF NOT EXISTS \"airbyte_internal\""));
    }

    #[tokio::test]
    async fn test_plan_with_type_dedupe_disabled() {
        let catalog = ConfiguredCatalog::from_json(CATALOG).unwrap();
        let mut config = TypeDedupeConfig::default();
        config.typing_deduping.disable_type_dedupe = true;

        let plan = build_plan(&config, &catalog).await.unwrap();
        assert!(!plan.type_dedupe_enabled);
        assert!(plan
            .batches
            .iter()
            .all(|b| b.phase == "prepare_schemas_and_run_migrations"));
        assert_eq!(plan.committed_states, 2);
    }

    #[tokio::test]
    async fn test_incremental_plan_runs_each_stream_once_early() {
        let catalog = ConfiguredCatalog::from_json(CATALOG).unwrap();
        let mut config = TypeDedupeConfig::default();
        config.typing_deduping.incremental_typing_deduping = true;

        let plan = build_plan(&config, &catalog).await.unwrap();
        let incremental = plan
            .batches
            .iter()
            .filter(|b| b.phase == "incremental_type_and_dedupe")
            .count();
        assert_eq!(incremental, 2);
    }
}
