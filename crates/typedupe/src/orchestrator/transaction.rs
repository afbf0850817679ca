//! Single-stream type-and-dedupe and soft reset.

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::core::{SqlGenerator, StreamConfig, SOFT_RESET_SUFFIX};
use crate::error::Result;
use crate::state::{DestinationHandler, DestinationState};

/// Type and dedupe one stream into `<final table><suffix>`.
///
/// Runs the fast query first. If it fails and the generator says the error
/// is retryable, runs the safe-casting query once; otherwise the error
/// propagates.
pub async fn execute_type_and_dedupe<S: DestinationState>(
    sql_generator: &dyn SqlGenerator,
    destination_handler: &dyn DestinationHandler<S>,
    stream: &StreamConfig,
    min_extracted_at: Option<DateTime<Utc>>,
    suffix: &str,
) -> Result<()> {
    let id = &stream.id;
    info!(
        "Attempting typing and deduping for {}.{} with suffix {}",
        id.original_namespace, id.original_name, suffix
    );

    let unsafe_sql = sql_generator.update_table(stream, suffix, min_extracted_at, false);
    match destination_handler.execute(&unsafe_sql).await {
        Ok(()) => Ok(()),
        Err(e) if sql_generator.should_retry(&e) => {
            error!(
                "Encountered error on unsafe SQL for stream {}.{} with suffix {}, attempting with error handling: {}",
                id.original_namespace, id.original_name, suffix, e
            );
            let safer_sql = sql_generator.update_table(stream, suffix, min_extracted_at, true);
            destination_handler.execute(&safer_sql).await
        }
        Err(e) => {
            error!(
                "Encountered error on unsafe SQL for stream {}.{} with suffix {}, retry is skipped: {}",
                id.original_namespace, id.original_name, suffix, e
            );
            Err(e)
        }
    }
}

/// Rebuild a final table in place.
///
/// Creates an empty soft-reset table, marks every raw record unprocessed,
/// types and dedupes the whole raw table into it, then swaps it in.
pub async fn execute_soft_reset<S: DestinationState>(
    sql_generator: &dyn SqlGenerator,
    destination_handler: &dyn DestinationHandler<S>,
    stream: &StreamConfig,
) -> Result<()> {
    info!(
        "Attempting soft reset for stream {}.{}",
        stream.id.original_namespace, stream.id.original_name
    );
    destination_handler
        .execute(&sql_generator.prepare_tables_for_soft_reset(stream))
        .await?;
    execute_type_and_dedupe(
        sql_generator,
        destination_handler,
        stream,
        None,
        SOFT_RESET_SUFFIX,
    )
    .await?;
    destination_handler
        .execute(&sql_generator.overwrite_final_table(&stream.id, SOFT_RESET_SUFFIX))
        .await
}
