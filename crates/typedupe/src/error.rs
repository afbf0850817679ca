//! Error types for the typing and deduping engine.

use thiserror::Error;

/// Exit code for configuration errors (bad YAML, name collisions, bad keys).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for SQL execution failures reported by a destination.
pub const EXIT_SQL_ERROR: u8 = 2;
/// Exit code for unexpected table shapes and failed migrations.
pub const EXIT_SCHEMA_ERROR: u8 = 3;
/// Exit code for internal failures (illegal state, panicked tasks).
pub const EXIT_INTERNAL_ERROR: u8 = 4;
/// Exit code for IO errors (missing files, permissions).
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for typing and deduping operations.
#[derive(Error, Debug)]
pub enum TypeDedupeError {
    /// Configuration error (invalid YAML, bad catalog, nested keys, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A column name collision could not be resolved.
    #[error(
        "Cannot solve column name collision: {column}. We recommend removing this column to continue syncing."
    )]
    ColumnCollision { column: String },

    /// A stream was requested that is not part of the parsed catalog.
    #[error("Could not find stream {namespace}.{name} in parsed catalog")]
    StreamNotFound { namespace: String, name: String },

    /// A raw or final table does not have the expected shape.
    #[error("Unexpected schema: {0}")]
    UnexpectedSchema(String),

    /// A destination migration could not be completed.
    #[error("Table not migrated: {0}")]
    TableNotMigrated(String),

    /// SQL execution failed in the destination.
    #[error("SQL execution failed: {0}")]
    Sql(String),

    /// A lifecycle method was called out of order.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// A worker task panicked.
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// The worker pool was shut down before the task could run.
    #[error("Typer-deduper worker pool has been shut down")]
    ShutDown,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TypeDedupeError {
    /// Create a StreamNotFound error.
    pub fn stream_not_found(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeDedupeError::StreamNotFound {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a ColumnCollision error.
    pub fn column_collision(column: impl Into<String>) -> Self {
        TypeDedupeError::ColumnCollision {
            column: column.into(),
        }
    }

    /// Exit code used by the CLI for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            TypeDedupeError::Config(_)
            | TypeDedupeError::ColumnCollision { .. }
            | TypeDedupeError::StreamNotFound { .. }
            | TypeDedupeError::Yaml(_)
            | TypeDedupeError::Json(_) => EXIT_CONFIG_ERROR,
            TypeDedupeError::Sql(_) => EXIT_SQL_ERROR,
            TypeDedupeError::UnexpectedSchema(_) | TypeDedupeError::TableNotMigrated(_) => {
                EXIT_SCHEMA_ERROR
            }
            TypeDedupeError::IllegalState(_)
            | TypeDedupeError::TaskPanicked(_)
            | TypeDedupeError::ShutDown => EXIT_INTERNAL_ERROR,
            TypeDedupeError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for typing and deduping operations.
pub type Result<T> = std::result::Result<T, TypeDedupeError>;
