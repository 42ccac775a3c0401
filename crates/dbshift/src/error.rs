//! Error types for the migration engine.

use thiserror::Error;

/// Exit code for configuration problems (bad YAML, invalid settings, missing driver).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connection, pool and timeout failures.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for catalog introspection failures.
pub const EXIT_INTROSPECTION_ERROR: u8 = 3;
/// Exit code for data transfer failures.
pub const EXIT_TRANSFER_ERROR: u8 = 4;
/// Exit code for a run that finished with failed tables, or a validation
/// that found mismatched row counts.
pub const EXIT_RUN_FAILED: u8 = 1;
/// Exit code for a cancelled run.
pub const EXIT_CANCELLED: u8 = 5;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configured database type has no driver in this build.
    #[error("No driver available for database type '{0}'")]
    DriverUnavailable(String),

    /// Could not reach the database, or the connection dropped.
    #[error("Connection error ({side}): {message}")]
    Connection { side: String, message: String },

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A network call exceeded the adapter's configured timeout.
    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// Catalog queries failed or the table does not exist.
    #[error("Introspection failed: {0}")]
    Introspection(String),

    /// A single value could not be reshaped for the target column.
    #[error("Cannot transform column {column}: {message}")]
    Transform { column: String, message: String },

    /// A statement was rejected by the database (constraint violation, type mismatch).
    #[error("Statement failed: {0}")]
    Statement(String),

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// A whole batch failed while fail-fast mode was enabled.
    #[error("Batch at offset {offset} of {table} failed: {message}")]
    BatchFailed {
        table: String,
        offset: u64,
        message: String,
    },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Connection error for one side of the migration.
    pub fn connection(side: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Connection {
            side: side.into(),
            message: message.to_string(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Transform error
    pub fn transform(column: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transform {
            column: column.into(),
            message: message.into(),
        }
    }

    /// True when the error means the connection itself is unusable.
    ///
    /// A batch that hits one of these is rolled back as a whole.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            MigrateError::Connection { .. }
                | MigrateError::Pool { .. }
                | MigrateError::Timeout { .. }
                | MigrateError::Io(_)
        )
    }

    /// True for failures scoped to a single row.
    pub fn is_row_local(&self) -> bool {
        matches!(
            self,
            MigrateError::Transform { .. } | MigrateError::Statement(_)
        )
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::DriverUnavailable(_)
            | MigrateError::Yaml(_)
            | MigrateError::Json(_) => EXIT_CONFIG_ERROR,
            MigrateError::Connection { .. }
            | MigrateError::Pool { .. }
            | MigrateError::Timeout { .. } => EXIT_CONNECTION_ERROR,
            MigrateError::Introspection(_) => EXIT_INTROSPECTION_ERROR,
            MigrateError::Transform { .. }
            | MigrateError::Statement(_)
            | MigrateError::Transfer { .. }
            | MigrateError::BatchFailed { .. } => EXIT_TRANSFER_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Io(_) => EXIT_IO_ERROR,
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

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(MigrateError::connection("target", "reset by peer").is_connectivity());
        assert!(MigrateError::Timeout {
            operation: "insert".into(),
            seconds: 30
        }
        .is_connectivity());
        assert!(!MigrateError::Statement("duplicate key".into()).is_connectivity());
        assert!(!MigrateError::transform("created_at", "bad date").is_connectivity());
    }

    #[test]
    fn test_row_local_classification() {
        assert!(MigrateError::Statement("duplicate key".into()).is_row_local());
        assert!(MigrateError::transform("created_at", "bad date").is_row_local());
        assert!(!MigrateError::Introspection("missing".into()).is_row_local());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(
            MigrateError::DriverUnavailable("oracle".into()).exit_code(),
            EXIT_CONFIG_ERROR
        );
        assert_eq!(
            MigrateError::pool("refused", "source").exit_code(),
            EXIT_CONNECTION_ERROR
        );
        assert_eq!(MigrateError::Cancelled.exit_code(), EXIT_CANCELLED);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(MigrateError::from(io).exit_code(), EXIT_IO_ERROR);
    }
}
