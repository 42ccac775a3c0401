//! Configuration type definitions with auto-tuning based on system resources.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use crate::error::{MigrateError, Result};
use crate::typemap::DataTypeMapping;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            total_memory_gb: sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
            cpu_cores: sys.cpus().len(),
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database the data is read from.
    pub source: ConnectionConfig,

    /// Database the data is written to.
    pub target: ConnectionConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Per-table name and column mappings.
    #[serde(default)]
    pub mappings: Vec<TableMapping>,

    /// Source type to target type overrides, merged over the built-in table.
    #[serde(default)]
    pub type_mappings: Vec<DataTypeMapping>,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }

    /// Mapping declared for a source table, matched ignoring ASCII case.
    pub fn table_mapping(&self, source_table: &str) -> Option<&TableMapping> {
        self.mappings
            .iter()
            .find(|m| m.source_table.eq_ignore_ascii_case(source_table))
    }
}

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Mssql,
    Postgres,
    /// In-process tables, for tests and demos.
    Memory,
}

impl DatabaseKind {
    /// Parse a `type:` value. Unknown names have no driver.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mssql" | "sqlserver" | "sql_server" => Ok(DatabaseKind::Mssql),
            "postgres" | "postgresql" | "pg" => Ok(DatabaseKind::Postgres),
            "memory" => Ok(DatabaseKind::Memory),
            other => Err(MigrateError::DriverUnavailable(other.to_string())),
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseKind::Mssql => 1433,
            DatabaseKind::Postgres => 5432,
            DatabaseKind::Memory => 0,
        }
    }

    pub fn default_schema(&self) -> &'static str {
        match self {
            DatabaseKind::Mssql => "dbo",
            DatabaseKind::Postgres | DatabaseKind::Memory => "public",
        }
    }
}

/// Connection settings for one side of the migration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database type: mssql, postgres, or memory.
    pub r#type: String,

    /// Database host.
    #[serde(default)]
    pub host: String,

    /// Database port (default depends on type).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema (default: "dbo" for mssql, "public" otherwise).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// SSL mode: disable, require, verify-ca, verify-full (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// Accept self-signed SQL Server certificates (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// Seconds to wait for a connection (default: 30).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Seconds any single statement may run (default: 300).
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Pool size. Auto-tuned from workers if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn kind(&self) -> Result<DatabaseKind> {
        DatabaseKind::parse(&self.r#type)
    }

    /// Configured port, else the engine default.
    pub fn effective_port(&self) -> u16 {
        self.port
            .or_else(|| self.kind().ok().map(|k| k.default_port()))
            .unwrap_or_default()
    }

    /// Configured schema, else the engine default.
    pub fn effective_schema(&self) -> String {
        match &self.schema {
            Some(s) => s.clone(),
            None => self
                .kind()
                .map(|k| k.default_schema())
                .unwrap_or("public")
                .to_string(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn get_max_connections(&self) -> usize {
        self.max_connections.unwrap_or(4)
    }

    /// `host:port/database`, for log lines.
    pub fn display_name(&self) -> String {
        format!("{}:{}/{}", self.host, self.effective_port(), self.database)
    }
}

/// How a batch with row-level failures is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Commit the rows that succeeded; report the rest.
    #[default]
    Partial,
    /// Roll back the whole batch if any row fails.
    Atomic,
}

/// Ordering applied to rows of a self-referencing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingStrategy {
    /// Parents before children for any input order.
    #[default]
    Topological,
    /// Roots first, then ascending foreign key value.
    ForeignKeyAscending,
}

/// Substitutions for nulls headed into NOT NULL columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NullFallbackConfig {
    /// Value written into NOT NULL code columns (default: "UNKNOWN").
    #[serde(default = "default_code_sentinel")]
    pub code_sentinel: String,

    /// Names of code columns. `code` also matches `product_code` etc.
    #[serde(default = "default_code_columns")]
    pub code_columns: Vec<String>,

    /// Last-modified timestamp columns.
    #[serde(default = "default_modified_columns")]
    pub modified_columns: Vec<String>,

    /// Creation timestamp columns, read from the same row as a fallback value.
    #[serde(default = "default_created_columns")]
    pub created_columns: Vec<String>,
}

impl Default for NullFallbackConfig {
    fn default() -> Self {
        Self {
            code_sentinel: default_code_sentinel(),
            code_columns: default_code_columns(),
            modified_columns: default_modified_columns(),
            created_columns: default_created_columns(),
        }
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Rows per batch. Auto-tuned based on RAM if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Tables migrated at once (default: 1, sequential).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Count rows and check schemas without reading or writing data.
    #[serde(default)]
    pub dry_run: bool,

    /// Abort a table on its first failed batch.
    #[serde(default)]
    pub fail_fast: bool,

    #[serde(default)]
    pub write_mode: WriteMode,

    /// Report every row error instead of a sample.
    #[serde(default)]
    pub verbose: bool,

    /// Offset to resume from. Must be a multiple of batch_size.
    #[serde(default)]
    pub start_offset: u64,

    /// Source tables to migrate. Empty means every table in the source schema.
    #[serde(default)]
    pub tables: Vec<String>,

    /// Source tables to skip.
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    #[serde(default)]
    pub ordering: OrderingStrategy,

    #[serde(default)]
    pub null_fallback: NullFallbackConfig,

    /// Column name suffixes that mark timestamp columns.
    #[serde(default = "default_timestamp_suffixes")]
    pub timestamp_suffixes: Vec<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            workers: None,
            dry_run: false,
            fail_fast: false,
            write_mode: WriteMode::default(),
            verbose: false,
            start_offset: 0,
            tables: Vec::new(),
            exclude_tables: Vec::new(),
            ordering: OrderingStrategy::default(),
            null_fallback: NullFallbackConfig::default(),
            timestamp_suffixes: default_timestamp_suffixes(),
        }
    }
}

impl MigrationConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        // Batch size: 1K rows per 2GB of RAM, between 1K and 10K.
        // Rows are inserted one statement at a time, so larger batches only
        // lengthen transactions.
        if self.batch_size.is_none() {
            let batch = ((resources.total_memory_gb / 2.0) as usize * 1_000).clamp(1_000, 10_000);
            self.batch_size = Some(batch);
        }

        info!(
            "Auto-tuned config: batch_size={}, workers={}",
            self.get_batch_size(),
            self.get_workers(),
        );

        self
    }

    pub fn get_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(1_000)
    }

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(1)
    }
}

/// Name and column mapping for one source table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableMapping {
    pub source_table: String,

    /// Target table name (default: lowercased source name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_table: Option<String>,

    #[serde(default)]
    pub columns: Vec<ColumnMapping>,

    /// Source columns never written to the target.
    #[serde(default)]
    pub exclude_columns: Vec<String>,

    /// Parent/child columns when the target has no self-referencing foreign key
    /// in its catalog but rows still need ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_reference: Option<SelfReference>,
}

impl TableMapping {
    pub fn target_table_name(&self) -> String {
        self.target_table
            .clone()
            .unwrap_or_else(|| self.source_table.to_lowercase())
    }

    pub fn column(&self, source_column: &str) -> Option<&ColumnMapping> {
        self.columns
            .iter()
            .find(|c| c.source_column == source_column)
            .or_else(|| {
                self.columns
                    .iter()
                    .find(|c| c.source_column.eq_ignore_ascii_case(source_column))
            })
    }

    pub fn is_excluded(&self, source_column: &str) -> bool {
        self.exclude_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(source_column))
    }
}

/// Mapping of one source column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub source_column: String,
    pub target_column: String,

    /// Named transformation, e.g. `trim` or `truncate:50`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<String>,

    /// Written when the source value is null and the target column is NOT NULL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    /// Overrides the nullability read from the target catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
}

/// Key columns of a parent/child hierarchy within one table, in target names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfReference {
    pub parent_key: String,
    pub foreign_key: String,
}

// Default value functions for serde
fn default_require() -> String {
    "require".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_query_timeout() -> u64 {
    300
}

fn default_code_sentinel() -> String {
    "UNKNOWN".to_string()
}

fn default_code_columns() -> Vec<String> {
    vec!["code".to_string()]
}

fn default_modified_columns() -> Vec<String> {
    ["updated_at", "modified_at", "last_modified", "last_modified_at", "updated_on"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_created_columns() -> Vec<String> {
    ["created_at", "created_on", "created_date", "creation_date"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_timestamp_suffixes() -> Vec<String> {
    ["_at", "_date", "_time", "_timestamp", "_on"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
