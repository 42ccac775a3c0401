//! Uniform adapter contract over one database dialect.
//!
//! The engine never talks to a driver directly. Everything it needs from a
//! database goes through [`DatabaseAdapter`]: connection lifecycle, catalog
//! reads, paged reads, transactional writes, row counts, type mapping, and SQL
//! escaping. Concrete adapters live in [`crate::drivers`].

mod coerce;

pub use coerce::coerce_value;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ConnectionConfig, DatabaseKind, WriteMode};
use crate::core::{BatchResult, Row, TableSchema, Value};
use crate::error::{MigrateError, Result};
use crate::introspect::{CatalogQueries, SchemaIntrospector};
use crate::pipeline::BatchWriter;
use crate::typemap::{DataTypeMapping, TypeRegistry};

/// One row of a query result, in whichever shape the driver produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultRow {
    Positional(Vec<Value>),
    Named(Row),
}

impl ResultRow {
    /// Look up a field by name, falling back to position for positional rows.
    pub fn get(&self, position: usize, name: &str) -> Option<&Value> {
        match self {
            ResultRow::Positional(values) => values.get(position),
            ResultRow::Named(row) => row.get_ignore_case(name),
        }
    }

    pub fn get_string(&self, position: usize, name: &str) -> Option<String> {
        match self.get(position, name)? {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn get_i64(&self, position: usize, name: &str) -> Option<i64> {
        self.get(position, name).and_then(Value::as_i64)
    }

    /// Booleans may arrive as bools, 0/1, or `YES`/`NO` strings.
    pub fn get_bool(&self, position: usize, name: &str) -> bool {
        match self.get(position, name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Text(s)) => matches!(
                s.trim().to_uppercase().as_str(),
                "YES" | "Y" | "TRUE" | "T" | "1"
            ),
            Some(v) => v.as_i64().map(|n| n != 0).unwrap_or(false),
            None => false,
        }
    }
}

/// Rows returned by [`DatabaseAdapter::execute_query`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
    /// Rows returned, or rows affected for statements without a result set.
    pub row_count: u64,
}

/// An open write transaction bound to one target table.
#[async_trait]
pub trait AdapterTransaction: Send {
    /// Insert one row. A failure leaves the transaction usable unless the
    /// error is a connectivity error.
    async fn insert_row(&mut self, row: &Row) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Capability surface every database must provide.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Short engine name, e.g. `postgres`.
    fn name(&self) -> &str;

    /// Schema used when a call passes `None`.
    fn default_schema(&self) -> String;

    /// Per-statement timeout from the connection config.
    fn query_timeout(&self) -> Duration;

    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    /// Round-trip check. Never fails; errors are reported as `false`.
    async fn test_connection(&self) -> bool;

    /// Catalog SQL for the introspector, if the adapter speaks SQL.
    fn catalog(&self) -> Option<&'static CatalogQueries> {
        None
    }

    async fn get_schemas(&self) -> Result<Vec<String>> {
        SchemaIntrospector::new(self).schemas().await
    }

    async fn get_tables(&self, schema: Option<&str>) -> Result<Vec<String>> {
        let schema = schema
            .map(str::to_string)
            .unwrap_or_else(|| self.default_schema());
        SchemaIntrospector::new(self).tables(&schema).await
    }

    async fn get_table_schema(&self, table: &str, schema: Option<&str>) -> Result<TableSchema> {
        let schema = schema
            .map(str::to_string)
            .unwrap_or_else(|| self.default_schema());
        SchemaIntrospector::new(self)
            .get_table_schema(table, &schema)
            .await
    }

    async fn introspect_database(&self, schema: Option<&str>) -> Result<Vec<TableSchema>> {
        let schema = schema
            .map(str::to_string)
            .unwrap_or_else(|| self.default_schema());
        SchemaIntrospector::new(self).introspect(&schema).await
    }

    /// Run a parameterized statement.
    async fn execute_query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Read `limit` rows starting at `offset`, ordered by primary key (or the
    /// first column) so repeated calls page through the table without gaps.
    async fn get_batch_data(
        &self,
        table: &str,
        offset: u64,
        limit: usize,
        schema: Option<&str>,
    ) -> Result<Vec<Row>>;

    /// Open a transaction for inserting into `table`.
    async fn begin(&self, table: &str, schema: Option<&str>) -> Result<Box<dyn AdapterTransaction>>;

    /// Insert rows in one transaction, isolating per-row failures.
    async fn insert_batch(
        &self,
        table: &str,
        rows: &[Row],
        schema: Option<&str>,
    ) -> Result<BatchResult> {
        Ok(BatchWriter::new(WriteMode::Partial)
            .write(self, table, schema, rows)
            .await)
    }

    /// Exact number of rows in the table.
    async fn get_row_count(&self, table: &str, schema: Option<&str>) -> Result<u64>;

    /// Type mappings from this dialect to the other side.
    fn get_data_type_mapping(&self) -> Vec<DataTypeMapping>;

    fn map_data_type(&self, data_type: &str) -> String {
        TypeRegistry::from_mappings(self.get_data_type_mapping()).map_type(data_type)
    }

    /// Convert a value for a column of `target_type`, applying the adapter's
    /// declared transformer for `source_type` first.
    fn transform_value(&self, value: Value, source_type: &str, target_type: &str) -> Result<Value> {
        let registry = TypeRegistry::from_mappings(self.get_data_type_mapping());
        let value = match registry
            .get(source_type)
            .filter(|m| m.requires_transformation)
            .and_then(|m| m.transformer.as_deref())
            .and_then(|name| name.parse::<crate::mapping::Transformation>().ok())
        {
            Some(t) => t.apply(value),
            None => value,
        };
        coerce_value(value, target_type)
    }

    fn escape_identifier(&self, name: &str) -> String;

    fn escape_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(_) | Value::Float(_) | Value::Decimal(_) => value.to_string(),
            other => format!("'{}'", other.to_string().replace('\'', "''")),
        }
    }

    /// Qualified, quoted table name.
    fn qualify_table(&self, table: &str, schema: Option<&str>) -> String {
        let schema = schema
            .map(str::to_string)
            .unwrap_or_else(|| self.default_schema());
        format!(
            "{}.{}",
            self.escape_identifier(&schema),
            self.escape_identifier(table)
        )
    }

    /// `INSERT INTO t (c1, c2) VALUES (<p1>, <p2>)` with dialect placeholders.
    fn build_insert_query(&self, table: &str, columns: &[&str], schema: Option<&str>) -> String;
}

/// Run a driver call under the adapter's timeout.
pub async fn with_timeout<T, F>(timeout: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(MigrateError::Timeout {
            operation: operation.to_string(),
            seconds: timeout.as_secs(),
        }),
    }
}

/// Creates unconnected adapters from connection settings.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, config: &ConnectionConfig) -> Result<Box<dyn DatabaseAdapter>>;
}

/// Factory for the network drivers compiled into this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverFactory;

impl AdapterFactory for DriverFactory {
    fn create(&self, config: &ConnectionConfig) -> Result<Box<dyn DatabaseAdapter>> {
        create_adapter(config)
    }
}

/// Build an adapter for the configured database type.
///
/// Unknown types fail with [`MigrateError::DriverUnavailable`]. In-memory
/// databases are not reachable from a config file alone and fail the same way.
pub fn create_adapter(config: &ConnectionConfig) -> Result<Box<dyn DatabaseAdapter>> {
    match config.kind()? {
        DatabaseKind::Mssql => Ok(Box::new(crate::drivers::MssqlAdapter::new(config.clone()))),
        DatabaseKind::Postgres => Ok(Box::new(crate::drivers::PostgresAdapter::new(
            config.clone(),
        ))),
        DatabaseKind::Memory => Err(MigrateError::DriverUnavailable(
            "memory (in-memory databases are only available to embedding code)".into(),
        )),
    }
}
