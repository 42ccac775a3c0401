//! PostgreSQL adapter.
//!
//! Uses tokio-postgres over a deadpool pool. Identifiers are double-quoted,
//! parameters are `$1..$n`, and pages are read with `LIMIT .. OFFSET`.
//! Each inserted row runs under its own savepoint so a rejected row does not
//! abort the surrounding transaction.

mod catalog;
mod convert;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, info};

use crate::adapter::{
    coerce_value, with_timeout, AdapterTransaction, DatabaseAdapter, QueryResult, ResultRow,
};
use crate::config::ConnectionConfig;
use crate::core::{Row, Value};
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};
use crate::introspect::CatalogQueries;
use crate::typemap::{postgres_alias_mappings, DataTypeMapping};

/// TCP keepalive idle time for pooled connections.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);

/// Target-side adapter for PostgreSQL.
pub struct PostgresAdapter {
    config: ConnectionConfig,
    pool: Option<Pool>,
    order_keys: Mutex<HashMap<String, Vec<String>>>,
}

impl PostgresAdapter {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            pool: None,
            order_keys: Mutex::new(HashMap::new()),
        }
    }

    fn pool(&self) -> Result<&Pool> {
        self.pool
            .as_ref()
            .ok_or_else(|| MigrateError::connection("postgres", "not connected"))
    }

    async fn client(&self) -> Result<Object> {
        self.pool()?
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting PostgreSQL connection"))
    }

    fn pg_config(&self) -> PgConfig {
        let mut pg = PgConfig::new();
        pg.host(&self.config.host);
        pg.port(self.config.effective_port());
        pg.dbname(&self.config.database);
        pg.user(&self.config.user);
        pg.password(&self.config.password);
        pg.application_name("dbshift");
        pg.connect_timeout(self.config.connect_timeout());
        pg.keepalives(true);
        pg.keepalives_idle(KEEPALIVE_IDLE);
        pg
    }

    async fn query(&self, sql: &str, params: &[Value], operation: &str) -> Result<Vec<tokio_postgres::Row>> {
        with_timeout(self.query_timeout(), operation, async {
            let client = self.client().await?;
            client.query(sql, &param_refs(params)).await.map_err(convert::classify)
        })
        .await
    }

    fn cached_order(&self, key: &str) -> Option<Vec<String>> {
        self.order_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    async fn order_columns(&self, table: &str, schema: &str) -> Result<Vec<String>> {
        let key = format!("{}.{}", schema, table);
        if let Some(columns) = self.cached_order(&key) {
            return Ok(columns);
        }
        let columns = self.get_table_schema(table, Some(schema)).await?.order_columns();
        self.order_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, columns.clone());
        Ok(columns)
    }
}

fn param_refs(values: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn insert_sql(qualified_table: &str, columns: &[&str]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", qualified_table);
    }
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let params: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified_table,
        cols.join(", "),
        params.join(", ")
    )
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn name(&self) -> &str {
        "postgres"
    }

    fn default_schema(&self) -> String {
        self.config.effective_schema()
    }

    fn query_timeout(&self) -> Duration {
        self.config.query_timeout()
    }

    async fn connect(&mut self) -> Result<()> {
        if self.pool.is_some() {
            return Ok(());
        }
        let ssl = SslMode::parse(&self.config.ssl_mode)?;
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = match ssl.postgres_connector()? {
            Some(tls) => Manager::from_config(self.pg_config(), tls, mgr_config),
            None => Manager::from_config(self.pg_config(), NoTls, mgr_config),
        };
        let max_size = self.config.get_max_connections();
        let pool = Pool::builder(mgr)
            .max_size(max_size)
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL pool"))?;

        let name = self.config.display_name();
        with_timeout(self.config.connect_timeout(), "connecting to PostgreSQL", async {
            let client = pool
                .get()
                .await
                .map_err(|e| MigrateError::connection("postgres", format!("{}: {}", name, e)))?;
            client
                .simple_query("SELECT 1")
                .await
                .map_err(convert::classify)?;
            Ok(())
        })
        .await?;

        info!("Connected to PostgreSQL: {} (pool_size={})", name, max_size);
        self.pool = Some(pool);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.close();
            debug!("Disconnected from PostgreSQL: {}", self.config.display_name());
        }
        self.order_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        with_timeout(self.query_timeout(), "testing connection", async {
            let client = self.client().await?;
            client
                .simple_query("SELECT 1")
                .await
                .map_err(convert::classify)?;
            Ok(())
        })
        .await
        .is_ok()
    }

    fn catalog(&self) -> Option<&'static CatalogQueries> {
        Some(&catalog::CATALOG)
    }

    async fn execute_query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        with_timeout(self.query_timeout(), "executing query", async {
            let client = self.client().await?;
            let statement = client.prepare(sql).await.map_err(convert::classify)?;
            let params = param_refs(params);

            if statement.columns().is_empty() {
                let affected = client
                    .execute(&statement, &params)
                    .await
                    .map_err(convert::classify)?;
                return Ok(QueryResult {
                    row_count: affected,
                    ..QueryResult::default()
                });
            }

            let columns = statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect();
            let rows = client
                .query(&statement, &params)
                .await
                .map_err(convert::classify)?
                .iter()
                .map(|r| convert::read_row(r).map(ResultRow::Named))
                .collect::<Result<Vec<_>>>()?;
            Ok(QueryResult {
                columns,
                row_count: rows.len() as u64,
                rows,
            })
        })
        .await
    }

    async fn get_batch_data(
        &self,
        table: &str,
        offset: u64,
        limit: usize,
        schema: Option<&str>,
    ) -> Result<Vec<Row>> {
        let schema = schema
            .map(str::to_string)
            .unwrap_or_else(|| self.default_schema());
        let order_by: Vec<String> = self
            .order_columns(table, &schema)
            .await?
            .iter()
            .map(|c| quote_ident(c))
            .collect();
        let sql = format!(
            "SELECT * FROM {} ORDER BY {} LIMIT $1 OFFSET $2",
            self.qualify_table(table, Some(&schema)),
            order_by.join(", ")
        );
        let params = [
            Value::Int(i64::try_from(limit).unwrap_or(i64::MAX)),
            Value::Int(i64::try_from(offset).unwrap_or(i64::MAX)),
        ];
        let rows = self.query(&sql, &params, "reading batch").await?;
        debug!("{}.{}: read {} rows at offset {}", schema, table, rows.len(), offset);
        rows.iter().map(convert::read_row).collect()
    }

    async fn begin(&self, table: &str, schema: Option<&str>) -> Result<Box<dyn AdapterTransaction>> {
        let client = self.client().await?;
        with_timeout(self.query_timeout(), "BEGIN", async {
            client.batch_execute("BEGIN").await.map_err(convert::classify)
        })
        .await?;
        Ok(Box::new(PostgresTransaction {
            client,
            table: self.qualify_table(table, schema),
            timeout: self.query_timeout(),
        }))
    }

    async fn get_row_count(&self, table: &str, schema: Option<&str>) -> Result<u64> {
        let sql = format!("SELECT count(*) FROM {}", self.qualify_table(table, schema));
        let rows = self.query(&sql, &[], "counting rows").await?;
        let count: i64 = match rows.first() {
            Some(row) => row
                .try_get(0)
                .map_err(|e| MigrateError::Statement(format!("reading row count: {}", e)))?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    fn get_data_type_mapping(&self) -> Vec<DataTypeMapping> {
        postgres_alias_mappings()
    }

    fn escape_identifier(&self, name: &str) -> String {
        quote_ident(name)
    }

    fn build_insert_query(&self, table: &str, columns: &[&str], schema: Option<&str>) -> String {
        insert_sql(&self.qualify_table(table, schema), columns)
    }
}

/// A transaction holding one pooled client until commit or rollback.
struct PostgresTransaction {
    client: Object,
    table: String,
    timeout: Duration,
}

impl PostgresTransaction {
    /// Prepare (cached per column list), coerce to the parameter types the
    /// server inferred, execute.
    async fn insert(&self, row: &Row) -> Result<()> {
        let columns: Vec<&str> = row.columns().collect();
        let statement = self
            .client
            .prepare_cached(&insert_sql(&self.table, &columns))
            .await
            .map_err(convert::classify)?;
        let values = row
            .values()
            .zip(statement.params())
            .map(|(value, ty)| coerce_value(value.clone(), ty.name()))
            .collect::<Result<Vec<_>>>()?;
        self.client
            .execute(&statement, &param_refs(&values))
            .await
            .map_err(convert::classify)?;
        Ok(())
    }

    async fn finish(&self, sql: &str) -> Result<()> {
        with_timeout(self.timeout, sql, async {
            self.client.batch_execute(sql).await.map_err(convert::classify)
        })
        .await
    }
}

#[async_trait]
impl AdapterTransaction for PostgresTransaction {
    async fn insert_row(&mut self, row: &Row) -> Result<()> {
        let this = &*self;
        with_timeout(self.timeout, "inserting row", async move {
            this.client
                .batch_execute("SAVEPOINT dbshift_row")
                .await
                .map_err(convert::classify)?;
            match this.insert(row).await {
                Ok(()) => this
                    .client
                    .batch_execute("RELEASE SAVEPOINT dbshift_row")
                    .await
                    .map_err(convert::classify),
                Err(e) if e.is_connectivity() => Err(e),
                Err(e) => {
                    this.client
                        .batch_execute("ROLLBACK TO SAVEPOINT dbshift_row")
                        .await
                        .map_err(convert::classify)?;
                    Err(e)
                }
            }
        })
        .await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}
