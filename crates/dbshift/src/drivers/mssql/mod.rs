//! SQL Server adapter.
//!
//! Uses tiberius over a bb8 pool. Identifiers are quoted with brackets,
//! parameters are `@P1..@Pn`, and pages are read with
//! `ORDER BY .. OFFSET .. FETCH NEXT`.

mod catalog;
mod convert;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tiberius::{AuthMethod, Client, Config, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::adapter::{with_timeout, AdapterTransaction, DatabaseAdapter, QueryResult, ResultRow};
use crate::config::ConnectionConfig;
use crate::core::{Row, Value};
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};
use crate::introspect::CatalogQueries;
use crate::typemap::{mssql_to_postgres_mappings, DataTypeMapping};

/// Idle connection timeout (5 minutes).
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: ConnectionConfig,
    ssl: SslMode,
}

impl TiberiusConnectionManager {
    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.effective_port());
        config.database(&self.config.database);
        config.application_name("dbshift");
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        let (level, trust) = self.ssl.mssql_encryption(self.config.trust_server_cert);
        config.encryption(level);
        if trust {
            config.trust_cert();
        }
        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;
        tcp.set_nodelay(true).ok();
        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Source-side adapter for SQL Server.
pub struct MssqlAdapter {
    config: ConnectionConfig,
    pool: Option<Pool<TiberiusConnectionManager>>,
    /// Read order per `schema.table`, resolved on first read.
    order_keys: Mutex<HashMap<String, Vec<String>>>,
}

impl MssqlAdapter {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            pool: None,
            order_keys: Mutex::new(HashMap::new()),
        }
    }

    fn pool(&self) -> Result<&Pool<TiberiusConnectionManager>> {
        self.pool
            .as_ref()
            .ok_or_else(|| MigrateError::connection("mssql", "not connected"))
    }

    async fn client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool()?
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting MSSQL connection from pool"))
    }

    async fn fetch(&self, sql: String, params: &[Value], operation: &str) -> Result<Vec<tiberius::Row>> {
        with_timeout(self.query_timeout(), operation, async {
            let mut client = self.client().await?;
            let mut query = Query::new(sql);
            for param in params {
                convert::bind(&mut query, param);
            }
            let stream = query.query(&mut *client).await.map_err(convert::classify)?;
            stream.into_first_result().await.map_err(convert::classify)
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

fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn insert_sql(qualified_table: &str, columns: &[&str]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", qualified_table);
    }
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let params: Vec<String> = (1..=columns.len()).map(|i| format!("@P{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified_table,
        cols.join(", "),
        params.join(", ")
    )
}

#[async_trait]
impl DatabaseAdapter for MssqlAdapter {
    fn name(&self) -> &str {
        "mssql"
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
        let manager = TiberiusConnectionManager {
            config: self.config.clone(),
            ssl,
        };
        let name = self.config.display_name();
        let max_size = self.config.get_max_connections() as u32;
        let connect_timeout = self.config.connect_timeout();

        let pool = with_timeout(connect_timeout, "connecting to MSSQL", async {
            let pool = Pool::builder()
                .max_size(max_size)
                .connection_timeout(connect_timeout)
                .idle_timeout(Some(POOL_IDLE_TIMEOUT))
                .test_on_check_out(true)
                .build(manager)
                .await
                .map_err(|e| MigrateError::connection("mssql", format!("{}: {}", name, e)))?;
            {
                let mut conn = pool
                    .get()
                    .await
                    .map_err(|e| MigrateError::connection("mssql", format!("{}: {}", name, e)))?;
                conn.simple_query("SELECT 1")
                    .await
                    .map_err(convert::classify)?
                    .into_row()
                    .await
                    .map_err(convert::classify)?;
            }
            Ok(pool)
        })
        .await?;

        info!("Connected to MSSQL: {} (pool_size={})", name, max_size);
        self.pool = Some(pool);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.pool.take().is_some() {
            debug!("Disconnected from MSSQL: {}", self.config.display_name());
        }
        self.order_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        self.fetch("SELECT 1".to_string(), &[], "testing connection")
            .await
            .is_ok()
    }

    fn catalog(&self) -> Option<&'static CatalogQueries> {
        Some(&catalog::CATALOG)
    }

    async fn execute_query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let rows = self.fetch(sql.to_string(), params, "executing query").await?;
        let columns = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = rows
            .into_iter()
            .map(|r| convert::read_values(r).map(ResultRow::Positional))
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryResult {
            columns,
            row_count: rows.len() as u64,
            rows,
        })
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
            "SELECT * FROM {} ORDER BY {} OFFSET @P1 ROWS FETCH NEXT @P2 ROWS ONLY",
            self.qualify_table(table, Some(&schema)),
            order_by.join(", ")
        );
        let params = [
            Value::Int(i64::try_from(offset).unwrap_or(i64::MAX)),
            Value::Int(i64::try_from(limit).unwrap_or(i64::MAX)),
        ];
        let rows = self.fetch(sql, &params, "reading batch").await?;
        debug!("{}.{}: read {} rows at offset {}", schema, table, rows.len(), offset);
        rows.into_iter().map(convert::read_row).collect()
    }

    async fn begin(&self, table: &str, schema: Option<&str>) -> Result<Box<dyn AdapterTransaction>> {
        let mut conn = self
            .pool()?
            .get_owned()
            .await
            .map_err(|e| MigrateError::pool(e, "opening MSSQL transaction"))?;
        with_timeout(self.query_timeout(), "BEGIN TRANSACTION", async {
            conn.simple_query("SET XACT_ABORT OFF; BEGIN TRANSACTION")
                .await
                .map_err(convert::classify)?
                .into_results()
                .await
                .map_err(convert::classify)?;
            Ok(())
        })
        .await?;
        Ok(Box::new(MssqlTransaction {
            conn,
            table: self.qualify_table(table, schema),
            timeout: self.query_timeout(),
        }))
    }

    async fn get_row_count(&self, table: &str, schema: Option<&str>) -> Result<u64> {
        let sql = format!("SELECT COUNT_BIG(*) FROM {}", self.qualify_table(table, schema));
        let rows = self.fetch(sql, &[], "counting rows").await?;
        let count = match rows.into_iter().next() {
            Some(row) => convert::read_values(row)?
                .first()
                .and_then(Value::as_i64)
                .unwrap_or(0),
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    fn get_data_type_mapping(&self) -> Vec<DataTypeMapping> {
        mssql_to_postgres_mappings()
    }

    fn escape_identifier(&self, name: &str) -> String {
        quote_ident(name)
    }

    fn build_insert_query(&self, table: &str, columns: &[&str], schema: Option<&str>) -> String {
        insert_sql(&self.qualify_table(table, schema), columns)
    }
}

/// A transaction pinned to one pooled connection.
struct MssqlTransaction {
    conn: PooledConnection<'static, TiberiusConnectionManager>,
    table: String,
    timeout: Duration,
}

impl MssqlTransaction {
    async fn simple(&mut self, sql: &str) -> Result<()> {
        let conn = &mut self.conn;
        with_timeout(self.timeout, sql, async move {
            conn.simple_query(sql)
                .await
                .map_err(convert::classify)?
                .into_results()
                .await
                .map_err(convert::classify)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl AdapterTransaction for MssqlTransaction {
    async fn insert_row(&mut self, row: &Row) -> Result<()> {
        let columns: Vec<&str> = row.columns().collect();
        let mut query = Query::new(insert_sql(&self.table, &columns));
        for value in row.values() {
            convert::bind(&mut query, value);
        }
        let conn = &mut self.conn;
        with_timeout(self.timeout, "inserting row", async move {
            query.execute(&mut **conn).await.map_err(convert::classify)?;
            Ok(())
        })
        .await
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.simple("COMMIT TRANSACTION").await
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.simple("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> MssqlAdapter {
        let config: ConnectionConfig = serde_yaml::from_str(
            "type: mssql\nhost: localhost\ndatabase: legacy\nuser: sa\npassword: secret\n",
        )
        .unwrap();
        MssqlAdapter::new(config)
    }

    #[test]
    fn test_quoting_and_insert() {
        let a = adapter();
        assert_eq!(a.escape_identifier("Order]Lines"), "[Order]]Lines]");
        assert_eq!(a.qualify_table("Users", None), "[dbo].[Users]");
        assert_eq!(
            a.build_insert_query("Users", &["Id", "Name"], Some("crm")),
            "INSERT INTO [crm].[Users] ([Id], [Name]) VALUES (@P1, @P2)"
        );
        assert_eq!(
            a.build_insert_query("Users", &[], None),
            "INSERT INTO [dbo].[Users] DEFAULT VALUES"
        );
    }

    #[test]
    fn test_tiberius_config() {
        let a = adapter();
        let manager = TiberiusConnectionManager {
            config: a.config.clone(),
            ssl: SslMode::Disable,
        };
        assert_eq!(manager.build_config().get_addr(), "localhost:1433");
    }

    #[tokio::test]
    async fn test_unconnected_adapter() {
        let a = adapter();
        assert!(!a.test_connection().await);
        let err = a.get_row_count("Users", None).await.unwrap_err();
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_catalog_placeholders() {
        let a = adapter();
        let catalog = a.catalog().unwrap();
        assert!(catalog.columns.contains("@P1") && catalog.columns.contains("@P2"));
        assert!(catalog.tables.contains("@P1"));
    }
}
