//! In-process tables behind the adapter contract.
//!
//! A [`MemoryDatabase`] is a shared handle; every [`MemoryAdapter`] created from
//! it sees the same tables. Inserts enforce NOT NULL, primary key, unique
//! column and self-referencing foreign key constraints the way a real target
//! would, and failures can be injected to exercise error paths.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::adapter::{AdapterTransaction, DatabaseAdapter, QueryResult};
use crate::core::{Row, TableSchema, Value};
use crate::error::{MigrateError, Result};
use crate::typemap::DataTypeMapping;

const DEFAULT_SCHEMA: &str = "public";

#[derive(Debug, Default)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    unavailable: bool,
    connection_drops_after: Option<usize>,
    read_timeouts: Vec<(String, u64)>,
    rejected: Vec<(String, String, Value)>,
    insert_attempts: usize,
    inserted: usize,
    connects: usize,
    disconnects: usize,
}

impl MemoryState {
    fn table(&self, key: &str) -> Result<&MemoryTable> {
        self.tables
            .get(key)
            .ok_or_else(|| MigrateError::Introspection(format!("table {} not found", key)))
    }
}

/// Shared in-memory tables and counters.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

fn table_key(schema: Option<&str>, table: &str) -> String {
    format!("{}.{}", schema.unwrap_or(DEFAULT_SCHEMA), table).to_lowercase()
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create (or replace) a table. A schema-less table goes in `public`.
    pub fn create_table(&self, mut schema: TableSchema) {
        if schema.schema.is_none() {
            schema.schema = Some(DEFAULT_SCHEMA.to_string());
        }
        let key = table_key(schema.schema.as_deref(), &schema.name);
        self.lock().tables.insert(
            key,
            MemoryTable {
                schema,
                rows: Vec::new(),
            },
        );
    }

    /// Append rows without constraint checks.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        if let Some(t) = self.lock().tables.get_mut(&table_key(None, table)) {
            t.rows.extend(rows);
        }
    }

    /// Committed rows of a `public` table, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(&table_key(None, table))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Make `connect` and every statement fail with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Drop the connection once, after `n` more successful inserts. The
    /// failing insert is the only one affected.
    pub fn drop_connection_after(&self, n: usize) {
        let mut state = self.lock();
        state.connection_drops_after = Some(state.inserted + n);
    }

    /// Make the page read of `table` starting at `offset` time out once.
    pub fn time_out_read_at(&self, table: &str, offset: u64) {
        self.lock()
            .read_timeouts
            .push((table_key(None, table), offset));
    }

    /// Reject inserts whose `column` equals `value`, like a check constraint.
    pub fn reject_value(&self, table: &str, column: &str, value: impl Into<Value>) {
        self.lock()
            .rejected
            .push((table.to_lowercase(), column.to_lowercase(), value.into()));
    }

    /// Every `insert_row` call, successful or not.
    pub fn insert_attempts(&self) -> usize {
        self.lock().insert_attempts
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }
}

/// Adapter over a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemoryAdapter {
    db: MemoryDatabase,
    schema: String,
    connected: bool,
}

impl MemoryAdapter {
    pub fn new(db: MemoryDatabase) -> Self {
        Self {
            db,
            schema: DEFAULT_SCHEMA.to_string(),
            connected: false,
        }
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    fn key(&self, table: &str, schema: Option<&str>) -> String {
        table_key(Some(schema.unwrap_or(&self.schema)), table)
    }

    fn check_connected(&self) -> Result<()> {
        if !self.connected {
            return Err(MigrateError::connection("memory", "not connected"));
        }
        if self.db.lock().unavailable {
            return Err(MigrateError::connection("memory", "database unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseAdapter for MemoryAdapter {
    fn name(&self) -> &str {
        "memory"
    }

    fn default_schema(&self) -> String {
        self.schema.clone()
    }

    fn query_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn connect(&mut self) -> Result<()> {
        let mut state = self.db.lock();
        if state.unavailable {
            return Err(MigrateError::connection("memory", "database unavailable"));
        }
        state.connects += 1;
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            self.db.lock().disconnects += 1;
            self.connected = false;
        }
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        !self.db.lock().unavailable
    }

    async fn get_schemas(&self) -> Result<Vec<String>> {
        self.check_connected()?;
        let mut schemas: Vec<String> = self
            .db
            .lock()
            .tables
            .values()
            .filter_map(|t| t.schema.schema.clone())
            .collect();
        schemas.dedup();
        Ok(schemas)
    }

    async fn get_tables(&self, schema: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .introspect_database(schema)
            .await?
            .into_iter()
            .map(|t| t.name)
            .collect())
    }

    async fn get_table_schema(&self, table: &str, schema: Option<&str>) -> Result<TableSchema> {
        self.check_connected()?;
        let state = self.db.lock();
        Ok(state.table(&self.key(table, schema))?.schema.clone())
    }

    async fn introspect_database(&self, schema: Option<&str>) -> Result<Vec<TableSchema>> {
        self.check_connected()?;
        let schema = schema.unwrap_or(&self.schema);
        Ok(self
            .db
            .lock()
            .tables
            .values()
            .filter(|t| {
                t.schema
                    .schema
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case(schema))
            })
            .map(|t| t.schema.clone())
            .collect())
    }

    async fn execute_query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.check_connected()?;
        Err(MigrateError::Statement(format!(
            "memory adapter cannot execute SQL: {}",
            sql
        )))
    }

    async fn get_batch_data(
        &self,
        table: &str,
        offset: u64,
        limit: usize,
        schema: Option<&str>,
    ) -> Result<Vec<Row>> {
        self.check_connected()?;
        let key = self.key(table, schema);
        let mut state = self.db.lock();
        if let Some(pos) = state
            .read_timeouts
            .iter()
            .position(|(t, at)| *t == key && *at == offset)
        {
            state.read_timeouts.remove(pos);
            return Err(MigrateError::Timeout {
                operation: "reading batch".to_string(),
                seconds: self.query_timeout().as_secs(),
            });
        }
        let rows = &state.table(&key)?.rows;
        Ok(rows
            .iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn begin(&self, table: &str, schema: Option<&str>) -> Result<Box<dyn AdapterTransaction>> {
        self.check_connected()?;
        let key = self.key(table, schema);
        self.db.lock().table(&key)?;
        Ok(Box::new(MemoryTransaction {
            db: self.db.clone(),
            key,
            staged: Vec::new(),
        }))
    }

    async fn get_row_count(&self, table: &str, schema: Option<&str>) -> Result<u64> {
        self.check_connected()?;
        let state = self.db.lock();
        Ok(state.table(&self.key(table, schema))?.rows.len() as u64)
    }

    fn get_data_type_mapping(&self) -> Vec<DataTypeMapping> {
        Vec::new()
    }

    fn escape_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn build_insert_query(&self, table: &str, columns: &[&str], schema: Option<&str>) -> String {
        let cols: Vec<String> = columns.iter().map(|c| self.escape_identifier(c)).collect();
        let params: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualify_table(table, schema),
            cols.join(", "),
            params.join(", ")
        )
    }
}

/// Rows staged until commit.
struct MemoryTransaction {
    db: MemoryDatabase,
    key: String,
    staged: Vec<Row>,
}

impl MemoryTransaction {
    fn check(&self, state: &MemoryState, row: &Row) -> Result<()> {
        let table = state.table(&self.key)?;
        let schema = &table.schema;
        let name = schema.name.to_lowercase();

        for (column, _) in row.iter() {
            if !schema.has_column(column) {
                return Err(MigrateError::Statement(format!(
                    "column \"{}\" of relation \"{}\" does not exist",
                    column, schema.name
                )));
            }
        }

        for (t, column, value) in &state.rejected {
            if *t == name && row.get_ignore_case(column) == Some(value) {
                return Err(MigrateError::Statement(format!(
                    "new row for relation \"{}\" violates check constraint on \"{}\"",
                    schema.name, column
                )));
            }
        }

        for column in &schema.columns {
            let missing = row.get_ignore_case(&column.name).map_or(true, Value::is_null);
            if missing && !column.nullable && column.default_value.is_none() && !column.auto_increment {
                return Err(MigrateError::Statement(format!(
                    "null value in column \"{}\" violates not-null constraint",
                    column.name
                )));
            }
        }

        let existing = || table.rows.iter().chain(self.staged.iter());
        let mut unique_sets: Vec<Vec<String>> = schema
            .columns
            .iter()
            .filter(|c| c.unique)
            .map(|c| vec![c.name.clone()])
            .collect();
        if !schema.primary_key.is_empty() {
            unique_sets.push(schema.primary_key.clone());
        }
        for columns in &unique_sets {
            let key: Vec<Option<&Value>> = columns.iter().map(|c| row.get_ignore_case(c)).collect();
            if key.iter().any(|v| v.map_or(true, Value::is_null)) {
                continue;
            }
            if existing().any(|other| {
                columns
                    .iter()
                    .map(|c| other.get_ignore_case(c))
                    .eq(key.iter().copied())
            }) {
                return Err(MigrateError::Statement(format!(
                    "duplicate key value violates unique constraint on ({})",
                    columns.join(", ")
                )));
            }
        }

        if let Some(fk) = schema.self_reference() {
            if let (Some(child), Some(parent)) = (fk.columns.first(), fk.referenced_columns.first()) {
                if let Some(value) = row.get_ignore_case(child).filter(|v| !v.is_null()) {
                    let referenced = row.get_ignore_case(parent) == Some(value)
                        || existing().any(|other| other.get_ignore_case(parent) == Some(value));
                    if !referenced {
                        return Err(MigrateError::Statement(format!(
                            "insert on \"{}\" violates foreign key constraint \"{}\"",
                            schema.name, fk.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AdapterTransaction for MemoryTransaction {
    async fn insert_row(&mut self, row: &Row) -> Result<()> {
        let mut state = self.db.lock();
        state.insert_attempts += 1;
        if state.unavailable {
            return Err(MigrateError::connection("memory", "connection reset by peer"));
        }
        if state
            .connection_drops_after
            .is_some_and(|limit| state.inserted >= limit)
        {
            state.connection_drops_after = None;
            return Err(MigrateError::connection("memory", "connection reset by peer"));
        }
        self.check(&state, row)?;
        state.inserted += 1;
        drop(state);
        self.staged.push(row.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { db, key, staged } = *self;
        let mut state = db.lock();
        if state.unavailable {
            return Err(MigrateError::connection("memory", "connection reset by peer"));
        }
        let table = state
            .tables
            .get_mut(&key)
            .ok_or_else(|| MigrateError::Statement(format!("table {} dropped", key)))?;
        table.rows.extend(staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
