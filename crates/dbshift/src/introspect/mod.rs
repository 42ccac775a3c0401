//! Schema introspection through an adapter's catalog queries.
//!
//! Each SQL adapter supplies a [`CatalogQueries`] set. The introspector runs
//! them and assembles a [`TableSchema`]. Drivers may return rows as positional
//! arrays or as named records; both are read through [`ResultRow::get`], so the
//! queries below must keep their column order *and* their aliases.
//!
//! Introspection is read-only and does no caching.

use tracing::debug;

use crate::adapter::{DatabaseAdapter, ResultRow};
use crate::core::{
    ColumnDefinition, ConstraintDefinition, ConstraintKind, ForeignKeyDefinition,
    IndexDefinition, ReferentialAction, TableSchema, Value,
};
use crate::error::{MigrateError, Result};

/// Catalog SQL for one dialect.
///
/// Every query except `schemas` takes the schema name as its first parameter;
/// the per-table queries take the table name as the second.
#[derive(Debug)]
pub struct CatalogQueries {
    /// `schema_name`
    pub schemas: &'static str,
    /// `table_name`
    pub tables: &'static str,
    /// `column_name, data_type, is_nullable, column_default, max_length,
    /// numeric_precision, numeric_scale, is_identity`
    pub columns: &'static str,
    /// `column_name`, in key order
    pub primary_keys: &'static str,
    /// `constraint_name, column_name, referenced_schema, referenced_table,
    /// referenced_column, delete_rule, update_rule`, one row per column pair
    pub foreign_keys: &'static str,
    /// `index_name, column_name, is_unique, is_primary`, one row per column
    pub indexes: &'static str,
    /// `constraint_name, constraint_type, column_name, check_clause`
    pub constraints: &'static str,
}

/// Builds [`TableSchema`] snapshots from catalog queries.
pub struct SchemaIntrospector<'a, A: DatabaseAdapter + ?Sized> {
    adapter: &'a A,
}

impl<'a, A: DatabaseAdapter + ?Sized> SchemaIntrospector<'a, A> {
    pub fn new(adapter: &'a A) -> Self {
        Self { adapter }
    }

    fn queries(&self) -> Result<&'static CatalogQueries> {
        self.adapter.catalog().ok_or_else(|| {
            MigrateError::Introspection(format!(
                "{} adapter has no catalog queries",
                self.adapter.name()
            ))
        })
    }

    async fn query(&self, what: &str, sql: &str, params: &[Value]) -> Result<Vec<ResultRow>> {
        match self.adapter.execute_query(sql, params).await {
            Ok(result) => Ok(result.rows),
            Err(e) if e.is_connectivity() => Err(e),
            Err(e) => Err(MigrateError::Introspection(format!(
                "reading {}: {}",
                what, e
            ))),
        }
    }

    pub async fn schemas(&self) -> Result<Vec<String>> {
        let queries = self.queries()?;
        let rows = self.query("schemas", queries.schemas, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get_string(0, "schema_name"))
            .collect())
    }

    pub async fn tables(&self, schema: &str) -> Result<Vec<String>> {
        let queries = self.queries()?;
        let rows = self
            .query("tables", queries.tables, &[Value::from(schema)])
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get_string(0, "table_name"))
            .collect())
    }

    /// Describe every table in a schema.
    pub async fn introspect(&self, schema: &str) -> Result<Vec<TableSchema>> {
        let mut tables = Vec::new();
        for table in self.tables(schema).await? {
            tables.push(self.get_table_schema(&table, schema).await?);
        }
        Ok(tables)
    }

    /// Describe one table. A table with no columns does not exist.
    pub async fn get_table_schema(&self, table: &str, schema: &str) -> Result<TableSchema> {
        let queries = self.queries()?;
        let params = [Value::from(schema), Value::from(table)];

        let columns = self.query("columns", queries.columns, &params).await?;
        if columns.is_empty() {
            return Err(MigrateError::Introspection(format!(
                "table {}.{} not found",
                schema, table
            )));
        }

        let mut result = TableSchema::new(table, Some(schema.to_string()));
        result.columns = columns.iter().filter_map(parse_column).collect();

        let pk_rows = self
            .query("primary keys", queries.primary_keys, &params)
            .await?;
        result.primary_key = pk_rows
            .iter()
            .filter_map(|r| r.get_string(0, "column_name"))
            .collect();

        let fk_rows = self
            .query("foreign keys", queries.foreign_keys, &params)
            .await?;
        result.foreign_keys = group_foreign_keys(&fk_rows);

        let index_rows = self.query("indexes", queries.indexes, &params).await?;
        result.indexes = group_indexes(&index_rows);

        let constraint_rows = self
            .query("constraints", queries.constraints, &params)
            .await?;
        result.constraints = group_constraints(&constraint_rows);

        mark_unique_columns(&mut result);

        debug!(
            "Introspected {}: {} columns, pk {:?}, {} foreign keys, {} indexes",
            result.full_name(),
            result.columns.len(),
            result.primary_key,
            result.foreign_keys.len(),
            result.indexes.len()
        );
        Ok(result)
    }
}

fn parse_column(row: &ResultRow) -> Option<ColumnDefinition> {
    let positive = |v: Option<i64>| v.filter(|n| *n > 0).map(|n| n as i32);
    Some(ColumnDefinition {
        name: row.get_string(0, "column_name")?,
        data_type: row.get_string(1, "data_type").unwrap_or_default(),
        nullable: row.get_bool(2, "is_nullable"),
        default_value: row.get_string(3, "column_default"),
        max_length: positive(row.get_i64(4, "max_length")),
        precision: positive(row.get_i64(5, "numeric_precision")),
        scale: row.get_i64(6, "numeric_scale").map(|n| n as i32),
        auto_increment: row.get_bool(7, "is_identity"),
        unique: false,
    })
}

fn group_foreign_keys(rows: &[ResultRow]) -> Vec<ForeignKeyDefinition> {
    let mut keys: Vec<ForeignKeyDefinition> = Vec::new();
    for row in rows {
        let Some(name) = row.get_string(0, "constraint_name") else {
            continue;
        };
        let idx = match keys.iter().position(|k| k.name == name) {
            Some(idx) => idx,
            None => {
                keys.push(ForeignKeyDefinition {
                    name,
                    columns: Vec::new(),
                    referenced_schema: row.get_string(2, "referenced_schema"),
                    referenced_table: row.get_string(3, "referenced_table").unwrap_or_default(),
                    referenced_columns: Vec::new(),
                    on_delete: ReferentialAction::parse(
                        &row.get_string(5, "delete_rule").unwrap_or_default(),
                    ),
                    on_update: ReferentialAction::parse(
                        &row.get_string(6, "update_rule").unwrap_or_default(),
                    ),
                });
                keys.len() - 1
            }
        };
        if let Some(column) = row.get_string(1, "column_name") {
            keys[idx].columns.push(column);
        }
        if let Some(column) = row.get_string(4, "referenced_column") {
            keys[idx].referenced_columns.push(column);
        }
    }
    keys
}

fn group_indexes(rows: &[ResultRow]) -> Vec<IndexDefinition> {
    let mut indexes: Vec<IndexDefinition> = Vec::new();
    for row in rows {
        let Some(name) = row.get_string(0, "index_name") else {
            continue;
        };
        let column = row.get_string(1, "column_name");
        match indexes.iter_mut().find(|i| i.name == name) {
            Some(index) => index.columns.extend(column),
            None => indexes.push(IndexDefinition {
                name,
                columns: column.into_iter().collect(),
                unique: row.get_bool(2, "is_unique"),
                primary: row.get_bool(3, "is_primary"),
            }),
        }
    }
    indexes
}

fn group_constraints(rows: &[ResultRow]) -> Vec<ConstraintDefinition> {
    let mut constraints: Vec<ConstraintDefinition> = Vec::new();
    for row in rows {
        let (Some(name), Some(kind)) = (
            row.get_string(0, "constraint_name"),
            row.get_string(1, "constraint_type")
                .and_then(|k| ConstraintKind::parse(&k)),
        ) else {
            continue;
        };
        let column = row.get_string(2, "column_name");
        match constraints.iter_mut().find(|c| c.name == name) {
            Some(c) => c.columns.extend(column),
            None => constraints.push(ConstraintDefinition {
                name,
                kind,
                columns: column.into_iter().collect(),
                definition: row.get_string(3, "check_clause"),
            }),
        }
    }
    constraints
}

fn mark_unique_columns(table: &mut TableSchema) {
    let single_unique: Vec<String> = table
        .constraints
        .iter()
        .filter(|c| c.kind == ConstraintKind::Unique && c.columns.len() == 1)
        .map(|c| c.columns[0].clone())
        .chain(
            table
                .indexes
                .iter()
                .filter(|i| i.unique && !i.primary && i.columns.len() == 1)
                .map(|i| i.columns[0].clone()),
        )
        .collect();
    for column in &mut table.columns {
        if single_unique.iter().any(|u| u.eq_ignore_ascii_case(&column.name)) {
            column.unique = true;
        }
    }
}
