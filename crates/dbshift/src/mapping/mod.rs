//! Column and value mapping from source rows to target rows.
//!
//! The [`MappingResolver`] turns a `(column, value, source type)` triple into a
//! target column and value, or a skip decision. It is pure: it reads the table
//! mapping, the target schema snapshot and the type registry, and does no I/O.
//!
//! Value rules, first match wins:
//!
//! 1. null values go through the null-fallback policy
//! 2. boolean targets get `1`/`"1"`/`"true"` as true, anything else false
//! 3. timestamp-named columns parse epoch numbers and date strings
//! 4. a named transformation from the column mapping, applied after trimming
//! 5. the transformer declared by the data type mapping
//! 6. otherwise the value passes through

mod timestamp;
mod transform;

pub use timestamp::parse_timestamp;
pub use transform::Transformation;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::{MigrationConfig, NullFallbackConfig, TableMapping};
use crate::core::{ColumnDefinition, Row, TableSchema, Value};
use crate::error::{MigrateError, Result};
use crate::typemap::{normalize_type_name, target_type_for, TypeRegistry};

/// Resolver settings taken from the migration config.
#[derive(Debug, Clone)]
pub struct MappingOptions {
    pub null_fallback: NullFallbackConfig,
    pub timestamp_suffixes: Vec<String>,
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self::from_config(&MigrationConfig::default())
    }
}

impl MappingOptions {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            null_fallback: config.null_fallback.clone(),
            timestamp_suffixes: config
                .timestamp_suffixes
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }
}

/// Why a source column is not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Listed in `exclude_columns`.
    Excluded,
    /// The resolved target column does not exist in the target table.
    NotInTarget,
}

/// Outcome of resolving one source column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Mapped { column: String, value: Value },
    Skip { target_column: String, reason: SkipReason },
}

/// A source row reshaped for the target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformedRow {
    pub row: Row,
    /// `(source column, target column)` pairs dropped because the target lacks them.
    pub dropped: Vec<(String, String)>,
}

/// How one source column will be handled, computed once per table.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedColumn {
    pub source_column: String,
    pub target_column: String,
    pub source_type: String,
    /// Target type from the type registry, `None` when the type is unmapped.
    pub target_type: Option<String>,
    pub skip: Option<SkipReason>,
}

/// Resolves source columns and values against one target table.
#[derive(Debug, Clone)]
pub struct MappingResolver {
    table: String,
    mapping: Option<TableMapping>,
    target: Arc<TableSchema>,
    types: Arc<TypeRegistry>,
    options: MappingOptions,
    transformations: HashMap<String, Transformation>,
}

impl MappingResolver {
    pub fn new(
        table: impl Into<String>,
        mapping: Option<TableMapping>,
        target: Arc<TableSchema>,
        types: Arc<TypeRegistry>,
        options: MappingOptions,
    ) -> Result<Self> {
        let table = table.into();
        let mut transformations = HashMap::new();
        if let Some(ref mapping) = mapping {
            for column in &mapping.columns {
                if let Some(ref name) = column.transformation {
                    let t = name.parse::<Transformation>().map_err(|e| {
                        MigrateError::Config(format!(
                            "mappings.{}.{}: {}",
                            table, column.source_column, e
                        ))
                    })?;
                    transformations.insert(column.source_column.to_lowercase(), t);
                }
            }
        }

        Ok(Self {
            table,
            mapping,
            target,
            types,
            options,
            transformations,
        })
    }

    pub fn target_schema(&self) -> &TableSchema {
        &self.target
    }

    /// Target column name for a source column: the explicit mapping, else the
    /// lowercased source name.
    pub fn target_column_name(&self, source_column: &str) -> String {
        self.mapping
            .as_ref()
            .and_then(|m| m.column(source_column))
            .map(|c| c.target_column.clone())
            .unwrap_or_else(|| source_column.to_lowercase())
    }

    fn is_excluded(&self, source_column: &str) -> bool {
        self.mapping
            .as_ref()
            .map(|m| m.is_excluded(source_column))
            .unwrap_or(false)
    }

    /// Resolve a single value without row context.
    ///
    /// A null last-modified value falls back to the current time here, since
    /// there is no row to read a creation timestamp from.
    pub fn resolve(&self, source_column: &str, value: &Value, source_type: &str) -> Result<Resolution> {
        self.resolve_in_row(None, source_column, value, source_type)
    }

    fn resolve_in_row(
        &self,
        row: Option<&Row>,
        source_column: &str,
        value: &Value,
        source_type: &str,
    ) -> Result<Resolution> {
        let target_column = self.target_column_name(source_column);
        if self.is_excluded(source_column) {
            return Ok(Resolution::Skip {
                target_column,
                reason: SkipReason::Excluded,
            });
        }
        let column = match self.target.column(&target_column) {
            Some(c) => c,
            None => {
                return Ok(Resolution::Skip {
                    target_column,
                    reason: SkipReason::NotInTarget,
                })
            }
        };

        let value = self.transform_value(row, source_column, column, value, source_type)?;
        Ok(Resolution::Mapped {
            column: column.name.clone(),
            value,
        })
    }

    fn transform_value(
        &self,
        row: Option<&Row>,
        source_column: &str,
        column: &ColumnDefinition,
        value: &Value,
        source_type: &str,
    ) -> Result<Value> {
        if value.is_null() {
            return self.null_fallback(row, source_column, column);
        }

        if self.is_boolean_target(column, source_type) && !matches!(value, Value::Bool(_)) {
            return Ok(Value::Bool(transform::coerce_bool(value)));
        }

        if self.is_timestamp_target(column) && !value.is_temporal() {
            let ts = parse_timestamp(value).ok_or_else(|| {
                MigrateError::transform(
                    column.name.clone(),
                    format!("'{}' is not a valid timestamp", value),
                )
            })?;
            return Ok(temporal_for(column, ts));
        }

        if let Some(t) = self.transformations.get(&source_column.to_lowercase()) {
            let trimmed = match value {
                Value::Text(s) => Value::Text(s.trim().to_string()),
                other => other.clone(),
            };
            return Ok(t.apply(trimmed));
        }

        if let Some(mapping) = self.types.get(source_type) {
            if mapping.requires_transformation {
                if let Some(t) = mapping
                    .transformer
                    .as_deref()
                    .and_then(|name| name.parse::<Transformation>().ok())
                {
                    return Ok(t.apply(value.clone()));
                }
            }
        }

        Ok(value.clone())
    }

    fn null_fallback(
        &self,
        row: Option<&Row>,
        source_column: &str,
        column: &ColumnDefinition,
    ) -> Result<Value> {
        let column_mapping = self.mapping.as_ref().and_then(|m| m.column(source_column));
        let nullable = column_mapping
            .and_then(|c| c.nullable)
            .unwrap_or(column.nullable);
        if nullable {
            return Ok(Value::Null);
        }

        let name = column.name.to_lowercase();
        let fallback = &self.options.null_fallback;

        if fallback.modified_columns.iter().any(|c| c.eq_ignore_ascii_case(&name)) {
            let created = row.and_then(|r| {
                fallback
                    .created_columns
                    .iter()
                    .filter_map(|c| r.get_ignore_case(c))
                    .find(|v| !v.is_null())
            });
            let ts = created
                .and_then(parse_timestamp)
                .unwrap_or_else(|| Utc::now().naive_utc());
            return Ok(temporal_for(column, ts));
        }

        if fallback.code_columns.iter().any(|c| {
            let c = c.to_lowercase();
            name == c || name.ends_with(&format!("_{}", c))
        }) {
            return Ok(Value::Text(fallback.code_sentinel.clone()));
        }

        if let Some(default) = column_mapping.and_then(|c| c.default_value.clone()) {
            return Ok(Value::Text(default));
        }

        // The insert will reject the row.
        Ok(Value::Null)
    }

    fn is_boolean_target(&self, column: &ColumnDefinition, source_type: &str) -> bool {
        column.is_boolean()
            || self
                .types
                .get(source_type)
                .map(|m| m.targets_boolean())
                .unwrap_or(false)
    }

    fn is_timestamp_target(&self, column: &ColumnDefinition) -> bool {
        let name = column.name.to_lowercase();
        self.options
            .timestamp_suffixes
            .iter()
            .any(|suffix| name.ends_with(suffix.as_str()))
            && !is_character_type(&column.base_type())
    }

    /// Reshape a whole source row.
    ///
    /// Source types come from `source` when given. A transformation error is
    /// returned for the row as a whole; the caller excludes the row from its batch.
    pub fn transform_row(&self, row: &Row, source: Option<&TableSchema>) -> Result<TransformedRow> {
        let mut out = TransformedRow {
            row: Row::with_capacity(row.len()),
            dropped: Vec::new(),
        };

        for (source_column, value) in row.iter() {
            let source_type = source
                .and_then(|s| s.column(source_column))
                .map(|c| c.data_type.as_str())
                .unwrap_or("");
            match self.resolve_in_row(Some(row), source_column, value, source_type)? {
                Resolution::Mapped { column, value } => out.row.insert(column, value),
                Resolution::Skip {
                    target_column,
                    reason: SkipReason::NotInTarget,
                } => out.dropped.push((source_column.to_string(), target_column)),
                Resolution::Skip { .. } => {}
            }
        }

        Ok(out)
    }

    /// Work out how every source column will be handled.
    ///
    /// Logs unmapped source types and dropped columns once per column.
    pub fn plan_columns(&self, source: &TableSchema) -> Vec<PlannedColumn> {
        source
            .columns
            .iter()
            .map(|column| {
                let target_column = self.target_column_name(&column.name);
                let skip = if self.is_excluded(&column.name) {
                    Some(SkipReason::Excluded)
                } else if !self.target.has_column(&target_column) {
                    Some(SkipReason::NotInTarget)
                } else {
                    None
                };

                let target_type = target_type_for(&self.types, column);
                match (&skip, &target_type) {
                    (Some(SkipReason::NotInTarget), _) => debug!(
                        "{}.{}: target column '{}' does not exist, values will be dropped",
                        self.table, column.name, target_column
                    ),
                    (None, None) => warn!(
                        "{}.{}: no type mapping for '{}', values pass through unchanged",
                        self.table, column.name, column.data_type
                    ),
                    _ => {}
                }

                PlannedColumn {
                    source_column: column.name.clone(),
                    target_column,
                    source_type: column.data_type.clone(),
                    target_type,
                    skip,
                }
            })
            .collect()
    }
}

fn is_character_type(base_type: &str) -> bool {
    matches!(
        base_type,
        "varchar"
            | "nvarchar"
            | "char"
            | "nchar"
            | "character"
            | "character varying"
            | "bpchar"
            | "text"
            | "ntext"
            | "string"
    )
}

/// A date column gets a date, anything else a timestamp.
fn temporal_for(column: &ColumnDefinition, ts: chrono::NaiveDateTime) -> Value {
    if normalize_type_name(&column.data_type) == "date" {
        Value::Date(ts.date())
    } else {
        Value::Timestamp(ts)
    }
}
