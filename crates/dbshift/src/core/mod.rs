//! Core data model shared by adapters, the mapping resolver, and the pipeline.
//!
//! - [`schema`]: table, column, key, index and constraint metadata
//! - [`value`]: typed column values and ordered rows
//! - [`batch`]: batch write results and per-row errors

pub mod batch;
pub mod schema;
pub mod value;

pub use batch::{BatchResult, RowError};
pub use schema::{
    ColumnDefinition, ConstraintDefinition, ConstraintKind, ForeignKeyDefinition,
    IndexDefinition, ReferentialAction, TableSchema,
};
pub use value::{Row, TypeFamily, Value};
