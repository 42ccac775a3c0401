//! # dbshift
//!
//! Batch ETL engine for moving table data from SQL Server to PostgreSQL.
//!
//! The library provides:
//!
//! - **Adapters** for SQL Server, PostgreSQL and an in-memory database behind
//!   one [`DatabaseAdapter`] contract
//! - **Mapping** of column names, types and values under a YAML configuration,
//!   with null-fallback and timestamp rules
//! - **Batched transfers** with per-row failure isolation inside each
//!   transaction
//! - **Parent-first ordering** for self-referencing tables
//! - **Progress events** through a [`MigrationObserver`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbshift::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> dbshift::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let report = Orchestrator::with_drivers(config).run().await?;
//!     println!("{}", report.render(false));
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod introspect;
pub mod mapping;
pub mod ordering;
pub mod orchestrator;
pub mod pipeline;
pub mod typemap;

// Re-exports for convenient access
pub use adapter::{create_adapter, AdapterFactory, DatabaseAdapter, DriverFactory};
pub use config::{Config, ConnectionConfig, MigrationConfig, TableMapping};
pub use crate::core::{BatchResult, Row, TableSchema, Value};
pub use error::{MigrateError, Result};
pub use orchestrator::{HealthCheckResult, MigrationReport, Orchestrator, ValidationReport};
pub use pipeline::{
    BatchPipeline, MigrationEvent, MigrationObserver, PipelineOptions, PipelineSummary, TableJob,
};
