//! Database driver implementations.
//!
//! - [`mssql`]: Microsoft SQL Server (tiberius + bb8)
//! - [`postgres`]: PostgreSQL (tokio-postgres + deadpool)
//! - [`memory`]: in-process database for embedding and tests
//! - [`common`]: shared TLS handling
//!
//! # Adding New Databases
//!
//! 1. Create a module under `drivers/` implementing
//!    [`DatabaseAdapter`](crate::adapter::DatabaseAdapter)
//! 2. Provide its [`CatalogQueries`](crate::introspect::CatalogQueries) or
//!    override the introspection methods
//! 3. Add a [`DatabaseKind`](crate::config::DatabaseKind) variant and wire it
//!    into [`create_adapter`](crate::adapter::create_adapter)

pub mod common;
pub mod memory;
pub mod mssql;
pub mod postgres;

pub use common::SslMode;
pub use memory::{MemoryAdapter, MemoryDatabase};
pub use mssql::MssqlAdapter;
pub use postgres::PostgresAdapter;
