//! End-to-end runs of the orchestrator against in-memory databases.

use std::sync::Arc;

use dbshift::adapter::AdapterFactory;
use dbshift::core::{ColumnDefinition, ForeignKeyDefinition};
use dbshift::drivers::{MemoryAdapter, MemoryDatabase};
use dbshift::orchestrator::TableStatus;
use dbshift::pipeline::{FailureStage, MigrationEvent, MigrationObserver};
use dbshift::{Config, ConnectionConfig, DatabaseAdapter, Orchestrator, Result, Row, TableSchema, Value};
use tokio_util::sync::CancellationToken;

/// Hands out adapters over the `legacy` (source) and `warehouse` (target) databases.
struct MemoryFactory {
    source: MemoryDatabase,
    target: MemoryDatabase,
}

impl AdapterFactory for MemoryFactory {
    fn create(&self, config: &ConnectionConfig) -> Result<Box<dyn DatabaseAdapter>> {
        let db = match config.database.as_str() {
            "legacy" => &self.source,
            _ => &self.target,
        };
        Ok(Box::new(MemoryAdapter::new(db.clone())))
    }
}

struct Fixture {
    source: MemoryDatabase,
    target: MemoryDatabase,
}

impl Fixture {
    fn new() -> Self {
        Self {
            source: MemoryDatabase::new(),
            target: MemoryDatabase::new(),
        }
    }

    fn factory(&self) -> Arc<MemoryFactory> {
        Arc::new(MemoryFactory {
            source: self.source.clone(),
            target: self.target.clone(),
        })
    }

    fn orchestrator(&self, migration: &str) -> Orchestrator {
        Orchestrator::new(config(migration), self.factory())
    }
}

fn config(extra: &str) -> Config {
    Config::from_yaml(&format!(
        "source:\n  type: memory\n  database: legacy\ntarget:\n  type: memory\n  database: warehouse\n{}",
        extra
    ))
    .unwrap()
}

fn table(name: &str, columns: &[(&str, &str, bool)]) -> TableSchema {
    let mut t = TableSchema::new(name, None);
    t.columns = columns
        .iter()
        .map(|(c, ty, nullable)| ColumnDefinition::new(*c, *ty, *nullable))
        .collect();
    t.primary_key = vec![columns[0].0.to_string()];
    t
}

fn customers(fixture: &Fixture, rows: i64) {
    fixture
        .source
        .create_table(table("Customers", &[("CustomerId", "int", false), ("Name", "nvarchar", true)]));
    fixture
        .target
        .create_table(table("customers", &[("customerid", "integer", false), ("name", "text", true)]));
    fixture.source.seed(
        "Customers",
        (1..=rows).map(|i| Row::new().with("CustomerId", i).with("Name", format!("customer {}", i))),
    );
}

fn ids(rows: &[Row], column: &str) -> Vec<i64> {
    rows.iter()
        .filter_map(|r| r.get(column).and_then(Value::as_i64))
        .collect()
}

#[tokio::test]
async fn dry_run_counts_without_writing() {
    let fixture = Fixture::new();
    customers(&fixture, 10_000);

    let report = fixture
        .orchestrator("migration:\n  dry_run: true\n  batch_size: 1000\n")
        .run()
        .await
        .unwrap();

    assert!(report.dry_run);
    let summary = &report.tables[0].summary;
    assert_eq!((summary.total_rows, summary.migrated_rows), (10_000, 0));
    assert_eq!(summary.batches, 0);
    assert_eq!(fixture.target.insert_attempts(), 0);
    assert!(fixture.target.rows("customers").is_empty());
}

#[tokio::test]
async fn pages_concatenate_to_the_full_table() {
    let fixture = Fixture::new();
    customers(&fixture, 25);

    let report = fixture
        .orchestrator("migration:\n  batch_size: 10\n")
        .run()
        .await
        .unwrap();

    let summary = &report.tables[0].summary;
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.migrated_rows, 25);
    assert_eq!(
        ids(&fixture.target.rows("customers"), "customerid"),
        (1..=25).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn unique_violation_fails_only_that_row() {
    let fixture = Fixture::new();
    customers(&fixture, 6);
    fixture
        .target
        .seed("customers", [Row::new().with("customerid", 4).with("name", "existing")]);

    let report = fixture
        .orchestrator("migration:\n  batch_size: 10\n")
        .run()
        .await
        .unwrap();

    let table = &report.tables[0];
    assert_eq!(table.status, TableStatus::CompletedWithErrors);
    assert_eq!(table.summary.migrated_rows, 5);
    assert_eq!(table.summary.failed_rows, 1);
    let failure = &table.summary.errors[0];
    assert_eq!((failure.index, failure.stage), (3, FailureStage::Write));
    assert!(failure.message.contains("duplicate key"));
    assert_eq!(
        ids(&fixture.target.rows("customers"), "customerid"),
        vec![4, 1, 2, 3, 5, 6]
    );
    assert!(!report.has_failed_tables());
}

#[tokio::test]
async fn self_referencing_rows_are_written_parent_first() {
    let fixture = Fixture::new();
    fixture
        .source
        .create_table(table("CATEGORY", &[("ID", "int", false), ("PARENT_ID", "int", true)]));
    let mut target = table("category", &[("id", "integer", false), ("parent_id", "integer", true)]);
    target.foreign_keys = vec![ForeignKeyDefinition {
        name: "fk_category_parent".into(),
        columns: vec!["parent_id".into()],
        referenced_table: "category".into(),
        referenced_schema: Some("public".into()),
        referenced_columns: vec!["id".into()],
        ..Default::default()
    }];
    fixture.target.create_table(target);
    fixture.source.seed(
        "CATEGORY",
        vec![
            Row::new().with("ID", 3).with("PARENT_ID", 2),
            Row::new().with("ID", 1).with("PARENT_ID", Value::Null),
            Row::new().with("ID", 2).with("PARENT_ID", 1),
        ],
    );

    let report = fixture
        .orchestrator("migration:\n  batch_size: 2\n")
        .run()
        .await
        .unwrap();

    assert_eq!(report.tables[0].status, TableStatus::Completed);
    assert_eq!(report.tables[0].summary.batches, 1);
    assert_eq!(ids(&fixture.target.rows("category"), "id"), vec![1, 2, 3]);
}

#[tokio::test]
async fn integer_flags_become_booleans() {
    let fixture = Fixture::new();
    fixture.source.create_table(table(
        "Accounts",
        &[("Id", "int", false), ("IS_VALID", "int", false)],
    ));
    fixture.target.create_table(table(
        "accounts",
        &[("id", "integer", false), ("is_valid", "boolean", false)],
    ));
    fixture.source.seed(
        "Accounts",
        vec![
            Row::new().with("Id", 1).with("IS_VALID", 1),
            Row::new().with("Id", 2).with("IS_VALID", 0),
        ],
    );

    fixture.orchestrator("").run().await.unwrap();

    let flags: Vec<Option<Value>> = fixture
        .target
        .rows("accounts")
        .iter()
        .map(|r| r.get("is_valid").cloned())
        .collect();
    assert_eq!(flags, vec![Some(Value::Bool(true)), Some(Value::Bool(false))]);
}

#[tokio::test]
async fn mapped_columns_and_exclusions() {
    let fixture = Fixture::new();
    fixture.source.create_table(table(
        "Users",
        &[("UserId", "int", false), ("EMail", "nvarchar", true), ("Secret", "nvarchar", true)],
    ));
    fixture.target.create_table(table(
        "app_users",
        &[("id", "integer", false), ("email", "text", true)],
    ));
    fixture.source.seed(
        "Users",
        [Row::new().with("UserId", 7).with("EMail", "  A@B.COM ").with("Secret", "x")],
    );

    let report = fixture
        .orchestrator(
            "mappings:\n  - source_table: Users\n    target_table: app_users\n    exclude_columns: [Secret]\n    columns:\n      - source_column: UserId\n        target_column: id\n      - source_column: EMail\n        target_column: email\n        transformation: lower\n",
        )
        .run()
        .await
        .unwrap();

    assert_eq!(report.tables[0].target_table, "app_users");
    let rows = fixture.target.rows("app_users");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&Value::Int(7)));
    assert_eq!(rows[0].get("email"), Some(&Value::from("a@b.com")));
    assert!(!rows[0].contains("secret"));
}

/// Cancels the run once the first batch has been reported.
struct CancelAfterFirstBatch(CancellationToken);

impl MigrationObserver for CancelAfterFirstBatch {
    fn on_event(&self, event: &MigrationEvent) {
        if matches!(event, MigrationEvent::Progress { .. }) {
            self.0.cancel();
        }
    }
}

#[tokio::test]
async fn cancellation_stops_between_batches() {
    let fixture = Fixture::new();
    customers(&fixture, 30);
    let cancel = CancellationToken::new();

    let report = fixture
        .orchestrator("migration:\n  batch_size: 10\n")
        .with_cancel(cancel.clone())
        .with_observer(Arc::new(CancelAfterFirstBatch(cancel)))
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, "cancelled");
    let summary = &report.tables[0].summary;
    assert!(summary.cancelled);
    assert_eq!(summary.migrated_rows, 10);
    assert_eq!(fixture.target.rows("customers").len(), 10);
}

#[tokio::test]
async fn fail_fast_stops_the_table() {
    let fixture = Fixture::new();
    customers(&fixture, 20);
    fixture.target.reject_value("customers", "customerid", 5);

    let report = fixture
        .orchestrator("migration:\n  batch_size: 10\n  fail_fast: true\n")
        .run()
        .await
        .unwrap();

    let table = &report.tables[0];
    assert_eq!(table.status, TableStatus::Failed);
    assert!(table.error.as_deref().unwrap_or_default().contains("offset 0"));
    // The first batch committed its good rows; the second never ran.
    assert_eq!(fixture.target.rows("customers").len(), 9);
    assert_eq!(fixture.target.insert_attempts(), 10);
}

#[tokio::test]
async fn unavailable_target_fails_the_table_and_disconnects() {
    let fixture = Fixture::new();
    customers(&fixture, 3);
    fixture.target.set_unavailable(true);

    let report = fixture.orchestrator("").run().await.unwrap();

    assert!(report.has_failed_tables());
    assert!(report.tables[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("unavailable"));
    assert_eq!(fixture.source.connects(), fixture.source.disconnects());
}
