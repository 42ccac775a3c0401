//! Per-table batch pipeline.
//!
//! [`BatchPipeline::run`] moves one table:
//!
//! 1. count source rows once and read the target schema once
//! 2. page through the source in `batch_size` steps from `start_offset`
//! 3. reshape every row through the [`MappingResolver`]
//! 4. write each page with the [`BatchWriter`], one transaction per page
//! 5. emit a progress event per batch
//!
//! Self-referencing tables are read in full, ordered parent-first by
//! [`crate::ordering::order_rows`] and written once.
//!
//! Row failures are recorded and the run continues. A page read that times
//! out fails that batch's rows and the run moves on to the next offset.
//! Other connection errors and introspection errors end the table.

mod events;
mod writer;

pub use events::{
    ChannelObserver, CompositeObserver, MigrationEvent, MigrationObserver, NoopObserver,
    TracingObserver,
};
pub use writer::BatchWriter;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::DatabaseAdapter;
use crate::config::{Config, MigrationConfig, OrderingStrategy, TableMapping, WriteMode};
use crate::core::{BatchResult, Row, TableSchema};
use crate::error::{MigrateError, Result};
use crate::mapping::{MappingOptions, MappingResolver, SkipReason};
use crate::ordering::order_rows;
use crate::typemap::TypeRegistry;

/// Pipeline settings, usually taken from the `migration` config section.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub batch_size: usize,
    /// First source offset to read. A multiple of `batch_size`.
    pub start_offset: u64,
    /// Count rows and check the target table, write nothing.
    pub dry_run: bool,
    /// Abort the table on the first batch with a failed row.
    pub fail_fast: bool,
    pub write_mode: WriteMode,
    pub ordering: OrderingStrategy,
    pub mapping: MappingOptions,
}

impl PipelineOptions {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            batch_size: config.get_batch_size(),
            start_offset: config.start_offset,
            dry_run: config.dry_run,
            fail_fast: config.fail_fast,
            write_mode: config.write_mode,
            ordering: config.ordering,
            mapping: MappingOptions::from_config(config),
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&MigrationConfig::default())
    }
}

/// One table to migrate.
#[derive(Debug, Clone, PartialEq)]
pub struct TableJob {
    pub source_table: String,
    pub source_schema: Option<String>,
    pub target_table: String,
    pub target_schema: Option<String>,
    pub mapping: Option<TableMapping>,
}

impl TableJob {
    /// A job writing to the lowercased source table name.
    pub fn new(source_table: impl Into<String>) -> Self {
        let source_table = source_table.into();
        Self {
            target_table: source_table.to_lowercase(),
            source_table,
            source_schema: None,
            target_schema: None,
            mapping: None,
        }
    }

    /// Build a job with the table mapping and schemas from `config`.
    pub fn from_config(source_table: &str, config: &Config) -> Self {
        let mut job = Self::new(source_table)
            .with_schemas(config.source.schema.clone(), config.target.schema.clone());
        if let Some(mapping) = config.table_mapping(source_table) {
            job = job.with_mapping(mapping.clone());
        }
        job
    }

    pub fn with_mapping(mut self, mapping: TableMapping) -> Self {
        self.target_table = mapping.target_table_name();
        self.mapping = Some(mapping);
        self
    }

    pub fn with_schemas(mut self, source: Option<String>, target: Option<String>) -> Self {
        self.source_schema = source;
        self.target_schema = target;
        self
    }
}

/// Where a row failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// The page containing the row could not be read.
    Read,
    Transform,
    Write,
}

/// A source row that did not reach the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFailure {
    /// Offset of the batch the row was read in.
    pub offset: u64,
    /// Position of the row within that batch.
    pub index: usize,
    pub stage: FailureStage,
    pub message: String,
}

/// Totals for one table run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub total_rows: u64,
    pub migrated_rows: u64,
    pub failed_rows: u64,
    pub batches: usize,
    pub errors: Vec<RowFailure>,
    pub cancelled: bool,
    #[serde(with = "crate::core::batch::duration_ms")]
    pub duration: Duration,
}

/// Moves one table from a source adapter to a target adapter.
pub struct BatchPipeline<'a> {
    source: &'a dyn DatabaseAdapter,
    target: &'a dyn DatabaseAdapter,
    options: PipelineOptions,
    writer: BatchWriter,
    types: Arc<TypeRegistry>,
    observer: Arc<dyn MigrationObserver>,
    cancel: CancellationToken,
}

impl<'a> BatchPipeline<'a> {
    pub fn new(
        source: &'a dyn DatabaseAdapter,
        target: &'a dyn DatabaseAdapter,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            target,
            writer: BatchWriter::new(options.write_mode),
            options,
            types: Arc::new(TypeRegistry::new()),
            observer: Arc::new(NoopObserver),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_types(mut self, types: Arc<TypeRegistry>) -> Self {
        self.types = types;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn MigrationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Checked between batches; a cancelled run returns partial totals.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, job: &TableJob) -> Result<PipelineSummary> {
        let started = Instant::now();
        let total = self
            .source
            .get_row_count(&job.source_table, job.source_schema.as_deref())
            .await?;
        let target = self
            .target
            .get_table_schema(&job.target_table, job.target_schema.as_deref())
            .await?;

        info!(
            "Migrating {} -> {} ({} rows, batch size {})",
            job.source_table, target.full_name(), total, self.options.batch_size
        );
        self.observer.on_event(&MigrationEvent::TableStarted {
            table: job.source_table.clone(),
            target_table: job.target_table.clone(),
            total_rows: total,
        });

        let mut summary = PipelineSummary {
            total_rows: total,
            ..Default::default()
        };

        if self.options.dry_run {
            info!(
                "{}: dry run, {} rows would be written to {}",
                job.source_table, total, target.full_name()
            );
            return Ok(self.finish(job, summary, started));
        }

        let source = self
            .source
            .get_table_schema(&job.source_table, job.source_schema.as_deref())
            .await?;
        let self_reference = self_reference_keys(job, &target);
        let resolver = MappingResolver::new(
            job.source_table.clone(),
            job.mapping.clone(),
            Arc::new(target),
            self.types.clone(),
            self.options.mapping.clone(),
        )?;

        let mut dropped = HashSet::new();
        for planned in resolver.plan_columns(&source) {
            if planned.skip == Some(SkipReason::NotInTarget) {
                self.report_dropped(job, &mut dropped, &planned.source_column, &planned.target_column);
            }
        }

        let mut run = TableRun {
            job,
            resolver: &resolver,
            source: &source,
            summary: &mut summary,
            dropped: &mut dropped,
        };
        match self_reference {
            Some((parent_key, foreign_key)) => {
                self.run_self_referential(&mut run, &parent_key, &foreign_key)
                    .await?
            }
            None => self.run_batched(&mut run).await?,
        }

        Ok(self.finish(job, summary, started))
    }

    async fn run_batched(&self, run: &mut TableRun<'_>) -> Result<()> {
        let job = run.job;
        let batch_size = self.options.batch_size.max(1);
        let mut offset = self.options.start_offset;

        while offset < run.summary.total_rows {
            if self.cancel.is_cancelled() {
                info!("{}: cancelled before offset {}", job.source_table, offset);
                run.summary.cancelled = true;
                break;
            }

            let errors_before = run.summary.errors.len();
            let Some(page) = self.read_page(run, offset, batch_size).await? else {
                run.summary.batches += 1;
                let end = (offset + batch_size as u64).min(run.summary.total_rows);
                self.after_batch(run, offset, end, errors_before)?;
                offset += batch_size as u64;
                continue;
            };
            if page.is_empty() {
                break;
            }

            let (rows, positions) = self.transform_page(run, offset, &page);
            let result = self.write_batch(run, offset, &rows, &positions).await;
            debug!(
                "{}: batch at {} wrote {} of {} rows in {:?}",
                job.source_table,
                offset,
                result.processed_rows,
                page.len(),
                result.duration
            );
            self.after_batch(run, offset, offset + page.len() as u64, errors_before)?;

            offset += batch_size as u64;
        }
        Ok(())
    }

    async fn run_self_referential(
        &self,
        run: &mut TableRun<'_>,
        parent_key: &str,
        foreign_key: &str,
    ) -> Result<()> {
        let job = run.job;
        let batch_size = self.options.batch_size.max(1);
        let start = self.options.start_offset;
        info!(
            "{}: self-referencing ({} -> {}), loading all rows before writing",
            job.source_table, foreign_key, parent_key
        );

        let mut loaded: Vec<Row> = Vec::new();
        let mut offset = start;
        while offset < run.summary.total_rows {
            if self.cancel.is_cancelled() {
                break;
            }
            let errors_before = run.summary.errors.len();
            match self.read_page(run, offset, batch_size).await? {
                Some(page) if page.is_empty() => break,
                Some(page) => loaded.extend(page),
                None => {
                    let end = (offset + batch_size as u64).min(run.summary.total_rows);
                    self.after_batch(run, offset, end, errors_before)?;
                }
            }
            offset += batch_size as u64;
        }
        if self.cancel.is_cancelled() {
            info!("{}: cancelled while loading rows", job.source_table);
            run.summary.cancelled = true;
            return Ok(());
        }

        let errors_before = run.summary.errors.len();
        let (rows, positions) = self.transform_page(run, start, &loaded);
        let ordered = order_rows(rows, parent_key, foreign_key, self.options.ordering);
        if ordered.cycle_rows > 0 {
            self.observer.on_event(&MigrationEvent::Info {
                message: format!(
                    "{}: {} rows reference each other in a cycle and may be rejected",
                    job.source_table, ordered.cycle_rows
                ),
            });
        }
        let positions: Vec<usize> = ordered.positions.iter().map(|&i| positions[i]).collect();
        self.write_batch(run, start, &ordered.rows, &positions).await;
        self.after_batch(run, start, start + loaded.len() as u64, errors_before)
    }

    /// Read one page. A timeout is recorded as a read failure of every row the
    /// page should have held and gives `None`; other errors propagate.
    async fn read_page(
        &self,
        run: &mut TableRun<'_>,
        offset: u64,
        batch_size: usize,
    ) -> Result<Option<Vec<Row>>> {
        let job = run.job;
        match self
            .source
            .get_batch_data(&job.source_table, offset, batch_size, job.source_schema.as_deref())
            .await
        {
            Ok(page) => Ok(Some(page)),
            Err(e @ MigrateError::Timeout { .. }) => {
                warn!("{}: reading batch at {} timed out: {}", job.source_table, offset, e);
                let rows = run.summary.total_rows.saturating_sub(offset).min(batch_size as u64);
                let message = e.to_string();
                for index in 0..rows as usize {
                    self.record_failure(run, offset, index, FailureStage::Read, message.clone());
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Reshape a page. Returns the rows that transformed and their page positions.
    fn transform_page(&self, run: &mut TableRun<'_>, offset: u64, page: &[Row]) -> (Vec<Row>, Vec<usize>) {
        let mut rows = Vec::with_capacity(page.len());
        let mut positions = Vec::with_capacity(page.len());
        for (index, row) in page.iter().enumerate() {
            match run.resolver.transform_row(row, Some(run.source)) {
                Ok(transformed) => {
                    for (source_column, target_column) in &transformed.dropped {
                        self.report_dropped(run.job, run.dropped, source_column, target_column);
                    }
                    rows.push(transformed.row);
                    positions.push(index);
                }
                Err(e) => self.record_failure(run, offset, index, FailureStage::Transform, e.to_string()),
            }
        }
        (rows, positions)
    }

    async fn write_batch(
        &self,
        run: &mut TableRun<'_>,
        offset: u64,
        rows: &[Row],
        positions: &[usize],
    ) -> BatchResult {
        let job = run.job;
        let result = self
            .writer
            .write(self.target, &job.target_table, job.target_schema.as_deref(), rows)
            .await;
        run.summary.batches += 1;
        run.summary.migrated_rows += result.processed_rows as u64;
        for error in &result.errors {
            let index = positions.get(error.index).copied().unwrap_or(error.index);
            self.record_failure(run, offset, index, FailureStage::Write, error.message.clone());
        }
        result
    }

    /// Emit progress, then report a failed batch and stop if running fail-fast.
    fn after_batch(
        &self,
        run: &mut TableRun<'_>,
        offset: u64,
        offset_end: u64,
        errors_before: usize,
    ) -> Result<()> {
        let job = run.job;
        self.observer.on_event(&MigrationEvent::Progress {
            table: job.source_table.clone(),
            offset_start: offset,
            offset_end,
            migrated: run.summary.migrated_rows,
            total: run.summary.total_rows,
        });

        let Some(first) = run.summary.errors.get(errors_before) else {
            return Ok(());
        };
        let message = format!(
            "{} of {} rows failed, first: {}",
            run.summary.errors.len() - errors_before,
            offset_end - offset,
            first.message
        );
        self.observer.on_event(&MigrationEvent::BatchFailed {
            table: job.source_table.clone(),
            offset,
            message: message.clone(),
        });
        if self.options.fail_fast {
            return Err(MigrateError::BatchFailed {
                table: job.source_table.clone(),
                offset,
                message,
            });
        }
        Ok(())
    }

    fn record_failure(
        &self,
        run: &mut TableRun<'_>,
        offset: u64,
        index: usize,
        stage: FailureStage,
        message: String,
    ) {
        self.observer.on_event(&MigrationEvent::RowError {
            table: run.job.source_table.clone(),
            offset,
            index,
            message: message.clone(),
        });
        run.summary.failed_rows += 1;
        run.summary.errors.push(RowFailure {
            offset,
            index,
            stage,
            message,
        });
    }

    fn report_dropped(
        &self,
        job: &TableJob,
        dropped: &mut HashSet<String>,
        source_column: &str,
        target_column: &str,
    ) {
        if dropped.insert(source_column.to_lowercase()) {
            self.observer.on_event(&MigrationEvent::ColumnDropped {
                table: job.source_table.clone(),
                source_column: source_column.to_string(),
                target_column: target_column.to_string(),
            });
        }
    }

    fn finish(&self, job: &TableJob, mut summary: PipelineSummary, started: Instant) -> PipelineSummary {
        summary.duration = started.elapsed();
        self.observer.on_event(&MigrationEvent::TableFinished {
            table: job.source_table.clone(),
            migrated: summary.migrated_rows,
            failed: summary.failed_rows,
            cancelled: summary.cancelled,
        });
        summary
    }
}

/// Mutable state of one [`BatchPipeline::run`] call.
struct TableRun<'r> {
    job: &'r TableJob,
    resolver: &'r MappingResolver,
    source: &'r TableSchema,
    summary: &'r mut PipelineSummary,
    dropped: &'r mut HashSet<String>,
}

/// `(parent key, foreign key)` target columns when the table references itself.
///
/// A configured `self_reference` wins over the introspected foreign key.
fn self_reference_keys(job: &TableJob, target: &TableSchema) -> Option<(String, String)> {
    if let Some(configured) = job.mapping.as_ref().and_then(|m| m.self_reference.as_ref()) {
        return Some((configured.parent_key.clone(), configured.foreign_key.clone()));
    }
    let fk = target.self_reference()?;
    match (fk.referenced_columns.first(), fk.columns.first()) {
        (Some(parent), Some(child)) => Some((parent.clone(), child.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnDefinition, ForeignKeyDefinition, Value};
    use crate::drivers::memory::{MemoryAdapter, MemoryDatabase};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<MigrationEvent>>);

    impl MigrationObserver for Recorder {
        fn on_event(&self, event: &MigrationEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    impl Recorder {
        fn events(&self) -> Vec<MigrationEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    fn users_table(name: &str) -> TableSchema {
        let mut table = TableSchema::new(name, Some("public".into()));
        table.columns = vec![
            ColumnDefinition::new("id", "int", false),
            ColumnDefinition::new("email", "varchar", false),
        ];
        table.primary_key = vec!["id".into()];
        table
    }

    fn category_table() -> TableSchema {
        let mut table = TableSchema::new("category", Some("public".into()));
        table.columns = vec![
            ColumnDefinition::new("id", "int", false),
            ColumnDefinition::new("parent_id", "int", true),
        ];
        table.primary_key = vec!["id".into()];
        table.foreign_keys = vec![ForeignKeyDefinition {
            name: "fk_category_parent".into(),
            columns: vec!["parent_id".into()],
            referenced_table: "category".into(),
            referenced_schema: Some("public".into()),
            referenced_columns: vec!["id".into()],
            ..Default::default()
        }];
        table
    }

    async fn connected(db: &MemoryDatabase) -> MemoryAdapter {
        let mut adapter = MemoryAdapter::new(db.clone());
        adapter.connect().await.unwrap();
        adapter
    }

    fn options(batch_size: usize) -> PipelineOptions {
        PipelineOptions {
            batch_size,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_copies_all_rows_in_batches() {
        let source_db = MemoryDatabase::new();
        source_db.create_table(users_table("Users"));
        source_db.seed(
            "Users",
            (1..=25).map(|i| Row::new().with("Id", i).with("Email", format!("u{}@x", i))),
        );
        let target_db = MemoryDatabase::new();
        target_db.create_table(users_table("users"));

        let source = connected(&source_db).await;
        let target = connected(&target_db).await;
        let recorder = Arc::new(Recorder::default());
        let summary = BatchPipeline::new(&source, &target, options(10))
            .with_observer(recorder.clone())
            .run(&TableJob::new("Users"))
            .await
            .unwrap();

        assert_eq!(summary.total_rows, 25);
        assert_eq!(summary.migrated_rows, 25);
        assert_eq!(summary.failed_rows, 0);
        assert_eq!(summary.batches, 3);
        assert_eq!(target_db.rows("users").len(), 25);
        assert_eq!(target_db.rows("users")[0].get("email"), Some(&Value::from("u1@x")));

        let progress: Vec<(u64, u64)> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MigrationEvent::Progress {
                    offset_start,
                    offset_end,
                    ..
                } => Some((offset_start, offset_end)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(0, 10), (10, 20), (20, 25)]);
    }

    #[tokio::test]
    async fn test_start_offset_skips_earlier_batches() {
        let source_db = MemoryDatabase::new();
        source_db.create_table(users_table("users"));
        source_db.seed(
            "users",
            (1..=30).map(|i| Row::new().with("id", i).with("email", "x")),
        );
        let target_db = MemoryDatabase::new();
        target_db.create_table(users_table("users"));

        let source = connected(&source_db).await;
        let target = connected(&target_db).await;
        let opts = PipelineOptions {
            start_offset: 20,
            ..options(10)
        };
        let summary = BatchPipeline::new(&source, &target, opts)
            .run(&TableJob::new("users"))
            .await
            .unwrap();
        assert_eq!(summary.migrated_rows, 10);
        assert_eq!(target_db.rows("users")[0].get("id"), Some(&Value::Int(21)));
    }

    #[tokio::test]
    async fn test_dropped_column_reported_once() {
        let source_db = MemoryDatabase::new();
        let mut source_table = users_table("users");
        source_table
            .columns
            .push(ColumnDefinition::new("legacy_flag", "char", true));
        source_db.create_table(source_table);
        source_db.seed(
            "users",
            (1..=5).map(|i| {
                Row::new()
                    .with("id", i)
                    .with("email", "x")
                    .with("legacy_flag", "Y")
            }),
        );
        let target_db = MemoryDatabase::new();
        target_db.create_table(users_table("users"));

        let source = connected(&source_db).await;
        let target = connected(&target_db).await;
        let recorder = Arc::new(Recorder::default());
        let summary = BatchPipeline::new(&source, &target, options(2))
            .with_observer(recorder.clone())
            .run(&TableJob::new("users"))
            .await
            .unwrap();

        assert_eq!(summary.migrated_rows, 5);
        let dropped = recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, MigrationEvent::ColumnDropped { .. }))
            .count();
        assert_eq!(dropped, 1);
        assert!(!target_db.rows("users")[0].contains("legacy_flag"));
    }

    #[tokio::test]
    async fn test_self_referencing_table_written_parent_first() {
        let source_db = MemoryDatabase::new();
        source_db.create_table(category_table());
        source_db.seed(
            "category",
            vec![
                Row::new().with("id", 3).with("parent_id", 2),
                Row::new().with("id", 1).with("parent_id", Value::Null),
                Row::new().with("id", 2).with("parent_id", 1),
            ],
        );
        let target_db = MemoryDatabase::new();
        target_db.create_table(category_table());

        let source = connected(&source_db).await;
        let target = connected(&target_db).await;
        let summary = BatchPipeline::new(&source, &target, options(2))
            .run(&TableJob::new("category"))
            .await
            .unwrap();

        assert_eq!(summary.batches, 1);
        assert_eq!(summary.migrated_rows, 3);
        let ids: Vec<i64> = target_db
            .rows("category")
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    fn seeded_users(rows: i64) -> (MemoryDatabase, MemoryDatabase) {
        let source_db = MemoryDatabase::new();
        source_db.create_table(users_table("users"));
        source_db.seed(
            "users",
            (1..=rows).map(|i| Row::new().with("id", i).with("email", format!("u{}@x", i))),
        );
        let target_db = MemoryDatabase::new();
        target_db.create_table(users_table("users"));
        (source_db, target_db)
    }

    fn target_ids(db: &MemoryDatabase) -> Vec<i64> {
        db.rows("users")
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .collect()
    }

    #[tokio::test]
    async fn test_read_timeout_fails_only_that_batch() {
        let (source_db, target_db) = seeded_users(30);
        source_db.time_out_read_at("users", 10);

        let source = connected(&source_db).await;
        let target = connected(&target_db).await;
        let recorder = Arc::new(Recorder::default());
        let summary = BatchPipeline::new(&source, &target, options(10))
            .with_observer(recorder.clone())
            .run(&TableJob::new("users"))
            .await
            .unwrap();

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.migrated_rows, 20);
        assert_eq!(summary.failed_rows, 10);
        assert!(summary
            .errors
            .iter()
            .all(|e| e.offset == 10 && e.stage == FailureStage::Read));
        let expected: Vec<i64> = (1..=10).chain(21..=30).collect();
        assert_eq!(target_ids(&target_db), expected);

        let failed_offsets: Vec<u64> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MigrationEvent::BatchFailed { offset, .. } => Some(offset),
                _ => None,
            })
            .collect();
        assert_eq!(failed_offsets, vec![10]);
    }

    #[tokio::test]
    async fn test_read_timeout_with_fail_fast_stops() {
        let (source_db, target_db) = seeded_users(30);
        source_db.time_out_read_at("users", 10);

        let source = connected(&source_db).await;
        let target = connected(&target_db).await;
        let opts = PipelineOptions {
            fail_fast: true,
            ..options(10)
        };
        let err = BatchPipeline::new(&source, &target, opts)
            .run(&TableJob::new("users"))
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::BatchFailed { offset: 10, .. }));
        assert_eq!(target_ids(&target_db), (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_connection_loss_rolls_back_batch_and_continues() {
        let (source_db, target_db) = seeded_users(30);
        // Ten inserts of the first batch, five of the second, then the drop.
        target_db.drop_connection_after(15);

        let source = connected(&source_db).await;
        let target = connected(&target_db).await;
        let summary = BatchPipeline::new(&source, &target, options(10))
            .run(&TableJob::new("users"))
            .await
            .unwrap();

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.migrated_rows, 20);
        assert_eq!(summary.failed_rows, 10);
        assert!(summary
            .errors
            .iter()
            .all(|e| e.offset == 10 && e.stage == FailureStage::Write));
        let expected: Vec<i64> = (1..=10).chain(21..=30).collect();
        assert_eq!(target_ids(&target_db), expected);
    }

    #[test]
    fn test_table_job_follows_mapping() {
        let config = Config::from_yaml(
            "source:\n  type: memory\n  database: legacy\n  schema: dbo\ntarget:\n  type: memory\n  database: warehouse\nmappings:\n  - source_table: Users\n    target_table: app_users\n",
        )
        .unwrap();
        let mapping = config.table_mapping("Users").unwrap().clone();
        let expected = TableJob::new("Users")
            .with_schemas(Some("dbo".into()), None)
            .with_mapping(mapping);
        assert_eq!(expected.target_table, "app_users");
        assert_eq!(TableJob::from_config("Users", &config), expected);
    }

    #[tokio::test]
    async fn test_missing_target_table_ends_the_run() {
        let source_db = MemoryDatabase::new();
        source_db.create_table(users_table("users"));
        let target_db = MemoryDatabase::new();

        let source = connected(&source_db).await;
        let target = connected(&target_db).await;
        let err = BatchPipeline::new(&source, &target, options(10))
            .run(&TableJob::new("users"))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Introspection(_)));
    }
}
