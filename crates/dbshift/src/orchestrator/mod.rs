//! Migration orchestrator - runs every configured table through the pipeline.
//!
//! Each table gets its own source and target adapter, created from the
//! [`AdapterFactory`], connected for the duration of the table and always
//! disconnected afterwards. Tables run one after another, or up to
//! `migration.workers` at a time.

mod report;

pub use report::{
    HealthCheckResult, MigrationReport, ReportTotals, TableReport, TableStatus, TableValidation,
    ValidationReport,
};

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::{AdapterFactory, DatabaseAdapter, DriverFactory};
use crate::config::{Config, ConnectionConfig};
use crate::error::{MigrateError, Result};
use crate::pipeline::{
    BatchPipeline, MigrationEvent, MigrationObserver, NoopObserver, PipelineOptions, TableJob,
};
use crate::typemap::TypeRegistry;

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    factory: Arc<dyn AdapterFactory>,
    observer: Arc<dyn MigrationObserver>,
    cancel: CancellationToken,
}

/// Everything a table task needs, cheap to clone into a spawned task.
#[derive(Clone)]
struct TableContext {
    source: ConnectionConfig,
    target: ConnectionConfig,
    factory: Arc<dyn AdapterFactory>,
    options: PipelineOptions,
    types: Arc<TypeRegistry>,
    observer: Arc<dyn MigrationObserver>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: Config, factory: Arc<dyn AdapterFactory>) -> Self {
        Self {
            config,
            factory,
            observer: Arc::new(NoopObserver),
            cancel: CancellationToken::new(),
        }
    }

    /// Orchestrator over the built-in network drivers.
    pub fn with_drivers(config: Config) -> Self {
        Self::new(config, Arc::new(DriverFactory))
    }

    pub fn with_observer(mut self, observer: Arc<dyn MigrationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Cancelling stops the run between batches; finished batches stay committed.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the migration.
    pub async fn run(&self) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {}", run_id);

        let (tables, types) = self.plan().await?;
        let jobs: Vec<TableJob> = tables
            .iter()
            .map(|t| TableJob::from_config(t, &self.config))
            .collect();

        let workers = self.config.migration.get_workers().max(1);
        info!("Migrating {} tables with {} workers", jobs.len(), workers);
        self.observer.on_event(&MigrationEvent::Info {
            message: format!("migrating {} tables", jobs.len()),
        });

        let ctx = TableContext {
            source: self.config.source.clone(),
            target: self.config.target.clone(),
            factory: self.factory.clone(),
            options: PipelineOptions::from_config(&self.config.migration),
            types: Arc::new(types),
            observer: self.observer.clone(),
            cancel: self.cancel.clone(),
        };

        let reports = if workers == 1 || jobs.len() <= 1 {
            let mut reports = Vec::with_capacity(jobs.len());
            for job in jobs {
                reports.push(migrate_table(ctx.clone(), job).await);
            }
            reports
        } else {
            run_parallel(ctx, jobs, workers).await
        };

        let report = MigrationReport::new(
            run_id,
            self.config.hash(),
            self.config.migration.dry_run,
            started_at,
            reports,
        );
        info!(
            "Migration {}: {} tables, {} of {} rows migrated, {} failed in {:.1}s",
            report.status,
            report.totals.tables,
            report.totals.migrated_rows,
            report.totals.total_rows,
            report.totals.failed_rows,
            report.duration_seconds
        );
        Ok(report)
    }

    /// Tables to migrate and the type registry to reshape them with.
    ///
    /// An explicit `migration.tables` list is used as given; otherwise every
    /// table in the source schema. `exclude_tables` applies to both.
    async fn plan(&self) -> Result<(Vec<String>, TypeRegistry)> {
        let mut source = self.factory.create(&self.config.source)?;
        let mut types = TypeRegistry::from_mappings(source.get_data_type_mapping());
        types.extend(self.config.type_mappings.iter().cloned());

        let migration = &self.config.migration;
        let tables = if migration.tables.is_empty() {
            source.connect().await?;
            let listed = source.get_tables(self.config.source.schema.as_deref()).await;
            disconnect(source.as_mut(), "source").await;
            listed?
        } else {
            migration.tables.clone()
        };

        let tables: Vec<String> = tables
            .into_iter()
            .filter(|t| {
                let excluded = migration
                    .exclude_tables
                    .iter()
                    .any(|x| x.eq_ignore_ascii_case(t));
                if excluded {
                    debug!("{}: excluded by config", t);
                }
                !excluded
            })
            .collect();
        Ok((tables, types))
    }

    /// Connect to both sides and time a round trip.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let (source_connected, source_latency_ms, source_error) =
            self.check_side(&self.config.source, "source").await;
        let (target_connected, target_latency_ms, target_error) =
            self.check_side(&self.config.target, "target").await;
        Ok(HealthCheckResult {
            source_connected,
            source_latency_ms,
            source_error,
            target_connected,
            target_latency_ms,
            target_error,
            healthy: source_connected && target_connected,
        })
    }

    async fn check_side(&self, config: &ConnectionConfig, side: &str) -> (bool, u64, Option<String>) {
        let started = Instant::now();
        let mut adapter = match self.factory.create(config) {
            Ok(adapter) => adapter,
            Err(e) => return (false, 0, Some(e.to_string())),
        };
        let outcome = match adapter.connect().await {
            Ok(()) if adapter.test_connection().await => (true, None),
            Ok(()) => (false, Some("connection test failed".to_string())),
            Err(e) => (false, Some(e.to_string())),
        };
        let latency = started.elapsed().as_millis() as u64;
        disconnect(adapter.as_mut(), side).await;
        (outcome.0, latency, outcome.1)
    }

    /// Compare source and target row counts for every planned table.
    pub async fn validate(&self) -> Result<ValidationReport> {
        let (tables, _) = self.plan().await?;
        let mut source = self.factory.create(&self.config.source)?;
        let mut target = self.factory.create(&self.config.target)?;

        let connected = match source.connect().await {
            Ok(()) => target.connect().await,
            Err(e) => Err(e),
        };
        let result = match connected {
            Ok(()) => Ok(self.count_tables(&tables, source.as_ref(), target.as_ref()).await),
            Err(e) => Err(e),
        };

        disconnect(source.as_mut(), "source").await;
        disconnect(target.as_mut(), "target").await;
        result
    }

    async fn count_tables(
        &self,
        tables: &[String],
        source: &dyn DatabaseAdapter,
        target: &dyn DatabaseAdapter,
    ) -> ValidationReport {
        let mut results = Vec::with_capacity(tables.len());
        for table in tables {
            let job = TableJob::from_config(table, &self.config);
            let source_rows = source
                .get_row_count(&job.source_table, job.source_schema.as_deref())
                .await;
            let target_rows = target
                .get_row_count(&job.target_table, job.target_schema.as_deref())
                .await;
            let error = match (&source_rows, &target_rows) {
                (Err(e), _) => Some(format!("source: {}", e)),
                (_, Err(e)) => Some(format!("target: {}", e)),
                _ => None,
            };
            let validation = TableValidation {
                source_table: job.source_table,
                target_table: job.target_table,
                source_rows: source_rows.ok(),
                target_rows: target_rows.ok(),
                error,
            };
            if !validation.matches() {
                warn!(
                    "{}: row counts differ (source {:?}, target {:?})",
                    validation.source_table, validation.source_rows, validation.target_rows
                );
            }
            results.push(validation);
        }
        ValidationReport { tables: results }
    }
}

async fn run_parallel(ctx: TableContext, jobs: Vec<TableJob>, workers: usize) -> Vec<TableReport> {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut handles = Vec::with_capacity(jobs.len());

    for job in jobs {
        let names = (job.source_table.clone(), job.target_table.clone());
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            let report = migrate_table(ctx, job).await;
            drop(permit);
            report
        });
        handles.push((names, handle));
    }

    let (names, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
    join_all(handles)
        .await
        .into_iter()
        .zip(names)
        .map(|(outcome, (source_table, target_table))| match outcome {
            Ok(report) => report,
            Err(e) => {
                error!("{}: task panicked - {}", source_table, e);
                TableReport::failed(&source_table, &target_table, format!("task panicked: {}", e))
            }
        })
        .collect()
}

/// Migrate one table with its own adapter pair. Never fails; errors end up
/// in the report.
async fn migrate_table(ctx: TableContext, job: TableJob) -> TableReport {
    if ctx.cancel.is_cancelled() {
        info!("{}: skipped, run cancelled", job.source_table);
        return TableReport::cancelled(&job.source_table, &job.target_table);
    }

    let adapters = ctx
        .factory
        .create(&ctx.source)
        .and_then(|s| ctx.factory.create(&ctx.target).map(|t| (s, t)));
    let (mut source, mut target) = match adapters {
        Ok(pair) => pair,
        Err(e) => return table_failed(&ctx, &job, e),
    };

    let result = run_table(&ctx, &job, source.as_mut(), target.as_mut()).await;
    disconnect(source.as_mut(), "source").await;
    disconnect(target.as_mut(), "target").await;

    match result {
        Ok(summary) => {
            info!(
                "{}: {} of {} rows migrated, {} failed",
                job.source_table, summary.migrated_rows, summary.total_rows, summary.failed_rows
            );
            TableReport::finished(&job.source_table, &job.target_table, summary)
        }
        Err(e) => table_failed(&ctx, &job, e),
    }
}

async fn run_table(
    ctx: &TableContext,
    job: &TableJob,
    source: &mut dyn DatabaseAdapter,
    target: &mut dyn DatabaseAdapter,
) -> Result<crate::pipeline::PipelineSummary> {
    source.connect().await?;
    target.connect().await?;
    BatchPipeline::new(&*source, &*target, ctx.options.clone())
        .with_types(ctx.types.clone())
        .with_observer(ctx.observer.clone())
        .with_cancel(ctx.cancel.clone())
        .run(job)
        .await
}

fn table_failed(ctx: &TableContext, job: &TableJob, e: MigrateError) -> TableReport {
    error!("{}: failed - {}", job.source_table, e);
    ctx.observer.on_event(&MigrationEvent::Info {
        message: format!("{}: failed: {}", job.source_table, e),
    });
    TableReport::failed(&job.source_table, &job.target_table, e.to_string())
}

async fn disconnect(adapter: &mut dyn DatabaseAdapter, side: &str) {
    if let Err(e) = adapter.disconnect().await {
        warn!("Failed to disconnect {} ({}): {}", side, adapter.name(), e);
    }
}
