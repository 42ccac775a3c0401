//! dbshift CLI - batch table migration from SQL Server to PostgreSQL.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use dbshift::config::WriteMode;
use dbshift::pipeline::{CompositeObserver, TracingObserver};
use dbshift::{
    create_adapter, Config, MigrateError, MigrationEvent, MigrationObserver, Orchestrator,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "dbshift")]
#[command(about = "Batch table migration from SQL Server to PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error (RUST_LOG overrides)
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// List every row error in the report
    #[arg(long)]
    verbose: bool,

    /// Print progress events as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Source,
    Target,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a migration
    Run {
        /// Migrate only this source table (repeatable)
        #[arg(long = "table")]
        tables: Vec<String>,

        /// Count rows and check target tables without writing
        #[arg(long)]
        dry_run: bool,

        /// Stop a table at its first batch with a failed row
        #[arg(long)]
        fail_fast: bool,

        /// Roll back a whole batch when any row fails
        #[arg(long)]
        atomic: bool,

        /// Override rows per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override number of tables migrated at once
        #[arg(long)]
        workers: Option<usize>,

        /// Source offset to start from (a multiple of the batch size)
        #[arg(long)]
        start_offset: Option<u64>,

        /// Override source schema
        #[arg(long)]
        source_schema: Option<String>,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,
    },

    /// Validate row counts between source and target
    Validate,

    /// Test database connections
    HealthCheck,

    /// Print table metadata as JSON
    Introspect {
        /// Which database to read
        #[arg(long, value_enum, default_value = "source")]
        side: Side,

        /// Only this table (default: every table in the schema)
        #[arg(long)]
        table: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?.with_auto_tuning();
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            tables,
            dry_run,
            fail_fast,
            atomic,
            batch_size,
            workers,
            start_offset,
            source_schema,
            target_schema,
        } => {
            let migration = &mut config.migration;
            if !tables.is_empty() {
                migration.tables = tables;
            }
            migration.dry_run |= dry_run;
            migration.fail_fast |= fail_fast;
            migration.verbose |= cli.verbose;
            if atomic {
                migration.write_mode = WriteMode::Atomic;
            }
            if batch_size.is_some() {
                migration.batch_size = batch_size;
            }
            if workers.is_some() {
                migration.workers = workers;
            }
            if let Some(offset) = start_offset {
                migration.start_offset = offset;
            }
            if source_schema.is_some() {
                config.source.schema = source_schema;
            }
            if target_schema.is_some() {
                config.target.schema = target_schema;
            }
            config.validate()?;

            let cancel = setup_signal_handler()?;
            let mut observers = CompositeObserver::new().with(Arc::new(TracingObserver));
            if cli.progress {
                observers = observers.with(Arc::new(ProgressPrinter));
            }
            let verbose = config.migration.verbose;

            let report = Orchestrator::with_drivers(config)
                .with_observer(Arc::new(observers))
                .with_cancel(cancel)
                .run()
                .await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\n{}", report.render(verbose));
            }

            return Ok(ExitCode::from(report.exit_code()));
        }

        Commands::Validate => {
            let report = Orchestrator::with_drivers(config).validate().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Validation Results:");
                for table in &report.tables {
                    let counts = |n: Option<u64>| n.map_or("?".to_string(), |n| n.to_string());
                    println!(
                        "  {} -> {}: {} / {} {}",
                        table.source_table,
                        table.target_table,
                        counts(table.source_rows),
                        counts(table.target_rows),
                        if table.matches() { "OK" } else { "MISMATCH" }
                    );
                    if let Some(ref err) = table.error {
                        println!("    Error: {}", err);
                    }
                }
            }

            return Ok(ExitCode::from(report.exit_code()));
        }

        Commands::HealthCheck => {
            let result = Orchestrator::with_drivers(config).health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source: {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target: {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::connection("health-check", "one or both databases unreachable"));
            }
        }

        Commands::Introspect { side, table } => {
            let connection = match side {
                Side::Source => &config.source,
                Side::Target => &config.target,
            };
            let mut adapter = create_adapter(connection)?;
            adapter.connect().await?;
            let schema = connection.schema.as_deref();
            let result = match table {
                Some(ref name) => adapter
                    .get_table_schema(name, schema)
                    .await
                    .map(|t| vec![t]),
                None => adapter.introspect_database(schema).await,
            };
            adapter.disconnect().await?;
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Writes every engine event to stderr as one JSON object per line.
struct ProgressPrinter;

impl MigrationObserver for ProgressPrinter {
    fn on_event(&self, event: &MigrationEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            eprintln!("{}", line);
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(verbosity.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the run on SIGINT (Ctrl-C) or SIGTERM. Batches already written stay
/// committed; the run stops before the next one.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => eprintln!("\nReceived SIGINT. Stopping after the current batch..."),
            _ = sigterm.recv() => eprintln!("\nReceived SIGTERM. Stopping after the current batch..."),
        }
        token.cancel();
    });

    Ok(cancel_token)
}

#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
