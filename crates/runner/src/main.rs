use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rowsync_config::SyncConfig;
use rowsync_core::IgnoreList;
use runner::{Coordinator, SyncOutcome, SyncRequest, log_progress, version};
use sinks::build_warehouse;
use sources::build_source;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "rowsync",
    version = version::VERSION,
    about = "Incremental MySQL to BigQuery table sync"
)]
struct Cli {
    /// YAML config file. Without one, everything comes from the environment.
    #[arg(long, value_name = "FILE", env = "ROWSYNC_CONFIG", global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the rows missing from the warehouse copy of a table.
    Sync(SyncArgs),
}

#[derive(Args, Debug)]
struct SyncArgs {
    /// Source table name.
    table_name: String,

    /// Create the warehouse table when it does not exist.
    #[arg(short = 'c', long)]
    create_table: bool,

    /// Delete and recreate the warehouse table before loading.
    #[arg(short = 'd', long)]
    delete_table: bool,

    /// Ordering column for watermark sync (falls back to ORDER_COLUMN).
    #[arg(short = 'o', long)]
    order_column: Option<String>,

    /// Column left out of the warehouse table; repeatable.
    #[arg(short = 'i', long = "ignore-column")]
    ignore_columns: Vec<String>,

    /// Source database, overriding the configured one.
    #[arg(long)]
    database_name: Option<String>,

    /// Warehouse table name. Defaults to the source table name.
    #[arg(long)]
    warehouse_table: Option<String>,

    #[arg(long)]
    batch_size: Option<usize>,
}

impl SyncArgs {
    fn apply(&self, cfg: &mut SyncConfig) {
        if let Some(db) = &self.database_name {
            cfg.source.database = Some(db.clone());
        }
        if let Some(n) = self.batch_size {
            cfg.sync.batch_size = Some(n);
        }
        if self.order_column.is_some() {
            cfg.sync.order_column = self.order_column.clone();
        }
        if !self.ignore_columns.is_empty() {
            cfg.sync.ignore_columns = self.ignore_columns.clone();
        }
    }

    fn request(&self, cfg: &SyncConfig) -> SyncRequest {
        SyncRequest {
            source_table: self.table_name.clone(),
            dest_table: self
                .warehouse_table
                .clone()
                .unwrap_or_else(|| self.table_name.clone()),
            create_if_missing: self.create_table,
            force_recreate: self.delete_table,
            order_column: cfg.sync.order_column.clone(),
            ignore_columns: IgnoreList::new(&cfg.sync.ignore_columns),
            batch_size: cfg.sync.batch_size(),
        }
    }
}

fn load_config(cli: &Cli, args: &SyncArgs) -> Result<SyncConfig> {
    let mut cfg = match cli.config.as_deref() {
        Some(path) => rowsync_config::load_from_path(path)
            .with_context(|| format!("load config {path}"))?,
        None => SyncConfig::default(),
    };
    cfg.apply_env().context("apply environment")?;
    args.apply(&mut cfg);
    if cli.log_json {
        cfg.logging.json = true;
    }
    cfg.validate().context("validate config")?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Command::Sync(args) = &cli.command;

    let cfg = load_config(&cli, args)?;

    o11y::init_all(
        &o11y::logging::Config {
            level: cfg.logging.level.clone(),
            json: cfg.logging.json,
            with_targets: cfg.logging.with_targets,
        },
        &o11y::metrics::Config::from_listen(cfg.metrics.listen.as_deref())?,
    )?;
    version::log_startup();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling sync");
            on_signal.cancel();
        }
    });

    let dsn = cfg.source.resolved_dsn()?;
    let source = build_source(&dsn, None, &cancel)
        .await
        .context("connect source")?;
    let warehouse =
        build_warehouse(&cfg.warehouse, cancel.clone()).context("build warehouse")?;

    let coordinator = Coordinator::builder(source, warehouse)
        .poll_interval(cfg.sync.poll_interval())
        .max_poll_duration(cfg.sync.max_poll_duration())
        .cancel(cancel)
        .on_progress(Box::new(log_progress))
        .build();

    let req = args.request(&cfg);
    match coordinator.sync(&req).await {
        Ok(report) => {
            match report.outcome {
                SyncOutcome::AlreadySynced => info!(table = %req.dest_table, "nothing to sync"),
                SyncOutcome::Synced => info!(
                    table = %req.dest_table,
                    rows = report.rows_loaded,
                    batches = report.batches_submitted,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "sync complete"
                ),
            }
            Ok(())
        }
        Err(e) => {
            error!(table = %req.dest_table, kind = e.kind(), error = %e, "sync failed");
            Err(e.into())
        }
    }
}
