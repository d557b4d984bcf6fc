// Engine command-line entry point.
use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use holdings_engine::config::EngineSettings;
use holdings_engine::data::HoldingsCsvLoader;
use holdings_engine::models::RawParams;
use holdings_engine::services::holdings_service::ReportParams;
use holdings_engine::store::{MemoryStore, RowStore, SqliteStore};
use holdings_engine::window::SystemClock;
use holdings_engine::{EngineError, HoldingsService};
use serde::Serialize;
use shared::models::{AggregateRow, HoldingRecord, HoldingsReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "holdings-engine", about = "Aggregate holdings by broker, symbol and day")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Grouped sums of quantity, turnover and volume.
    Aggregate {
        #[command(flatten)]
        query: QueryArgs,
        /// Grouping keys: broker_id, symbol, time_bucket (comma separated or repeated).
        #[arg(long = "group-by", value_delimiter = ',', required = true)]
        group_by: Vec<String>,
    },
    /// Dashboard report: summary, daily chart and a paginated table.
    Report {
        #[command(flatten)]
        query: QueryArgs,
        /// Table entity: broker_id or symbol.
        #[arg(long = "group-by")]
        group_by: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
}

#[derive(Args, Debug)]
struct QueryArgs {
    #[arg(long)]
    broker_id: Option<i64>,
    #[arg(long)]
    symbol: Option<String>,
    /// Window shortcut: 1D, 1W, 1M, 3M, 6M or 1Y.
    #[arg(long)]
    timeframe: Option<String>,
    /// Inclusive start date (YYYY-MM-DD).
    #[arg(long)]
    start: Option<NaiveDate>,
    /// Inclusive end date (YYYY-MM-DD).
    #[arg(long)]
    end: Option<NaiveDate>,
    /// SQLite database; defaults to the configured `db_path`.
    #[arg(long)]
    db: Option<PathBuf>,
    /// Holdings CSV. Alone it is queried in memory; with --db it seeds that database first.
    #[arg(long)]
    csv: Option<PathBuf>,
}

/// What a subcommand prints on success.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Output {
    Rows(Vec<AggregateRow>),
    Report(HoldingsReport),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = EngineSettings::load().context("loading engine settings")?;
    info!(?settings, "Starting holdings engine");

    let store = open_store(cli.command.query(), &settings)?;
    let service = HoldingsService::new(store, Arc::new(SystemClock), &settings);

    match dispatch(cli.command, &service).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            report_failure(&e);
            std::process::exit(if e.kind().is_validation() { 2 } else { 1 });
        }
    }
}

impl Command {
    fn query(&self) -> &QueryArgs {
        match self {
            Command::Aggregate { query, .. } | Command::Report { query, .. } => query,
        }
    }
}

async fn dispatch(command: Command, service: &HoldingsService) -> Result<Output, EngineError> {
    match command {
        Command::Aggregate { query, group_by } => {
            let params = RawParams {
                broker_id: query.broker_id,
                symbol: query.symbol,
                timeframe: query.timeframe,
                start_date: query.start,
                end_date: query.end,
                group_by,
            };
            service.aggregate_params(params).await.map(Output::Rows)
        }
        Command::Report { query, group_by, limit, offset } => {
            let params = ReportParams {
                broker_id: query.broker_id,
                symbol: query.symbol,
                timeframe: query.timeframe,
                start_date: query.start,
                end_date: query.end,
                group_by,
                limit,
                offset,
            };
            service.report_params(params).await.map(Output::Report)
        }
    }
}

fn report_failure(err: &EngineError) {
    let kind = err.kind();
    let body = serde_json::json!({
        "error": kind.as_str(),
        "status": kind.status_code(),
        "retryable": kind.is_retryable(),
        "detail": err.to_string(),
    });
    tracing::error!(error_detail = ?err, "Request failed");
    println!("{}", body);
}

fn open_store(query: &QueryArgs, settings: &EngineSettings) -> anyhow::Result<Arc<dyn RowStore>> {
    let db_path = query.db.clone();
    match (&query.csv, db_path) {
        (Some(csv), None) => {
            let records = load_csv(csv)?;
            info!(count = records.len(), "Serving holdings from memory");
            Ok(Arc::new(MemoryStore::new(records)))
        }
        (Some(csv), Some(db)) => {
            let records = load_csv(csv)?;
            let writer = SqliteStore::open_read_write(&db, 1, settings.query_timeout())?;
            writer.create_schema()?;
            writer.insert_records(&records)?;
            drop(writer);
            open_sqlite(&db, settings)
        }
        (None, db) => open_sqlite(db.as_deref().unwrap_or(&settings.db_path), settings),
    }
}

fn load_csv(path: &Path) -> anyhow::Result<Vec<HoldingRecord>> {
    HoldingsCsvLoader::load_holdings_from_csv(path).with_context(|| format!("loading {}", path.display()))
}

fn open_sqlite(path: &Path, settings: &EngineSettings) -> anyhow::Result<Arc<dyn RowStore>> {
    let store = SqliteStore::open_read_only(path, settings.pool_size, settings.query_timeout())
        .with_context(|| format!("opening {}", path.display()))?;
    info!(path = %path.display(), pool_size = settings.pool_size, "Serving holdings from SQLite");
    Ok(Arc::new(store))
}
