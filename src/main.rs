use anyhow::Context;
use clap::{Parser, Subcommand};
use covid_dashboard::config::Config;
use covid_dashboard::logging;
use covid_dashboard::metrics;
use covid_dashboard::pipeline::{Pipeline, PipelineReport};
use covid_dashboard::query::cache::DatasetCache;
use covid_dashboard::query::views::{self, ViewRequest};
use covid_dashboard::server::{self, AppState};
use covid_dashboard::storage::DatasetStore;
use covid_dashboard::table::RawTable;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "covid_dashboard")]
#[command(about = "COVID-19 dataset pipeline and dashboard query service")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, clean and save the dataset
    Process,
    /// Clean and save a raw CSV already on disk
    Clean {
        #[arg(long)]
        input: PathBuf,
    },
    /// Show freshness and shape of the saved dataset
    Status,
    /// Print a dashboard view as JSON
    View {
        /// overview, time_series, comparison or vaccination
        #[arg(long, default_value = "overview")]
        view: String,
        #[arg(long)]
        metric: Option<String>,
        /// Comma-separated entity names; pass an empty string for all
        #[arg(long)]
        entities: Option<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        start: Option<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        end: Option<String>,
        /// Moving average window in days
        #[arg(long)]
        window: Option<usize>,
        /// Comma-separated entity names for the vaccination trend
        #[arg(long)]
        vaccination_entities: Option<String>,
    },
    /// Serve dashboard views over HTTP
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

fn print_report(report: &PipelineReport) {
    println!("\n📊 Pipeline Results:");
    println!("   Run: {}", report.run_id);
    println!("   Source: {}", report.source);
    println!("   Raw rows: {}", report.raw_rows);
    println!("   Kept rows: {}", report.clean.kept_rows);
    println!("   Columns kept: {}", report.clean.columns_kept.len());
    println!(
        "   Imputed: {} forward filled, {} median filled",
        report.clean.imputed.forward_filled, report.clean.imputed.median_filled
    );
    println!("   Output file: {}", report.output_file.display());
    println!("   Last updated: {}", report.last_updated);
    println!("   Duration: {:.2}s", report.duration_secs);

    let dropped = report.clean.dropped_rows();
    if dropped > 0 {
        warn!(dropped, "Rows dropped for missing identifying fields");
        println!("\n⚠️  Dropped rows:");
        for (field, count) in report.clean.dropped_by_field() {
            println!("   - missing {}: {}", field, count);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    if let Some(addr) = &config.metrics.addr {
        metrics::init_metrics(addr);
    }

    match cli.command {
        Commands::Process => {
            println!("🔄 Running data pipeline...");
            let pipeline = Pipeline::from_config(&config)?;
            let outcome = pipeline.process().await?;
            print_report(&outcome.report);
        }
        Commands::Clean { input } => {
            println!("🧹 Cleaning {}...", input.display());
            let file = File::open(&input).with_context(|| format!("opening {}", input.display()))?;
            let raw = RawTable::from_reader(file).with_context(|| format!("parsing {}", input.display()))?;
            let pipeline = Pipeline::from_config(&config)?;
            let outcome = pipeline.clean_and_save(&raw, &input.display().to_string())?;
            print_report(&outcome.report);
        }
        Commands::Status => {
            let store = DatasetStore::new(&config.storage.data_dir);
            let dataset = store.load().context("no data available, run the pipeline")?;
            println!("📁 Dataset: {}", store.dataset_path().display());
            println!("   Last updated: {}", dataset.last_updated);
            println!("   Version: {}", dataset.version);
            println!("   Rows: {}", dataset.table.len());
            println!("   Entities: {}", dataset.table.entities().len());
            if let Some((start, end)) = dataset.table.date_span() {
                println!("   Dates: {} to {}", start, end);
            }
            if let Err(e) = dataset.ensure_fresh(config.dashboard.stale_after_hours, chrono::Local::now().naive_local()) {
                println!("⚠️  {}", e);
            }
        }
        Commands::View {
            view,
            metric,
            entities,
            start,
            end,
            window,
            vaccination_entities,
        } => {
            let request = ViewRequest {
                view: Some(view),
                metric,
                entities,
                start,
                end,
                window,
                vaccination_entities,
            };
            let dashboard = request.into_config(&config.dashboard)?;
            let cache = DatasetCache::new(DatasetStore::new(&config.storage.data_dir), config.dashboard.cache_ttl())
                .with_stale_limit(config.dashboard.stale_after_hours);
            let dataset = cache.get().await.context("no data available, run the pipeline")?;
            let payload = views::render(&dataset, &dashboard)?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            let cache = DatasetCache::new(DatasetStore::new(&config.storage.data_dir), config.dashboard.cache_ttl())
                .with_stale_limit(config.dashboard.stale_after_hours);
            let state = AppState {
                cache: Arc::new(cache),
                settings: config.dashboard.clone(),
            };
            info!(port, data_dir = %config.storage.data_dir.display(), "Starting dashboard server");
            server::start_server(state, port)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }
    }

    Ok(())
}
