use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use channel_ingest::config::AppConfig;
use channel_ingest::detector::{CommandDetector, Detector};
use channel_ingest::loader::{DetectionLoader, RawLoader};
use channel_ingest::logging::{init_logging, OperationTimer};
use channel_ingest::pipeline::{self, Pipeline};
use channel_ingest::scraper::Scraper;
use channel_ingest::transform::{TransformAction, TransformRunner};
use channel_ingest::{Database, WebClientSettings, WebPreviewClient};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Extra configuration file layered over the defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage: scrape, load, transform, detect, verify
    Run,
    /// Scrape channels into the staging area
    Scrape {
        /// Channels to scrape instead of the configured list
        #[arg(short = 'C', long = "channel")]
        channels: Vec<String>,

        /// Most recent N messages per channel
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Load staged files into the raw message table
    Load {
        /// Staging root (defaults to the configured one)
        #[arg(short, long)]
        staging_dir: Option<PathBuf>,
    },
    /// Detect objects in staged images and load the results
    Detect {
        /// Image root (defaults to the configured one)
        #[arg(short, long)]
        image_dir: Option<PathBuf>,
    },
    /// Invoke the transformation tool
    Transform {
        /// Subcommand to run
        #[arg(value_enum, default_value = "run")]
        action: TransformArg,

        /// Only build the selected models (implies `run`)
        #[arg(short, long)]
        select: Option<String>,
    },
    /// Report row counts of the raw and configured tables
    Verify,
    /// Create the raw tables if they do not exist
    InitDb,
}

#[derive(Clone, Copy, ValueEnum)]
enum TransformArg {
    Deps,
    Run,
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load_with(cli.config.as_deref())?;

    // Initialize logging; the guard flushes the log file on exit
    let _guard = init_logging(
        Some(config.get_log_level().as_str()),
        config.logging.file_path.as_deref().map(Path::new),
        config.logging.format == "json",
    )?;

    info!("Starting channel-ingest");

    let db = Database::with_pool_size(&config.get_database_url(), config.database.max_connections)
        .context("Failed to open database")?;

    match cli.command {
        Commands::Run => run_pipeline(config, db).await?,
        Commands::Scrape { channels, limit } => scrape(config, channels, limit).await?,
        Commands::Load { staging_dir } => load(&config, db, staging_dir)?,
        Commands::Detect { image_dir } => detect(&config, db, image_dir).await?,
        Commands::Transform { action, select } => transform(&config, action, select).await?,
        Commands::Verify => verify(&config, &db)?,
        Commands::InitDb => init_db(db)?,
    }

    Ok(())
}

fn web_client(config: &AppConfig) -> WebPreviewClient {
    WebPreviewClient::new(WebClientSettings {
        base_url: config.scraper.base_url.clone(),
        user_agent: config.scraper.user_agent.clone(),
        proxy_url: config.scraper.proxy_url.clone(),
        timeout: Duration::from_secs(config.scraper.request_timeout_secs),
    })
}

/// Run the whole pipeline once
async fn run_pipeline(config: AppConfig, db: Database) -> Result<()> {
    let timer = OperationTimer::new("pipeline");
    let client = web_client(&config);
    let detector = CommandDetector::from_config(&config.detector);

    let report = Pipeline::new(config, db, client, detector)
        .run()
        .await
        .context("Pipeline run failed")?;

    for stage in &report.stages {
        info!(stage = %stage.stage, status = ?stage.status, duration_ms = stage.duration.as_millis() as u64, "Stage summary");
    }
    info!(
        messages = report.metrics.messages_scraped,
        records = report.metrics.records_upserted,
        images = report.metrics.images_detected,
        errors = report.metrics.errors,
        "Run summary"
    );
    timer.finish();
    Ok(())
}

/// Scrape channels into the staging area
async fn scrape(mut config: AppConfig, channels: Vec<String>, limit: Option<usize>) -> Result<()> {
    if let Some(limit) = limit {
        config.scraper.message_limit = limit;
    }
    let channels = if channels.is_empty() {
        config.scraper.channels.clone()
    } else {
        channels
    };
    if channels.is_empty() {
        warn!("No channels configured, nothing to scrape");
        return Ok(());
    }

    let mut scraper = Scraper::new(web_client(&config), config.scraper.clone());
    let report = scraper.run(&channels).await.context("Scrape failed")?;

    info!(
        staged = report.channels_staged,
        messages = report.messages,
        images = report.images_downloaded,
        flood_waits = report.flood_waits,
        "Scrape complete"
    );
    Ok(())
}

/// Load staged files into the raw table
fn load(config: &AppConfig, db: Database, staging_dir: Option<PathBuf>) -> Result<()> {
    let root = staging_dir.unwrap_or_else(|| PathBuf::from(&config.scraper.staging_dir));

    let mut loader = RawLoader::new(db);
    loader.initialize_schema().context("Failed to initialize schema")?;
    let report = loader.load(&root)?;

    if report.files_failed > 0 {
        warn!(failed = report.files_failed, "Some staged files could not be loaded");
    }
    info!(loaded = report.files_loaded, records = report.records_upserted, "Load complete");
    Ok(())
}

/// Run detection over staged images
async fn detect(config: &AppConfig, db: Database, image_dir: Option<PathBuf>) -> Result<()> {
    let root = image_dir.unwrap_or_else(|| PathBuf::from(&config.scraper.image_dir));

    let mut detector = Detector::new(CommandDetector::from_config(&config.detector), db, config.detector.clone());
    let report = detector.process(&root).await.context("Detection failed")?;

    info!(
        found = report.images_found,
        processed = report.processed,
        skipped = report.skipped_processed,
        failed = report.failed,
        "Detection complete"
    );
    Ok(())
}

/// Invoke the transformation tool directly
async fn transform(config: &AppConfig, action: TransformArg, select: Option<String>) -> Result<()> {
    let runner = TransformRunner::from_config(config);

    let output = match select {
        Some(target) => runner.run_select(&target).await?,
        None => {
            let action = match action {
                TransformArg::Deps => TransformAction::Deps,
                TransformArg::Run => TransformAction::Run,
                TransformArg::Test => TransformAction::Test,
            };
            runner.execute(&runner.command(action)).await?
        }
    };

    info!(status = output.status, "Transform complete");
    Ok(())
}

/// Report table row counts
fn verify(config: &AppConfig, db: &Database) -> Result<()> {
    let report = pipeline::verify(db, &config.pipeline.verify_tables).context("Verification failed")?;
    for (table, count) in &report.counts {
        info!(table = %table, rows = count, "Row count");
    }
    Ok(())
}

/// Create both raw tables
fn init_db(db: Database) -> Result<()> {
    RawLoader::new(db.clone()).initialize_schema()?;
    DetectionLoader::new(db).initialize_schema()?;
    info!("Database initialized");
    Ok(())
}
