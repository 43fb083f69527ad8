//! Storm extractor.
//!
//! Slides fixed-duration windows over an hourly precipitation archive,
//! identifies one storm per window, and ranks the storms per year into
//! a SQLite catalog:
//! - Resumes from checkpointed windows after a restart
//! - Retries transient grid read failures with exponential backoff
//! - Optionally normalizes storm means by a precipitation-frequency grid

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use storage::StormCatalog;
use storm_common::RankedStorm;
use storm_processor::{Normalizer, StormOrder, StormPipeline, StormQuery, StormStore};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{load_run_config, RunConfig};
use grid_source::{ReferenceRaster, ZarrGridSource};

#[derive(Parser, Debug)]
#[command(name = "storm-extractor")]
#[command(about = "Identify and rank storms in a gridded precipitation archive")]
struct Args {
    /// Run configuration file
    #[arg(short, long, env = "STORM_CONFIG", default_value = "config/storm.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every window of the period of record, then rank
    Extract,
    /// Re-rank checkpointed window storms without reading grids
    Rank,
    /// Print ranked storms as JSON lines
    Query {
        /// Calendar or water year
        #[arg(short, long)]
        partition: Option<i32>,

        /// true_rank, declustered_rank, mean, max, sum, norm_mean or start
        #[arg(long, default_value = "true_rank")]
        order: String,

        /// Skip storms suppressed by declustering
        #[arg(long)]
        declustered_only: bool,

        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Count checkpointed windows by outcome
    Status,
}

/// One line of `query` output.
#[derive(Debug, Serialize)]
struct StormRow {
    id: String,
    partition: i32,
    true_rank: u32,
    declustered_rank: i32,
    start: String,
    duration_hours: u32,
    cells: usize,
    mean: f64,
    max: f64,
    sum: f64,
    norm_mean: Option<f64>,
    center_x: f64,
    center_y: f64,
}

impl From<&RankedStorm> for StormRow {
    fn from(ranked: &RankedStorm) -> Self {
        let storm = &ranked.storm;
        Self {
            id: ranked.id(),
            partition: ranked.partition,
            true_rank: ranked.true_rank,
            declustered_rank: ranked.declustered_rank,
            start: storm.start.datetime.clone(),
            duration_hours: storm.window.duration_hours,
            cells: storm.stats.count,
            mean: storm.stats.mean,
            max: storm.stats.max,
            sum: storm.stats.sum,
            norm_mean: storm.stats.norm_mean,
            center_x: storm.geometry.center_x,
            center_y: storm.geometry.center_y,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_run_config(&args.config)?;
    let catalog = Arc::new(
        StormCatalog::open(&config.database)
            .await
            .with_context(|| format!("Failed to open catalog {:?}", config.database))?,
    );

    match args.command {
        Command::Extract => {
            info!(
                por_start = %config.por_start,
                por_end = %config.por_end,
                "Starting storm extraction"
            );
            let pipeline = build_pipeline(&config, catalog)?;
            let summary = pipeline.run(config.por_start, config.por_end).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Rank => {
            let pipeline = build_pipeline(&config, catalog)?;
            let ranked = pipeline.rank_and_store().await?;
            info!(ranked, "Re-ranked checkpointed storms");
        }
        Command::Query {
            partition,
            order,
            declustered_only,
            limit,
        } => {
            let order_by = StormOrder::from_str(&order)
                .with_context(|| format!("Unknown storm order: {}", order))?;
            let query = StormQuery {
                partition,
                duration_hours: Some(config.extraction.duration_hours),
                declustered_only,
                order_by,
                limit,
            };
            for storm in catalog.query_storms(&query).await? {
                println!("{}", serde_json::to_string(&StormRow::from(&storm))?);
            }
        }
        Command::Status => {
            let counts = catalog
                .outcome_counts(config.extraction.duration_hours)
                .await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
    }

    Ok(())
}

/// Wire the Zarr archive, domain mask, optional normalizer and catalog.
fn build_pipeline(config: &RunConfig, catalog: Arc<StormCatalog>) -> Result<StormPipeline> {
    let source = ZarrGridSource::new(&config.data_root, config.grid);
    let mask = config.mask().context("Failed to build domain mask")?;
    info!(
        cells = mask.valid_count(),
        total = config.grid.len(),
        "Built transposition domain"
    );

    let mut pipeline = StormPipeline::new(
        config.extraction.clone(),
        Arc::new(source),
        Arc::new(mask),
        catalog,
    )?;

    if let Some(reference) = &config.reference {
        let raster = ReferenceRaster::open_zarr(&reference.path, reference.grid)
            .with_context(|| format!("Failed to load reference grid {:?}", reference.path))?;
        pipeline = pipeline.with_normalizer(Normalizer::new(
            Arc::new(raster),
            config.grid,
            reference.subdivisions,
        ));
    }

    Ok(pipeline)
}
