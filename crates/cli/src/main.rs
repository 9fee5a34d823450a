//! hexchange CLI - vegetation disturbance detection on an H3 hexagon grid

mod pipeline;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use hexchange_algorithms::grid::HexGridParams;
use hexchange_algorithms::imagery::DisturbanceParams;
use hexchange_algorithms::temporal::{parse_anchor, DateWindowParams};
use hexchange_cloud::blocking::{CogStackerBlocking, StacClientBlocking};
use hexchange_cloud::{RetryPolicy, SceneFilter, StacCatalog, StacClientOptions, StackOptions};
use hexchange_core::io::read_geojson;
use hexchange_core::CRS;

use pipeline::{PipelineConfig, PipelineError};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "hexchange")]
#[command(
    author,
    version,
    about = "Flag vegetation disturbance on an H3 hexagon grid from Sentinel-2 NDVI",
    long_about = None
)]
struct Cli {
    /// Anchor date of the analysis window (YYYY-MM-DD)
    #[arg(long, value_parser = parse_anchor)]
    start: NaiveDate,

    /// Area of interest (GeoJSON polygon or multipolygon)
    #[arg(long)]
    aoi: PathBuf,

    /// Output hexagon GeoJSON
    #[arg(long)]
    out: PathBuf,

    /// Also write a 2-band GeoTIFF of reference and analysis NDVI
    #[arg(long)]
    ndvi: Option<PathBuf>,

    /// Weeks between the analysis and reference anchors
    #[arg(long, default_value = "52")]
    lag_weeks: i64,

    /// Days of imagery before each anchor
    #[arg(long, default_value = "90")]
    buffer: i64,

    /// EPSG code of the working and output CRS
    #[arg(long, default_value = "3577")]
    epsg: u32,

    /// EPSG code of the AOI when the file does not declare one
    #[arg(long, default_value = "4326")]
    aoi_epsg: u32,

    /// Drop in scaled NDVI that marks a hexagon as disturbed
    #[arg(long, default_value = "2500")]
    trigger: f64,

    /// H3 resolution of the hexagon grid
    #[arg(long, default_value = "8")]
    resolution: u8,

    /// Maximum scene cloud cover (percent)
    #[arg(long, default_value = "25")]
    cloud_cover: f64,

    /// Maximum scene nodata pixels (percent)
    #[arg(long, default_value = "10")]
    max_nodata_pixels: f64,

    /// Scenes required in each window before any imagery is read
    #[arg(long, default_value = "20")]
    min_scenes: u64,

    /// STAC catalog: es (Earth Search), pc (Planetary Computer) or a search URL
    #[arg(long, env = "HEXCHANGE_CATALOG", default_value = "es")]
    catalog: String,

    /// Composite pixel size in CRS units
    #[arg(long, default_value = "100")]
    pixel_size: f64,

    /// Attempts per imagery pass on transient network failures
    #[arg(long, default_value = "3")]
    retries: u32,

    /// Pause between attempts (seconds)
    #[arg(long, default_value = "10")]
    retry_delay_secs: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

pub(crate) fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn done(path: &std::path::Path, elapsed: Duration) {
    println!("Hexagons saved to: {}", path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

// ─── Main ───────────────────────────────────────────────────────────────

fn run(cli: Cli) -> Result<()> {
    let start = Instant::now();

    let mut config = PipelineConfig::new(cli.start);
    config.windows = DateWindowParams {
        lag_weeks: cli.lag_weeks,
        buffer_days: cli.buffer,
    };
    config.target_crs = CRS::from_epsg(cli.epsg);
    config.grid = HexGridParams {
        resolution: cli.resolution,
        ..HexGridParams::default()
    };
    config.pixel_size = cli.pixel_size;
    config.min_scenes = cli.min_scenes;
    config.disturbance = DisturbanceParams {
        trigger: cli.trigger,
    };
    config.retry = RetryPolicy::new(cli.retries, Duration::from_secs(cli.retry_delay_secs));

    let aoi = read_geojson(&cli.aoi, &CRS::from_epsg(cli.aoi_epsg))
        .with_context(|| format!("failed to read AOI {}", cli.aoi.display()))?;
    info!(features = aoi.len(), "AOI loaded from {}", cli.aoi.display());

    let catalog = StacCatalog::from_str_or_url(&cli.catalog);
    let assets = catalog.red_nir_assets().iter().map(|a| a.to_string()).collect();
    let filter = SceneFilter {
        max_cloud_cover: cli.cloud_cover,
        max_nodata_pixels: Some(cli.max_nodata_pixels),
        ..SceneFilter::default()
    };
    let client = StacClientBlocking::new(catalog, StacClientOptions::default(), filter)
        .context("failed to create STAC client")?;
    let stacker = CogStackerBlocking::new(
        client.client().clone(),
        StackOptions {
            assets,
            pixel_size: cli.pixel_size,
            ..StackOptions::default()
        },
    )
    .context("failed to create scene stacker")?;

    let output = pipeline::run(&aoi, &config, &client, &stacker)?;

    let pb = spinner("Writing outputs...");
    pipeline::write_outputs(&output, &cli.out, cli.ndvi.as_deref())?;
    pb.finish_and_clear();

    let summary = &output.summary;
    println!("Hexagons: {}", summary.hexagons);
    println!("Disturbed: {}", summary.disturbed);
    println!("Disturbed area: {:.2} ha", summary.disturbed_area_ha());
    if let Some(path) = &cli.ndvi {
        println!("NDVI raster saved to: {}", path.display());
    }
    done(&cli.out, start.elapsed());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = setup_logging(cli.verbose) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<PipelineError>() {
            Some(insufficient) => {
                eprintln!("{insufficient}");
                ExitCode::from(2)
            }
            None => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
    }
}
