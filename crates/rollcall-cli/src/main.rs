use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_core::ledger::DATE_FORMAT;
use rollcall_core::{
    AttendanceLedger, AttendanceStore, CsvAttendanceStore, Gallery, MemoryStore, OnnxFaceEncoder,
};
use rollcall_hw::{Camera, LiveFeed};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod capture;
mod config;
mod encode;
mod engine;

use config::Config;
use engine::{Recognition, SessionSummary};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance from a live camera")]
struct Cli {
    /// TOML config file (default: $ROLLCALL_CONFIG, if set)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture dataset images for one person
    Capture {
        /// Person name; becomes the directory and attendance label
        #[arg(short, long)]
        name: String,
        /// Number of images to save
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
        /// Pause between saved images, in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
    /// Encode the dataset into the reference gallery
    Encode,
    /// Recognize faces from the camera and mark attendance
    Recognize {
        /// Stop after this many frames (default: run until Ctrl-C)
        #[arg(long)]
        max_frames: Option<usize>,
        /// Recognize and log, but do not write the attendance file
        #[arg(long)]
        dry_run: bool,
    },
    /// List identities in the gallery
    List,
    /// Show attendance records for one day
    Report {
        /// Day to show, YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var_os("ROLLCALL_CONFIG").map(PathBuf::from));
    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Capture {
            name,
            count,
            interval_ms,
        } => run_capture(config, name, count, Duration::from_millis(interval_ms)).await,
        Commands::Encode => run_encode(config).await,
        Commands::Recognize { max_frames, dry_run } => run_recognize(config, max_frames, dry_run).await,
        Commands::List => list_gallery(&config),
        Commands::Report { date } => report(&config, date.unwrap_or_else(|| Local::now().date_naive())),
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path.display(), dev.card, dev.driver, dev.bus_info);
            }
            Ok(())
        }
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            token.cancel();
        }
    });
}

fn open_camera(config: &Config) -> Result<Camera> {
    Camera::open(&config.camera_device).with_context(|| format!("failed to open camera {}", config.camera_device))
}

fn start_feed<'a>(camera: &'a Camera, config: &Config) -> Result<LiveFeed<'a>> {
    let mut feed = camera.stream().context("failed to start capture stream")?;
    feed.warm_up(config.warmup_frames);
    Ok(feed)
}

async fn run_capture(config: Config, name: String, count: usize, interval: Duration) -> Result<()> {
    let name = capture::validate_name(&name)?.to_string();
    let person_dir = config.dataset_dir.join(&name);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let report = tokio::task::spawn_blocking(move || -> Result<capture::CaptureReport> {
        let camera = open_camera(&config)?;
        let mut feed = start_feed(&camera, &config)?;
        Ok(capture::capture_dataset(
            &mut feed,
            &person_dir,
            count,
            interval,
            &cancel,
        )?)
    })
    .await??;

    println!("Saved {} image(s) for {name}", report.saved.len());
    if report.dark_skipped > 0 {
        println!("Skipped {} dark frame(s)", report.dark_skipped);
    }
    if report.saved.len() < count {
        bail!("captured {} of {count} requested images", report.saved.len());
    }
    Ok(())
}

async fn run_encode(config: Config) -> Result<()> {
    let (gallery, report) = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut encoder =
            OnnxFaceEncoder::load(&config.detector_model_path(), &config.recognizer_model_path())?;
        let built = encode::build_gallery(&config.dataset_dir, &mut encoder)?;
        built.0.save(&config.gallery_path)?;
        tracing::info!(path = %config.gallery_path.display(), "gallery written");
        Ok(built)
    })
    .await??;

    println!(
        "Encoded {} image(s) for {} identities",
        report.encoded,
        gallery.identity_counts().len()
    );
    for path in &report.no_face {
        println!("  no face: {}", path.display());
    }
    for path in &report.failed {
        println!("  failed:  {}", path.display());
    }
    Ok(())
}

async fn run_recognize(config: Config, max_frames: Option<usize>, dry_run: bool) -> Result<()> {
    let gallery = Gallery::load(&config.gallery_path).context("failed to load gallery")?;
    if gallery.is_empty() {
        tracing::warn!("gallery is empty; every face will be reported as Unknown");
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let summary = tokio::task::spawn_blocking(move || -> Result<SessionSummary> {
        if dry_run {
            recognize_into(&config, gallery, MemoryStore::new(), max_frames, &cancel)
        } else {
            let store = CsvAttendanceStore::new(&config.attendance_path);
            store.ensure_initialized()?;
            recognize_into(&config, gallery, store, max_frames, &cancel)
        }
    })
    .await??;

    println!(
        "Processed {} frame(s), {} face(s), {} unknown",
        summary.frames, summary.faces, summary.unknown_faces
    );
    if summary.marked.is_empty() {
        println!("No attendance marked");
    }
    for record in &summary.marked {
        println!("  {}  {} {}", record.name, record.date, record.time);
    }
    Ok(())
}

fn recognize_into<S: AttendanceStore>(
    config: &Config,
    gallery: Gallery,
    store: S,
    max_frames: Option<usize>,
    cancel: &CancellationToken,
) -> Result<SessionSummary> {
    let encoder = OnnxFaceEncoder::load(&config.detector_model_path(), &config.recognizer_model_path())?;
    let camera = open_camera(config)?;
    let mut feed = start_feed(&camera, config)?;
    let mut recognition = Recognition::new(encoder, gallery, config.policy(), AttendanceLedger::new(store));
    let summary = recognition.run(&mut feed, cancel, max_frames, || Local::now().naive_local())?;
    Ok(summary)
}

fn list_gallery(config: &Config) -> Result<()> {
    let gallery = Gallery::load(&config.gallery_path)?;
    if gallery.is_empty() {
        println!("Gallery is empty");
        return Ok(());
    }
    if let Some(version) = gallery.model_version() {
        println!("Model: {version}");
    }
    for (identity, count) in gallery.identity_counts() {
        println!("  {identity}  ({count} reference(s))");
    }
    Ok(())
}

fn report(config: &Config, date: NaiveDate) -> Result<()> {
    let day = date.format(DATE_FORMAT).to_string();
    let store = CsvAttendanceStore::new(&config.attendance_path);
    let records: Vec<_> = store
        .records()
        .context("failed to read attendance")?
        .into_iter()
        .filter(|r| r.date == day)
        .collect();

    if records.is_empty() {
        println!("No attendance recorded on {day}");
        return Ok(());
    }
    println!("Attendance on {day}:");
    for record in records {
        println!("  {}  {}", record.time, record.name);
    }
    Ok(())
}
