use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use emote_core::{DisplayState, FaceSelection, OnnxEngine};
use emote_hw::{CameraStream, V4l2Backend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

mod config;
mod controller;
mod engine;

use config::Config;
use controller::{CaptureController, InputSource};

/// Upper bound on waiting for the first analysed tick in one-shot image mode.
const IMAGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "emote", about = "Webcam and still-image facial expression detector")]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Overrides {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// V4L2 device path (e.g. /dev/video0)
    #[arg(long, global = true)]
    device: Option<String>,
    /// Directory holding face_detector.onnx and expression.onnx
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// Poll interval in milliseconds
    #[arg(long, global = true)]
    interval_ms: Option<u64>,
    /// Minimum face detection confidence
    #[arg(long, global = true)]
    threshold: Option<f32>,
    /// Face that drives the label: first, largest_face, most_confident
    #[arg(long, global = true, value_parser = parse_selection)]
    face_selection: Option<FaceSelection>,
    /// Directory snapshots are written to
    #[arg(long, global = true)]
    snapshot_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Live camera detection; reads commands from stdin
    Run,
    /// Analyse a single image file
    Image {
        path: PathBuf,
        /// Also write emotion-snapshot.png
        #[arg(long)]
        snapshot: bool,
    },
    /// List V4L2 capture devices
    Devices,
    /// Print configuration and model availability as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli.overrides)?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Image { path, snapshot } => analyse_image(config, path, snapshot).await,
        Commands::Devices => {
            let devices = CameraStream::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(())
        }
        Commands::Status => {
            let status = serde_json::json!({
                "config": &config,
                "models": {
                    "detector": model_entry(&config.detector_model_path()),
                    "expression": model_entry(&config.expression_model_path()),
                },
                "devices": CameraStream::list_devices().len(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

fn resolve_config(overrides: &Overrides) -> Result<Config> {
    let mut config = Config::load(overrides.config.as_deref()).context("loading config")?;

    if let Some(device) = &overrides.device {
        config.camera_device = device.clone();
    }
    if let Some(dir) = &overrides.model_dir {
        config.model_dir = dir.clone();
    }
    if let Some(ms) = overrides.interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(threshold) = overrides.threshold {
        config.score_threshold = threshold;
    }
    if let Some(selection) = overrides.face_selection {
        config.face_selection = selection;
    }
    if let Some(dir) = &overrides.snapshot_dir {
        config.snapshot_dir = dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn parse_selection(s: &str) -> Result<FaceSelection, String> {
    config::parse_face_selection(s)
        .ok_or_else(|| format!("unknown face selection '{s}' (first, largest_face, most_confident)"))
}

fn model_entry(path: &Path) -> serde_json::Value {
    serde_json::json!({
        "path": path.display().to_string(),
        "present": path.is_file(),
    })
}

fn new_controller(config: Config) -> Result<CaptureController> {
    let backend = Arc::new(
        V4l2Backend::new(config.camera_device.clone(), config.warmup_frames)
            .with_dequeue_timeout(config.dequeue_timeout()),
    );
    let engine = engine::spawn_engine(OnnxEngine::new())?;
    Ok(CaptureController::new(config, engine, backend))
}

fn print_display(state: &DisplayState) {
    match (&state.icon, state.label.is_empty()) {
        (_, true) => println!("-"),
        (Some(icon), false) => println!("{} {}", icon.glyph, state.label),
        (None, false) => println!("{}", state.label),
    }
}

async fn run(config: Config) -> Result<()> {
    let mut controller = new_controller(config)?;
    let mut display = controller.subscribe();

    if let Err(e) = controller.start(InputSource::Camera).await {
        eprintln!("{}", e.user_message());
    }
    println!("commands: snapshot | image <path> | camera | stop | status | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = display.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = display.borrow_and_update().clone();
                print_display(&state);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_command(&mut controller, line.trim()).await? {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    controller.stop();
    Ok(())
}

/// Returns false when the session should end.
async fn handle_command(controller: &mut CaptureController, line: &str) -> Result<bool> {
    let (cmd, arg) = match line.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (line, ""),
    };

    match cmd {
        "" => {}
        "quit" | "exit" => return Ok(false),
        "stop" => controller.stop(),
        "camera" => {
            if let Err(e) = controller.start(InputSource::Camera).await {
                eprintln!("{}", e.user_message());
            }
        }
        "image" if !arg.is_empty() => {
            if let Err(e) = controller.start(InputSource::Image(PathBuf::from(arg))).await {
                eprintln!("{}", e.user_message());
            }
        }
        "snapshot" => match controller.snapshot().await {
            Ok(path) => println!("saved {}", path.display()),
            Err(e) => eprintln!("{}", e.user_message()),
        },
        "status" => {
            let status = serde_json::json!({
                "status": controller.status(),
                "models": controller.model_state(),
                "stats": controller.stats(),
                "active_tracks": controller.active_tracks(),
                "source": controller.source_dimensions(),
                "overlay": controller.overlay_dimensions(),
                "overlay_clear": controller.overlay_is_clear(),
            });
            println!("{status}");
        }
        _ => eprintln!("unknown command: {line}"),
    }
    Ok(true)
}

async fn analyse_image(config: Config, path: PathBuf, snapshot: bool) -> Result<()> {
    let mut controller = new_controller(config)?;
    controller
        .start(InputSource::Image(path))
        .await
        .map_err(|e| anyhow!(e.user_message()))?;

    tokio::time::timeout(IMAGE_TIMEOUT, async {
        loop {
            let stats = controller.stats();
            if stats.analysed > 0 {
                return Ok(());
            }
            if stats.inference_failures > 0 {
                bail!(
                    "inference failed: {}",
                    stats.last_error.unwrap_or_default()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("timed out waiting for analysis")??;

    print_display(&controller.display());

    if snapshot {
        let saved = controller
            .snapshot()
            .await
            .map_err(|e| anyhow!(e.user_message()))?;
        println!("saved {}", saved.display());
    }

    controller.stop();
    Ok(())
}
