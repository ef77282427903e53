//! ClipForge CLI - headless access to the export pipeline.
//!
//! Exports read a saved workspace JSON; clip source refs are resolved
//! relative to the workspace file. Pipeline events are printed to stdout as
//! one JSON object per line.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use clipforge_lib::core::{
    ffmpeg::get_ffmpeg_version,
    jobs::JobStatus,
    render::{
        ChannelEventSink, ExportPipeline, ExportRequest, PathSourceResolver, PipelineConfig,
        TracingEventSink,
    },
    settings::{default_settings_dir, AppSettings, SettingsManager},
    timeline::{TimelineStore, Workspace},
    Resolution, TimeSec,
};

/// Non-destructive timeline export and media utilities
#[derive(Parser, Debug)]
#[command(name = "clipforge")]
#[command(version)]
struct Cli {
    /// Settings directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write daily-rotated logs into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Locate ffmpeg/ffprobe and print their versions
    Check,
    /// Print source metadata as JSON
    Probe {
        input: PathBuf,
    },
    /// Render a saved workspace into a single file
    Export {
        /// Workspace JSON file
        #[arg(short, long)]
        workspace: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// source, 480p, 720p, 1080p or 4K (settings default if omitted)
        #[arg(short, long)]
        resolution: Option<Resolution>,
    },
    /// Lossless cut of [start, end) by stream copy
    Trim {
        input: PathBuf,
        #[arg(long)]
        start: TimeSec,
        #[arg(long)]
        end: TimeSec,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Write a 320x180 thumbnail
    Thumbnail {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckReport {
    ffmpeg_path: PathBuf,
    ffprobe_path: Option<PathBuf>,
    is_bundled: bool,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

fn load_settings(dir: Option<&Path>) -> AppSettings {
    match dir.map(Path::to_path_buf).or_else(default_settings_dir) {
        Some(dir) => SettingsManager::new(dir).load(),
        None => {
            warn!("No config directory available; using default settings");
            AppSettings::default()
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = clipforge_lib::init_logging(cli.log_dir.as_deref(), cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings = load_settings(cli.config.as_deref());
    let config = PipelineConfig::from_settings(&settings.export);

    match cli.command {
        Command::Check => {
            let resolved = config.locator.resolve().context("FFmpeg not available")?;
            let version = get_ffmpeg_version(&resolved.info.ffmpeg_path)?;
            print_json(&CheckReport {
                ffmpeg_path: resolved.info.ffmpeg_path,
                ffprobe_path: resolved.info.ffprobe_path,
                is_bundled: resolved.info.is_bundled,
                version,
                warning: resolved.warning,
            })?;
        }
        Command::Probe { input } => {
            let pipeline = ExportPipeline::new(config, Arc::new(TracingEventSink));
            let info = pipeline.probe(&input).await?;
            print_json(&info.to_imported(input.to_string_lossy()))?;
        }
        Command::Trim {
            input,
            start,
            end,
            output,
        } => {
            let pipeline = ExportPipeline::new(config, Arc::new(TracingEventSink));
            pipeline.trim_copy(&input, start, end, &output).await?;
        }
        Command::Thumbnail { input, output } => {
            let pipeline = ExportPipeline::new(config, Arc::new(TracingEventSink));
            let at = pipeline.thumbnail(&input, &output).await?;
            info!("Thumbnail taken at {:.3}s", at);
        }
        Command::Export {
            workspace,
            output,
            resolution,
        } => {
            let resolution = resolution.unwrap_or(settings.export.default_resolution);
            return export(config, &workspace, output, resolution).await;
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn export(
    config: PipelineConfig,
    workspace_path: &Path,
    output: PathBuf,
    resolution: Resolution,
) -> anyhow::Result<ExitCode> {
    let json = tokio::fs::read_to_string(workspace_path)
        .await
        .with_context(|| format!("Failed to read {}", workspace_path.display()))?;
    // Loading through the store rejects workspaces that break track rules.
    let store = TimelineStore::from_workspace(Workspace::from_json(&json)?)
        .with_context(|| format!("Invalid workspace {}", workspace_path.display()))?;

    let base_dir = workspace_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let request = ExportRequest::from_workspace(
        store.workspace(),
        &PathSourceResolver::with_base_dir(base_dir),
        resolution,
        output,
    )?;

    let (sink, mut events) = ChannelEventSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize event: {}", e),
            }
        }
    });

    let pipeline = ExportPipeline::new(config, Arc::new(sink));
    let handle = pipeline.submit(request)?;
    let job_id = handle.id().to_string();

    let wait = handle.wait();
    tokio::pin!(wait);
    let status = tokio::select! {
        status = &mut wait => status,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; cancelling job {}", job_id);
            pipeline.cancel(&job_id);
            wait.await
        }
    };

    // Closing the last sender ends the printer.
    drop(pipeline);
    if printer.await.is_err() {
        warn!("Event printer task failed");
    }

    match status {
        JobStatus::Succeeded { .. } => Ok(ExitCode::SUCCESS),
        JobStatus::Cancelled => Ok(ExitCode::from(130)),
        JobStatus::Failed { reason } => bail!("Export failed: {}", reason),
        other => bail!("Export ended in unexpected state {:?}", other),
    }
}
