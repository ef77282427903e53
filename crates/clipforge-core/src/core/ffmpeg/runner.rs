//! FFmpeg Runner Module
//!
//! Executes [`TranscodeCommand`]s. Short operations (probe, thumbnail,
//! stream-copy trim) collect output to completion; encode passes stream
//! `-progress` lines and observe cancellation while the process runs.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::debug;

use super::{
    parse_progress_line, FFmpegError, FFmpegInfo, FFmpegProgressData, FFmpegResult,
    ProgressMapper, ProgressThrottle, Tool, TranscodeCommand,
};
use crate::core::{jobs::CancelToken, process::tool_command, SourceRef, TimeSec};

/// Lines of stderr kept for failure reports
const STDERR_TAIL_LINES: usize = 20;

/// Default thumbnail frame size
pub const THUMBNAIL_SIZE: (u32, u32) = (320, 180);

/// Media information extracted by FFprobe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration_sec: f64,
    /// Video stream info (if present)
    pub video: Option<VideoStreamInfo>,
    /// Audio stream info (if present)
    pub audio: Option<AudioStreamInfo>,
    /// Container format
    pub format: String,
    /// File size in bytes
    pub size_bytes: u64,
    /// Overall bitrate in bits/s (if available)
    pub bit_rate: Option<u64>,
}

/// Video stream information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    /// Frame rate (frames per second)
    pub fps: f64,
    /// Codec name (e.g., "h264", "vp9")
    pub codec: String,
    pub pixel_format: String,
    /// Bitrate in bits/s (if available)
    pub bitrate: Option<u64>,
}

/// Audio stream information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamInfo {
    /// Sample rate in Hz
    pub sample_rate: u32,
    pub channels: u8,
    /// Codec name (e.g., "aac", "mp3")
    pub codec: String,
    /// Bitrate in bits/s (if available)
    pub bitrate: Option<u64>,
}

/// What an importer hands to the timeline for a new source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedMedia {
    pub source_ref: SourceRef,
    pub duration: TimeSec,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub fps: f64,
    pub bit_rate: Option<u64>,
}

impl MediaInfo {
    pub fn to_imported(&self, source_ref: impl Into<SourceRef>) -> ImportedMedia {
        let (width, height, codec, fps, stream_bitrate) = match &self.video {
            Some(v) => (v.width, v.height, v.codec.clone(), v.fps, v.bitrate),
            None => (
                0,
                0,
                self.audio
                    .as_ref()
                    .map(|a| a.codec.clone())
                    .unwrap_or_else(|| "unknown".to_string()),
                0.0,
                None,
            ),
        };
        ImportedMedia {
            source_ref: source_ref.into(),
            duration: self.duration_sec,
            width,
            height,
            codec,
            fps,
            bit_rate: self.bit_rate.or(stream_bitrate),
        }
    }
}

/// How a progress-streaming pass ended
enum PassEnd {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
}

/// Last `lines` non-empty lines of captured stderr
pub fn stderr_tail(stderr: &str, lines: usize) -> String {
    let kept: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = kept.len().saturating_sub(lines);
    kept[start..].join("\n")
}

/// Frame times tried for a thumbnail, most representative first
pub fn thumbnail_candidates(duration: Option<TimeSec>) -> Vec<TimeSec> {
    let mut candidates = vec![1.0];
    if let Some(d) = duration.filter(|d| *d > 0.0) {
        candidates.push(d * 0.1);
    }
    candidates.extend([0.5, 0.0]);

    let mut result: Vec<TimeSec> = Vec::new();
    for t in candidates {
        let in_range = duration.is_none_or(|d| d <= 0.0 || t < d);
        if in_range && !result.iter().any(|r| (r - t).abs() < 1e-3) {
            result.push(t);
        }
    }
    result
}

fn check_output(cmd: &TranscodeCommand) -> FFmpegResult<()> {
    if let Some(output) = cmd.output_path() {
        let written = std::fs::metadata(output).map(|m| m.len() > 0).unwrap_or(false);
        if !written {
            return Err(FFmpegError::OutputMissing(output.display().to_string()));
        }
    }
    Ok(())
}

fn require_input(input: &Path) -> FFmpegResult<()> {
    if !input.exists() {
        return Err(FFmpegError::InvalidInput(format!(
            "Input file does not exist: {}",
            input.display()
        )));
    }
    Ok(())
}

/// FFmpeg Runner for executing transcoder commands
#[derive(Clone)]
pub struct FFmpegRunner {
    info: Arc<FFmpegInfo>,
}

impl FFmpegRunner {
    pub fn new(info: FFmpegInfo) -> Self {
        Self {
            info: Arc::new(info),
        }
    }

    pub fn info(&self) -> &FFmpegInfo {
        &self.info
    }

    fn program(&self, tool: Tool) -> FFmpegResult<&Path> {
        match tool {
            Tool::Ffmpeg => Ok(&self.info.ffmpeg_path),
            Tool::Ffprobe => self.info.ffprobe_path.as_deref().ok_or(FFmpegError::NotFound),
        }
    }

    /// Runs a short command to completion
    pub async fn run(&self, cmd: &TranscodeCommand) -> FFmpegResult<()> {
        let args = cmd.build_args()?;
        let program = self.program(cmd.tool())?;
        debug!("Running {} {:?}", program.display(), args);

        let output = tool_command(program).args(&args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FFmpegError::ExecutionFailed(format!(
                "{}: {}",
                output.status,
                stderr_tail(&stderr, STDERR_TAIL_LINES)
            )));
        }
        check_output(cmd)
    }

    /// Runs an encode pass, streaming `-progress` blocks through `mapper`
    /// and `throttle` into `on_progress`. `duration` is the output length
    /// the pass is expected to produce.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &TranscodeCommand,
        duration: TimeSec,
        mapper: ProgressMapper,
        throttle: &mut ProgressThrottle,
        cancel: &CancelToken,
        mut on_progress: F,
    ) -> FFmpegResult<()>
    where
        F: FnMut(f64),
    {
        let cmd = cmd.clone().enable_progress(true);
        let args = cmd.build_args()?;
        let program = self.program(cmd.tool())?;
        if cancel.is_cancelled() {
            return Err(FFmpegError::Cancelled);
        }
        debug!("Spawning {} {:?}", program.display(), args);

        let mut child = tool_command(program)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain stderr concurrently so a full pipe cannot stall FFmpeg.
        let stderr_handle = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).to_string()
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FFmpegError::ExecutionFailed("stdout was not captured".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut data = FFmpegProgressData::default();
        let mut stdout_open = true;

        let mut handle_line = |line: &str, data: &mut FFmpegProgressData| {
            if parse_progress_line(line, data) {
                if let Some(percent) = throttle.offer(mapper.percent(data, duration), Instant::now()) {
                    on_progress(percent);
                }
            }
        };

        let end = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break PassEnd::Cancelled,
                line = lines.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => handle_line(&line, &mut data),
                    Ok(None) | Err(_) => stdout_open = false,
                },
                status = child.wait() => break PassEnd::Exited(status),
            }
        };

        let status = match end {
            PassEnd::Cancelled => {
                let _ = child.kill().await;
                if let Some(handle) = stderr_handle {
                    handle.abort();
                }
                return Err(FFmpegError::Cancelled);
            }
            PassEnd::Exited(status) => status?,
        };

        // Blocks still buffered when the process exited.
        if stdout_open {
            while let Ok(Some(line)) = lines.next_line().await {
                handle_line(&line, &mut data);
            }
        }

        let stderr = match stderr_handle {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(FFmpegError::ExecutionFailed(format!(
                "{}: {}",
                status,
                stderr_tail(&stderr, STDERR_TAIL_LINES)
            )));
        }
        check_output(&cmd)
    }

    /// Probe media file to get information
    pub async fn probe(&self, input: &Path) -> FFmpegResult<MediaInfo> {
        require_input(input)?;

        let cmd = TranscodeCommand::probe(input);
        let args = cmd.build_args()?;
        let output = tool_command(self.program(Tool::Ffprobe)?)
            .args(&args)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FFmpegError::ProbeError(format!("FFprobe failed: {}", stderr)));
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    /// Writes a single cropped frame, trying several frame times until one
    /// produces an image. Returns the time used.
    pub async fn extract_thumbnail(
        &self,
        input: &Path,
        output: &Path,
        size: (u32, u32),
    ) -> FFmpegResult<TimeSec> {
        require_input(input)?;
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let duration = if self.info.ffprobe_path.is_some() {
            self.probe(input)
                .await
                .ok()
                .map(|info| info.duration_sec)
                .filter(|d| *d > 0.0)
        } else {
            None
        };

        let mut last_err = FFmpegError::OutputMissing(output.display().to_string());
        for time in thumbnail_candidates(duration) {
            let cmd = TranscodeCommand::new()
                .input(input)
                .thumbnail(time)
                .scale_cover(size.0, size.1)
                .output(output);
            match self.run(&cmd).await {
                Ok(()) => return Ok(time),
                Err(e) => {
                    debug!("Thumbnail at {:.3}s failed: {}", time, e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Lossless cut of `[start, start + duration)` by stream copy
    pub async fn trim_copy(
        &self,
        input: &Path,
        start: TimeSec,
        duration: TimeSec,
        output: &Path,
    ) -> FFmpegResult<()> {
        require_input(input)?;
        let cmd = TranscodeCommand::new()
            .input(input)
            .trim(start, duration)
            .stream_copy()
            .output(output);
        self.run(&cmd).await
    }
}

/// Parse FFprobe JSON output
pub fn parse_probe_output(json_str: &str) -> FFmpegResult<MediaInfo> {
    let json: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| FFmpegError::ParseError(format!("Failed to parse FFprobe output: {}", e)))?;

    let format = json
        .get("format")
        .ok_or_else(|| FFmpegError::ParseError("Missing format info".to_string()))?;

    let duration_sec = format
        .get("duration")
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    let size_bytes = format
        .get("size")
        .and_then(|s| s.as_str())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let format_name = format
        .get("format_name")
        .and_then(|f| f.as_str())
        .unwrap_or("unknown")
        .to_string();

    let bit_rate = format
        .get("bit_rate")
        .and_then(|b| b.as_str())
        .and_then(|s| s.parse::<u64>().ok());

    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    let mut video_info: Option<VideoStreamInfo> = None;
    let mut audio_info: Option<AudioStreamInfo> = None;

    for stream in streams {
        match stream.get("codec_type").and_then(|c| c.as_str()) {
            Some("video") if video_info.is_none() => {
                video_info = Some(parse_video_stream(&stream));
            }
            Some("audio") if audio_info.is_none() => {
                audio_info = Some(parse_audio_stream(&stream));
            }
            _ => {}
        }
    }

    Ok(MediaInfo {
        duration_sec,
        video: video_info,
        audio: audio_info,
        format: format_name,
        size_bytes,
        bit_rate,
    })
}

/// Parses "30/1", "30000/1001" or a plain number
fn parse_frame_rate(value: &str) -> Option<f64> {
    match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den > 0.0).then(|| num / den)
        }
        None => value.parse().ok(),
    }
}

fn parse_video_stream(stream: &serde_json::Value) -> VideoStreamInfo {
    let width = stream.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32;
    let height = stream.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32;

    let fps = stream
        .get("r_frame_rate")
        .and_then(|f| f.as_str())
        .and_then(parse_frame_rate)
        .unwrap_or(30.0);

    let codec = stream
        .get("codec_name")
        .and_then(|c| c.as_str())
        .unwrap_or("unknown")
        .to_string();

    let pixel_format = stream
        .get("pix_fmt")
        .and_then(|p| p.as_str())
        .unwrap_or("unknown")
        .to_string();

    let bitrate = stream
        .get("bit_rate")
        .and_then(|b| b.as_str())
        .and_then(|s| s.parse::<u64>().ok());

    VideoStreamInfo {
        width,
        height,
        fps,
        codec,
        pixel_format,
        bitrate,
    }
}

fn parse_audio_stream(stream: &serde_json::Value) -> AudioStreamInfo {
    let sample_rate = stream
        .get("sample_rate")
        .and_then(|s| s.as_str())
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(44100);

    let channels = stream.get("channels").and_then(|c| c.as_u64()).unwrap_or(2) as u8;

    let codec = stream
        .get("codec_name")
        .and_then(|c| c.as_str())
        .unwrap_or("unknown")
        .to_string();

    let bitrate = stream
        .get("bit_rate")
        .and_then(|b| b.as_str())
        .and_then(|s| s.parse::<u64>().ok());

    AudioStreamInfo {
        sample_rate,
        channels,
        codec,
        bitrate,
    }
}
