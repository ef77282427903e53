//! Export Engine Module
//!
//! Renders an ordered list of source segments to a single output file.
//! Single-segment jobs run one encode pass. Multi-segment jobs encode every
//! segment into a job-exclusive temp directory, write a concat manifest and
//! run a final encode over it. Progress is reported per job as one
//! monotonic percentage across all passes.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{EventSink, PipelineEvent};
use crate::core::{
    ffmpeg::{
        concat_manifest, FFmpegError, FFmpegLocator, FFmpegRunner, MediaInfo, ProgressMapper,
        ProgressThrottle, TranscodeCommand, THUMBNAIL_SIZE,
    },
    jobs::{CancelToken, JobStatus, SegmentSpec, TranscodeJob},
    settings::ExportSettings,
    timeline::Workspace,
    JobId, Resolution, SourceRef, TimeSec,
};

/// Share of a multi-segment job spent encoding segments; the concat pass
/// covers the rest
pub const SEGMENT_PHASE_PERCENT: f64 = 90.0;

/// Name of the concat manifest inside a job's temp directory
pub const CONCAT_MANIFEST_NAME: &str = "concat.txt";

/// Finished job records kept for `job()` queries before the oldest is dropped
pub const DEFAULT_JOB_HISTORY: usize = 32;

// =============================================================================
// Errors
// =============================================================================

/// Export error types
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("No clips to export")]
    NoClips,
    #[error("Invalid export request: {0}")]
    InvalidRequest(String),
    #[error("Output {} is already being written by job {job_id}", .path.display())]
    OutputBusy { path: PathBuf, job_id: JobId },
    #[error("FFmpeg error: {0}")]
    FFmpeg(#[from] FFmpegError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Export cancelled")]
    Cancelled,
}

impl ExportError {
    fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ExportError::Cancelled | ExportError::FFmpeg(FFmpegError::Cancelled)
        )
    }
}

pub type ExportResult<T> = Result<T, ExportError>;

// =============================================================================
// Requests
// =============================================================================

/// Maps a clip's source handle to a file on disk
pub trait SourceResolver {
    fn resolve(&self, source_ref: &SourceRef) -> Option<PathBuf>;
}

/// Treats source handles as paths; relative ones are joined to `base_dir`
#[derive(Clone, Debug, Default)]
pub struct PathSourceResolver {
    base_dir: Option<PathBuf>,
}

impl PathSourceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
        }
    }
}

impl SourceResolver for PathSourceResolver {
    fn resolve(&self, source_ref: &SourceRef) -> Option<PathBuf> {
        if source_ref.trim().is_empty() {
            return None;
        }
        let path = PathBuf::from(source_ref);
        match &self.base_dir {
            Some(base) if path.is_relative() => Some(base.join(path)),
            _ => Some(path),
        }
    }
}

impl SourceResolver for HashMap<SourceRef, PathBuf> {
    fn resolve(&self, source_ref: &SourceRef) -> Option<PathBuf> {
        self.get(source_ref).cloned()
    }
}

/// What to render and where
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub segments: Vec<SegmentSpec>,
    #[serde(default)]
    pub resolution: Resolution,
    pub output_path: PathBuf,
}

impl ExportRequest {
    pub fn new(segments: Vec<SegmentSpec>, resolution: Resolution, output_path: impl Into<PathBuf>) -> Self {
        Self {
            segments,
            resolution,
            output_path: output_path.into(),
        }
    }

    /// Builds segments from every clip in timeline order (start, track, id).
    /// Gaps between clips are not rendered.
    pub fn from_workspace(
        workspace: &Workspace,
        resolver: &dyn SourceResolver,
        resolution: Resolution,
        output_path: impl Into<PathBuf>,
    ) -> ExportResult<Self> {
        let mut clips: Vec<_> = workspace.clips.iter().collect();
        clips.sort_by(|a, b| {
            a.timeline_start
                .total_cmp(&b.timeline_start)
                .then(a.track.cmp(&b.track))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut segments = Vec::with_capacity(clips.len());
        for clip in clips {
            let source_path = resolver.resolve(&clip.source_ref).ok_or_else(|| {
                ExportError::InvalidRequest(format!(
                    "Cannot resolve source '{}' of clip {}",
                    clip.source_ref, clip.id
                ))
            })?;
            segments.push(SegmentSpec {
                source_path,
                trim_start: clip.trim_start,
                trim_end: clip.trim_end,
                track: clip.track,
                volume: clip.volume,
                muted: clip.muted,
            });
        }
        if segments.is_empty() {
            return Err(ExportError::NoClips);
        }

        Ok(Self::new(segments, resolution, output_path))
    }

    pub fn total_duration(&self) -> TimeSec {
        self.segments.iter().map(SegmentSpec::duration).sum()
    }

    /// Checks segments and output location before any process is spawned
    pub fn validate(&self) -> ExportResult<()> {
        if self.segments.is_empty() {
            return Err(ExportError::NoClips);
        }

        for (i, segment) in self.segments.iter().enumerate() {
            if !segment.trim_start.is_finite()
                || !segment.trim_end.is_finite()
                || segment.trim_start < 0.0
                || segment.trim_end <= segment.trim_start
            {
                return Err(ExportError::InvalidRequest(format!(
                    "Segment {} has invalid trim {}..{}",
                    i, segment.trim_start, segment.trim_end
                )));
            }
            if !segment.source_path.is_file() {
                return Err(ExportError::InvalidRequest(format!(
                    "Source file does not exist: {}",
                    segment.source_path.display()
                )));
            }
            if segment.source_path == self.output_path {
                return Err(ExportError::InvalidRequest(format!(
                    "Output would overwrite source {}",
                    segment.source_path.display()
                )));
            }
        }

        if self.output_path.file_name().is_none() {
            return Err(ExportError::InvalidRequest(format!(
                "Output path has no file name: {}",
                self.output_path.display()
            )));
        }
        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(ExportError::InvalidRequest(format!(
                    "Output directory does not exist: {}",
                    parent.display()
                )));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Encode profile
// =============================================================================

/// Encoder settings applied to every export pass
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeProfile {
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// Output pixel format; yuv420p keeps H.264 output widely playable
    pub pixel_format: Option<String>,
}

impl Default for EncodeProfile {
    fn default() -> Self {
        Self::from_settings(&ExportSettings::default())
    }
}

impl EncodeProfile {
    pub fn from_settings(settings: &ExportSettings) -> Self {
        Self {
            video_codec: settings.video_codec.clone(),
            preset: settings.preset.clone(),
            crf: settings.crf,
            audio_codec: settings.audio_codec.clone(),
            audio_bitrate: settings.audio_bitrate.clone(),
            pixel_format: Some("yuv420p".to_string()),
        }
    }

    pub fn apply(&self, cmd: TranscodeCommand) -> TranscodeCommand {
        let cmd = cmd
            .video_encode(&self.video_codec, &self.preset, self.crf)
            .audio_encode(&self.audio_codec, &self.audio_bitrate);
        match &self.pixel_format {
            Some(format) => cmd.pixel_format(format),
            None => cmd,
        }
    }
}

/// Trim + scale + encode of one segment (output path not set)
pub fn segment_command(profile: &EncodeProfile, segment: &SegmentSpec, resolution: Resolution) -> TranscodeCommand {
    let (width, height) = resolution.dimensions();
    let cmd = TranscodeCommand::new()
        .input(&segment.source_path)
        .trim(segment.trim_start, segment.duration())
        .scale(width, height);
    let cmd = if segment.muted {
        cmd.mute()
    } else {
        cmd.volume(segment.volume)
    };
    profile.apply(cmd)
}

/// Re-encode over a concat manifest (output path not set)
pub fn concat_command(profile: &EncodeProfile, manifest: &Path) -> TranscodeCommand {
    profile.apply(TranscodeCommand::new().concat_list(manifest))
}

// =============================================================================
// Pipeline
// =============================================================================

/// Export pipeline configuration
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub locator: FFmpegLocator,
    /// Parent of per-job temp directories (system temp if unset)
    pub temp_root: Option<PathBuf>,
    pub profile: EncodeProfile,
    /// Minimum spacing between progress events; never below 100 ms
    pub progress_interval: Duration,
    /// Finished jobs kept in the registry
    pub job_history: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&ExportSettings::default())
    }
}

impl PipelineConfig {
    pub fn from_settings(settings: &ExportSettings) -> Self {
        let locator = match &settings.bundle_dir {
            Some(dir) => FFmpegLocator::new().with_bundle_dir(dir),
            None => FFmpegLocator::new(),
        };
        Self {
            locator,
            temp_root: settings.temp_dir.clone(),
            profile: EncodeProfile::from_settings(settings),
            progress_interval: settings.progress_interval(),
            job_history: DEFAULT_JOB_HISTORY,
        }
    }
}

#[derive(Default)]
struct PipelineState {
    jobs: HashMap<JobId, TranscodeJob>,
    /// Output path -> job currently writing it
    active_outputs: HashMap<PathBuf, JobId>,
    cancels: HashMap<JobId, CancelToken>,
    /// Terminal jobs, oldest first
    finished: VecDeque<JobId>,
}

struct PipelineInner {
    config: PipelineConfig,
    sink: Arc<dyn EventSink>,
    state: Mutex<PipelineState>,
}

/// Runs export jobs on the tokio runtime
#[derive(Clone)]
pub struct ExportPipeline {
    inner: Arc<PipelineInner>,
}

/// Handle to a submitted job
pub struct JobHandle {
    id: JobId,
    cancel: CancelToken,
    task: tokio::task::JoinHandle<JobStatus>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the job's terminal status
    pub async fn wait(self) -> JobStatus {
        self.task.await.unwrap_or_else(|e| JobStatus::Failed {
            reason: format!("Job task aborted: {}", e),
        })
    }
}

/// Lookup key for the one-writer-per-output rule
fn output_key(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn remove_partial_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial output {}: {}", path.display(), e),
    }
}

/// Deletes a job's temp directory, retrying once
fn cleanup_temp_dir(dir: tempfile::TempDir) {
    let path = dir.path().to_path_buf();
    if let Err(first) = dir.close() {
        warn!("Failed to remove temp dir {}: {}; retrying", path.display(), first);
        if let Err(e) = std::fs::remove_dir_all(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Temp dir {} left behind: {}", path.display(), e);
            }
        }
    }
}

impl ExportPipeline {
    pub fn new(config: PipelineConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                config,
                sink,
                state: Mutex::new(PipelineState::default()),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Validates the request and starts the job. A second job for an output
    /// path that is still being written is rejected.
    pub fn submit(&self, request: ExportRequest) -> ExportResult<JobHandle> {
        request.validate()?;

        let job = TranscodeJob::new(request.segments, request.resolution, request.output_path);
        let cancel = CancelToken::new();
        let key = output_key(&job.output_path);
        {
            let mut state = self.inner.lock_state();
            if let Some(existing) = state.active_outputs.get(&key) {
                return Err(ExportError::OutputBusy {
                    path: job.output_path.clone(),
                    job_id: existing.clone(),
                });
            }
            state.active_outputs.insert(key, job.id.clone());
            state.cancels.insert(job.id.clone(), cancel.clone());
            state.jobs.insert(job.id.clone(), job.clone());
        }

        info!(
            "Export job {} queued: {} segment(s), {} -> {}",
            job.id,
            job.segments.len(),
            job.resolution,
            job.output_path.display()
        );

        let id = job.id.clone();
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let task = tokio::spawn(async move { inner.run_job(job, token).await });

        Ok(JobHandle { id, cancel, task })
    }

    /// Requests cancellation; false if the job is unknown or already finished
    pub fn cancel(&self, job_id: &str) -> bool {
        let state = self.inner.lock_state();
        match state.cancels.get(job_id) {
            Some(token) => {
                info!("Cancelling export job {}", job_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn job(&self, job_id: &str) -> Option<TranscodeJob> {
        self.inner.lock_state().jobs.get(job_id).cloned()
    }

    /// Drops every finished job record; returns how many were removed
    pub fn clear_finished(&self) -> usize {
        let mut state = self.inner.lock_state();
        let finished: Vec<JobId> = state.finished.drain(..).collect();
        for id in &finished {
            state.jobs.remove(id);
        }
        debug!("Cleared {} finished job record(s)", finished.len());
        finished.len()
    }

    /// All jobs, oldest first
    pub fn jobs(&self) -> Vec<TranscodeJob> {
        let mut jobs: Vec<_> = self.inner.lock_state().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub async fn probe(&self, input: &Path) -> ExportResult<MediaInfo> {
        let runner = self.inner.runner(None)?;
        Ok(runner.probe(input).await?)
    }

    /// Lossless stream-copy cut of `[start, end)` into `output`
    pub async fn trim_copy(
        &self,
        input: &Path,
        start: TimeSec,
        end: TimeSec,
        output: &Path,
    ) -> ExportResult<()> {
        if !start.is_finite() || !end.is_finite() || start < 0.0 || end <= start {
            return Err(ExportError::InvalidRequest(format!(
                "Invalid trim range {}..{}",
                start, end
            )));
        }
        let runner = self.inner.runner(None)?;
        runner.trim_copy(input, start, end - start, output).await?;
        info!("Trimmed {} -> {}", input.display(), output.display());
        Ok(())
    }

    /// Writes a thumbnail image; returns the frame time used
    pub async fn thumbnail(&self, input: &Path, output: &Path) -> ExportResult<TimeSec> {
        let runner = self.inner.runner(None)?;
        Ok(runner.extract_thumbnail(input, output, THUMBNAIL_SIZE).await?)
    }
}

impl PipelineInner {
    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolves binaries, surfacing a fallback warning
    fn runner(&self, job_id: Option<&str>) -> ExportResult<FFmpegRunner> {
        let resolved = self.config.locator.resolve()?;
        if let Some(message) = resolved.warning {
            warn!("{}", message);
            self.sink.emit(PipelineEvent::Warning {
                job_id: job_id.map(str::to_string),
                message,
            });
        }
        Ok(FFmpegRunner::new(resolved.info))
    }

    fn report_progress(&self, job_id: &str, percent: f64) {
        if let Some(job) = self.lock_state().jobs.get_mut(job_id) {
            job.progress_percent = percent;
        }
        self.sink.emit(PipelineEvent::Progress {
            job_id: job_id.to_string(),
            percent,
        });
    }

    fn set_status(&self, job_id: &str, status: JobStatus) {
        if let Some(job) = self.lock_state().jobs.get_mut(job_id) {
            job.status = status;
        }
    }

    /// Records the terminal status, releases the output path and evicts
    /// the oldest finished records beyond the configured history
    fn finish(&self, job: &TranscodeJob, status: JobStatus) {
        let mut state = self.lock_state();
        if let Some(record) = state.jobs.get_mut(&job.id) {
            record.finish(status);
        }
        state.active_outputs.remove(&output_key(&job.output_path));
        state.cancels.remove(&job.id);

        state.finished.push_back(job.id.clone());
        while state.finished.len() > self.config.job_history {
            if let Some(evicted) = state.finished.pop_front() {
                state.jobs.remove(&evicted);
                debug!("Evicted finished job {}", evicted);
            }
        }
    }

    async fn run_job(self: Arc<Self>, job: TranscodeJob, cancel: CancelToken) -> JobStatus {
        let started = Instant::now();
        let mut output_touched = false;

        let result = if cancel.is_cancelled() {
            Err(ExportError::Cancelled)
        } else {
            self.set_status(&job.id, JobStatus::Running);
            info!("Export job {} running", job.id);
            self.execute(&job, &cancel, &mut output_touched).await
        };

        let (status, event) = match result {
            Ok(()) => {
                info!(
                    "Export job {} finished in {:.1}s: {}",
                    job.id,
                    started.elapsed().as_secs_f64(),
                    job.output_path.display()
                );
                (
                    JobStatus::Succeeded {
                        output_path: job.output_path.clone(),
                    },
                    PipelineEvent::JobComplete {
                        job_id: job.id.clone(),
                        output_path: job.output_path.clone(),
                    },
                )
            }
            Err(e) if e.is_cancellation() => {
                info!("Export job {} cancelled", job.id);
                if output_touched {
                    remove_partial_output(&job.output_path);
                }
                (
                    JobStatus::Cancelled,
                    PipelineEvent::JobCancelled {
                        job_id: job.id.clone(),
                    },
                )
            }
            Err(e) => {
                warn!("Export job {} failed: {}", job.id, e);
                if output_touched {
                    remove_partial_output(&job.output_path);
                }
                let reason = e.to_string();
                (
                    JobStatus::Failed {
                        reason: reason.clone(),
                    },
                    PipelineEvent::JobFailed {
                        job_id: job.id.clone(),
                        reason,
                    },
                )
            }
        };

        self.finish(&job, status.clone());
        self.sink.emit(event);
        status
    }

    async fn execute(
        &self,
        job: &TranscodeJob,
        cancel: &CancelToken,
        output_touched: &mut bool,
    ) -> ExportResult<()> {
        let runner = self.runner(Some(&job.id))?;
        let mut throttle = ProgressThrottle::new(self.config.progress_interval);
        let profile = &self.config.profile;

        match job.segments.as_slice() {
            [] => return Err(ExportError::NoClips),
            [segment] => {
                let cmd = segment_command(profile, segment, job.resolution).output(&job.output_path);
                *output_touched = true;
                runner
                    .run_with_progress(
                        &cmd,
                        segment.duration(),
                        ProgressMapper::full(),
                        &mut throttle,
                        cancel,
                        |p| self.report_progress(&job.id, p),
                    )
                    .await?;
            }
            segments => {
                let temp_dir = self.create_job_dir(&job.id)?;
                let result = self
                    .render_multi(&runner, job, segments, temp_dir.path(), &mut throttle, cancel, output_touched)
                    .await;
                cleanup_temp_dir(temp_dir);
                result?;
            }
        }

        if let Some(percent) = throttle.finish(Instant::now()) {
            self.report_progress(&job.id, percent);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn render_multi(
        &self,
        runner: &FFmpegRunner,
        job: &TranscodeJob,
        segments: &[SegmentSpec],
        dir: &Path,
        throttle: &mut ProgressThrottle,
        cancel: &CancelToken,
        output_touched: &mut bool,
    ) -> ExportResult<()> {
        let profile = &self.config.profile;
        let durations: Vec<TimeSec> = segments.iter().map(SegmentSpec::duration).collect();
        let mappers = ProgressMapper::split(&durations, 0.0, SEGMENT_PHASE_PERCENT);

        let mut parts = Vec::with_capacity(segments.len());
        for (i, (segment, mapper)) in segments.iter().zip(mappers).enumerate() {
            if cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
            let part = dir.join(format!("temp_clip_{}.mp4", i));
            debug!("Job {} encoding segment {} -> {}", job.id, i, part.display());
            let cmd = segment_command(profile, segment, job.resolution).output(&part);
            runner
                .run_with_progress(&cmd, segment.duration(), mapper, throttle, cancel, |p| {
                    self.report_progress(&job.id, p)
                })
                .await?;
            parts.push(part);
        }

        let manifest = dir.join(CONCAT_MANIFEST_NAME);
        tokio::fs::write(&manifest, concat_manifest(&parts)).await?;

        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        let cmd = concat_command(profile, &manifest).output(&job.output_path);
        *output_touched = true;
        runner
            .run_with_progress(
                &cmd,
                durations.iter().sum(),
                ProgressMapper::new(SEGMENT_PHASE_PERCENT, 100.0 - SEGMENT_PHASE_PERCENT),
                throttle,
                cancel,
                |p| self.report_progress(&job.id, p),
            )
            .await?;
        Ok(())
    }

    fn create_job_dir(&self, job_id: &str) -> ExportResult<tempfile::TempDir> {
        let prefix = format!("clipforge-{}-", job_id);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match &self.config.temp_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        debug!("Job {} temp dir {}", job_id, dir.path().display());
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::render::ChannelEventSink;
    use crate::core::timeline::Clip;
    use tempfile::TempDir;

    fn workspace_with(clips: Vec<Clip>) -> Workspace {
        Workspace {
            clips,
            ..Workspace::default()
        }
    }

    #[test]
    fn test_from_workspace_uses_timeline_order() {
        let ws = workspace_with(vec![
            Clip::new("c.mp4", 10.0, 0.0, 2.0, 0).with_id("c"),
            Clip::new("a.mp4", 0.0, 1.0, 3.0, 1).with_id("a"),
            Clip::new("b.mp4", 0.0, 0.0, 1.0, 0).with_id("b"),
        ]);
        let resolver = PathSourceResolver::with_base_dir("/media");
        let request =
            ExportRequest::from_workspace(&ws, &resolver, Resolution::P720, "/out/final.mp4").unwrap();

        let sources: Vec<_> = request.segments.iter().map(|s| s.source_path.clone()).collect();
        assert_eq!(
            sources,
            vec![
                PathBuf::from("/media/b.mp4"),
                PathBuf::from("/media/a.mp4"),
                PathBuf::from("/media/c.mp4"),
            ]
        );
        // the 3s..10s gap is not rendered
        assert_eq!(request.total_duration(), 5.0);
        assert_eq!(request.segments[1].trim_start, 1.0);
        assert_eq!(request.segments[1].track, 1);
    }

    #[test]
    fn test_from_workspace_carries_audio_settings() {
        let mut clip = Clip::new("a.mp4", 0.0, 0.0, 2.0, 0);
        clip.volume = 0.25;
        clip.muted = true;
        let ws = workspace_with(vec![clip]);
        let request =
            ExportRequest::from_workspace(&ws, &PathSourceResolver::new(), Resolution::P1080, "o.mp4")
                .unwrap();
        assert_eq!(request.segments[0].volume, 0.25);
        assert!(request.segments[0].muted);
    }

    #[test]
    fn test_from_workspace_errors() {
        let empty = Workspace::default();
        assert!(matches!(
            ExportRequest::from_workspace(&empty, &PathSourceResolver::new(), Resolution::P720, "o.mp4"),
            Err(ExportError::NoClips)
        ));

        let ws = workspace_with(vec![Clip::new("asset_1", 0.0, 0.0, 2.0, 0)]);
        let resolver: HashMap<SourceRef, PathBuf> = HashMap::new();
        assert!(matches!(
            ExportRequest::from_workspace(&ws, &resolver, Resolution::P720, "o.mp4"),
            Err(ExportError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_validate_request() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.mp4");
        std::fs::write(&source, b"video").unwrap();
        let output = dir.path().join("out.mp4");

        let ok = ExportRequest::new(
            vec![SegmentSpec::new(&source, 0.0, 2.0)],
            Resolution::P720,
            &output,
        );
        assert!(ok.validate().is_ok());

        let none = ExportRequest::new(vec![], Resolution::P720, &output);
        assert!(matches!(none.validate(), Err(ExportError::NoClips)));

        let missing = ExportRequest::new(
            vec![SegmentSpec::new(dir.path().join("nope.mp4"), 0.0, 2.0)],
            Resolution::P720,
            &output,
        );
        assert!(matches!(missing.validate(), Err(ExportError::InvalidRequest(_))));

        let crossed = ExportRequest::new(
            vec![SegmentSpec::new(&source, 3.0, 2.0)],
            Resolution::P720,
            &output,
        );
        assert!(matches!(crossed.validate(), Err(ExportError::InvalidRequest(_))));

        let no_dir = ExportRequest::new(
            vec![SegmentSpec::new(&source, 0.0, 2.0)],
            Resolution::P720,
            dir.path().join("missing").join("out.mp4"),
        );
        assert!(matches!(no_dir.validate(), Err(ExportError::InvalidRequest(_))));

        let overwrite = ExportRequest::new(
            vec![SegmentSpec::new(&source, 0.0, 2.0)],
            Resolution::P720,
            &source,
        );
        assert!(matches!(overwrite.validate(), Err(ExportError::InvalidRequest(_))));
    }

    #[test]
    fn test_segment_command_args() {
        let profile = EncodeProfile::default();
        let mut segment = SegmentSpec::new("/media/a.mp4", 1.5, 4.0);
        segment.volume = 0.5;
        let args = segment_command(&profile, &segment, Resolution::P480)
            .output("/tmp/part.mp4")
            .build_args()
            .unwrap();
        assert_eq!(&args[..6], &["-ss", "1.500", "-t", "2.500", "-i", "/media/a.mp4"]);
        assert!(args.iter().any(|a| a.starts_with("scale=854:480")));
        assert!(args.windows(2).any(|w| w == ["-af", "volume=0.5"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "yuv420p"]));

        segment.muted = true;
        let args = segment_command(&profile, &segment, Resolution::P480)
            .output("/tmp/part.mp4")
            .build_args()
            .unwrap();
        assert!(args.windows(2).any(|w| w == ["-af", "volume=0"]));
    }

    #[test]
    fn test_concat_command_reencodes() {
        let args = concat_command(&EncodeProfile::default(), Path::new("/tmp/job/concat.txt"))
            .output("/out/final.mp4")
            .build_args()
            .unwrap();
        assert_eq!(&args[..6], &["-f", "concat", "-safe", "0", "-i", "/tmp/job/concat.txt"]);
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(!args.contains(&"copy".to_string()));
    }

    #[test]
    fn test_profile_from_settings() {
        let settings = ExportSettings {
            video_codec: "libx265".to_string(),
            crf: 28,
            audio_bitrate: "192k".to_string(),
            ..ExportSettings::default()
        };
        let profile = EncodeProfile::from_settings(&settings);
        assert_eq!(profile.video_codec, "libx265");
        assert_eq!(profile.crf, 28);
        assert_eq!(profile.audio_bitrate, "192k");
        assert_eq!(profile.preset, "medium");
    }

    #[test]
    fn test_pipeline_config_from_settings() {
        let settings = ExportSettings {
            bundle_dir: Some(PathBuf::from("/opt/clipforge/bin")),
            temp_dir: Some(PathBuf::from("/var/tmp/clipforge")),
            ..ExportSettings::default()
        };
        let config = PipelineConfig::from_settings(&settings);
        assert_eq!(config.locator.bundle_dir(), Some(Path::new("/opt/clipforge/bin")));
        assert_eq!(config.temp_root, Some(PathBuf::from("/var/tmp/clipforge")));
        assert_eq!(config.progress_interval, Duration::from_millis(100));
        assert_eq!(config.job_history, DEFAULT_JOB_HISTORY);
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_request() {
        let (sink, _rx) = ChannelEventSink::channel();
        let pipeline = ExportPipeline::new(PipelineConfig::default(), Arc::new(sink));
        let result = pipeline.submit(ExportRequest::new(vec![], Resolution::P720, "out.mp4"));
        assert!(matches!(result, Err(ExportError::NoClips)));
        assert!(pipeline.jobs().is_empty());
        assert!(!pipeline.cancel("unknown"));
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_fails_job() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.mp4");
        std::fs::write(&source, b"video").unwrap();

        let config = PipelineConfig {
            locator: FFmpegLocator::new()
                .with_bundle_dir(dir.path().join("bin"))
                .without_system(),
            ..PipelineConfig::default()
        };
        let (sink, mut rx) = ChannelEventSink::channel();
        let pipeline = ExportPipeline::new(config, Arc::new(sink));

        let handle = pipeline
            .submit(ExportRequest::new(
                vec![SegmentSpec::new(&source, 0.0, 1.0)],
                Resolution::P720,
                dir.path().join("out.mp4"),
            ))
            .unwrap();
        let id = handle.id().to_string();
        let status = handle.wait().await;
        assert!(matches!(status, JobStatus::Failed { .. }));

        let job = pipeline.job(&id).unwrap();
        assert!(job.is_done());
        assert!(job.completed_at.is_some());

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, PipelineEvent::JobFailed { .. }));
        // the output path is free again
        assert!(!pipeline.cancel(&id));
    }

    #[tokio::test]
    async fn test_finished_jobs_are_evicted_beyond_history() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.mp4");
        std::fs::write(&source, b"video").unwrap();

        let config = PipelineConfig {
            locator: FFmpegLocator::new()
                .with_bundle_dir(dir.path().join("bin"))
                .without_system(),
            job_history: 2,
            ..PipelineConfig::default()
        };
        let (sink, _rx) = ChannelEventSink::channel();
        let pipeline = ExportPipeline::new(config, Arc::new(sink));

        let mut ids = Vec::new();
        for i in 0..3 {
            let handle = pipeline
                .submit(ExportRequest::new(
                    vec![SegmentSpec::new(&source, 0.0, 1.0)],
                    Resolution::P720,
                    dir.path().join(format!("out_{}.mp4", i)),
                ))
                .unwrap();
            ids.push(handle.id().to_string());
            assert!(handle.wait().await.is_terminal());
        }

        assert!(pipeline.job(&ids[0]).is_none());
        let kept: Vec<_> = pipeline.jobs().into_iter().map(|j| j.id).collect();
        assert_eq!(kept.len(), 2);
        assert!(kept.contains(&ids[1]) && kept.contains(&ids[2]));

        assert_eq!(pipeline.clear_finished(), 2);
        assert!(pipeline.jobs().is_empty());
        assert_eq!(pipeline.clear_finished(), 0);
    }
}
