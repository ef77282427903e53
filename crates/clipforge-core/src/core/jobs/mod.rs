//! Job System Module
//!
//! Transcode job records and cooperative cancellation for export work.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::core::{JobId, Resolution, TimeSec, TrackIndex};

// =============================================================================
// Job Types
// =============================================================================

/// Job status
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobStatus {
    /// Accepted, not yet started
    #[default]
    Queued,
    /// Transcoder running
    Running,
    /// Output written
    #[serde(rename_all = "camelCase")]
    Succeeded { output_path: PathBuf },
    /// Failed with a reason (captured stderr tail for process failures)
    Failed { reason: String },
    /// Cancelled by the user
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded { .. } | JobStatus::Failed { .. } | JobStatus::Cancelled
        )
    }
}

/// One source segment of an export, in output order
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSpec {
    pub source_path: PathBuf,
    pub trim_start: TimeSec,
    pub trim_end: TimeSec,
    pub track: TrackIndex,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub muted: bool,
}

fn default_volume() -> f64 {
    1.0
}

impl SegmentSpec {
    pub fn new(source_path: impl Into<PathBuf>, trim_start: TimeSec, trim_end: TimeSec) -> Self {
        Self {
            source_path: source_path.into(),
            trim_start,
            trim_end,
            track: 0,
            volume: 1.0,
            muted: false,
        }
    }

    pub fn duration(&self) -> TimeSec {
        self.trim_end - self.trim_start
    }
}

/// Transcode job record
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeJob {
    /// Unique job ID
    pub id: JobId,
    pub segments: Vec<SegmentSpec>,
    pub resolution: Resolution,
    pub output_path: PathBuf,
    pub status: JobStatus,
    /// Last emitted progress, 0-100
    pub progress_percent: f64,
    /// Creation timestamp
    pub created_at: String,
    /// Completion timestamp
    pub completed_at: Option<String>,
}

impl TranscodeJob {
    pub fn new(segments: Vec<SegmentSpec>, resolution: Resolution, output_path: PathBuf) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            segments,
            resolution,
            output_path,
            status: JobStatus::Queued,
            progress_percent: 0.0,
            created_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
        }
    }

    /// Sum of segment durations
    pub fn total_duration(&self) -> TimeSec {
        self.segments.iter().map(SegmentSpec::duration).sum()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, JobStatus::Running)
    }

    pub fn is_done(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves to a terminal status and stamps the completion time
    pub fn finish(&mut self, status: JobStatus) {
        if let JobStatus::Succeeded { .. } = status {
            self.progress_percent = 100.0;
        }
        self.status = status;
        self.completed_at = Some(chrono::Utc::now().to_rfc3339());
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation flag shared between a job and its owner
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only returns once the flag is set.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
