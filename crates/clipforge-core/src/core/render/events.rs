//! Export events
//!
//! Everything the pipeline reports to the outside world goes through an
//! [`EventSink`]. Each job ends with exactly one terminal event.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::JobId;

/// Pipeline event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PipelineEvent {
    /// Job-level progress, non-decreasing
    #[serde(rename_all = "camelCase")]
    Progress { job_id: JobId, percent: f64 },
    /// Non-fatal condition, e.g. falling back to a system FFmpeg
    #[serde(rename_all = "camelCase")]
    Warning {
        job_id: Option<JobId>,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    JobComplete { job_id: JobId, output_path: PathBuf },
    #[serde(rename_all = "camelCase")]
    JobFailed { job_id: JobId, reason: String },
    #[serde(rename_all = "camelCase")]
    JobCancelled { job_id: JobId },
}

impl PipelineEvent {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            PipelineEvent::Progress { job_id, .. }
            | PipelineEvent::JobComplete { job_id, .. }
            | PipelineEvent::JobFailed { job_id, .. }
            | PipelineEvent::JobCancelled { job_id } => Some(job_id),
            PipelineEvent::Warning { job_id, .. } => job_id.as_deref(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineEvent::JobComplete { .. }
                | PipelineEvent::JobFailed { .. }
                | PipelineEvent::JobCancelled { .. }
        )
    }
}

/// Receiver of pipeline events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Forwards events into an unbounded channel
#[derive(Clone, Debug)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: PipelineEvent) {
        // Receiver gone means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

/// Writes events to the log
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::Progress { job_id, percent } => {
                info!("Job {} progress {:.1}%", job_id, percent)
            }
            PipelineEvent::Warning { message, .. } => warn!("{}", message),
            PipelineEvent::JobComplete {
                job_id,
                output_path,
            } => info!("Job {} complete: {}", job_id, output_path.display()),
            PipelineEvent::JobFailed { job_id, reason } => {
                warn!("Job {} failed: {}", job_id, reason)
            }
            PipelineEvent::JobCancelled { job_id } => info!("Job {} cancelled", job_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = PipelineEvent::Progress {
            job_id: "job_1".to_string(),
            percent: 42.5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["jobId"], "job_1");
        assert_eq!(json["percent"], 42.5);

        let event = PipelineEvent::JobComplete {
            job_id: "job_1".to_string(),
            output_path: PathBuf::from("/out/final.mp4"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "jobComplete");
        assert_eq!(json["outputPath"], "/out/final.mp4");
    }

    #[test]
    fn test_terminal_events() {
        assert!(PipelineEvent::JobCancelled {
            job_id: "j".to_string()
        }
        .is_terminal());
        assert!(!PipelineEvent::Warning {
            job_id: None,
            message: "m".to_string()
        }
        .is_terminal());
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (sink, mut rx) = ChannelEventSink::channel();
        sink.emit(PipelineEvent::JobFailed {
            job_id: "job_2".to_string(),
            reason: "exit status: 1".to_string(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id(), Some("job_2"));

        drop(rx);
        // no panic once the receiver is gone
        sink.emit(PipelineEvent::JobCancelled {
            job_id: "job_2".to_string(),
        });
    }
}
