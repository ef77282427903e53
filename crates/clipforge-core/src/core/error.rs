//! ClipForge Error Definitions
//!
//! Defines error types used by the editing side of the core. FFmpeg and
//! export failures have their own enums in `ffmpeg` and `render`.

use thiserror::Error;

use super::{ClipId, TimeSec, TrackIndex};

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Timeline Errors
    // =========================================================================
    #[error("Clip not found: {0}")]
    ClipNotFound(ClipId),

    #[error("Clip already exists: {0}")]
    DuplicateClip(ClipId),

    #[error("Invalid time range: {0}~{1} seconds")]
    InvalidTimeRange(TimeSec, TimeSec),

    #[error("Invalid trim: {0}")]
    InvalidTrim(String),

    #[error("Track {track} out of range (track count: {track_count})")]
    TrackOutOfRange {
        track: TrackIndex,
        track_count: usize,
    },

    #[error(
        "Clip overlap on track {track}: {new_start:.3}~{new_end:.3}s conflicts with clip {existing_clip_id}"
    )]
    ClipOverlap {
        track: TrackIndex,
        existing_clip_id: ClipId,
        new_start: TimeSec,
        new_end: TimeSec,
    },

    // =========================================================================
    // Settings Errors
    // =========================================================================
    #[error("Settings error: {0}")]
    SettingsError(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// True for rejections caused by an invalid edit (as opposed to I/O or
    /// internal failures). Interactive callers surface these as warnings.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::ClipNotFound(_)
                | CoreError::DuplicateClip(_)
                | CoreError::InvalidTimeRange(..)
                | CoreError::InvalidTrim(_)
                | CoreError::TrackOutOfRange { .. }
                | CoreError::ClipOverlap { .. }
                | CoreError::ValidationError(_)
        )
    }
}
