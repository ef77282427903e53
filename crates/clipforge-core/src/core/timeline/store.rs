//! Timeline Store
//!
//! The single writer of committed timeline state. Every operation validates
//! against the current workspace first and only then mutates, so a rejected
//! edit leaves the workspace exactly as it was.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::{is_valid_time_sec, ClipId, CoreError, CoreResult, TimeSec, TrackIndex};

use super::{Clip, Workspace};

/// Shortest trim range a clip may be reduced to (seconds)
pub const MIN_CLIP_DURATION: TimeSec = 0.1;

/// Tolerance for floating point comparisons on stored times
const TIME_EPSILON: TimeSec = 1e-6;

/// Allowed drift between placement length and trim length on imported clips
const DURATION_TOLERANCE: TimeSec = 1e-3;

// =============================================================================
// Change Records
// =============================================================================

/// A single observable change produced by a commit
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StateChange {
    #[serde(rename_all = "camelCase")]
    ClipAdded { clip_id: ClipId },
    #[serde(rename_all = "camelCase")]
    ClipMoved {
        clip_id: ClipId,
        from_track: TrackIndex,
        to_track: TrackIndex,
    },
    #[serde(rename_all = "camelCase")]
    ClipTrimmed { clip_id: ClipId },
    #[serde(rename_all = "camelCase")]
    ClipRemoved { clip_id: ClipId },
    #[serde(rename_all = "camelCase")]
    ClipAudioChanged { clip_id: ClipId },
    PlayheadMoved { playhead: TimeSec },
    #[serde(rename_all = "camelCase")]
    SelectionChanged { selected_clip_id: Option<ClipId> },
    ViewChanged,
    #[serde(rename_all = "camelCase")]
    TrackCountChanged { track_count: usize },
    WorkspaceRestored,
}

/// Result of a successful commit
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    /// Store version after the commit
    pub version: u64,
    /// Changes applied by the commit
    pub changes: Vec<StateChange>,
}

// =============================================================================
// Validation Helpers
// =============================================================================

fn find_overlap<'a>(
    workspace: &'a Workspace,
    track: TrackIndex,
    start: TimeSec,
    end: TimeSec,
    ignore_clip_id: Option<&str>,
) -> Option<&'a Clip> {
    workspace.clips_on_track(track).find(|existing| {
        if ignore_clip_id.is_some_and(|id| id == existing.id) {
            return false;
        }
        existing.overlaps(start, end)
    })
}

fn validate_no_overlap(
    workspace: &Workspace,
    track: TrackIndex,
    start: TimeSec,
    end: TimeSec,
    ignore_clip_id: Option<&str>,
) -> CoreResult<()> {
    if let Some(conflict) = find_overlap(workspace, track, start, end, ignore_clip_id) {
        return Err(CoreError::ClipOverlap {
            track,
            existing_clip_id: conflict.id.clone(),
            new_start: start,
            new_end: end,
        });
    }
    Ok(())
}

fn validate_track(track: TrackIndex, track_count: usize) -> CoreResult<()> {
    if track >= track_count {
        return Err(CoreError::TrackOutOfRange { track, track_count });
    }
    Ok(())
}

fn validate_trim_range(
    trim_start: TimeSec,
    trim_end: TimeSec,
    source_duration: Option<TimeSec>,
) -> CoreResult<()> {
    if !trim_start.is_finite() || !trim_end.is_finite() {
        return Err(CoreError::InvalidTrim(
            "trim points must be finite".to_string(),
        ));
    }
    if trim_start < 0.0 {
        return Err(CoreError::InvalidTrim(format!(
            "trimStart {:.3}s is before the start of the source",
            trim_start
        )));
    }
    if trim_end <= trim_start {
        return Err(CoreError::InvalidTrim(format!(
            "trim handles crossed ({:.3}s >= {:.3}s)",
            trim_start, trim_end
        )));
    }
    if trim_end - trim_start < MIN_CLIP_DURATION - TIME_EPSILON {
        return Err(CoreError::InvalidTrim(format!(
            "clip would be shorter than the {:.1}s minimum",
            MIN_CLIP_DURATION
        )));
    }
    if let Some(duration) = source_duration {
        if trim_end > duration + TIME_EPSILON {
            return Err(CoreError::InvalidTrim(format!(
                "trimEnd {:.3}s exceeds source duration {:.3}s",
                trim_end, duration
            )));
        }
    }
    Ok(())
}

/// Checks a clip's own fields, independent of its neighbours
fn validate_clip_shape(clip: &Clip, track_count: usize) -> CoreResult<()> {
    if clip.id.is_empty() {
        return Err(CoreError::ValidationError(
            "clip id must not be empty".to_string(),
        ));
    }
    if !is_valid_time_sec(clip.timeline_start)
        || !clip.timeline_end.is_finite()
        || clip.timeline_end <= clip.timeline_start
    {
        return Err(CoreError::InvalidTimeRange(
            clip.timeline_start,
            clip.timeline_end,
        ));
    }
    validate_trim_range(clip.trim_start, clip.trim_end, clip.source_duration)?;
    if (clip.duration() - clip.trim_duration()).abs() > DURATION_TOLERANCE {
        return Err(CoreError::ValidationError(format!(
            "clip {} placement length {:.3}s does not match trim length {:.3}s",
            clip.id,
            clip.duration(),
            clip.trim_duration()
        )));
    }
    validate_track(clip.track, track_count)?;
    if !clip.volume.is_finite() || !(0.0..=1.0).contains(&clip.volume) {
        return Err(CoreError::ValidationError(format!(
            "clip {} volume {} outside 0.0-1.0",
            clip.id, clip.volume
        )));
    }
    Ok(())
}

// =============================================================================
// Store
// =============================================================================

/// Owner of the committed workspace
#[derive(Debug, Clone, Default)]
pub struct TimelineStore {
    workspace: Workspace,
    version: u64,
}

impl TimelineStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store from a previously persisted workspace
    pub fn from_workspace(workspace: Workspace) -> CoreResult<Self> {
        let mut store = Self::new();
        store.restore(workspace)?;
        Ok(store)
    }

    /// Committed workspace
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Owned copy of the committed workspace, suitable for persistence
    pub fn snapshot(&self) -> Workspace {
        self.workspace.clone()
    }

    /// Monotonic version, incremented by every successful commit
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn clip(&self, id: &str) -> Option<&Clip> {
        self.workspace.clip(id)
    }

    /// Clips ordered by timeline start, then track
    pub fn clips_in_timeline_order(&self) -> Vec<&Clip> {
        let mut clips: Vec<&Clip> = self.workspace.clips.iter().collect();
        clips.sort_by(|a, b| {
            a.timeline_start
                .total_cmp(&b.timeline_start)
                .then_with(|| a.track.cmp(&b.track))
                .then_with(|| a.id.cmp(&b.id))
        });
        clips
    }

    fn commit(&mut self, changes: Vec<StateChange>) -> CommitReceipt {
        self.version += 1;
        debug!(version = self.version, ?changes, "Timeline commit");
        CommitReceipt {
            version: self.version,
            changes,
        }
    }

    fn clip_index(&self, id: &str) -> CoreResult<usize> {
        self.workspace
            .clips
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| CoreError::ClipNotFound(id.to_string()))
    }

    // -------------------------------------------------------------------------
    // Clip operations
    // -------------------------------------------------------------------------

    /// Adds a fully populated clip handed off by an import/record/drop flow
    pub fn add_clip(&mut self, clip: Clip) -> CoreResult<CommitReceipt> {
        if self.workspace.clip(&clip.id).is_some() {
            return Err(CoreError::DuplicateClip(clip.id));
        }
        validate_clip_shape(&clip, self.workspace.track_count)?;
        validate_no_overlap(
            &self.workspace,
            clip.track,
            clip.timeline_start,
            clip.timeline_end,
            None,
        )?;

        let clip_id = clip.id.clone();
        self.workspace.clips.push(clip);
        Ok(self.commit(vec![StateChange::ClipAdded { clip_id }]))
    }

    /// Moves a clip to a new start time and track, preserving its duration
    pub fn move_clip(
        &mut self,
        id: &str,
        new_start: TimeSec,
        new_track: TrackIndex,
    ) -> CoreResult<CommitReceipt> {
        if !is_valid_time_sec(new_start) {
            return Err(CoreError::ValidationError(
                "newStart must be finite and non-negative".to_string(),
            ));
        }
        validate_track(new_track, self.workspace.track_count)?;

        let idx = self.clip_index(id)?;
        let clip = &self.workspace.clips[idx];
        let from_track = clip.track;
        let new_end = new_start + clip.duration();
        validate_no_overlap(&self.workspace, new_track, new_start, new_end, Some(id))?;

        let clip = &mut self.workspace.clips[idx];
        clip.timeline_start = new_start;
        clip.timeline_end = new_end;
        clip.track = new_track;

        Ok(self.commit(vec![StateChange::ClipMoved {
            clip_id: id.to_string(),
            from_track,
            to_track: new_track,
        }]))
    }

    /// Changes a clip's source in/out points. The placement keeps its start
    /// and its end follows the new trim length.
    pub fn trim_clip(
        &mut self,
        id: &str,
        new_trim_start: TimeSec,
        new_trim_end: TimeSec,
    ) -> CoreResult<CommitReceipt> {
        let idx = self.clip_index(id)?;
        let clip = &self.workspace.clips[idx];
        validate_trim_range(new_trim_start, new_trim_end, clip.source_duration)?;

        let track = clip.track;
        let start = clip.timeline_start;
        let new_end = start + (new_trim_end - new_trim_start);
        validate_no_overlap(&self.workspace, track, start, new_end, Some(id))?;

        let clip = &mut self.workspace.clips[idx];
        clip.trim_start = new_trim_start;
        clip.trim_end = new_trim_end;
        clip.timeline_end = new_end;

        Ok(self.commit(vec![StateChange::ClipTrimmed {
            clip_id: id.to_string(),
        }]))
    }

    /// Removes a clip, clearing the selection if it pointed at it
    pub fn delete_clip(&mut self, id: &str) -> CoreResult<CommitReceipt> {
        let idx = self.clip_index(id)?;
        self.workspace.clips.remove(idx);

        let mut changes = vec![StateChange::ClipRemoved {
            clip_id: id.to_string(),
        }];
        if self.workspace.selected_clip_id.as_deref() == Some(id) {
            self.workspace.selected_clip_id = None;
            changes.push(StateChange::SelectionChanged {
                selected_clip_id: None,
            });
        }
        Ok(self.commit(changes))
    }

    /// Sets clip volume, clamped to 0.0-1.0
    pub fn set_volume(&mut self, id: &str, volume: f64) -> CoreResult<CommitReceipt> {
        if !volume.is_finite() {
            return Err(CoreError::ValidationError(
                "volume must be finite".to_string(),
            ));
        }
        let idx = self.clip_index(id)?;
        self.workspace.clips[idx].volume = volume.clamp(0.0, 1.0);
        Ok(self.commit(vec![StateChange::ClipAudioChanged {
            clip_id: id.to_string(),
        }]))
    }

    pub fn set_muted(&mut self, id: &str, muted: bool) -> CoreResult<CommitReceipt> {
        let idx = self.clip_index(id)?;
        self.workspace.clips[idx].muted = muted;
        Ok(self.commit(vec![StateChange::ClipAudioChanged {
            clip_id: id.to_string(),
        }]))
    }

    // -------------------------------------------------------------------------
    // Workspace-level operations
    // -------------------------------------------------------------------------

    /// Moves the playhead; negative values clamp to 0
    pub fn set_playhead(&mut self, time: TimeSec) -> CoreResult<CommitReceipt> {
        if !time.is_finite() {
            return Err(CoreError::ValidationError(
                "playhead must be finite".to_string(),
            ));
        }
        let playhead = time.max(0.0);
        self.workspace.playhead = playhead;
        Ok(self.commit(vec![StateChange::PlayheadMoved { playhead }]))
    }

    /// Selects a clip, or clears the selection with `None`
    pub fn select(&mut self, id: Option<&str>) -> CoreResult<CommitReceipt> {
        if let Some(id) = id {
            self.clip_index(id)?;
        }
        let selected_clip_id = id.map(str::to_string);
        self.workspace.selected_clip_id = selected_clip_id.clone();
        Ok(self.commit(vec![StateChange::SelectionChanged { selected_clip_id }]))
    }

    pub fn set_zoom(&mut self, zoom: f64) -> CoreResult<CommitReceipt> {
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(CoreError::ValidationError(format!(
                "zoom must be positive, got {}",
                zoom
            )));
        }
        self.workspace.zoom = zoom;
        Ok(self.commit(vec![StateChange::ViewChanged]))
    }

    /// Sets the horizontal scroll offset; negative values clamp to 0
    pub fn set_scroll_offset(&mut self, offset: f64) -> CoreResult<CommitReceipt> {
        if !offset.is_finite() {
            return Err(CoreError::ValidationError(
                "scroll offset must be finite".to_string(),
            ));
        }
        self.workspace.scroll_offset = offset.max(0.0);
        Ok(self.commit(vec![StateChange::ViewChanged]))
    }

    /// Changes the number of tracks; fails if a clip would be orphaned
    pub fn set_track_count(&mut self, track_count: usize) -> CoreResult<CommitReceipt> {
        if track_count == 0 {
            return Err(CoreError::ValidationError(
                "track count must be at least 1".to_string(),
            ));
        }
        if let Some(clip) = self.workspace.clips.iter().find(|c| c.track >= track_count) {
            return Err(CoreError::TrackOutOfRange {
                track: clip.track,
                track_count,
            });
        }
        self.workspace.track_count = track_count;
        Ok(self.commit(vec![StateChange::TrackCountChanged { track_count }]))
    }

    /// Replaces the whole workspace after validating every invariant
    pub fn restore(&mut self, mut workspace: Workspace) -> CoreResult<CommitReceipt> {
        if workspace.track_count == 0 {
            return Err(CoreError::ValidationError(
                "track count must be at least 1".to_string(),
            ));
        }
        if !workspace.zoom.is_finite() || workspace.zoom <= 0.0 {
            return Err(CoreError::ValidationError(format!(
                "zoom must be positive, got {}",
                workspace.zoom
            )));
        }
        if !is_valid_time_sec(workspace.playhead) {
            return Err(CoreError::ValidationError(
                "playhead must be finite and non-negative".to_string(),
            ));
        }
        if !is_valid_time_sec(workspace.scroll_offset) {
            return Err(CoreError::ValidationError(
                "scroll offset must be finite and non-negative".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for clip in &workspace.clips {
            if !seen.insert(clip.id.as_str()) {
                return Err(CoreError::DuplicateClip(clip.id.clone()));
            }
            validate_clip_shape(clip, workspace.track_count)?;
            validate_no_overlap(
                &workspace,
                clip.track,
                clip.timeline_start,
                clip.timeline_end,
                Some(&clip.id),
            )?;
        }

        if let Some(selected) = workspace.selected_clip_id.as_deref() {
            if workspace.clip(selected).is_none() {
                warn!("Dropping selection of unknown clip {} on restore", selected);
                workspace.selected_clip_id = None;
            }
        }

        self.workspace = workspace;
        Ok(self.commit(vec![StateChange::WorkspaceRestored]))
    }
}
