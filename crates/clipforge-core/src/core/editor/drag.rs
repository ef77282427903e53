//! Drag/Edit State Machine
//!
//! Turns raw pointer events on the timeline canvas into at most one store
//! commit per gesture. While a drag is in progress only a visual preview is
//! computed (once per frame); the store is touched again on pointer-up.

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::{
    settings::EditorSettings,
    timeline::{Clip, CommitReceipt, TimelineStore, Viewport, Workspace, MIN_CLIP_DURATION},
    ClipId, CoreResult, TimeSec, TrackIndex,
};

// =============================================================================
// Layout
// =============================================================================

/// Canvas geometry used for hit testing
#[derive(Clone, Debug, PartialEq)]
pub struct DragLayout {
    /// Width of the track label column (px)
    pub label_width: f64,
    /// Height of the time ruler above the first track (px)
    pub ruler_height: f64,
    /// Height of one track row (px)
    pub track_height: f64,
    /// Half-width of the trim hotspot at each clip edge (px)
    pub trim_handle_px: f64,
    /// Half-width of the playhead hotspot (px)
    pub playhead_hotspot_px: f64,
    /// Grid applied on release; `None` disables snapping
    pub snap_interval: Option<TimeSec>,
}

impl Default for DragLayout {
    fn default() -> Self {
        Self::from_settings(&EditorSettings::default())
    }
}

impl DragLayout {
    pub fn from_settings(settings: &EditorSettings) -> Self {
        Self {
            label_width: settings.label_width,
            ruler_height: settings.ruler_height,
            track_height: settings.track_height,
            trim_handle_px: settings.trim_handle_px,
            playhead_hotspot_px: settings.playhead_hotspot_px,
            snap_interval: (settings.snap_to_grid && settings.snap_interval_sec > 0.0)
                .then_some(settings.snap_interval_sec),
        }
    }

    /// Track row under `y`, or `None` in the ruler or below the last track
    pub fn track_at_y(&self, y: f64, track_count: usize) -> Option<TrackIndex> {
        if y < self.ruler_height {
            return None;
        }
        let row = ((y - self.ruler_height) / self.track_height).floor();
        if row.is_finite() && row >= 0.0 && (row as usize) < track_count {
            Some(row as usize)
        } else {
            None
        }
    }

    /// Track whose vertical centre is closest to `y`, clamped to range
    pub fn nearest_track(&self, y: f64, track_count: usize) -> TrackIndex {
        let last = track_count.saturating_sub(1);
        let row = ((y - self.ruler_height) / self.track_height).floor();
        if !row.is_finite() || row <= 0.0 {
            0
        } else {
            (row as usize).min(last)
        }
    }

    /// Rounds to the nearest grid line when snapping is enabled
    pub fn snap(&self, time: TimeSec) -> TimeSec {
        match self.snap_interval {
            Some(interval) if interval > 0.0 => (time / interval).round() * interval,
            _ => time,
        }
    }
}

// =============================================================================
// Session Types
// =============================================================================

/// Canvas position in pixels
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PointerPos {
    pub x: f64,
    pub y: f64,
}

impl PointerPos {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// What a pointer-down grabbed
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "clipId", rename_all = "camelCase")]
pub enum DragTarget {
    None,
    ClipBody(ClipId),
    TrimStart(ClipId),
    TrimEnd(ClipId),
    Playhead,
}

impl DragTarget {
    pub fn clip_id(&self) -> Option<&str> {
        match self {
            DragTarget::ClipBody(id) | DragTarget::TrimStart(id) | DragTarget::TrimEnd(id) => {
                Some(id)
            }
            DragTarget::None | DragTarget::Playhead => None,
        }
    }
}

/// Controller state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DragState {
    Idle,
    DraggingClipBody,
    DraggingTrimStart,
    DraggingTrimEnd,
    DraggingPlayhead,
}

/// Uncommitted visual state of the dragged element
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DragPreview {
    #[serde(rename_all = "camelCase")]
    Clip {
        clip_id: ClipId,
        timeline_start: TimeSec,
        timeline_end: TimeSec,
        trim_start: TimeSec,
        trim_end: TimeSec,
        track: TrackIndex,
    },
    Playhead { time: TimeSec },
}

impl DragPreview {
    fn from_clip(clip: &Clip) -> Self {
        DragPreview::Clip {
            clip_id: clip.id.clone(),
            timeline_start: clip.timeline_start,
            timeline_end: clip.timeline_end,
            trim_start: clip.trim_start,
            trim_end: clip.trim_end,
            track: clip.track,
        }
    }
}

/// Transient state between pointer-down and pointer-up
#[derive(Clone, Debug)]
pub struct DragSession {
    pub target: DragTarget,
    pub pointer_origin: PointerPos,
    /// Track the dragged clip would land on
    pub candidate_track: Option<TrackIndex>,
    viewport: Viewport,
    track_count: usize,
    origin_clip: Option<Clip>,
    origin_preview: DragPreview,
    pending: Option<PointerPos>,
    preview: DragPreview,
}

impl DragSession {
    /// Latest computed preview
    pub fn preview(&self) -> &DragPreview {
        &self.preview
    }
}

/// Result of a pointer-down
#[derive(Clone, Debug, PartialEq)]
pub enum PointerDown {
    /// A drag started; clip targets also become the selection
    Started {
        target: DragTarget,
        selection: Option<CommitReceipt>,
    },
    /// Empty timeline area: the playhead jumped to the clicked time
    Seeked(CommitReceipt),
    /// Outside the editable canvas
    Ignored,
}

/// Result of a pointer-up
#[derive(Clone, Debug, PartialEq)]
pub enum DragOutcome {
    Committed(CommitReceipt),
    /// The store refused the edit; the view must go back to `revert_to`
    Rejected {
        warning: String,
        revert_to: DragPreview,
    },
    /// Released where it started
    Unchanged,
    NoSession,
}

// =============================================================================
// Controller
// =============================================================================

/// Pointer state machine for the timeline canvas
#[derive(Debug, Default)]
pub struct DragController {
    layout: DragLayout,
    session: Option<DragSession>,
}

impl DragController {
    pub fn new(layout: DragLayout) -> Self {
        Self {
            layout,
            session: None,
        }
    }

    pub fn layout(&self) -> &DragLayout {
        &self.layout
    }

    pub fn session(&self) -> Option<&DragSession> {
        self.session.as_ref()
    }

    pub fn state(&self) -> DragState {
        match self.session.as_ref().map(|s| &s.target) {
            Some(DragTarget::ClipBody(_)) => DragState::DraggingClipBody,
            Some(DragTarget::TrimStart(_)) => DragState::DraggingTrimStart,
            Some(DragTarget::TrimEnd(_)) => DragState::DraggingTrimEnd,
            Some(DragTarget::Playhead) => DragState::DraggingPlayhead,
            Some(DragTarget::None) | None => DragState::Idle,
        }
    }

    /// Resolves what is under the pointer.
    ///
    /// Priority: trim hotspot, playhead hotspot, clip body, empty area.
    pub fn hit_test(&self, workspace: &Workspace, pos: PointerPos) -> DragTarget {
        let viewport = Viewport::from_workspace(workspace, self.layout.label_width);
        let row = self.layout.track_at_y(pos.y, workspace.track_count);

        if let Some(track) = row {
            // Adjacent clips share an edge; on a tie the clip under the pointer wins.
            let mut best: Option<(f64, bool, DragTarget)> = None;
            for clip in workspace.clips_on_track(track) {
                let start_px = viewport.to_pixel(clip.timeline_start);
                let end_px = viewport.to_pixel(clip.timeline_end);
                let inside = pos.x >= start_px && pos.x < end_px;
                let edges = [
                    (start_px, DragTarget::TrimStart(clip.id.clone())),
                    (end_px, DragTarget::TrimEnd(clip.id.clone())),
                ];
                for (edge_px, target) in edges {
                    let distance = (pos.x - edge_px).abs();
                    if distance > self.layout.trim_handle_px {
                        continue;
                    }
                    let better = match &best {
                        None => true,
                        Some((d, best_inside, _)) => {
                            distance < *d || (distance == *d && inside && !*best_inside)
                        }
                    };
                    if better {
                        best = Some((distance, inside, target));
                    }
                }
            }
            if let Some((_, _, target)) = best {
                return target;
            }
        }

        if (pos.x - viewport.to_pixel(workspace.playhead)).abs() <= self.layout.playhead_hotspot_px {
            return DragTarget::Playhead;
        }

        if let Some(track) = row {
            let body = workspace.clips_on_track(track).find(|clip| {
                pos.x >= viewport.to_pixel(clip.timeline_start)
                    && pos.x < viewport.to_pixel(clip.timeline_end)
            });
            if let Some(clip) = body {
                return DragTarget::ClipBody(clip.id.clone());
            }
        }

        DragTarget::None
    }

    /// Starts a gesture. Clicking empty timeline seeks immediately.
    pub fn pointer_down(
        &mut self,
        store: &mut TimelineStore,
        pos: PointerPos,
    ) -> CoreResult<PointerDown> {
        if self.session.take().is_some() {
            debug!("Pointer down during an active drag; previous session dropped");
        }
        if pos.x < self.layout.label_width {
            return Ok(PointerDown::Ignored);
        }

        let workspace = store.workspace();
        let viewport = Viewport::from_workspace(workspace, self.layout.label_width);
        let target = self.hit_test(workspace, pos);

        let (origin_clip, origin_preview) = match &target {
            DragTarget::None => {
                let time = viewport.to_time(pos.x).max(0.0);
                return Ok(PointerDown::Seeked(store.set_playhead(time)?));
            }
            DragTarget::Playhead => (
                None,
                DragPreview::Playhead {
                    time: workspace.playhead,
                },
            ),
            DragTarget::ClipBody(id) | DragTarget::TrimStart(id) | DragTarget::TrimEnd(id) => {
                let Some(clip) = workspace.clip(id) else {
                    return Ok(PointerDown::Ignored);
                };
                (Some(clip.clone()), DragPreview::from_clip(clip))
            }
        };

        let candidate_track = match &target {
            DragTarget::ClipBody(_) => origin_clip.as_ref().map(|c| c.track),
            _ => None,
        };
        let track_count = workspace.track_count;
        let already_selected = target.clip_id().is_some()
            && workspace.selected_clip_id.as_deref() == target.clip_id();

        let selection = match target.clip_id() {
            Some(id) if !already_selected => Some(store.select(Some(id))?),
            _ => None,
        };

        self.session = Some(DragSession {
            target: target.clone(),
            pointer_origin: pos,
            candidate_track,
            viewport,
            track_count,
            origin_clip,
            origin_preview: origin_preview.clone(),
            pending: None,
            preview: origin_preview,
        });

        Ok(PointerDown::Started { target, selection })
    }

    /// Records the latest pointer position. No computation happens here.
    pub fn pointer_move(&mut self, pos: PointerPos) -> bool {
        match self.session.as_mut() {
            Some(session) => {
                session.pending = Some(pos);
                true
            }
            None => false,
        }
    }

    /// Per-frame tick: folds the latest pointer position into the preview.
    /// Returns `None` when nothing moved since the previous frame.
    pub fn on_frame(&mut self) -> Option<DragPreview> {
        let session = self.session.as_mut()?;
        let pos = session.pending.take()?;
        let preview = candidate(&self.layout, session, pos);
        if let DragPreview::Clip { track, .. } = &preview {
            if matches!(session.target, DragTarget::ClipBody(_)) {
                session.candidate_track = Some(*track);
            }
        }
        session.preview = preview.clone();
        Some(preview)
    }

    /// Ends the gesture: snaps the final candidate and commits it
    pub fn pointer_up(&mut self, store: &mut TimelineStore, pos: PointerPos) -> DragOutcome {
        let Some(session) = self.session.take() else {
            return DragOutcome::NoSession;
        };

        let final_preview = snapped(&self.layout, &session, candidate(&self.layout, &session, pos));
        if final_preview == session.origin_preview {
            return DragOutcome::Unchanged;
        }

        let result = match (&session.target, &final_preview) {
            (DragTarget::ClipBody(id), DragPreview::Clip {
                timeline_start, track, ..
            }) => store.move_clip(id, *timeline_start, *track),
            (
                DragTarget::TrimStart(id) | DragTarget::TrimEnd(id),
                DragPreview::Clip {
                    trim_start, trim_end, ..
                },
            ) => store.trim_clip(id, *trim_start, *trim_end),
            (DragTarget::Playhead, DragPreview::Playhead { time }) => store.set_playhead(*time),
            _ => return DragOutcome::Unchanged,
        };

        match result {
            Ok(receipt) => DragOutcome::Committed(receipt),
            Err(e) => {
                warn!("Edit rejected: {}", e);
                DragOutcome::Rejected {
                    warning: e.to_string(),
                    revert_to: session.origin_preview,
                }
            }
        }
    }

    /// Abandons the gesture without touching the store
    pub fn cancel(&mut self) -> Option<DragPreview> {
        self.session.take().map(|s| s.origin_preview)
    }
}

/// Unsnapped candidate for a pointer position, clamped to trivially valid
/// ranges. Never consults the store.
fn candidate(layout: &DragLayout, session: &DragSession, pos: PointerPos) -> DragPreview {
    let dt = session.viewport.delta_to_time(pos.x - session.pointer_origin.x);

    if let DragTarget::Playhead = session.target {
        return DragPreview::Playhead {
            time: session.viewport.to_time(pos.x).max(0.0),
        };
    }
    let Some(clip) = session.origin_clip.as_ref() else {
        return session.preview.clone();
    };

    match session.target {
        DragTarget::ClipBody(_) => {
            let start = (clip.timeline_start + dt).max(0.0);
            DragPreview::Clip {
                clip_id: clip.id.clone(),
                timeline_start: start,
                timeline_end: start + clip.duration(),
                trim_start: clip.trim_start,
                trim_end: clip.trim_end,
                track: layout.nearest_track(pos.y, session.track_count),
            }
        }
        DragTarget::TrimStart(_) => {
            let max_start = (clip.trim_end - MIN_CLIP_DURATION).max(0.0);
            let trim_start = (clip.trim_start + dt).clamp(0.0, max_start);
            trim_preview(clip, trim_start, clip.trim_end)
        }
        DragTarget::TrimEnd(_) => {
            let trim_end = clamp_trim_end(clip, clip.trim_end + dt);
            trim_preview(clip, clip.trim_start, trim_end)
        }
        DragTarget::Playhead | DragTarget::None => session.preview.clone(),
    }
}

/// Applies grid snapping to a release candidate
fn snapped(layout: &DragLayout, session: &DragSession, preview: DragPreview) -> DragPreview {
    if layout.snap_interval.is_none() {
        return preview;
    }
    match (&session.target, session.origin_clip.as_ref(), preview) {
        (DragTarget::Playhead, _, DragPreview::Playhead { time }) => DragPreview::Playhead {
            time: layout.snap(time).max(0.0),
        },
        (DragTarget::ClipBody(_), Some(clip), DragPreview::Clip { track, timeline_start, .. }) => {
            let start = layout.snap(timeline_start).max(0.0);
            DragPreview::Clip {
                clip_id: clip.id.clone(),
                timeline_start: start,
                timeline_end: start + clip.duration(),
                trim_start: clip.trim_start,
                trim_end: clip.trim_end,
                track,
            }
        }
        (DragTarget::TrimStart(_), Some(clip), DragPreview::Clip { trim_start, .. }) => {
            let max_start = (clip.trim_end - MIN_CLIP_DURATION).max(0.0);
            let trim_start = layout.snap(trim_start).clamp(0.0, max_start);
            trim_preview(clip, trim_start, clip.trim_end)
        }
        (DragTarget::TrimEnd(_), Some(clip), DragPreview::Clip { timeline_end, .. }) => {
            // Snap the visible right edge, then map back into source time.
            let end = layout.snap(timeline_end);
            let trim_end = clamp_trim_end(clip, clip.trim_start + (end - clip.timeline_start));
            trim_preview(clip, clip.trim_start, trim_end)
        }
        (_, _, preview) => preview,
    }
}

fn clamp_trim_end(clip: &Clip, trim_end: TimeSec) -> TimeSec {
    let min_end = clip.trim_start + MIN_CLIP_DURATION;
    let max_end = clip.source_duration.unwrap_or(f64::INFINITY).max(min_end);
    trim_end.clamp(min_end, max_end)
}

fn trim_preview(clip: &Clip, trim_start: TimeSec, trim_end: TimeSec) -> DragPreview {
    DragPreview::Clip {
        clip_id: clip.id.clone(),
        timeline_start: clip.timeline_start,
        timeline_end: clip.timeline_start + (trim_end - trim_start),
        trim_start,
        trim_end,
        track: clip.track,
    }
}
