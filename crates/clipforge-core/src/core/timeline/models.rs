//! Timeline Data Models
//!
//! Defines Clip and Workspace, the persisted shape of an editing session.

use serde::{Deserialize, Serialize};

use crate::core::{
    new_id, ranges_overlap, ClipId, CoreResult, SourceRef, TimeSec, TrackIndex,
};

/// Default number of tracks (main + overlay)
pub const DEFAULT_TRACK_COUNT: usize = 2;

/// Default zoom in pixels per second
pub const DEFAULT_ZOOM: f64 = 50.0;

// =============================================================================
// Clip
// =============================================================================

/// A timeline placement of a trimmed segment of source media
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    /// Unique clip ID
    pub id: ClipId,
    /// Handle to the imported source media
    pub source_ref: SourceRef,
    /// Placement start on the timeline (seconds)
    pub timeline_start: TimeSec,
    /// Placement end on the timeline (seconds, exclusive)
    pub timeline_end: TimeSec,
    /// In-point within the source (seconds)
    pub trim_start: TimeSec,
    /// Out-point within the source (seconds)
    pub trim_end: TimeSec,
    /// Track index (0 = main)
    pub track: TrackIndex,
    /// Audio volume (0.0 - 1.0)
    pub volume: f64,
    /// Audio muted
    pub muted: bool,
    /// Source media duration, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_duration: Option<TimeSec>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Clip {
    /// Creates a clip placing `[trim_start, trim_end)` of the source at
    /// `timeline_start` on `track`
    pub fn new(
        source_ref: impl Into<SourceRef>,
        timeline_start: TimeSec,
        trim_start: TimeSec,
        trim_end: TimeSec,
        track: TrackIndex,
    ) -> Self {
        Self {
            id: new_id(),
            source_ref: source_ref.into(),
            timeline_start,
            timeline_end: timeline_start + (trim_end - trim_start),
            trim_start,
            trim_end,
            track,
            volume: 1.0,
            muted: false,
            source_duration: None,
            name: None,
        }
    }

    /// Sets the known source duration
    pub fn with_source_duration(mut self, duration: TimeSec) -> Self {
        self.source_duration = Some(duration);
        self
    }

    /// Sets the clip ID (for fixtures and re-imports)
    pub fn with_id(mut self, id: impl Into<ClipId>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Length of the placement on the timeline
    pub fn duration(&self) -> TimeSec {
        self.timeline_end - self.timeline_start
    }

    /// Length of the selected source range
    pub fn trim_duration(&self) -> TimeSec {
        self.trim_end - self.trim_start
    }

    /// Checks whether this clip's placement overlaps `[start, end)`
    pub fn overlaps(&self, start: TimeSec, end: TimeSec) -> bool {
        ranges_overlap(self.timeline_start, self.timeline_end, start, end)
    }

    /// Checks if a time point falls within `[timeline_start, timeline_end)`
    pub fn contains(&self, time: TimeSec) -> bool {
        time >= self.timeline_start && time < self.timeline_end
    }
}

// =============================================================================
// Workspace
// =============================================================================

/// The single editing session aggregate
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    /// Clips in insertion order
    pub clips: Vec<Clip>,
    /// Playhead position (seconds)
    pub playhead: TimeSec,
    /// Zoom in pixels per second
    pub zoom: f64,
    /// Horizontal scroll offset in pixels
    pub scroll_offset: f64,
    /// Currently selected clip
    pub selected_clip_id: Option<ClipId>,
    /// Number of tracks
    #[serde(default = "default_track_count")]
    pub track_count: usize,
}

fn default_track_count() -> usize {
    DEFAULT_TRACK_COUNT
}

impl Default for Workspace {
    fn default() -> Self {
        Self {
            clips: Vec::new(),
            playhead: 0.0,
            zoom: DEFAULT_ZOOM,
            scroll_offset: 0.0,
            selected_clip_id: None,
            track_count: DEFAULT_TRACK_COUNT,
        }
    }
}

impl Workspace {
    /// Finds a clip by ID
    pub fn clip(&self, id: &str) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id == id)
    }

    /// Clips on a given track
    pub fn clips_on_track(&self, track: TrackIndex) -> impl Iterator<Item = &Clip> {
        self.clips.iter().filter(move |c| c.track == track)
    }

    /// End of the last clip (0 for an empty timeline)
    pub fn duration(&self) -> TimeSec {
        self.clips
            .iter()
            .map(|c| c.timeline_end)
            .fold(0.0, f64::max)
    }

    /// Serializes to the persisted JSON shape
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses the persisted JSON shape without validating it
    pub fn from_json(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
