//! ClipForge Core Type Definitions
//!
//! Defines fundamental types used throughout the project.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Clip unique identifier (ULID)
pub type ClipId = String;

/// Job unique identifier (ULID)
pub type JobId = String;

/// Opaque handle to imported source media, owned by the import collaborator
pub type SourceRef = String;

/// Zero-based track index (0 = main track)
pub type TrackIndex = usize;

/// Generates a new ULID string
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

// =============================================================================
// Time Types
// =============================================================================

/// Time in seconds (floating point)
pub type TimeSec = f64;

/// Returns true for finite, non-negative times
pub fn is_valid_time_sec(value: TimeSec) -> bool {
    value.is_finite() && value >= 0.0
}

/// Half-open interval overlap test: `[a_start, a_end)` vs `[b_start, b_end)`
pub fn ranges_overlap(a_start: TimeSec, a_end: TimeSec, b_start: TimeSec, b_end: TimeSec) -> bool {
    a_start < b_end && a_end > b_start
}

// =============================================================================
// Output Resolution
// =============================================================================

/// Export resolution presets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    /// Keep source resolution (falls back to 720p frame size)
    #[serde(rename = "source")]
    Source,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[default]
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "4K")]
    P2160,
}

impl Resolution {
    /// All presets, smallest first
    pub const ALL: [Resolution; 5] = [
        Resolution::Source,
        Resolution::P480,
        Resolution::P720,
        Resolution::P1080,
        Resolution::P2160,
    ];

    /// Output frame size in pixels
    ///
    /// `Source` has no probed frame size at export time, so it renders into a
    /// 1280x720 frame with aspect-preserving padding.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::Source => (1280, 720),
            Resolution::P480 => (854, 480),
            Resolution::P720 => (1280, 720),
            Resolution::P1080 => (1920, 1080),
            Resolution::P2160 => (3840, 2160),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Source => "source",
            Resolution::P480 => "480p",
            Resolution::P720 => "720p",
            Resolution::P1080 => "1080p",
            Resolution::P2160 => "4K",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resolution::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "Unsupported resolution: {}. Use 'source', '480p', '720p', '1080p', or '4K'.",
                    s
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_dimensions() {
        assert_eq!(Resolution::P480.dimensions(), (854, 480));
        assert_eq!(Resolution::P720.dimensions(), (1280, 720));
        assert_eq!(Resolution::P1080.dimensions(), (1920, 1080));
        assert_eq!(Resolution::P2160.dimensions(), (3840, 2160));
        assert_eq!(Resolution::Source.dimensions(), (1280, 720));
    }

    #[test]
    fn test_resolution_parse_is_case_insensitive() {
        assert_eq!("4k".parse::<Resolution>().unwrap(), Resolution::P2160);
        assert_eq!("1080P".parse::<Resolution>().unwrap(), Resolution::P1080);
        assert_eq!(" source ".parse::<Resolution>().unwrap(), Resolution::Source);
        assert!("8k".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_resolution_serde_uses_preset_names() {
        let json = serde_json::to_string(&Resolution::P2160).unwrap();
        assert_eq!(json, "\"4K\"");
        let parsed: Resolution = serde_json::from_str("\"480p\"").unwrap();
        assert_eq!(parsed, Resolution::P480);
    }

    #[test]
    fn test_ranges_overlap_is_half_open() {
        assert!(ranges_overlap(0.0, 5.0, 4.0, 6.0));
        assert!(!ranges_overlap(0.0, 5.0, 5.0, 8.0));
        assert!(!ranges_overlap(5.0, 8.0, 0.0, 5.0));
        assert!(ranges_overlap(1.0, 2.0, 0.0, 10.0));
    }

    #[test]
    fn test_new_id_is_unique() {
        assert_ne!(new_id(), new_id());
    }
}
