//! Coordinate mapping between timeline seconds and canvas pixels.

use crate::core::TimeSec;

use super::Workspace;

/// Horizontal view parameters of the timeline canvas
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    /// Pixels per second
    pub zoom: f64,
    /// Horizontal scroll offset in pixels
    pub scroll_offset: f64,
    /// Width of the track label column in pixels
    pub label_width: f64,
}

impl Viewport {
    pub fn new(zoom: f64, scroll_offset: f64, label_width: f64) -> Self {
        Self {
            zoom,
            scroll_offset,
            label_width,
        }
    }

    /// Viewport for the current workspace view state
    pub fn from_workspace(workspace: &Workspace, label_width: f64) -> Self {
        Self::new(workspace.zoom, workspace.scroll_offset, label_width)
    }

    /// Timeline time to canvas x. Zoom is assumed positive; the store rejects
    /// non-positive zoom before it can reach here.
    pub fn to_pixel(&self, time: TimeSec) -> f64 {
        time * self.zoom - self.scroll_offset + self.label_width
    }

    /// Canvas x to timeline time
    pub fn to_time(&self, pixel: f64) -> TimeSec {
        (pixel - self.label_width + self.scroll_offset) / self.zoom
    }

    /// Converts a horizontal pixel delta to a time delta
    pub fn delta_to_time(&self, delta_px: f64) -> TimeSec {
        delta_px / self.zoom
    }

    /// Time range visible in a canvas of `canvas_width` pixels
    pub fn visible_range(&self, canvas_width: f64) -> (TimeSec, TimeSec) {
        let start = self.to_time(self.label_width).max(0.0);
        let end = self.to_time(canvas_width).max(start);
        (start, end)
    }
}
