//! Playback Module
//!
//! Keeps a live preview surface in step with the timeline playhead.

mod sync;

pub use sync::*;
