//! ClipForge Core Engine
//!
//! Core editing engine module.
//! Handles the timeline model, interactive editing, preview sync and export.

pub mod editor;
pub mod ffmpeg;
pub mod jobs;
pub mod logging;
pub mod playback;
pub mod process;
pub mod render;
pub mod settings;
pub mod timeline;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;

#[cfg(test)]
mod tests_scenarios;
