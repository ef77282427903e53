//! ClipForge core library
//!
//! Timeline editing, preview synchronization and FFmpeg-backed export
//! without any GUI dependency. Front-ends (desktop shell, CLI) drive the
//! types under [`core`].

pub mod core;

pub use crate::core::logging::init_logging;
