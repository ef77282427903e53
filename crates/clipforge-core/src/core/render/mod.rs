//! Render Pipeline Module
//!
//! Turns a clip arrangement into a rendered file.
//!
//! # Modules
//!
//! - `events`: Job lifecycle events and the sinks that receive them
//! - `export`: Export requests, job orchestration and standalone operations

mod events;
mod export;

pub use events::*;
pub use export::*;
