//! Editor Module
//!
//! Pointer-driven editing of the timeline (drag, trim, scrub).

mod drag;

pub use drag::*;
