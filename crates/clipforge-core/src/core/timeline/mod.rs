//! Timeline Module
//!
//! Clip/workspace data model, the pixel/time coordinate mapper and the
//! store that owns all committed timeline state.

mod coords;
mod models;
mod store;

pub use coords::*;
pub use models::*;
pub use store::*;
