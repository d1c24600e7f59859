//! Availability monitoring
//!
//! [`MonitorState`] owns the runtime state behind a single mutex and drives
//! the background poll loop. The parser in [`availability`] is pure and is
//! shared with history replay.

pub mod availability;
pub mod model;
pub mod state;

pub use model::{DateFilter, HistoryEntry, MonitorConfig, MonitorSnapshot};
pub use state::MonitorState;
