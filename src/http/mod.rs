//! HTTP control surface for the monitor
//!
//! Status, start/stop, configuration, history and notification testing.

pub mod handlers;
