//! Radar pipeline.
//!
//! This module turns feed snapshots into a classified, prioritized target list
//! relative to own-ship, and drives that transform on a timer with range
//! presets and auto-ranging.

pub mod controller;
pub mod ownship;
pub mod processor;

pub use controller::{spawn_ticker, ControllerConfig, RadarController, RadarEvent, TrafficSource};
pub use ownship::OwnShipPosition;
pub use processor::{RadarTarget, SelectionPolicy};
