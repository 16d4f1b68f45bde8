//! Continuous multi-channel analog acquisition with wall-clock timestamps and
//! per-channel threshold event detection.
pub mod config;
pub mod drivers;
pub mod engine;
pub mod ljm;
pub mod recorder;
pub mod types;
