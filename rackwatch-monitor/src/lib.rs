//! rackwatch monitor - the daemon around `rackwatch-core`.
//!
//! Loads `rackwatch.yaml`, builds the hardware and network adapters that
//! are enabled and available, then runs the poll loop next to the HTTP API
//! until a signal arrives or the shutdown campaign has fired.

pub mod app;
pub mod config;
pub mod display;
pub mod hosts;
pub mod http;
pub mod iio;
pub mod logging;
pub mod store;
pub mod telemetry;
