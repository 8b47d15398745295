#![allow(clippy::result_large_err)]

pub mod app;
pub mod cluster;
pub mod config;
pub mod consistency;
pub mod error;
pub mod fanout;
pub mod logging;
pub mod metrics;
pub mod poll;
pub mod preflight;
pub mod readiness;
pub mod snapshot;
pub mod telemetry;
