//! Metrics collection and export for parley.
//!
//! This crate provides a unified metrics interface using the `metrics` crate facade.
//! When the `prometheus` feature is enabled, metrics are exported in Prometheus format.
//!
//! # Usage
//!
//! ```rust,ignore
//! use parley_metrics::{counter, dispatch, labels};
//!
//! counter!(dispatch::EVENTS_TOTAL, labels::TENANT => "acme").increment(1);
//! ```

mod definitions;
mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
