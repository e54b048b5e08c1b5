//! Metric names and recorder setup for racefeed.
//!
//! Instrumented crates record through the `metrics` facade macros re-exported
//! here. Nothing is collected until [`init_metrics`] installs a recorder; with
//! the `prometheus` feature the recorder renders Prometheus text.
//!
//! ```rust,ignore
//! use racefeed_metrics::{counter, labels, sync};
//!
//! counter!(sync::RUNS_TOTAL, labels::TRIGGER => "scheduled").increment(1);
//! ```

mod definitions;
pub mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
