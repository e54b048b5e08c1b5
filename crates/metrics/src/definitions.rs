//! Metric name and label definitions.
//!
//! Every metric racefeed emits is named here so dashboards and code agree.

/// Sync execution and scheduling metrics
pub mod sync {
    /// Runs started, labelled by trigger
    pub const RUNS_TOTAL: &str = "racefeed_sync_runs_total";
    /// Runs that ended `failed`
    pub const RUN_FAILURES_TOTAL: &str = "racefeed_sync_run_failures_total";
    /// Wall time of a run in seconds, health check excluded
    pub const RUN_DURATION_SECONDS: &str = "racefeed_sync_run_duration_seconds";
    /// Live timers owned by the scheduler
    pub const TASKS_SCHEDULED: &str = "racefeed_sync_tasks_scheduled";
    /// Timers that cancelled themselves after finding their configuration inactive
    pub const SELF_CANCELLATIONS_TOTAL: &str = "racefeed_sync_self_cancellations_total";
    /// Fires skipped because the previous run for the configuration was still going
    pub const OVERLAPPING_FIRES_SKIPPED_TOTAL: &str =
        "racefeed_sync_overlapping_fires_skipped_total";
    /// Failure notifications that could not be delivered
    pub const NOTIFICATION_FAILURES_TOTAL: &str = "racefeed_sync_notification_failures_total";
}

/// Common label keys used across metrics
pub mod labels {
    pub const TRIGGER: &str = "trigger";
    pub const SYNC_TYPE: &str = "sync_type";
}

/// Histogram buckets
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Sync run duration buckets (in seconds)
    /// Covers 100ms to 1 hour; scraper runs are slow and bounded by the
    /// per-configuration timeout
    pub static SYNC_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0,
        ]
    });
}
