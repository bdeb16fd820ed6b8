//! Metrics for job execution and index maintenance.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `cirrus_jobs_total` | Counter | `outcome` | Jobs finished, by outcome |
//! | `cirrus_job_duration_seconds` | Histogram | `outcome` | Job wall-clock time |
//! | `cirrus_job_watchdog_warnings_total` | Counter | - | Watchdog intervals elapsed on running jobs |
//! | `cirrus_index_cas_conflicts_total` | Counter | `index` | Lost compare-and-swap attempts on indexes |
//!
//! Metrics go through the `metrics` crate facade; without an installed
//! recorder every call is a no-op.

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Jobs finished.
    pub const JOBS_TOTAL: &str = "cirrus_jobs_total";
    /// Histogram: Job duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "cirrus_job_duration_seconds";
    /// Counter: Watchdog warnings.
    pub const JOB_WATCHDOG_WARNINGS_TOTAL: &str = "cirrus_job_watchdog_warnings_total";
    /// Counter: Index CAS conflicts.
    pub const INDEX_CAS_CONFLICTS_TOTAL: &str = "cirrus_index_cas_conflicts_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Job outcome (fulfilled, rejected).
    pub const OUTCOME: &str = "outcome";
    /// Index name.
    pub const INDEX: &str = "index";
}

/// Job outcome label values.
pub mod outcomes {
    /// The job returned a value.
    pub const FULFILLED: &str = "fulfilled";
    /// The job failed or panicked.
    pub const REJECTED: &str = "rejected";
}

/// Recorder for scheduler and index metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobMetrics;

impl JobMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records a finished job.
    pub fn record_job(&self, outcome: &'static str, duration: Duration) {
        counter!(names::JOBS_TOTAL, labels::OUTCOME => outcome).increment(1);
        histogram!(names::JOB_DURATION_SECONDS, labels::OUTCOME => outcome)
            .record(duration.as_secs_f64());
    }

    /// Records one watchdog interval elapsing on a running job.
    pub fn record_watchdog_warning(&self) {
        counter!(names::JOB_WATCHDOG_WARNINGS_TOTAL).increment(1);
    }

    /// Records a lost compare-and-swap on a named index.
    pub fn record_index_conflict(&self, index: &str) {
        counter!(names::INDEX_CAS_CONFLICTS_TOTAL, labels::INDEX => index.to_string()).increment(1);
    }
}
