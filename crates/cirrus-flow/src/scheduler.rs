//! Bounded-concurrency job runner.
//!
//! [`run_jobs`] starts `min(concurrency, jobs.len())` workers. Each worker
//! claims the next unstarted job index from a shared counter, runs it to
//! completion and writes the outcome into that index's result slot, so the
//! returned results line up with the submitted jobs regardless of finish
//! order. A failing or panicking job becomes [`JobResult::Rejected`] and never
//! affects its siblings.
//!
//! While a job runs, a watchdog ticks once per configured interval and logs a
//! warning for every full interval the job is still in flight. The watchdog
//! never cancels the job.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn, Instrument};

use cirrus_core::env::{env_u64, env_usize};
use cirrus_core::observability::job_span;

use crate::job::{label, Job, JobResult, Properties};
use crate::metrics::{outcomes, JobMetrics};

/// Default number of jobs in flight.
pub const DEFAULT_CONCURRENCY: usize = 50;

/// Default watchdog interval.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Maximum number of jobs in flight. Zero is treated as one.
    pub concurrency: usize,
    /// Period of the stuck-job warning. Zero disables the watchdog.
    #[serde(with = "duration_secs")]
    pub watchdog_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
        }
    }
}

impl SchedulerConfig {
    /// Loads configuration from environment variables.
    ///
    /// - `CIRRUS_JOB_CONCURRENCY` (default 50)
    /// - `CIRRUS_JOB_WATCHDOG_SECS` (default 60)
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but not a non-negative integer.
    pub fn from_env() -> cirrus_core::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            concurrency: env_usize("CIRRUS_JOB_CONCURRENCY")?.unwrap_or(defaults.concurrency),
            watchdog_interval: env_u64("CIRRUS_JOB_WATCHDOG_SECS")?
                .map_or(defaults.watchdog_interval, Duration::from_secs),
        })
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the watchdog interval.
    #[must_use]
    pub const fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// A job the watchdog has seen running past one or more intervals.
#[derive(Debug, Clone)]
pub struct StuckJob {
    /// Position of the job in the submitted list.
    pub index: usize,
    /// Properties the job was submitted with.
    pub properties: Properties,
    /// Time since the job started.
    pub elapsed: Duration,
    /// Number of full intervals elapsed so far.
    pub intervals: u64,
}

/// Callback invoked on every watchdog warning.
pub type StuckObserver = Arc<dyn Fn(&StuckJob) + Send + Sync>;

/// Options for one [`run_jobs`] call.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Scheduler tuning.
    pub config: SchedulerConfig,
    on_stuck: Option<StuckObserver>,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("config", &self.config)
            .field("on_stuck", &self.on_stuck.is_some())
            .finish()
    }
}

impl RunOptions {
    /// Creates options from a config.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            on_stuck: None,
        }
    }

    /// Registers a callback for watchdog warnings, in addition to the log line.
    #[must_use]
    pub fn with_stuck_observer(mut self, observer: impl Fn(&StuckJob) + Send + Sync + 'static) -> Self {
        self.on_stuck = Some(Arc::new(observer));
        self
    }
}

impl From<SchedulerConfig> for RunOptions {
    fn from(config: SchedulerConfig) -> Self {
        Self::new(config)
    }
}

/// Runs `jobs` with bounded concurrency and returns one result per job, in
/// submission order.
///
/// Every job receives a clone of `context`. Resolves once every job has
/// finished; there is no cancellation.
pub async fn run_jobs<C, T>(jobs: Vec<Job<C, T>>, context: C, options: &RunOptions) -> Vec<JobResult<T>>
where
    C: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    let total = jobs.len();
    if total == 0 {
        return Vec::new();
    }
    let workers = options.config.concurrency.max(1).min(total);
    debug!(jobs = total, workers, "starting jobs");

    let pending: Vec<Mutex<Option<Job<C, T>>>> =
        jobs.into_iter().map(|job| Mutex::new(Some(job))).collect();
    let slots: Vec<Mutex<Option<JobResult<T>>>> = (0..total).map(|_| Mutex::new(None)).collect();
    let next = AtomicUsize::new(0);
    let metrics = JobMetrics::new();

    {
        let (next, pending, results, context) = (&next, &pending, &slots, &context);
        let worker = move || async move {
            loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                if index >= total {
                    break;
                }
                let Some(job) = take(&pending[index]) else {
                    continue;
                };
                let result = execute(index, job, context.clone(), options, metrics).await;
                *results[index].lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
            }
        };
        join_all((0..workers).map(|_| worker())).await;
    }

    slots
        .into_iter()
        .map(|slot| {
            slot.into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .unwrap_or_else(|| JobResult::Rejected {
                    reason: anyhow::anyhow!("job was never run"),
                    properties: Properties::new(),
                })
        })
        .collect()
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

async fn execute<C, T>(
    index: usize,
    job: Job<C, T>,
    context: C,
    options: &RunOptions,
    metrics: JobMetrics,
) -> JobResult<T>
where
    C: Send + 'static,
    T: Send + 'static,
{
    let (properties, run) = job.into_parts();
    let job_label = label(&properties);
    let span = job_span(index, &job_label);

    async move {
        let started = Instant::now();
        // Panics raised while building the future are caught as well as those
        // raised while polling it.
        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| run(context))) {
            Ok(work) => {
                let work = AssertUnwindSafe(work).catch_unwind();
                watch(work, index, &properties, options, metrics, started).await
            }
            Err(payload) => Err(payload),
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(value)) => {
                metrics.record_job(outcomes::FULFILLED, elapsed);
                debug!(elapsed_ms = elapsed.as_millis(), "job fulfilled");
                JobResult::Fulfilled { value, properties }
            }
            Ok(Err(reason)) => {
                metrics.record_job(outcomes::REJECTED, elapsed);
                warn!(error = %format!("{reason:#}"), "job rejected");
                JobResult::Rejected { reason, properties }
            }
            Err(payload) => {
                metrics.record_job(outcomes::REJECTED, elapsed);
                let message = panic_message(payload.as_ref());
                warn!(panic = %message, "job panicked");
                JobResult::Rejected {
                    reason: anyhow::anyhow!("job panicked: {message}"),
                    properties,
                }
            }
        }
    }
    .instrument(span)
    .await
}

/// Drives `work` to completion, warning once per elapsed watchdog interval.
async fn watch<F>(
    work: F,
    index: usize,
    properties: &Properties,
    options: &RunOptions,
    metrics: JobMetrics,
    started: Instant,
) -> F::Output
where
    F: std::future::Future,
{
    let period = options.config.watchdog_interval;
    if period.is_zero() {
        return work.await;
    }

    let mut watchdog = interval_at(started + period, period);
    watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut intervals = 0u64;
    tokio::pin!(work);

    loop {
        tokio::select! {
            biased;
            output = &mut work => return output,
            _ = watchdog.tick() => {
                intervals += 1;
                let elapsed = started.elapsed();
                metrics.record_watchdog_warning();
                warn!(
                    elapsed_secs = elapsed.as_secs(),
                    intervals,
                    "job still running"
                );
                if let Some(observer) = &options.on_stuck {
                    observer(&StuckJob {
                        index,
                        properties: properties.clone(),
                        elapsed,
                        intervals,
                    });
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.concurrency, 50);
        assert_eq!(config.watchdog_interval, Duration::from_secs(60));
    }

    #[test]
    fn config_deserializes_seconds() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"concurrency": 4, "watchdogInterval": 5}"#).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.watchdog_interval, Duration::from_secs(5));

        let partial: SchedulerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(partial, SchedulerConfig::default());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }

    #[tokio::test]
    async fn empty_job_list_returns_immediately() {
        let results: Vec<JobResult<()>> = run_jobs(Vec::new(), (), &RunOptions::default()).await;
        assert!(results.is_empty());
    }
}
