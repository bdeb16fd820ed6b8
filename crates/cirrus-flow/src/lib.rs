//! # cirrus-flow
//!
//! Job scheduling for Cirrus collection runs.
//!
//! Collection work is a flat list of independent jobs, typically one per
//! (account, region, service). This crate runs such a list with:
//!
//! - **Bounded concurrency**: at most `concurrency` jobs in flight
//! - **Order preservation**: results line up with the submitted jobs
//! - **Failure isolation**: errors and panics become rejected results
//! - **Stuck-job detection**: a per-job watchdog that warns but never cancels
//!
//! ## Example
//!
//! ```rust
//! use cirrus_flow::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let jobs: Vec<Job<(), u32>> = (0..4)
//!     .map(|i| Job::new(move |()| async move { Ok(i * 2) }).with_property("index", i.to_string()))
//!     .collect();
//!
//! let results = run_jobs(jobs, (), &RunOptions::default()).await;
//! assert_eq!(results[3].value(), Some(&6));
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod job;
pub mod metrics;
pub mod scheduler;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::job::{Job, JobResult, Properties};
    pub use crate::metrics::JobMetrics;
    pub use crate::scheduler::{run_jobs, RunOptions, SchedulerConfig, StuckJob};
}

pub use job::{Job, JobResult, Properties};
pub use scheduler::{run_jobs, RunOptions, SchedulerConfig, StuckJob};
