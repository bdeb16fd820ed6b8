//! Observability infrastructure for Cirrus.
//!
//! Structured logging with consistent spans. Libraries only emit `tracing`
//! events; binaries and tests call [`init_logging`] once to install a
//! subscriber.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl LogFormat {
    /// Reads `CIRRUS_LOG_FORMAT` (`json` or `pretty`), defaulting to pretty.
    #[must_use]
    pub fn from_env() -> Self {
        match crate::env::env_string("CIRRUS_LOG_FORMAT").as_deref() {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `cirrus_store=debug`)
///
/// # Example
///
/// ```rust
/// use cirrus_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // A subscriber installed elsewhere (e.g. by a test harness) wins.
        let _ = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
    });
}

/// Creates a span for metadata store operations.
///
/// # Example
///
/// ```rust
/// use cirrus_core::observability::store_span;
///
/// let span = store_span("sync_resource_list", "aws", "111111111111");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn store_span(operation: &str, partition: &str, account: &str) -> Span {
    tracing::info_span!(
        "store",
        op = operation,
        partition = partition,
        account = account,
    )
}

/// Creates a span for one scheduled job.
#[must_use]
pub fn job_span(index: usize, label: &str) -> Span {
    tracing::info_span!("job", index = index, label = label)
}
