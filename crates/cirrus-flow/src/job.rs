//! Units of work accepted by the scheduler.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

/// Free-form key/value pairs describing a job (account, region, service...).
///
/// Carried through to the job's result and attached to its tracing span.
pub type Properties = BTreeMap<String, String>;

type JobFn<C, T> = Box<dyn FnOnce(C) -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// An async unit of work that receives a shared context when it runs.
pub struct Job<C, T> {
    properties: Properties,
    run: JobFn<C, T>,
}

impl<C, T> Job<C, T>
where
    C: 'static,
    T: 'static,
{
    /// Creates a job from an async closure.
    pub fn new<F, Fut>(run: F) -> Self
    where
        F: FnOnce(C) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            properties: Properties::new(),
            run: Box::new(move |context| run(context).boxed()),
        }
    }

    /// Adds a descriptive property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Replaces all properties.
    #[must_use]
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Returns the job's properties.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub(crate) fn into_parts(self) -> (Properties, JobFn<C, T>) {
        (self.properties, self.run)
    }
}

impl<C, T> fmt::Debug for Job<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Renders properties as `k=v` pairs for log lines.
#[must_use]
pub fn label(properties: &Properties) -> String {
    properties
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Outcome of one job.
#[derive(Debug)]
pub enum JobResult<T> {
    /// The job completed with a value.
    Fulfilled {
        /// Value returned by the job.
        value: T,
        /// Properties the job was submitted with.
        properties: Properties,
    },
    /// The job returned an error or panicked.
    Rejected {
        /// Failure cause.
        reason: anyhow::Error,
        /// Properties the job was submitted with.
        properties: Properties,
    },
}

impl<T> JobResult<T> {
    /// Returns true if the job completed successfully.
    #[must_use]
    pub const fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled { .. })
    }

    /// Returns true if the job failed.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Returns the value if fulfilled.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Fulfilled { value, .. } => Some(value),
            Self::Rejected { .. } => None,
        }
    }

    /// Returns the failure cause if rejected.
    #[must_use]
    pub const fn reason(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Rejected { reason, .. } => Some(reason),
            Self::Fulfilled { .. } => None,
        }
    }

    /// Returns the properties the job was submitted with.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        match self {
            Self::Fulfilled { properties, .. } | Self::Rejected { properties, .. } => properties,
        }
    }

    /// Converts into a `Result`, dropping the properties.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason if the job failed.
    pub fn into_result(self) -> anyhow::Result<T> {
        match self {
            Self::Fulfilled { value, .. } => Ok(value),
            Self::Rejected { reason, .. } => Err(reason),
        }
    }
}
