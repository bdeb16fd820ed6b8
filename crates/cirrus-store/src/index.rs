//! Derived cross-account indexes and their update protocol.
//!
//! An [`Indexer`] owns one named index. [`update_index`] drives a single
//! account's contribution through a get/update/save cycle: the index is read
//! with its lock token, the indexer recomputes the account's entries from
//! data already in the store, and the result is saved with compare-and-swap.
//! When another writer saved first the cycle starts over from a fresh read.
//!
//! `update_cache` must replace the account's previous contribution rather
//! than apply a diff, so re-running it after a lost race is always safe.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info_span, Instrument};

use cirrus_core::{Error, Fingerprint, Result};
use cirrus_flow::metrics::JobMetrics;
use cirrus_flow::Job;

use crate::context::StoreContext;
use crate::metadata::{IndexSnapshot, MetadataStore};

/// Default number of get/update/save attempts per account.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Initial backoff between attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Maximum backoff between attempts.
const BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Bounds the compare-and-swap retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts before giving up (at least one is always made).
    pub max_attempts: u32,
    /// Delay after the first lost race; doubles on every further loss.
    pub base_backoff: Duration,
    /// Upper bound for the delay, before jitter.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: BACKOFF_BASE,
            max_backoff: BACKOFF_MAX,
        }
    }
}

impl RetryPolicy {
    /// Policy that retries immediately, for tests and in-process stores.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` lost races so far.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        if self.base_backoff.is_zero() {
            return Duration::ZERO;
        }
        let exp = self
            .base_backoff
            .saturating_mul(1_u32 << attempt.saturating_sub(1).min(16));
        exp.min(self.max_backoff) + Duration::from_millis(rand_jitter())
    }
}

/// Maintains one named cross-account index.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Index content; `Default` is the empty index.
    type Data: Serialize + DeserializeOwned + Default + Send + Sync;

    /// Global index name, e.g. `buckets-to-accounts`.
    fn name(&self) -> &str;

    /// Reads the index and its lock token.
    async fn get_cache(&self, store: &dyn MetadataStore) -> Result<IndexSnapshot<Self::Data>> {
        let snapshot = store.get_index(self.name(), Value::Null).await?;
        let name = self.name();
        let data = match snapshot.data {
            Value::Null => Self::Data::default(),
            value => serde_json::from_value(value)
                .map_err(|e| Error::serialization(&format!("decode index {name}"), &e))?,
        };
        Ok(IndexSnapshot {
            data,
            lock_id: snapshot.lock_id,
        })
    }

    /// Replaces `account`'s contribution to `data` using stored metadata.
    ///
    /// `regions` narrows the pass for region-scoped indexes; empty means all.
    async fn update_cache(
        &self,
        data: &mut Self::Data,
        account: &str,
        regions: &[String],
        store: &dyn MetadataStore,
    ) -> Result<()>;

    /// Saves the index if `lock_id` still matches the stored content.
    async fn save_cache(
        &self,
        store: &dyn MetadataStore,
        data: &Self::Data,
        lock_id: Option<&Fingerprint>,
    ) -> Result<bool> {
        let name = self.name();
        let value = serde_json::to_value(data)
            .map_err(|e| Error::serialization(&format!("encode index {name}"), &e))?;
        store.save_index(name, &value, lock_id).await
    }
}

/// Result of a successful [`update_index`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexUpdateOutcome {
    /// Index that was updated.
    pub index: String,
    /// Account whose contribution was saved.
    pub account: String,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Recomputes `account`'s contribution to the indexer's index and saves it.
///
/// # Errors
///
/// Returns [`Error::PreconditionFailed`] if every attempt lost its race, or
/// the first store or indexer error.
pub async fn update_index<I>(
    indexer: &I,
    store: &dyn MetadataStore,
    account: &str,
    regions: &[String],
    policy: &RetryPolicy,
) -> Result<IndexUpdateOutcome>
where
    I: Indexer + ?Sized,
{
    let name = indexer.name();
    let metrics = JobMetrics::new();
    let max_attempts = policy.max_attempts.max(1);
    let span = info_span!("update_index", index = name, account = account);

    async move {
        for attempt in 1..=max_attempts {
            let IndexSnapshot { mut data, lock_id } = indexer.get_cache(store).await?;
            indexer
                .update_cache(&mut data, account, regions, store)
                .await?;
            if indexer.save_cache(store, &data, lock_id.as_ref()).await? {
                debug!(attempts = attempt, "index saved");
                return Ok(IndexUpdateOutcome {
                    index: name.to_string(),
                    account: account.to_string(),
                    attempts: attempt,
                });
            }

            metrics.record_index_conflict(name);
            debug!(attempt, "index changed concurrently, refetching");
            if attempt < max_attempts {
                tokio::time::sleep(policy.backoff(attempt)).await;
            }
        }

        Err(Error::PreconditionFailed {
            message: format!(
                "index {name} for account {account} still contended after {max_attempts} attempts"
            ),
        })
    }
    .instrument(span)
    .await
}

/// Builds one scheduler job per account, each running [`update_index`] with
/// the context's store and retry policy.
pub fn index_jobs<I>(
    indexer: Arc<I>,
    accounts: &[String],
    regions: &[String],
) -> Vec<Job<StoreContext, IndexUpdateOutcome>>
where
    I: Indexer + 'static,
{
    accounts
        .iter()
        .map(|account| {
            let indexer = Arc::clone(&indexer);
            let name = indexer.name().to_string();
            let job_account = account.clone();
            let regions = regions.to_vec();
            Job::new(move |ctx: StoreContext| async move {
                let outcome = update_index(
                    indexer.as_ref(),
                    ctx.store.as_ref(),
                    &job_account,
                    &regions,
                    &ctx.index_retry,
                )
                .await?;
                Ok::<_, anyhow::Error>(outcome)
            })
            .with_property("index", name)
            .with_property("account", account.as_str())
        })
        .collect()
}

fn rand_jitter() -> u64 {
    let seed = u64::from(
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    );
    seed % 50
}
