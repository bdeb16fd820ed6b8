//! Reconciliation of a collection run against stored state.
//!
//! [`sync_data`] first deletes every stored resource in the scope that the run
//! did not report, then upserts each reported aspect. Resources reported by
//! both the previous and current runs are therefore never absent, even
//! transiently.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn, Instrument};

use cirrus_core::observability::store_span;
use cirrus_core::{Arn, Error, ResourceTypeParts, Result};

use crate::metadata::{is_empty_value, MetadataStore};

/// Key of the identifier field in a raw record.
pub const ARN_FIELD: &str = "arn";

/// One collected resource: its identifier and its aspects.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    /// Resource identifier.
    pub arn: Arn,
    /// Aspect name to value. `null`/empty values clear the aspect.
    pub aspects: BTreeMap<String, Value>,
}

impl DataRecord {
    /// Creates a record with no aspects.
    #[must_use]
    pub fn new(arn: Arn) -> Self {
        Self {
            arn,
            aspects: BTreeMap::new(),
        }
    }

    /// Adds an aspect.
    #[must_use]
    pub fn with_aspect(mut self, aspect: impl Into<String>, value: Value) -> Self {
        self.aspects.insert(aspect.into(), value);
        self
    }

    /// Builds a record from a flat map holding an `arn` string plus aspects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `arn` is missing, not a string or
    /// not a valid ARN.
    pub fn from_aspects(mut aspects: BTreeMap<String, Value>) -> Result<Self> {
        let arn = match aspects.remove(ARN_FIELD) {
            Some(Value::String(raw)) => Arn::parse(&raw)?,
            Some(other) => {
                return Err(Error::InvalidInput(format!(
                    "record arn must be a string, got {other}"
                )))
            }
            None => return Err(Error::InvalidInput("record has no arn".into())),
        };
        Ok(Self { arn, aspects })
    }
}

impl TryFrom<Value> for DataRecord {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::from_aspects(map.into_iter().collect()),
            other => Err(Error::InvalidInput(format!(
                "record must be an object, got {other}"
            ))),
        }
    }
}

/// Outcome of one [`sync_data`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Stored resources removed because the run no longer reported them.
    pub removed: usize,
    /// Aspects written.
    pub written: usize,
    /// Aspects cleared because the run reported them empty.
    pub cleared: usize,
}

/// Reconciles `records` into `store` for `account` within `scope`.
///
/// Unless `write_only` is set, stored resources in `scope` that are absent
/// from `records` are deleted first. Every aspect of every record is then
/// saved. Running twice with the same records leaves the store unchanged.
///
/// # Errors
///
/// Returns the first store error; aspects written before it remain.
pub async fn sync_data(
    records: &[DataRecord],
    store: &dyn MetadataStore,
    account: &str,
    scope: &ResourceTypeParts,
    write_only: bool,
) -> Result<SyncReport> {
    let span = store_span("sync_data", store.partition(), account);
    async move {
        let mut report = SyncReport::default();

        if !write_only {
            let current: Vec<Arn> = records.iter().map(|r| r.arn.clone()).collect();
            report.removed = store.sync_resource_list(account, scope, &current).await?;
        }

        for record in records {
            if !scope.contains(&record.arn) {
                warn!(arn = %record.arn, service = %scope.service, "record outside sync scope");
            }
            for (aspect, value) in &record.aspects {
                if aspect == ARN_FIELD {
                    continue;
                }
                store
                    .save_resource_metadata(account, &record.arn, aspect, value)
                    .await?;
                if is_empty_value(value) {
                    report.cleared += 1;
                } else {
                    report.written += 1;
                }
            }
        }

        debug!(
            records = records.len(),
            removed = report.removed,
            written = report.written,
            cleared = report.cleared,
            "synced scope"
        );
        Ok(report)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_from_value_extracts_arn() {
        let record = DataRecord::try_from(json!({
            "arn": "arn:aws:s3:::logs",
            "policy": {"Statement": []},
            "tags": null,
        }))
        .unwrap();
        assert_eq!(record.arn.as_str(), "arn:aws:s3:::logs");
        assert_eq!(record.aspects.len(), 2);
        assert!(!record.aspects.contains_key(ARN_FIELD));
    }

    #[test]
    fn record_without_arn_is_rejected() {
        assert!(DataRecord::try_from(json!({"policy": {}})).is_err());
        assert!(DataRecord::try_from(json!({"arn": 7})).is_err());
        assert!(DataRecord::try_from(json!(["arn"])).is_err());
    }
}
