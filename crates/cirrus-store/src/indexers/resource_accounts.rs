//! Indexes of resources to the account and region that own them.
//!
//! Re-indexing an account for a set of regions replaces that account's
//! entries in those regions only; an empty region list covers every region.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cirrus_core::paths::{region_segment, GLOBAL_REGION};
use cirrus_core::{Arn, ResourceTypeParts, Result};

use crate::index::Indexer;
use crate::metadata::{MetadataStore, METADATA_ASPECT};

/// Index of bucket names to owning accounts.
pub const BUCKETS_TO_ACCOUNTS: &str = "buckets-to-accounts";

/// Key used for each resource in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyBy {
    /// Full ARN.
    Arn,
    /// Last component of the resource part, e.g. a bucket name.
    ResourceName,
}

/// Owner of an indexed resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOwner {
    /// Owning account.
    pub account: String,
    /// Region the resource lives in, `global` if it has none.
    pub region: String,
}

/// Maps resources of one scope to the account and region that own them.
///
/// S3 ARNs carry neither account nor region, so the index is the only way to
/// resolve a bucket referenced by name in another account's policy.
#[derive(Debug, Clone)]
pub struct ResourceAccountIndexer {
    name: String,
    scope: ResourceTypeParts,
    key_by: KeyBy,
}

impl ResourceAccountIndexer {
    /// Creates an indexer over `scope`.
    #[must_use]
    pub fn new(name: impl Into<String>, scope: ResourceTypeParts, key_by: KeyBy) -> Self {
        Self {
            name: name.into(),
            scope,
            key_by,
        }
    }

    /// `buckets-to-accounts`: bucket name to owner.
    #[must_use]
    pub fn buckets() -> Self {
        Self::new(
            BUCKETS_TO_ACCOUNTS,
            ResourceTypeParts::service("s3"),
            KeyBy::ResourceName,
        )
    }

    fn key(&self, arn: &Arn) -> String {
        match self.key_by {
            KeyBy::Arn => arn.as_str().to_string(),
            KeyBy::ResourceName => arn.resource_name().to_string(),
        }
    }

    async fn region_of(&self, store: &dyn MetadataStore, account: &str, arn: &Arn) -> Result<String> {
        if !arn.region().is_empty() {
            return Ok(arn.region().to_string());
        }
        let metadata = store
            .get_resource_metadata(account, arn, METADATA_ASPECT)
            .await?;
        Ok(metadata
            .as_ref()
            .and_then(|m| m.get("region"))
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .unwrap_or(GLOBAL_REGION)
            .to_string())
    }
}

#[async_trait]
impl Indexer for ResourceAccountIndexer {
    type Data = BTreeMap<String, ResourceOwner>;

    fn name(&self) -> &str {
        &self.name
    }

    async fn update_cache(
        &self,
        data: &mut Self::Data,
        account: &str,
        regions: &[String],
        store: &dyn MetadataStore,
    ) -> Result<()> {
        let in_regions =
            |region: &str| regions.is_empty() || regions.iter().any(|r| region_segment(r) == region);

        data.retain(|_, owner| owner.account != account || !in_regions(&owner.region));

        for arn in store.list_resources(account, &self.scope).await? {
            let region = self.region_of(store, account, &arn).await?;
            if !in_regions(&region) {
                continue;
            }
            data.insert(
                self.key(&arn),
                ResourceOwner {
                    account: account.to_string(),
                    region,
                },
            );
        }
        Ok(())
    }
}
