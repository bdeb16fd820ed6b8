//! Index of accounts to their organization membership.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cirrus_core::Result;

use crate::index::Indexer;
use crate::metadata::{MetadataStore, METADATA_ASPECT};

/// Index name.
pub const ACCOUNTS_TO_ORGS: &str = "accounts-to-orgs";

/// Where an account sits in its organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgMembership {
    /// Organization id, e.g. `o-abc123`.
    pub org_id: String,
    /// Path of organizational units from the root.
    #[serde(default)]
    pub org_path: String,
}

/// Maps each account to its organization, from the account `metadata` aspect.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountOrganizationIndexer;

#[async_trait]
impl Indexer for AccountOrganizationIndexer {
    type Data = BTreeMap<String, OrgMembership>;

    fn name(&self) -> &str {
        ACCOUNTS_TO_ORGS
    }

    async fn update_cache(
        &self,
        data: &mut Self::Data,
        account: &str,
        _regions: &[String],
        store: &dyn MetadataStore,
    ) -> Result<()> {
        data.remove(account);

        let Some(metadata) = store.get_account_metadata(account, METADATA_ASPECT).await? else {
            return Ok(());
        };
        if let Some(org_id) = metadata.get("orgId").and_then(Value::as_str) {
            let org_path = metadata
                .get("orgPath")
                .and_then(Value::as_str)
                .unwrap_or_default();
            data.insert(
                account.to_string(),
                OrgMembership {
                    org_id: org_id.to_string(),
                    org_path: org_path.to_string(),
                },
            );
        }
        Ok(())
    }
}
