//! Index of principals to the IAM roles that trust them.
//!
//! Roles are recorded under the account they were listed for, which need not
//! be the account in the role ARN. Re-indexing an account replaces exactly the
//! roles previously recorded for it.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use cirrus_core::{Arn, ResourceTypeParts, Result};

use crate::index::Indexer;
use crate::metadata::MetadataStore;

/// Index name.
pub const PRINCIPALS_TO_TRUSTING_ROLES: &str = "principals-to-trusting-roles";

/// Aspect holding a role's assume-role policy document.
pub const TRUST_POLICY_ASPECT: &str = "trust-policy";

const PRINCIPAL_KINDS: [&str; 3] = ["AWS", "Service", "Federated"];

/// Content of the `principals-to-trusting-roles` index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustIndex {
    /// Principal to the role ARNs whose trust policy allows it.
    #[serde(default)]
    pub principals: BTreeMap<String, BTreeSet<String>>,
    /// Role ARN to the account it was indexed under.
    #[serde(default)]
    pub role_accounts: BTreeMap<String, String>,
}

impl TrustIndex {
    /// Roles trusting `principal`, empty if none.
    #[must_use]
    pub fn roles_trusting(&self, principal: &str) -> impl Iterator<Item = &str> {
        self.principals
            .get(principal)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    fn owner_of(&self, role: &str) -> Option<String> {
        self.role_accounts.get(role).cloned().or_else(|| {
            Arn::parse(role)
                .ok()
                .map(|arn| arn.account().to_string())
        })
    }

    fn remove_account(&mut self, account: &str) {
        let owned: BTreeSet<String> = self
            .principals
            .values()
            .flatten()
            .chain(self.role_accounts.keys())
            .filter(|role| self.owner_of(role).as_deref() == Some(account))
            .cloned()
            .collect();
        for roles in self.principals.values_mut() {
            roles.retain(|role| !owned.contains(role));
        }
        self.principals.retain(|_, roles| !roles.is_empty());
        self.role_accounts.retain(|role, _| !owned.contains(role));
    }
}

/// Maps each principal to the roles whose trust policy allows it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrincipalTrustIndexer;

#[async_trait]
impl Indexer for PrincipalTrustIndexer {
    type Data = TrustIndex;

    fn name(&self) -> &str {
        PRINCIPALS_TO_TRUSTING_ROLES
    }

    async fn update_cache(
        &self,
        data: &mut Self::Data,
        account: &str,
        _regions: &[String],
        store: &dyn MetadataStore,
    ) -> Result<()> {
        data.remove_account(account);

        let scope = ResourceTypeParts::service("iam").with_resource_type("role");
        for role in store.list_resources(account, &scope).await? {
            let Some(policy) = store
                .get_resource_metadata(account, &role, TRUST_POLICY_ASPECT)
                .await?
            else {
                continue;
            };
            let principals = trusted_principals(&policy);
            debug!(role = %role, principals = principals.len(), "indexed trust policy");
            for principal in principals {
                data.principals
                    .entry(principal)
                    .or_default()
                    .insert(role.as_str().to_string());
            }
            data.role_accounts
                .insert(role.as_str().to_string(), account.to_string());
        }
        Ok(())
    }
}

/// Principals allowed by the `Allow` statements of a policy document.
fn trusted_principals(policy: &Value) -> BTreeSet<String> {
    let statements: Vec<&Value> = match policy.get("Statement") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => Vec::new(),
    };

    let mut principals = BTreeSet::new();
    for statement in statements {
        if statement.get("Effect").and_then(Value::as_str) != Some("Allow") {
            continue;
        }
        match statement.get("Principal") {
            Some(Value::String(any)) => {
                principals.insert(any.clone());
            }
            Some(Value::Object(kinds)) => {
                for kind in PRINCIPAL_KINDS {
                    match kinds.get(kind) {
                        Some(Value::String(p)) => {
                            principals.insert(p.clone());
                        }
                        Some(Value::Array(items)) => {
                            principals.extend(items.iter().filter_map(Value::as_str).map(String::from));
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    principals
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_allowed_principals_of_every_kind() {
        let policy = json!({
            "Statement": [
                {"Effect": "Allow", "Principal": {"AWS": "arn:aws:iam::111111111111:root"}},
                {"Effect": "Allow", "Principal": {"Service": ["lambda.amazonaws.com", "ec2.amazonaws.com"]}},
                {"Effect": "Allow", "Principal": {"Federated": "cognito-identity.amazonaws.com"}},
                {"Effect": "Deny", "Principal": {"AWS": "arn:aws:iam::222222222222:root"}},
            ]
        });
        let principals = trusted_principals(&policy);
        assert_eq!(
            principals.into_iter().collect::<Vec<_>>(),
            vec![
                "arn:aws:iam::111111111111:root",
                "cognito-identity.amazonaws.com",
                "ec2.amazonaws.com",
                "lambda.amazonaws.com",
            ]
        );
    }

    #[test]
    fn removing_an_account_uses_recorded_owner() {
        let mut index = TrustIndex::default();
        let foreign = "arn:aws:iam::111111111111:role/shared";
        let legacy = "arn:aws:iam::333333333333:role/old";
        index.principals.insert(
            "*".into(),
            [foreign.to_string(), legacy.to_string()].into_iter().collect(),
        );
        index.role_accounts.insert(foreign.into(), "333333333333".into());

        index.remove_account("111111111111");
        assert_eq!(index.roles_trusting("*").count(), 2);

        index.remove_account("333333333333");
        assert!(index.principals.is_empty());
        assert!(index.role_accounts.is_empty());
    }

    #[test]
    fn single_statement_and_wildcard() {
        let policy = json!({"Statement": {"Effect": "Allow", "Principal": "*"}});
        assert!(trusted_principals(&policy).contains("*"));
        assert!(trusted_principals(&json!({})).is_empty());
    }
}
