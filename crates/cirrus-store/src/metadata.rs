//! The metadata store facade.
//!
//! [`MetadataStore`] is the domain-level API collectors and indexers use.
//! Values are JSON; every (entity, aspect) pair is addressed independently so
//! that a collector refreshing one aspect never rewrites another.
//!
//! Aspect values that are `null`, `{}` or `[]` are never stored: saving one
//! deletes the aspect. Collectors normalise "not found" and "access denied"
//! responses to `null`, so a resource whose policy was removed upstream loses
//! its stored policy on the next run.

use async_trait::async_trait;
use serde_json::Value;

use cirrus_core::{Arn, Fingerprint, ResourceTypeParts, Result};

/// Aspect holding a resource's descriptive fields; metadata selectors apply to it.
pub const METADATA_ASPECT: &str = "metadata";

/// A named index together with the lock token for its next write.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot<T> {
    /// Index content, or the caller's default if the index does not exist.
    pub data: T,
    /// Fingerprint of the stored content; `None` when the index is absent.
    pub lock_id: Option<Fingerprint>,
}

impl<T> IndexSnapshot<T> {
    /// Maps the data, keeping the lock token.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> IndexSnapshot<U> {
        IndexSnapshot {
            data: f(self.data),
            lock_id: self.lock_id,
        }
    }
}

/// Returns true for values that are stored as an absent aspect.
#[must_use]
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Domain-level persistence for collected metadata.
///
/// Reads of missing entities return `None` or an empty list. A lost index
/// race returns `Ok(false)` from [`MetadataStore::save_index`]. `Err` is
/// reserved for invalid identifiers and backend failures.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Partition (e.g. `aws`) this store writes under.
    fn partition(&self) -> &str;

    // --- Resources -------------------------------------------------------

    /// Saves one aspect of a resource. Empty values delete the aspect.
    async fn save_resource_metadata(
        &self,
        account: &str,
        arn: &Arn,
        aspect: &str,
        value: &Value,
    ) -> Result<()>;

    /// Reads one aspect of a resource.
    async fn get_resource_metadata(
        &self,
        account: &str,
        arn: &Arn,
        aspect: &str,
    ) -> Result<Option<Value>>;

    /// Deletes every aspect of a resource.
    async fn delete_resource_metadata(&self, account: &str, arn: &Arn) -> Result<()>;

    /// Lists the resources stored for `account` under `scope`.
    ///
    /// When `scope` carries metadata selectors, only resources whose
    /// `metadata` aspect satisfies all of them are listed; resources without
    /// that aspect are left out.
    async fn list_resources(&self, account: &str, scope: &ResourceTypeParts) -> Result<Vec<Arn>>;

    /// Returns the `metadata` aspect of every resource in `scope`.
    ///
    /// `account = None` falls back to `scope.account`, and searches every
    /// account when both are unset. Open region and type fields match any
    /// value; metadata selectors filter the results.
    async fn find_resource_metadata(
        &self,
        account: Option<&str>,
        scope: &ResourceTypeParts,
    ) -> Result<Vec<Value>>;

    /// Deletes every stored resource in `scope` whose ARN is not in `current`.
    ///
    /// Resources excluded by the scope's metadata selectors are never touched.
    ///
    /// Returns the number of resources removed.
    async fn sync_resource_list(
        &self,
        account: &str,
        scope: &ResourceTypeParts,
        current: &[Arn],
    ) -> Result<usize> {
        let stale: Vec<Arn> = self
            .list_resources(account, scope)
            .await?
            .into_iter()
            .filter(|stored| !current.iter().any(|c| c.as_str() == stored.as_str()))
            .collect();
        for arn in &stale {
            self.delete_resource_metadata(account, arn).await?;
        }
        Ok(stale.len())
    }

    /// Deletes every resource in `scope` for `account`.
    ///
    /// Returns the number of resources removed.
    async fn delete_scope(&self, account: &str, scope: &ResourceTypeParts) -> Result<usize> {
        self.sync_resource_list(account, scope, &[]).await
    }

    // --- Indexes ---------------------------------------------------------

    /// Reads a named index, returning `default` with no lock token if absent.
    async fn get_index(&self, name: &str, default: Value) -> Result<IndexSnapshot<Value>>;

    /// Writes a named index if `lock_id` still matches the stored content.
    ///
    /// `lock_id = None` succeeds only while the index does not exist.
    async fn save_index(
        &self,
        name: &str,
        data: &Value,
        lock_id: Option<&Fingerprint>,
    ) -> Result<bool>;

    // --- Accounts --------------------------------------------------------

    /// Lists every account with stored data, sorted.
    async fn list_account_ids(&self) -> Result<Vec<String>>;

    /// Saves an account-level aspect. Empty values delete the aspect.
    async fn save_account_metadata(&self, account: &str, aspect: &str, value: &Value) -> Result<()>;

    /// Reads an account-level aspect.
    async fn get_account_metadata(&self, account: &str, aspect: &str) -> Result<Option<Value>>;

    /// Deletes an account-level aspect.
    async fn delete_account_metadata(&self, account: &str, aspect: &str) -> Result<()>;

    // --- Organizations ---------------------------------------------------

    /// Saves an organization-level aspect. Empty values delete the aspect.
    async fn save_organization_metadata(&self, org: &str, aspect: &str, value: &Value) -> Result<()>;

    /// Reads an organization-level aspect.
    async fn get_organization_metadata(&self, org: &str, aspect: &str) -> Result<Option<Value>>;

    /// Saves one aspect of an organization policy. Empty values delete the aspect.
    async fn save_organization_policy_metadata(
        &self,
        org: &str,
        policy_type: &str,
        policy_id: &str,
        aspect: &str,
        value: &Value,
    ) -> Result<()>;

    /// Reads one aspect of an organization policy.
    async fn get_organization_policy_metadata(
        &self,
        org: &str,
        policy_type: &str,
        policy_id: &str,
        aspect: &str,
    ) -> Result<Option<Value>>;

    /// Lists the policy ids stored for an organization and policy type, sorted.
    async fn list_organization_policies(&self, org: &str, policy_type: &str) -> Result<Vec<String>>;

    /// Deletes every policy of `policy_type` whose id is not in `current`.
    ///
    /// Returns the number of policies removed.
    async fn sync_organization_policies(
        &self,
        org: &str,
        policy_type: &str,
        current: &[String],
    ) -> Result<usize>;

    // --- RAM shares ------------------------------------------------------

    /// Saves a RAM share record. Empty values delete the record.
    async fn save_ram_resource(&self, account: &str, arn: &Arn, value: &Value) -> Result<()>;

    /// Reads a RAM share record.
    async fn get_ram_resource(&self, account: &str, arn: &Arn) -> Result<Option<Value>>;

    /// Deletes every RAM share record in `region` whose ARN is not in `current`.
    ///
    /// Returns the number of records removed.
    async fn sync_ram_resources(&self, account: &str, region: &str, current: &[Arn]) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_values_are_absent() {
        assert!(is_empty_value(&Value::Null));
        assert!(is_empty_value(&json!({})));
        assert!(is_empty_value(&json!([])));
        assert!(!is_empty_value(&json!(false)));
        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!("")));
        assert!(!is_empty_value(&json!({"Statement": []})));
    }
}
