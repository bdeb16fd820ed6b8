//! Metadata store over any path-addressed [`StorageBackend`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use cirrus_core::paths::{aspect_file, decode_id, encode_id, join, JSON_EXT};
use cirrus_core::{
    Arn, Error, Fingerprint, ResourceTypeParts, Result, StorageBackend, StorePaths,
};

use crate::metadata::{is_empty_value, IndexSnapshot, MetadataStore, METADATA_ASPECT};

/// [`MetadataStore`] that lays data out with [`StorePaths`] on a storage backend.
#[derive(Clone)]
pub struct PathMetadataStore {
    backend: Arc<dyn StorageBackend>,
    paths: StorePaths,
}

impl std::fmt::Debug for PathMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathMetadataStore")
            .field("partition", &self.paths.partition())
            .finish_non_exhaustive()
    }
}

impl PathMetadataStore {
    /// Creates a store for `partition` on `backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition is not a valid path segment.
    pub fn new(backend: Arc<dyn StorageBackend>, partition: impl Into<String>) -> Result<Self> {
        Ok(Self {
            backend,
            paths: StorePaths::new(partition)?,
        })
    }

    /// Returns the underlying backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Returns the path layout.
    #[must_use]
    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    async fn read_json(&self, path: &str) -> Result<Option<Value>> {
        match self.backend.read(path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::serialization(&format!("parse {path}"), &e)),
            None => Ok(None),
        }
    }

    async fn write_or_delete(&self, path: &str, value: &Value) -> Result<()> {
        if is_empty_value(value) {
            return self.backend.delete(path).await;
        }
        self.backend.write(path, encode(path, value)?).await
    }

    async fn resource_dirs(
        &self,
        account: Option<&str>,
        scope: &ResourceTypeParts,
    ) -> Result<Vec<String>> {
        let (base, pattern) = self.paths.resource_pattern(account, scope)?;
        self.backend.expand_pattern(&base, &pattern).await
    }
}

fn encode(path: &str, value: &Value) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| Error::serialization(&format!("encode {path}"), &e))
}

/// Parses the ARN encoded in the last segment of a resource directory.
fn arn_from_dir(dir: &str) -> Option<Arn> {
    let segment = dir.rsplit('/').next()?;
    let decoded = decode_id(segment).ok()?;
    Arn::parse(&decoded).ok()
}

#[async_trait]
impl MetadataStore for PathMetadataStore {
    fn partition(&self) -> &str {
        self.paths.partition()
    }

    async fn save_resource_metadata(
        &self,
        account: &str,
        arn: &Arn,
        aspect: &str,
        value: &Value,
    ) -> Result<()> {
        let path = self.paths.resource_aspect(account, arn, aspect)?;
        self.write_or_delete(&path, value).await
    }

    async fn get_resource_metadata(
        &self,
        account: &str,
        arn: &Arn,
        aspect: &str,
    ) -> Result<Option<Value>> {
        let path = self.paths.resource_aspect(account, arn, aspect)?;
        self.read_json(&path).await
    }

    async fn delete_resource_metadata(&self, account: &str, arn: &Arn) -> Result<()> {
        let dir = self.paths.resource_dir(account, arn)?;
        self.backend.delete_directory(&dir).await
    }

    async fn list_resources(&self, account: &str, scope: &ResourceTypeParts) -> Result<Vec<Arn>> {
        let mut arns = Vec::new();
        for dir in self.resource_dirs(Some(account), scope).await? {
            let Some(arn) = arn_from_dir(&dir) else {
                warn!(dir = %dir, "skipping undecodable resource directory");
                continue;
            };
            if !scope.metadata.is_empty() {
                let metadata = self
                    .read_json(&join([dir.as_str(), aspect_file(METADATA_ASPECT).as_str()]))
                    .await?;
                if !metadata.is_some_and(|m| scope.matches_metadata(&m)) {
                    continue;
                }
            }
            arns.push(arn);
        }
        Ok(arns)
    }

    async fn find_resource_metadata(
        &self,
        account: Option<&str>,
        scope: &ResourceTypeParts,
    ) -> Result<Vec<Value>> {
        let account = account.or(scope.account.as_deref());
        let (base, pattern) = self.paths.resource_pattern(account, scope)?;
        let blobs = self
            .backend
            .find_with_pattern(&base, &pattern, &aspect_file(METADATA_ASPECT))
            .await?;

        let mut found = Vec::with_capacity(blobs.len());
        for bytes in blobs {
            let value: Value = serde_json::from_slice(&bytes)
                .map_err(|e| Error::serialization("parse resource metadata", &e))?;
            if scope.matches_metadata(&value) {
                found.push(value);
            }
        }
        Ok(found)
    }

    async fn get_index(&self, name: &str, default: Value) -> Result<IndexSnapshot<Value>> {
        let path = self.paths.index(name)?;
        match self.backend.read_with_fingerprint(&path).await? {
            Some(stored) => {
                let data = serde_json::from_slice(&stored.data)
                    .map_err(|e| Error::serialization(&format!("parse index {name}"), &e))?;
                Ok(IndexSnapshot {
                    data,
                    lock_id: Some(stored.fingerprint),
                })
            }
            None => Ok(IndexSnapshot {
                data: default,
                lock_id: None,
            }),
        }
    }

    async fn save_index(
        &self,
        name: &str,
        data: &Value,
        lock_id: Option<&Fingerprint>,
    ) -> Result<bool> {
        let path = self.paths.index(name)?;
        let saved = self
            .backend
            .write_with_optimistic_lock(&path, encode(&path, data)?, lock_id)
            .await?;
        if !saved {
            debug!(index = name, "index changed since it was read");
        }
        Ok(saved)
    }

    async fn list_account_ids(&self) -> Result<Vec<String>> {
        self.backend.list_directory(&self.paths.accounts_dir()).await
    }

    async fn save_account_metadata(&self, account: &str, aspect: &str, value: &Value) -> Result<()> {
        let path = self.paths.account_aspect(account, aspect)?;
        self.write_or_delete(&path, value).await
    }

    async fn get_account_metadata(&self, account: &str, aspect: &str) -> Result<Option<Value>> {
        let path = self.paths.account_aspect(account, aspect)?;
        self.read_json(&path).await
    }

    async fn delete_account_metadata(&self, account: &str, aspect: &str) -> Result<()> {
        let path = self.paths.account_aspect(account, aspect)?;
        self.backend.delete(&path).await
    }

    async fn save_organization_metadata(&self, org: &str, aspect: &str, value: &Value) -> Result<()> {
        let path = self.paths.organization_aspect(org, aspect)?;
        self.write_or_delete(&path, value).await
    }

    async fn get_organization_metadata(&self, org: &str, aspect: &str) -> Result<Option<Value>> {
        let path = self.paths.organization_aspect(org, aspect)?;
        self.read_json(&path).await
    }

    async fn save_organization_policy_metadata(
        &self,
        org: &str,
        policy_type: &str,
        policy_id: &str,
        aspect: &str,
        value: &Value,
    ) -> Result<()> {
        let path = self
            .paths
            .organization_policy_aspect(org, policy_type, policy_id, aspect)?;
        self.write_or_delete(&path, value).await
    }

    async fn get_organization_policy_metadata(
        &self,
        org: &str,
        policy_type: &str,
        policy_id: &str,
        aspect: &str,
    ) -> Result<Option<Value>> {
        let path = self
            .paths
            .organization_policy_aspect(org, policy_type, policy_id, aspect)?;
        self.read_json(&path).await
    }

    async fn list_organization_policies(&self, org: &str, policy_type: &str) -> Result<Vec<String>> {
        let dir = self.paths.organization_policies_dir(org, policy_type)?;
        self.backend.list_directory(&dir).await
    }

    async fn sync_organization_policies(
        &self,
        org: &str,
        policy_type: &str,
        current: &[String],
    ) -> Result<usize> {
        let dir = self.paths.organization_policies_dir(org, policy_type)?;
        let mut removed = 0;
        for id in self.backend.list_directory(&dir).await? {
            if current.contains(&id) {
                continue;
            }
            self.backend
                .delete_directory(&format!("{dir}/{id}"))
                .await?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn save_ram_resource(&self, account: &str, arn: &Arn, value: &Value) -> Result<()> {
        let path = self.paths.ram_resource(account, arn)?;
        self.write_or_delete(&path, value).await
    }

    async fn get_ram_resource(&self, account: &str, arn: &Arn) -> Result<Option<Value>> {
        let path = self.paths.ram_resource(account, arn)?;
        self.read_json(&path).await
    }

    async fn sync_ram_resources(&self, account: &str, region: &str, current: &[Arn]) -> Result<usize> {
        let dir = self.paths.ram_dir(account, region)?;
        let keep: Vec<String> = current
            .iter()
            .map(|arn| format!("{}{JSON_EXT}", encode_id(arn.as_str())))
            .collect();

        let mut removed = 0;
        for file in self.backend.list_directory(&dir).await? {
            if keep.contains(&file) {
                continue;
            }
            self.backend.delete(&format!("{dir}/{file}")).await?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_core::MemoryBackend;
    use serde_json::json;

    fn store() -> (MemoryBackend, PathMetadataStore) {
        let backend = MemoryBackend::new();
        let store = PathMetadataStore::new(Arc::new(backend.clone()), "aws").unwrap();
        (backend, store)
    }

    #[tokio::test]
    async fn empty_values_delete_the_aspect() {
        let (backend, store) = store();
        let arn = Arn::parse("arn:aws:s3:::logs").unwrap();
        store
            .save_resource_metadata("1", &arn, "policy", &json!({"Statement": []}))
            .await
            .unwrap();
        assert_eq!(backend.paths().unwrap().len(), 1);

        store
            .save_resource_metadata("1", &arn, "policy", &Value::Null)
            .await
            .unwrap();
        assert!(backend.paths().unwrap().is_empty());
        assert_eq!(store.get_resource_metadata("1", &arn, "policy").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_resources_decodes_arns() {
        let (_, store) = store();
        let role = Arn::parse("arn:aws:iam::1:role/path/admin").unwrap();
        store
            .save_resource_metadata("1", &role, METADATA_ASPECT, &json!({"name": "admin"}))
            .await
            .unwrap();
        let listed = store
            .list_resources("1", &ResourceTypeParts::service("iam"))
            .await
            .unwrap();
        assert_eq!(listed, vec![role]);
    }

    #[tokio::test]
    async fn ram_sync_keeps_current_shares() {
        let (_, store) = store();
        let a = Arn::parse("arn:aws:ram:us-east-1:1:resource-share/a").unwrap();
        let b = Arn::parse("arn:aws:ram:us-east-1:1:resource-share/b").unwrap();
        store.save_ram_resource("1", &a, &json!({"name": "a"})).await.unwrap();
        store.save_ram_resource("1", &b, &json!({"name": "b"})).await.unwrap();

        let removed = store
            .sync_ram_resources("1", "us-east-1", std::slice::from_ref(&b))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_ram_resource("1", &a).await.unwrap(), None);
        assert!(store.get_ram_resource("1", &b).await.unwrap().is_some());
    }
}
