//! Object storage backend built on the `object_store` crate.
//!
//! Compare-and-swap uses the store's conditional puts: the current object is
//! fetched, its content fingerprint compared with the caller's token, and the
//! replacement written with `PutMode::Update` on the ETag/version observed in
//! that same read (or `PutMode::Create` when absent). A writer that loses the
//! race gets a precondition failure from the store and reports `false`.
//!
//! ## Supported stores
//!
//! - S3 via [`ObjectStoreBackend::s3`] (requires conditional put support,
//!   configured as `S3ConditionalPut::ETagMatch`)
//! - Any other `ObjectStore` via [`ObjectStoreBackend::new`], e.g. `InMemory`

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion};

use crate::error::{Error, Result};
use crate::fingerprint::{lock_matches, Fingerprint};
use crate::paths::join;
use crate::storage::{normalize, StorageBackend, VersionedBytes};

/// Storage backend over an `object_store::ObjectStore`, with an optional key prefix.
#[derive(Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("store", &self.store.to_string())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ObjectStoreBackend {
    /// Wraps an existing store. Every key is written under `prefix`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl AsRef<str>) -> Self {
        Self {
            store,
            prefix: normalize(prefix.as_ref()),
        }
    }

    /// Creates a backend for an S3 bucket.
    ///
    /// Credentials are resolved from the environment by `object_store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be configured.
    pub fn s3(bucket: &str, region: &str, prefix: Option<&str>) -> Result<Self> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(region)
            .with_conditional_put(S3ConditionalPut::ETagMatch)
            .build()
            .map_err(|e| Error::storage_with_source(format!("configure S3 bucket {bucket}"), e))?;
        Ok(Self::new(Arc::new(store), prefix.unwrap_or_default()))
    }

    /// Creates a backend over an in-process `InMemory` object store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "")
    }

    fn location(&self, path: &str) -> Result<ObjectPath> {
        let key = join([self.prefix.as_str(), normalize(path).as_str()]);
        ObjectPath::parse(&key).map_err(|e| Error::InvalidInput(format!("invalid key {key}: {e}")))
    }

    async fn get_versioned(
        &self,
        location: &ObjectPath,
    ) -> Result<Option<(VersionedBytes, UpdateVersion)>> {
        let result = match self.store.get(location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(Error::storage_with_source(format!("get {location}"), e)),
        };
        let version = UpdateVersion {
            e_tag: result.meta.e_tag.clone(),
            version: result.meta.version.clone(),
        };
        let data = result
            .bytes()
            .await
            .map_err(|e| Error::storage_with_source(format!("read body {location}"), e))?;
        Ok(Some((VersionedBytes::new(data), version)))
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let location = self.location(path)?;
        self.store
            .put(&location, PutPayload::from(data))
            .await
            .map_err(|e| Error::storage_with_source(format!("put {location}"), e))?;
        Ok(())
    }

    async fn write_with_optimistic_lock(
        &self,
        path: &str,
        data: Bytes,
        expected: Option<&Fingerprint>,
    ) -> Result<bool> {
        let location = self.location(path)?;
        let current = self.get_versioned(&location).await?;

        let mode = match current {
            Some((stored, version)) => {
                if !lock_matches(Some(&stored.fingerprint), expected) {
                    return Ok(false);
                }
                PutMode::Update(version)
            }
            None => {
                if !lock_matches(None, expected) {
                    return Ok(false);
                }
                PutMode::Create
            }
        };

        match self
            .store
            .put_opts(&location, PutPayload::from(data), PutOptions::from(mode))
            .await
        {
            Ok(_) => Ok(true),
            Err(
                object_store::Error::Precondition { .. } | object_store::Error::AlreadyExists { .. },
            ) => Ok(false),
            Err(e) => Err(Error::storage_with_source(
                format!("conditional put {location}"),
                e,
            )),
        }
    }

    async fn read(&self, path: &str) -> Result<Option<Bytes>> {
        let location = self.location(path)?;
        Ok(self.get_versioned(&location).await?.map(|(v, _)| v.data))
    }

    async fn read_with_fingerprint(&self, path: &str) -> Result<Option<VersionedBytes>> {
        let location = self.location(path)?;
        Ok(self.get_versioned(&location).await?.map(|(v, _)| v))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let location = self.location(path)?;
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Error::storage_with_source(format!("delete {location}"), e)),
        }
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        let location = self.location(path)?;
        if location.as_ref().is_empty() {
            return Err(Error::InvalidInput(
                "refusing to delete the storage root".into(),
            ));
        }
        let objects: Vec<_> = self
            .store
            .list(Some(&location))
            .try_collect()
            .await
            .map_err(|e| Error::storage_with_source(format!("list {location}"), e))?;

        for meta in objects {
            match self.store.delete(&meta.location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => {
                    return Err(Error::storage_with_source(
                        format!("delete {}", meta.location),
                        e,
                    ))
                }
            }
        }
        Ok(())
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        let location = self.location(path)?;
        let prefix = if location.as_ref().is_empty() {
            None
        } else {
            Some(&location)
        };
        let listing = self
            .store
            .list_with_delimiter(prefix)
            .await
            .map_err(|e| Error::storage_with_source(format!("list {location}"), e))?;

        let mut children: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(ObjectPath::filename)
            .chain(listing.objects.iter().filter_map(|m| m.location.filename()))
            .filter(|name| !name.starts_with('.'))
            .map(str::to_string)
            .collect();
        children.sort();
        children.dedup();
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prefix_is_applied_to_every_key() {
        let inner = Arc::new(InMemory::new());
        let backend = ObjectStoreBackend::new(inner.clone(), "collect/run-1");
        backend
            .write("aws/indexes/a.json", Bytes::from("{}"))
            .await
            .unwrap();

        let raw = inner
            .get(&ObjectPath::parse("collect/run-1/aws/indexes/a.json").unwrap())
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(raw, Bytes::from("{}"));
    }

    #[tokio::test]
    async fn create_mode_loses_to_existing_object() {
        let backend = ObjectStoreBackend::in_memory();
        assert!(backend
            .write_with_optimistic_lock("i.json", Bytes::from("a"), None)
            .await
            .unwrap());
        assert!(!backend
            .write_with_optimistic_lock("i.json", Bytes::from("b"), None)
            .await
            .unwrap());
    }
}
