//! Persistence adapter contract and the in-memory reference backend.
//!
//! Every backend stores opaque bytes at `/`-separated paths and offers one
//! compare-and-swap primitive, [`StorageBackend::write_with_optimistic_lock`],
//! keyed by the SHA-256 [`Fingerprint`] of the stored content.
//!
//! Contract shared by all backends:
//! - Missing paths read as `None` and list as empty; they are never errors
//! - Deletes are idempotent
//! - `Err` means the backend itself failed (I/O, permissions, network)
//! - Names starting with `.` are reserved for backend bookkeeping and are
//!   never returned by [`StorageBackend::list_directory`]

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::fingerprint::{lock_matches, Fingerprint};
use crate::paths::join;

/// Bytes read together with their fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedBytes {
    /// Stored content.
    pub data: Bytes,
    /// Fingerprint of `data`, usable as a lock token.
    pub fingerprint: Fingerprint,
}

impl VersionedBytes {
    /// Wraps `data`, computing its fingerprint.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        let fingerprint = Fingerprint::of(&data);
        Self { data, fingerprint }
    }
}

/// One element of a [`StorageBackend::find_with_pattern`] pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Matches exactly this segment.
    Literal(String),
    /// Matches any single segment.
    Wildcard,
}

impl Segment {
    /// Creates a literal segment.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// Parses `*` as a wildcard and anything else as a literal.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == "*" {
            Self::Wildcard
        } else {
            Self::literal(value)
        }
    }
}

impl From<&str> for Segment {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

/// Byte-level storage primitive shared by every path-backed store.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Creates or overwrites the object at `path`.
    async fn write(&self, path: &str, data: Bytes) -> Result<()>;

    /// Writes only if the stored content still matches `expected`.
    ///
    /// `expected = None` means the caller believes nothing is stored yet.
    /// Returns `Ok(false)` without writing when the stored fingerprint (or
    /// absence) differs; only one of several racing writers holding the same
    /// token can succeed.
    async fn write_with_optimistic_lock(
        &self,
        path: &str,
        data: Bytes,
        expected: Option<&Fingerprint>,
    ) -> Result<bool>;

    /// Reads the object at `path`.
    async fn read(&self, path: &str) -> Result<Option<Bytes>>;

    /// Reads the object at `path` together with its lock token.
    async fn read_with_fingerprint(&self, path: &str) -> Result<Option<VersionedBytes>> {
        Ok(self.read(path).await?.map(VersionedBytes::new))
    }

    /// Deletes the object at `path` if present.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Deletes every object strictly under the directory `path`.
    async fn delete_directory(&self, path: &str) -> Result<()>;

    /// Lists the immediate children (files and directories) of `path`, sorted.
    async fn list_directory(&self, path: &str) -> Result<Vec<String>>;

    /// Returns every directory `base/s1/.../sn` matching `pattern`.
    async fn expand_pattern(&self, base: &str, pattern: &[Segment]) -> Result<Vec<String>> {
        let mut frontier = vec![base.trim_matches('/').to_string()];
        for segment in pattern {
            let mut next = Vec::new();
            for dir in &frontier {
                match segment {
                    Segment::Literal(name) => next.push(join([dir.as_str(), name.as_str()])),
                    Segment::Wildcard => {
                        for child in self.list_directory(dir).await? {
                            next.push(join([dir.as_str(), child.as_str()]));
                        }
                    }
                }
            }
            if next.is_empty() {
                return Ok(next);
            }
            frontier = next;
        }
        Ok(frontier)
    }

    /// Reads `filename` from every directory matching `pattern` under `base`.
    ///
    /// Directories without the file are skipped.
    async fn find_with_pattern(
        &self,
        base: &str,
        pattern: &[Segment],
        filename: &str,
    ) -> Result<Vec<Bytes>> {
        let mut found = Vec::new();
        for dir in self.expand_pattern(base, pattern).await? {
            if let Some(data) = self.read(&join([dir.as_str(), filename])).await? {
                found.push(data);
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl<T: StorageBackend + ?Sized> StorageBackend for Arc<T> {
    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        (**self).write(path, data).await
    }

    async fn write_with_optimistic_lock(
        &self,
        path: &str,
        data: Bytes,
        expected: Option<&Fingerprint>,
    ) -> Result<bool> {
        (**self).write_with_optimistic_lock(path, data, expected).await
    }

    async fn read(&self, path: &str) -> Result<Option<Bytes>> {
        (**self).read(path).await
    }

    async fn read_with_fingerprint(&self, path: &str) -> Result<Option<VersionedBytes>> {
        (**self).read_with_fingerprint(path).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        (**self).delete_directory(path).await
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        (**self).list_directory(path).await
    }

    async fn expand_pattern(&self, base: &str, pattern: &[Segment]) -> Result<Vec<String>> {
        (**self).expand_pattern(base, pattern).await
    }

    async fn find_with_pattern(
        &self,
        base: &str,
        pattern: &[Segment],
        filename: &str,
    ) -> Result<Vec<Bytes>> {
        (**self).find_with_pattern(base, pattern, filename).await
    }
}

/// Normalizes a path to the canonical `a/b/c` form.
#[must_use]
pub fn normalize(path: &str) -> String {
    join(path.split('/'))
}

/// Returns the directory prefix (with trailing `/`) for children of `path`.
#[must_use]
pub fn dir_prefix(path: &str) -> String {
    let path = normalize(path);
    if path.is_empty() {
        path
    } else {
        format!("{path}/")
    }
}

/// In-memory storage backend.
///
/// Thread-safe via `RwLock`; the compare-and-swap check and the write happen
/// under one write guard. Used by tests and as the reference semantics for
/// the other backends.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored path, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn paths(&self) -> Result<Vec<String>> {
        Ok(self.objects.read().map_err(|_| poisoned())?.keys().cloned().collect())
    }
}

fn poisoned() -> Error {
    Error::Internal {
        message: "lock poisoned".into(),
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| poisoned())?
            .insert(normalize(path), data);
        Ok(())
    }

    async fn write_with_optimistic_lock(
        &self,
        path: &str,
        data: Bytes,
        expected: Option<&Fingerprint>,
    ) -> Result<bool> {
        let path = normalize(path);
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        let current = objects.get(&path).map(|bytes| Fingerprint::of(bytes.as_ref()));
        if !lock_matches(current.as_ref(), expected) {
            return Ok(false);
        }
        objects.insert(path, data);
        Ok(true)
    }

    async fn read(&self, path: &str) -> Result<Option<Bytes>> {
        Ok(self
            .objects
            .read()
            .map_err(|_| poisoned())?
            .get(&normalize(path))
            .cloned())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| poisoned())?
            .remove(&normalize(path));
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        let prefix = dir_prefix(path);
        self.objects
            .write()
            .map_err(|_| poisoned())?
            .retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        let prefix = dir_prefix(path);
        let objects = self.objects.read().map_err(|_| poisoned())?;
        let mut children: Vec<String> = objects
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| key[prefix.len()..].split('/').next())
            .filter(|name| !name.is_empty() && !name.starts_with('.'))
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
    async fn memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        backend
            .write("aws/accounts/1/metadata.json", Bytes::from("{}"))
            .await
            .unwrap();
        assert_eq!(
            backend.read("aws/accounts/1/metadata.json").await.unwrap(),
            Some(Bytes::from("{}"))
        );
        assert_eq!(backend.read("aws/accounts/2/metadata.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cas_requires_current_fingerprint() {
        let backend = MemoryBackend::new();
        assert!(backend
            .write_with_optimistic_lock("idx.json", Bytes::from("v1"), None)
            .await
            .unwrap());

        // Absent sentinel fails once the object exists.
        assert!(!backend
            .write_with_optimistic_lock("idx.json", Bytes::from("v2"), None)
            .await
            .unwrap());

        let current = backend.read_with_fingerprint("idx.json").await.unwrap().unwrap();
        assert!(backend
            .write_with_optimistic_lock("idx.json", Bytes::from("v2"), Some(&current.fingerprint))
            .await
            .unwrap());

        // The token is now stale.
        assert!(!backend
            .write_with_optimistic_lock("idx.json", Bytes::from("v3"), Some(&current.fingerprint))
            .await
            .unwrap());
        assert_eq!(backend.read("idx.json").await.unwrap(), Some(Bytes::from("v2")));
    }

    #[tokio::test]
    async fn list_directory_is_one_level_and_hides_reserved_names() {
        let backend = MemoryBackend::new();
        for path in ["a/b/1.json", "a/b/2.json", "a/c/d/3.json", "a/.lock", "ab/x.json"] {
            backend.write(path, Bytes::from("x")).await.unwrap();
        }
        assert_eq!(backend.list_directory("a").await.unwrap(), vec!["b", "c"]);
        assert_eq!(backend.list_directory("a/b/").await.unwrap(), vec!["1.json", "2.json"]);
        assert!(backend.list_directory("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_directory_is_prefix_scoped() {
        let backend = MemoryBackend::new();
        for path in ["s/us-east-1/a.json", "s/us-east-1/b/c.json", "s/us-east-10/a.json"] {
            backend.write(path, Bytes::from("x")).await.unwrap();
        }
        backend.delete_directory("s/us-east-1").await.unwrap();
        assert_eq!(backend.paths().unwrap(), vec!["s/us-east-10/a.json"]);
        backend.delete_directory("nothing/here").await.unwrap();
        backend.delete("nothing.json").await.unwrap();
    }

    #[tokio::test]
    async fn find_with_pattern_matches_single_segments() {
        let backend = MemoryBackend::new();
        for path in [
            "root/svc/anything/region/meta.json",
            "root/svc/other/region/meta.json",
            "root/svc/x/y/region/meta.json",
            "root/svc/anything/elsewhere/meta.json",
            "root/nope/anything/region/meta.json",
        ] {
            backend.write(path, Bytes::from(path.to_string())).await.unwrap();
        }
        let pattern: Vec<Segment> = ["svc", "*", "region"].into_iter().map(Segment::from).collect();
        let found = backend
            .find_with_pattern("root", &pattern, "meta.json")
            .await
            .unwrap();
        assert_eq!(
            found,
            vec![
                Bytes::from("root/svc/anything/region/meta.json"),
                Bytes::from("root/svc/other/region/meta.json"),
            ]
        );
    }
}
