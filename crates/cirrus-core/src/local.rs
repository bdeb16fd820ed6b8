//! Local filesystem storage backend.
//!
//! Logical paths map to files under a root directory. Writes go to a
//! temporary sibling and are renamed into place, so readers never observe a
//! partially written blob.
//!
//! Compare-and-swap holds an exclusive advisory lock (`fs2`) on a per-path
//! lock file for the read-compare-rename sequence. The lock is honoured
//! across threads and processes sharing the same root. Lock files live under
//! `{root}/.locks/` and are hidden from listings.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use fs2::FileExt;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::fingerprint::{lock_matches, Fingerprint};
use crate::storage::{normalize, StorageBackend};

const LOCK_DIR: &str = ".locks";

/// Storage backend rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    /// Creates a backend rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let normalized = normalize(path);
        let relative = Path::new(&normalized);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::InvalidInput(format!(
                "path traversal not allowed: {path}"
            )));
        }
        Ok(self.root.join(relative))
    }

    fn lock_file_for(&self, path: &str) -> PathBuf {
        let name = format!("{}.lock", Fingerprint::of(normalize(path).as_bytes()).to_hex());
        self.root.join(LOCK_DIR).join(name)
    }
}

fn io_error(op: &str, path: &str, err: std::io::Error) -> Error {
    Error::storage_with_source(format!("{op} {path}"), err)
}

fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.{}.tmp", Ulid::new()))
}

/// Writes `data` to a temporary sibling of `target` and renames it into place.
fn write_atomic_blocking(target: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp = temp_sibling(target);
    std::fs::write(&temp, data)?;
    std::fs::rename(&temp, target).inspect_err(|_| {
        let _ = std::fs::remove_file(&temp);
    })
}

fn cas_blocking(
    target: &Path,
    lock_path: &Path,
    data: &[u8],
    expected: Option<&Fingerprint>,
) -> std::io::Result<bool> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(lock_path)?;
    lock.lock_exclusive()?;

    let outcome = (|| {
        let current = match std::fs::read(target) {
            Ok(bytes) => Some(Fingerprint::of(&bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        if !lock_matches(current.as_ref(), expected) {
            return Ok(false);
        }
        write_atomic_blocking(target, data)?;
        Ok(true)
    })();

    // Dropping the handle also releases the lock; unlock explicitly so the
    // next waiter proceeds before the close completes.
    let _ = FileExt::unlock(&lock);
    outcome
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let target = self.resolve(path)?;
        tokio::task::spawn_blocking(move || write_atomic_blocking(&target, &data))
            .await
            .map_err(|e| Error::Internal {
                message: format!("write task failed: {e}"),
            })?
            .map_err(|e| io_error("write", path, e))
    }

    async fn write_with_optimistic_lock(
        &self,
        path: &str,
        data: Bytes,
        expected: Option<&Fingerprint>,
    ) -> Result<bool> {
        let target = self.resolve(path)?;
        let lock_path = self.lock_file_for(path);
        let expected = expected.copied();
        tokio::task::spawn_blocking(move || {
            cas_blocking(&target, &lock_path, &data, expected.as_ref())
        })
        .await
        .map_err(|e| Error::Internal {
            message: format!("locked write task failed: {e}"),
        })?
        .map_err(|e| io_error("locked write", path, e))
    }

    async fn read(&self, path: &str) -> Result<Option<Bytes>> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read", path, e)),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("delete", path, e)),
        }
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        if target == self.root {
            return Err(Error::InvalidInput(
                "refusing to delete the storage root".into(),
            ));
        }
        match tokio::fs::remove_dir_all(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("delete directory", path, e)),
        }
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        let target = self.resolve(path)?;
        let mut entries = match tokio::fs::read_dir(&target).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("list", path, e)),
        };

        let mut children = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("list", path, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                children.push(name);
            }
        }
        children.sort();
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_creates_intermediate_directories() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(dir.path());
        backend
            .write("aws/accounts/1/metadata.json", Bytes::from("{}"))
            .await
            .unwrap();
        assert!(dir.path().join("aws/accounts/1/metadata.json").exists());
        assert_eq!(backend.list_directory("aws/accounts").await.unwrap(), vec!["1"]);
    }

    #[tokio::test]
    async fn lock_files_are_hidden_from_listings() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(dir.path());
        assert!(backend
            .write_with_optimistic_lock("indexes/a.json", Bytes::from("1"), None)
            .await
            .unwrap());
        assert_eq!(backend.list_directory("").await.unwrap(), vec!["indexes"]);
        assert_eq!(backend.list_directory("indexes").await.unwrap(), vec!["a.json"]);
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(dir.path());
        assert!(backend.read("../etc/passwd").await.is_err());
        assert!(backend.delete_directory("").await.is_err());
    }
}
