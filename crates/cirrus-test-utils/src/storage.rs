//! Test storage implementation with operation tracing.
//!
//! Wraps [`MemoryBackend`] and records every call for test assertions.
//! Failures can be injected by path prefix and a fixed latency can be added
//! before every operation to widen race windows.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use cirrus_core::error::{Error, Result};
use cirrus_core::fingerprint::Fingerprint;
use cirrus_core::storage::{MemoryBackend, StorageBackend, VersionedBytes};

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Read operation.
    Read {
        /// Path that was read.
        path: String,
    },
    /// Unconditional write.
    Write {
        /// Path that was written.
        path: String,
        /// Size of data written.
        size: usize,
    },
    /// Compare-and-swap write.
    LockedWrite {
        /// Path that was written.
        path: String,
        /// Token supplied by the caller.
        expected: Option<Fingerprint>,
        /// Whether the write was applied.
        applied: bool,
    },
    /// Delete operation.
    Delete {
        /// Path that was deleted.
        path: String,
    },
    /// Directory delete.
    DeleteDirectory {
        /// Directory that was deleted.
        path: String,
    },
    /// List operation.
    List {
        /// Directory that was listed.
        path: String,
    },
}

/// In-memory storage backend with operation tracing.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryBackend {
    inner: MemoryBackend,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_paths: Arc<Mutex<Vec<String>>>,
    latency: Option<Duration>,
}

impl TracingMemoryBackend {
    /// Creates a new empty tracing storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage with simulated latency.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Returns the wrapped backend.
    #[must_use]
    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns recorded compare-and-swap attempts that were rejected.
    #[must_use]
    pub fn rejected_locked_writes(&self) -> usize {
        self.operations()
            .iter()
            .filter(|op| matches!(op, StorageOp::LockedWrite { applied: false, .. }))
            .count()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Injects a failure for the given path prefix.
    pub fn inject_failure(&self, path: impl Into<String>) {
        self.fail_paths.lock().expect("lock").push(path.into());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_paths.lock().expect("lock").clear();
    }

    /// Returns all stored paths.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.inner.paths().expect("lock")
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check_failure(&self, path: &str) -> Result<()> {
        let fail_paths = self.fail_paths.lock().expect("lock");
        if fail_paths.iter().any(|p| path.starts_with(p.as_str())) {
            return Err(Error::storage(format!("injected failure for path: {path}")));
        }
        Ok(())
    }

    async fn maybe_delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for TracingMemoryBackend {
    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Write {
            path: path.to_string(),
            size: data.len(),
        });
        self.inner.write(path, data).await
    }

    async fn write_with_optimistic_lock(
        &self,
        path: &str,
        data: Bytes,
        expected: Option<&Fingerprint>,
    ) -> Result<bool> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        let applied = self
            .inner
            .write_with_optimistic_lock(path, data, expected)
            .await?;
        self.record(StorageOp::LockedWrite {
            path: path.to_string(),
            expected: expected.copied(),
            applied,
        });
        Ok(applied)
    }

    async fn read(&self, path: &str) -> Result<Option<Bytes>> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Read {
            path: path.to_string(),
        });
        self.inner.read(path).await
    }

    async fn read_with_fingerprint(&self, path: &str) -> Result<Option<VersionedBytes>> {
        Ok(self.read(path).await?.map(VersionedBytes::new))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Delete {
            path: path.to_string(),
        });
        self.inner.delete(path).await
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::DeleteDirectory {
            path: path.to_string(),
        });
        self.inner.delete_directory(path).await
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::List {
            path: path.to_string(),
        });
        self.inner.list_directory(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_operations_and_injects_failures() {
        let backend = TracingMemoryBackend::new();
        backend.write("aws/a.json", Bytes::from("1")).await.unwrap();
        assert!(!backend
            .write_with_optimistic_lock("aws/a.json", Bytes::from("2"), None)
            .await
            .unwrap());
        assert_eq!(backend.rejected_locked_writes(), 1);

        backend.inject_failure("aws/accounts/2");
        assert!(backend.read("aws/accounts/2/metadata.json").await.is_err());
        assert!(backend.read("aws/accounts/1/metadata.json").await.is_ok());

        backend.clear_failures();
        backend.clear_operations();
        assert!(backend.operations().is_empty());
    }
}
