//! Store configuration and backend selection.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use cirrus_core::env::env_string;
use cirrus_core::{Error, LocalFsBackend, MemoryBackend, ObjectStoreBackend, Result, StorageBackend};

use crate::metadata::MetadataStore;
use crate::path_store::PathMetadataStore;
use crate::sqlite::SqliteMetadataStore;

/// Default partition.
pub const DEFAULT_PARTITION: &str = "aws";

/// Where metadata is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-process map; contents are lost on exit.
    Memory,
    /// Directory tree on the local filesystem.
    File {
        /// Root directory.
        path: PathBuf,
    },
    /// S3 bucket.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Bucket region.
        region: String,
        /// Key prefix inside the bucket.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    /// SQLite database file.
    Sqlite {
        /// Database path.
        path: PathBuf,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Raw backend settings, as read from the environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendValues<'a> {
    /// `memory`, `file`, `s3` or `sqlite`.
    pub kind: Option<&'a str>,
    /// Path for `file` and `sqlite`.
    pub path: Option<&'a str>,
    /// Bucket for `s3`.
    pub bucket: Option<&'a str>,
    /// Region for `s3`.
    pub region: Option<&'a str>,
    /// Prefix for `s3`.
    pub prefix: Option<&'a str>,
}

impl BackendConfig {
    /// Builds a backend config from raw values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown kind or a missing
    /// required value.
    pub fn from_values(values: BackendValues<'_>) -> Result<Self> {
        let require = |value: Option<&str>, name: &str, kind: &str| {
            value
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidInput(format!("{name} is required for {kind} storage")))
        };

        let kind = values.kind.unwrap_or("memory").to_ascii_lowercase();
        match kind.as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File {
                path: require(values.path, "CIRRUS_STORAGE_PATH", "file")?.into(),
            }),
            "sqlite" => Ok(Self::Sqlite {
                path: require(values.path, "CIRRUS_STORAGE_PATH", "sqlite")?.into(),
            }),
            "s3" => Ok(Self::S3 {
                bucket: require(values.bucket, "CIRRUS_S3_BUCKET", "s3")?,
                region: require(values.region, "CIRRUS_S3_REGION", "s3")?,
                prefix: values.prefix.map(str::to_string),
            }),
            other => Err(Error::InvalidInput(format!(
                "CIRRUS_STORAGE must be one of: memory, file, s3, sqlite (got {other})"
            ))),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Partition all data is written under.
    #[serde(default = "default_partition")]
    pub partition: String,
    /// Persistence backend.
    #[serde(default)]
    pub backend: BackendConfig,
}

fn default_partition() -> String {
    DEFAULT_PARTITION.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            partition: default_partition(),
            backend: BackendConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Loads configuration from environment variables.
    ///
    /// - `CIRRUS_PARTITION` (default `aws`)
    /// - `CIRRUS_STORAGE`: `memory` (default), `file`, `s3` or `sqlite`
    /// - `CIRRUS_STORAGE_PATH`: root directory or database file
    /// - `CIRRUS_S3_BUCKET`, `CIRRUS_S3_REGION`, `CIRRUS_S3_PREFIX`
    ///
    /// # Errors
    ///
    /// Returns an error if the backend settings are incomplete or invalid.
    pub fn from_env() -> Result<Self> {
        let kind = env_string("CIRRUS_STORAGE");
        let path = env_string("CIRRUS_STORAGE_PATH");
        let bucket = env_string("CIRRUS_S3_BUCKET");
        let region = env_string("CIRRUS_S3_REGION");
        let prefix = env_string("CIRRUS_S3_PREFIX");

        Ok(Self {
            partition: env_string("CIRRUS_PARTITION").unwrap_or_else(default_partition),
            backend: BackendConfig::from_values(BackendValues {
                kind: kind.as_deref(),
                path: path.as_deref(),
                bucket: bucket.as_deref(),
                region: region.as_deref(),
                prefix: prefix.as_deref(),
            })?,
        })
    }
}

/// Opens the metadata store described by `config`.
///
/// # Errors
///
/// Returns an error if the partition is invalid or the backend cannot be
/// opened.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn MetadataStore>> {
    let backend: Arc<dyn StorageBackend> = match &config.backend {
        BackendConfig::Memory => Arc::new(MemoryBackend::new()),
        BackendConfig::File { path } => Arc::new(LocalFsBackend::new(path)),
        BackendConfig::S3 {
            bucket,
            region,
            prefix,
        } => Arc::new(ObjectStoreBackend::s3(bucket, region, prefix.as_deref())?),
        BackendConfig::Sqlite { path } => {
            info!(path = %path.display(), partition = %config.partition, "opening sqlite store");
            let store = SqliteMetadataStore::open(path, config.partition.clone()).await?;
            return Ok(Arc::new(store));
        }
    };
    info!(backend = ?config.backend, partition = %config.partition, "opening path store");
    Ok(Arc::new(PathMetadataStore::new(backend, config.partition.clone())?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_memory_backend() -> Result<()> {
        assert_eq!(BackendConfig::from_values(BackendValues::default())?, BackendConfig::Memory);
        assert_eq!(StoreConfig::default().partition, "aws");
        Ok(())
    }

    #[test]
    fn file_and_sqlite_require_path() {
        let err = BackendConfig::from_values(BackendValues {
            kind: Some("file"),
            ..BackendValues::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("CIRRUS_STORAGE_PATH"));

        let config = BackendConfig::from_values(BackendValues {
            kind: Some("SQLite"),
            path: Some("/tmp/cirrus.db"),
            ..BackendValues::default()
        })
        .unwrap();
        assert_eq!(
            config,
            BackendConfig::Sqlite {
                path: PathBuf::from("/tmp/cirrus.db")
            }
        );
    }

    #[test]
    fn s3_requires_bucket_and_region() {
        assert!(BackendConfig::from_values(BackendValues {
            kind: Some("s3"),
            bucket: Some("audit"),
            ..BackendValues::default()
        })
        .is_err());

        let config = BackendConfig::from_values(BackendValues {
            kind: Some("s3"),
            bucket: Some("audit"),
            region: Some("us-east-1"),
            prefix: Some("runs/1"),
            ..BackendValues::default()
        })
        .unwrap();
        assert!(matches!(config, BackendConfig::S3 { prefix: Some(_), .. }));
    }

    #[test]
    fn rejects_unknown_backend() {
        let err = BackendConfig::from_values(BackendValues {
            kind: Some("dynamo"),
            ..BackendValues::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn config_deserializes_tagged_backend() {
        let config: StoreConfig = serde_json::from_str(
            r#"{"partition": "aws-us-gov", "backend": {"type": "file", "path": "/data"}}"#,
        )
        .unwrap();
        assert_eq!(config.partition, "aws-us-gov");
        assert_eq!(
            config.backend,
            BackendConfig::File {
                path: PathBuf::from("/data")
            }
        );
    }

    #[tokio::test]
    async fn open_store_uses_configured_partition() -> Result<()> {
        let store = open_store(&StoreConfig {
            partition: "aws-cn".into(),
            backend: BackendConfig::Memory,
        })
        .await?;
        assert_eq!(store.partition(), "aws-cn");
        Ok(())
    }
}
