//! # cirrus-store
//!
//! Metadata persistence for Cirrus collection runs.
//!
//! - [`MetadataStore`]: typed facade over accounts, resources, organizations,
//!   RAM shares and global indexes
//! - [`PathMetadataStore`]: the facade over any path-addressed storage backend
//! - [`SqliteMetadataStore`] and [`merge_databases`]: single-file stores that
//!   can be produced independently and consolidated
//! - [`sync_data`]: reconciles a collection run against stored state
//! - [`update_index`]: compare-and-swap maintenance of cross-account indexes
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cirrus_core::{MemoryBackend, ResourceTypeParts};
//! use cirrus_store::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> cirrus_core::Result<()> {
//! let store = PathMetadataStore::new(Arc::new(MemoryBackend::new()), "aws")?;
//! let record = DataRecord::try_from(json!({
//!     "arn": "arn:aws:s3:::audit-logs",
//!     "metadata": {"name": "audit-logs", "region": "us-east-1"},
//! }))?;
//!
//! let scope = ResourceTypeParts::service("s3");
//! let report = sync_data(&[record], &store, "123456789012", &scope, false).await?;
//! assert_eq!(report.written, 1);
//! assert_eq!(store.list_resources("123456789012", &scope).await?.len(), 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod context;
pub mod index;
pub mod indexers;
pub mod merge;
pub mod metadata;
pub mod path_store;
pub mod sqlite;
pub mod sync;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{open_store, BackendConfig, StoreConfig};
    pub use crate::context::StoreContext;
    pub use crate::index::{index_jobs, update_index, IndexUpdateOutcome, Indexer, RetryPolicy};
    pub use crate::merge::{merge_databases, MergeReport};
    pub use crate::metadata::{IndexSnapshot, MetadataStore};
    pub use crate::path_store::PathMetadataStore;
    pub use crate::sqlite::SqliteMetadataStore;
    pub use crate::sync::{sync_data, DataRecord, SyncReport};
}

pub use config::{open_store, BackendConfig, StoreConfig};
pub use context::StoreContext;
pub use index::{index_jobs, update_index, IndexUpdateOutcome, Indexer, RetryPolicy};
pub use merge::{merge_databases, MergeReport};
pub use metadata::{IndexSnapshot, MetadataStore};
pub use path_store::PathMetadataStore;
pub use sqlite::SqliteMetadataStore;
pub use sync::{sync_data, DataRecord, SyncReport};
