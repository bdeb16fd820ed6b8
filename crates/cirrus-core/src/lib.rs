//! # cirrus-core
//!
//! Core storage primitives for Cirrus, a store for cloud security metadata
//! collected concurrently across many accounts, regions and services.
//!
//! This crate provides the foundational types shared by every Cirrus crate:
//!
//! - **Fingerprints**: SHA-256 content digests used as optimistic lock tokens
//! - **Resource identifiers**: ARN parsing and the logical path layout
//! - **Storage**: the [`StorageBackend`](storage::StorageBackend) persistence
//!   adapter with memory, local filesystem and object storage backends
//! - **Error Types**: shared error definitions and result types
//! - **Observability and config helpers**: logging initialisation, span
//!   constructors and environment parsing
//!
//! ## Example
//!
//! ```rust
//! use cirrus_core::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let paths = StorePaths::new("aws")?;
//! let arn = Arn::parse("arn:aws:s3:::my-bucket")?;
//! let path = paths.resource_aspect("111111111111", &arn, "policy")?;
//! assert!(path.starts_with("aws/accounts/111111111111/resources/s3/global/_/"));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod arn;
pub mod env;
pub mod error;
pub mod fingerprint;
pub mod local;
pub mod object;
pub mod observability;
pub mod paths;
pub mod storage;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use cirrus_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::arn::Arn;
    pub use crate::error::{Error, Result};
    pub use crate::fingerprint::Fingerprint;
    pub use crate::local::LocalFsBackend;
    pub use crate::object::ObjectStoreBackend;
    pub use crate::paths::{ResourceTypeParts, StorePaths};
    pub use crate::storage::{MemoryBackend, Segment, StorageBackend, VersionedBytes};
}

pub use arn::Arn;
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use local::LocalFsBackend;
pub use object::ObjectStoreBackend;
pub use paths::{ResourceTypeParts, StorePaths};
pub use storage::{MemoryBackend, Segment, StorageBackend, VersionedBytes};
