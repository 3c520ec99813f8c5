//! Pod: the content-addressed blob store every other layer is built on.
//!
//! Credential handling for remote backends (picking up AWS keys, SSO
//! profiles, etc.) is out of scope beyond what `aws-config`'s default
//! provider chain already does for free.

mod cache;
mod fs;
mod memory;
pub(crate) mod retry;
mod s3;
mod uri;

pub use cache::CachePod;
pub use fs::FilesystemPod;
pub use memory::MemoryPod;
pub use s3::S3Pod;
pub use uri::PodUri;

use std::sync::Arc;

use anyhow::Result;

/// A content-addressed key/value store. Every method is synchronous and
/// blocking; `S3Pod` is the only backend that bridges to an async
/// client, and it does so behind its own internally-owned runtime so the
/// trait stays object-safe.
pub trait Pod: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;

    /// List keys with `prefix`, without descending into anything that
    /// looks like a nested namespace (used for the changelog's single
    /// `heads()` scan: a flat list of revision keys sharing a branch
    /// prefix).
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Recursively list every key under `prefix`, used by GC and by
    /// push/pull to enumerate an entire collection's blobs.
    fn walk(&self, prefix: &str) -> Result<Vec<String>>;

    /// Like `get`, but turns a missing key into an error instead of
    /// `Ok(None)`. Most callers already know the key must exist (they
    /// just read it from a manifest or commit) and want the error path.
    fn get_required(&self, key: &str) -> Result<Vec<u8>> {
        self.get(key)?
            .ok_or_else(|| crate::error::LakotaError::PodNotFound(key.to_string()).into())
    }

    /// Last-modified time for `key`, when the backend can report one
    /// cheaply. `gc`'s safety horizon uses this to avoid deleting a blob
    /// a concurrent writer just created but hasn't referenced yet; `None`
    /// means the backend can't tell and `gc` skips the horizon check.
    fn mtime(&self, _key: &str) -> Result<Option<std::time::SystemTime>> {
        Ok(None)
    }
}

pub type PodRef = Arc<dyn Pod>;
