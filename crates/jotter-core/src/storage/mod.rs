//! Remote object store abstraction and backends.

mod memory;
mod r2;

use async_trait::async_trait;

use crate::Result;

pub use memory::MemoryObjectStore;
pub use r2::{R2Config, R2Storage};

/// Bytes to publish in the remote store.
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    pub bytes: &'a [u8],
    /// Destination folder, e.g. `notes/pdfs`.
    pub folder: &'a str,
    /// Client-supplied file name; only used to derive a readable object name.
    pub file_name: &'a str,
    pub content_type: Option<&'a str>,
}

/// A freshly published object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub url: String,
    pub object_id: String,
}

/// Result of a delete call. An object that is already gone is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Third-party hosted storage for attachment binaries.
#[async_trait]
pub trait RemoteObjectStore: Send + Sync {
    /// Publish bytes and return the public URL plus store identifier.
    async fn upload(&self, request: UploadRequest<'_>) -> Result<StoredObject>;

    /// Delete an object by store identifier.
    async fn delete(&self, object_id: &str) -> Result<DeleteOutcome>;
}
