// Backend module
// Contracts consumed by the gateway, plus the stores shipped with the crate

pub mod http;
pub mod memory;
pub mod sqlite;

pub use http::HttpBlobStore;
pub use memory::{MemoryBlobStore, MemoryDocumentStore};
pub use sqlite::SqliteDocumentStore;

use async_trait::async_trait;
use url::Url;

use crate::Result;
use crate::document::{Filter, NewDocument, StoredDocument};

/// A collection-oriented document store.
///
/// Collections come into existence on first commit; a lookup or query
/// against an unknown collection simply finds nothing.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Short name used in logs and `BackendUnavailable` errors
    fn name(&self) -> &'static str;

    async fn lookup(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>>;

    /// Every document in `collection` matching all `filters`, in the order
    /// given. An empty slice selects the whole collection.
    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredDocument>>;

    async fn exists(&self, collection: &str, key: &str) -> Result<bool>;

    /// Create every document in one all-or-nothing unit.
    ///
    /// Implementations must treat this as a conditional create: if any tag
    /// already exists when the commit runs, nothing is persisted and
    /// `GatewayError::TagAlreadyExists` is returned.
    async fn commit(&self, collection: &str, documents: Vec<NewDocument>) -> Result<()>;
}

/// A location a blob backend has agreed it can fetch from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    /// The URL exactly as it was stored in the document
    pub source: String,
    pub location: Url,
}

/// Payload fetched from a blob backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobContent {
    pub location: Url,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl BlobContent {
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Content storage addressed by URL
#[async_trait]
pub trait BlobBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Turn a stored URL into something `fetch` can download. Malformed or
    /// unsupported URLs fail with `GatewayError::ResourceResolutionFailed`.
    async fn resolve(&self, url: &str) -> Result<ResourceHandle>;

    async fn fetch(&self, handle: &ResourceHandle) -> Result<BlobContent>;
}
