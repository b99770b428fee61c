
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use super::{BlobBackend, BlobContent, DocumentBackend, ResourceHandle};
use crate::document::{Contents, Filter, NewDocument, StoredDocument, filter::matches_all};
use crate::{GatewayError, Result};

type Collection = BTreeMap<String, Contents>;

/// Process-local document store.
///
/// Documents within a collection are returned in tag order.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryDocumentStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents held in `collection`
    #[inline]
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl DocumentBackend for MemoryDocumentStore {
    #[inline]
    fn name(&self) -> &'static str {
        "memory"
    }

    #[inline]
    async fn lookup(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(key))
            .map(|contents| StoredDocument {
                tag: key.to_string(),
                contents: contents.clone(),
            }))
    }

    #[inline]
    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredDocument>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(docs
            .iter()
            .filter(|(_, contents)| matches_all(filters, contents))
            .map(|(tag, contents)| StoredDocument {
                tag: tag.clone(),
                contents: contents.clone(),
            })
            .collect())
    }

    #[inline]
    async fn exists(&self, collection: &str, key: &str) -> Result<bool> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .is_some_and(|docs| docs.contains_key(key)))
    }

    #[inline]
    async fn commit(&self, collection: &str, documents: Vec<NewDocument>) -> Result<()> {
        let mut collections = self.collections.write().await;

        // Check everything before touching the map so a conflict leaves it untouched
        let existing = collections.get(collection);
        let mut seen = HashSet::with_capacity(documents.len());
        for doc in &documents {
            if existing.is_some_and(|docs| docs.contains_key(&doc.tag)) {
                return Err(GatewayError::TagAlreadyExists {
                    collection: collection.to_string(),
                    tag: doc.tag.clone(),
                });
            }
            if !seen.insert(doc.tag.as_str()) {
                return Err(GatewayError::DuplicateTag {
                    tag: doc.tag.clone(),
                });
            }
        }

        let count = documents.len();
        let docs = collections.entry(collection.to_string()).or_default();
        for doc in documents {
            docs.insert(doc.tag, doc.contents);
        }

        debug!("Committed {} documents to memory collection {}", count, collection);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredBlob {
    content_type: Option<String>,
    data: Vec<u8>,
}

/// Process-local blob store keyed by the exact URL string
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert for setting up a store before sharing it
    #[inline]
    #[must_use]
    pub fn with_blob(
        mut self,
        url: impl Into<String>,
        data: impl Into<Vec<u8>>,
        content_type: Option<&str>,
    ) -> Self {
        self.blobs.get_mut().insert(
            url.into(),
            StoredBlob {
                content_type: content_type.map(str::to_string),
                data: data.into(),
            },
        );
        self
    }

    #[inline]
    pub async fn insert(
        &self,
        url: impl Into<String>,
        data: impl Into<Vec<u8>>,
        content_type: Option<&str>,
    ) {
        self.blobs.write().await.insert(
            url.into(),
            StoredBlob {
                content_type: content_type.map(str::to_string),
                data: data.into(),
            },
        );
    }

    #[inline]
    pub async fn remove(&self, url: &str) -> bool {
        self.blobs.write().await.remove(url).is_some()
    }
}

#[async_trait]
impl BlobBackend for MemoryBlobStore {
    #[inline]
    fn name(&self) -> &'static str {
        "memory"
    }

    #[inline]
    async fn resolve(&self, url: &str) -> Result<ResourceHandle> {
        let location = Url::parse(url).map_err(|e| GatewayError::ResourceResolutionFailed {
            url: url.to_string(),
            reason: format!("malformed URL: {}", e),
        })?;

        if !self.blobs.read().await.contains_key(url) {
            return Err(GatewayError::ResourceResolutionFailed {
                url: url.to_string(),
                reason: "no blob stored at this URL".to_string(),
            });
        }

        Ok(ResourceHandle {
            source: url.to_string(),
            location,
        })
    }

    #[inline]
    async fn fetch(&self, handle: &ResourceHandle) -> Result<BlobContent> {
        let blobs = self.blobs.read().await;
        let blob = blobs
            .get(&handle.source)
            .ok_or_else(|| GatewayError::ResourceResolutionFailed {
                url: handle.source.clone(),
                reason: "blob was removed after resolution".to_string(),
            })?;

        Ok(BlobContent {
            location: handle.location.clone(),
            content_type: blob.content_type.clone(),
            data: blob.data.clone(),
        })
    }
}
