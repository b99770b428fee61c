//! Document store gateway
//!
//! A stateless layer over one document backend and one blob backend. It
//! validates writes before anything is persisted, hands every accepted
//! batch to the backend as a single atomic commit, and joins documents to
//! the blobs their URL fields point at.

#[cfg(test)]
mod tests;

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::{
    BlobBackend, DocumentBackend, HttpBlobStore, MemoryDocumentStore, SqliteDocumentStore,
};
use crate::config::{Config, DocumentBackendKind};
use crate::document::{Contents, Filter, MultimediaRecord, NewDocument, WriteBatch};
use crate::{GatewayError, Result};

/// Outcome of a successful write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReceipt {
    pub collection: String,
    pub tags: Vec<String>,
}

/// Where a document's URL field leads, decided before any blob call
#[derive(Debug)]
enum MediaLocation<'a> {
    /// Field missing, null or blank: sparse data, skip the document
    Absent,
    Url(&'a str),
    /// Field present but not a string
    Malformed(&'a Value),
}

impl<'a> MediaLocation<'a> {
    fn of(contents: &'a Contents, url_field: &str) -> Self {
        match contents.get(url_field) {
            None | Some(Value::Null) => MediaLocation::Absent,
            Some(Value::String(url)) if url.trim().is_empty() => MediaLocation::Absent,
            Some(Value::String(url)) => MediaLocation::Url(url.as_str()),
            Some(other) => MediaLocation::Malformed(other),
        }
    }
}

#[derive(Clone)]
pub struct DocumentStoreGateway {
    documents: Arc<dyn DocumentBackend>,
    blobs: Arc<dyn BlobBackend>,
}

impl std::fmt::Debug for DocumentStoreGateway {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStoreGateway")
            .field("documents", &self.documents.name())
            .field("blobs", &self.blobs.name())
            .finish()
    }
}

impl DocumentStoreGateway {
    /// Wrap two backend handles. Nothing is checked here; a broken backend
    /// shows up on first use.
    #[inline]
    pub fn new(documents: Arc<dyn DocumentBackend>, blobs: Arc<dyn BlobBackend>) -> Self {
        Self { documents, blobs }
    }

    /// Build the backends named in `config`
    pub async fn from_config(config: &Config) -> Result<Self> {
        let documents: Arc<dyn DocumentBackend> = match config.documents.backend {
            DocumentBackendKind::Sqlite => {
                let path = config.database_path();
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                Arc::new(
                    SqliteDocumentStore::open(
                        &path,
                        config.documents.max_connections,
                        Duration::from_secs(config.documents.acquire_timeout_seconds),
                    )
                    .await?,
                )
            }
            DocumentBackendKind::Memory => Arc::new(MemoryDocumentStore::new()),
        };
        let blobs: Arc<dyn BlobBackend> = Arc::new(HttpBlobStore::new(&config.blobs)?);

        debug!(
            "Gateway configured with {} documents and {} blobs",
            documents.name(),
            blobs.name()
        );
        Ok(Self::new(documents, blobs))
    }

    /// Read document contents from `collection`.
    ///
    /// With an `identifier` this is a point lookup and `filters` are
    /// ignored; a missing document yields an empty vec. Without one, every
    /// document matching all filters is returned, in backend order.
    pub async fn read(
        &self,
        collection: &str,
        identifier: Option<&str>,
        filters: &[Filter],
    ) -> Result<Vec<Contents>> {
        validate_collection(collection)?;

        if let Some(identifier) = identifier.filter(|id| !id.is_empty()) {
            debug!("Point lookup {}/{}", collection, identifier);
            let found = self.documents.lookup(collection, identifier).await?;
            return Ok(found.map(|doc| doc.contents).into_iter().collect());
        }

        let documents = self.documents.query(collection, filters).await?;
        debug!(
            "Query on {} with {} filters returned {} documents",
            collection,
            filters.len(),
            documents.len()
        );
        Ok(documents.into_iter().map(|doc| doc.contents).collect())
    }

    /// Create one or more new documents as a single all-or-nothing unit.
    ///
    /// Checks run in order, cheapest first, and nothing is persisted unless
    /// all pass: document shape, in-batch tag uniqueness, then tag
    /// existence in the backend. The backend commit re-checks existence
    /// itself, so a tag created concurrently after the pre-check still
    /// fails the whole batch with `TagAlreadyExists`.
    pub async fn write(
        &self,
        collection: &str,
        documents: impl Into<WriteBatch> + Send,
    ) -> Result<WriteReceipt> {
        validate_collection(collection)?;

        let batch = documents.into();
        if batch.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "write requires at least one document".to_string(),
            ));
        }

        validate_shapes(batch.documents())?;
        reject_duplicate_tags(batch.documents())?;

        for doc in batch.documents() {
            if self.documents.exists(collection, &doc.tag).await? {
                warn!("Rejecting write: {}/{} already exists", collection, doc.tag);
                return Err(GatewayError::TagAlreadyExists {
                    collection: collection.to_string(),
                    tag: doc.tag.clone(),
                });
            }
        }

        let tags: Vec<String> = batch.documents().iter().map(|d| d.tag.clone()).collect();
        self.documents
            .commit(collection, batch.into_documents())
            .await?;

        info!("Wrote {} documents to {}", tags.len(), collection);
        Ok(WriteReceipt {
            collection: collection.to_string(),
            tags,
        })
    }

    /// Fetch the blobs referenced by `url_field` for the selected documents.
    ///
    /// Documents whose field is missing, null or blank are skipped. A field
    /// that is present but cannot be resolved or fetched fails the whole
    /// call.
    pub async fn read_multimedia(
        &self,
        collection: &str,
        identifier: Option<&str>,
        url_field: &str,
    ) -> Result<Vec<MultimediaRecord>> {
        let documents = self.read(collection, identifier, &[]).await?;
        let mut records = Vec::new();

        for metadata in documents {
            let url = match MediaLocation::of(&metadata, url_field) {
                MediaLocation::Absent => {
                    debug!("Document in {} has no {}, skipping", collection, url_field);
                    continue;
                }
                MediaLocation::Malformed(value) => {
                    return Err(GatewayError::ResourceResolutionFailed {
                        url: value.to_string(),
                        reason: format!("field '{}' does not hold a URL string", url_field),
                    });
                }
                MediaLocation::Url(url) => url,
            };

            let handle = self.blobs.resolve(url).await?;
            let content = self.blobs.fetch(&handle).await?;
            debug!("Fetched {} bytes for {}", content.len(), url);

            records.push(MultimediaRecord { metadata, content });
        }

        Ok(records)
    }
}

fn validate_collection(collection: &str) -> Result<()> {
    if collection.trim().is_empty() {
        return Err(GatewayError::InvalidRequest(
            "collection name cannot be empty".to_string(),
        ));
    }
    if collection.contains('/') {
        return Err(GatewayError::InvalidRequest(format!(
            "collection name cannot contain '/': {}",
            collection
        )));
    }
    Ok(())
}

fn validate_shapes(documents: &[NewDocument]) -> Result<()> {
    for (index, doc) in documents.iter().enumerate() {
        if doc.tag.trim().is_empty() {
            return Err(GatewayError::InvalidDocument {
                index,
                reason: "document has no tag".to_string(),
            });
        }
        if doc.contents.is_empty() {
            return Err(GatewayError::InvalidDocument {
                index,
                reason: format!("document '{}' has no contents", doc.tag),
            });
        }
    }
    Ok(())
}

fn reject_duplicate_tags(documents: &[NewDocument]) -> Result<()> {
    let mut seen = HashSet::with_capacity(documents.len());
    for doc in documents {
        if !seen.insert(doc.tag.as_str()) {
            return Err(GatewayError::DuplicateTag {
                tag: doc.tag.clone(),
            });
        }
    }
    Ok(())
}
