use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid document at position {index}: {reason}")]
    InvalidDocument { index: usize, reason: String },

    #[error("Duplicate document tag '{tag}' in batch")]
    DuplicateTag { tag: String },

    #[error("Document '{tag}' already exists in collection '{collection}'")]
    TagAlreadyExists { collection: String, tag: String },

    #[error("{backend} backend unavailable: {message}")]
    BackendUnavailable {
        backend: &'static str,
        message: String,
    },

    #[error("Could not resolve resource {url}: {reason}")]
    ResourceResolutionFailed { url: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<config::ConfigError> for GatewayError {
    #[inline]
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub mod backend;
pub mod commands;
pub mod config;
pub mod document;
pub mod gateway;

pub use backend::{BlobBackend, BlobContent, DocumentBackend, ResourceHandle};
pub use document::{Contents, Filter, FilterOp, MultimediaRecord, NewDocument, StoredDocument, WriteBatch};
pub use gateway::{DocumentStoreGateway, WriteReceipt};
