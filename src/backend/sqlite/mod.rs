
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::DocumentBackend;
use crate::document::{Contents, Filter, NewDocument, StoredDocument, filter::matches_all};
use crate::{GatewayError, Result};

const BACKEND_NAME: &str = "sqlite";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT_SECONDS: u64 = 30;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, FromRow)]
struct DocumentRow {
    tag: String,
    contents: String,
}

impl DocumentRow {
    fn into_document(self) -> Result<StoredDocument> {
        let contents: Contents = serde_json::from_str(&self.contents).map_err(|e| {
            GatewayError::Other(anyhow::anyhow!(
                "Stored contents of '{}' are not a JSON object: {}",
                self.tag,
                e
            ))
        })?;
        Ok(StoredDocument {
            tag: self.tag,
            contents,
        })
    }
}

/// Document store backed by a SQLite database file.
///
/// All collections share one `documents` table keyed by `(collection, tag)`;
/// that primary key is what makes `commit` a conditional create.
#[derive(Debug, Clone)]
pub struct SqliteDocumentStore {
    pool: DbPool,
}

impl SqliteDocumentStore {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        Self::open(
            database_path,
            DEFAULT_MAX_CONNECTIONS,
            Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECONDS),
        )
        .await
    }

    pub async fn open<P: AsRef<Path>>(
        database_path: P,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| unavailable("Failed to create database connection pool", &e))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// A private in-memory database, mostly useful for tests
    #[inline]
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| unavailable("Invalid in-memory database options", &e))?;

        // Every connection to :memory: is its own database, so keep exactly one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| unavailable("Failed to open in-memory database", &e))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running document store migrations");

        sqlx::migrate!("src/backend/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| GatewayError::BackendUnavailable {
                backend: BACKEND_NAME,
                message: format!("Failed to run schema migration: {}", e),
            })?;

        debug!("Document store migrations completed successfully");
        Ok(())
    }

    /// Number of documents held in `collection`
    #[inline]
    pub async fn count(&self, collection: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM documents WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| unavailable("Failed to count documents", &e))
    }
}

#[async_trait]
impl DocumentBackend for SqliteDocumentStore {
    #[inline]
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    #[inline]
    async fn lookup(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>> {
        debug!("Looking up {}/{}", collection, key);

        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT tag, contents FROM documents WHERE collection = ? AND tag = ?",
        )
        .bind(collection)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable("Failed to look up document", &e))?;

        row.map(DocumentRow::into_document).transpose()
    }

    #[inline]
    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredDocument>> {
        debug!(
            "Querying collection {} with {} filters",
            collection,
            filters.len()
        );

        let mut rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT tag, contents FROM documents WHERE collection = ? ORDER BY rowid",
        )
        .bind(collection)
        .fetch(&self.pool);

        let mut documents = Vec::new();
        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| unavailable("Failed to query documents", &e))?
        {
            let document = row.into_document()?;
            if matches_all(filters, &document.contents) {
                documents.push(document);
            }
        }

        Ok(documents)
    }

    #[inline]
    async fn exists(&self, collection: &str, key: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM documents WHERE collection = ? AND tag = ?")
                .bind(collection)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| unavailable("Failed to check document existence", &e))?;

        Ok(found.is_some())
    }

    async fn commit(&self, collection: &str, documents: Vec<NewDocument>) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| unavailable("Failed to begin transaction", &e))?;

        let now = Utc::now();
        for doc in &documents {
            let contents = serde_json::to_string(&doc.contents)
                .map_err(|e| GatewayError::Other(anyhow::Error::from(e)))?;

            // Plain INSERT: the primary key rejects tags that appeared since validation
            let inserted = sqlx::query(
                "INSERT INTO documents (collection, tag, contents, created_date) VALUES (?, ?, ?, ?)",
            )
            .bind(collection)
            .bind(&doc.tag)
            .bind(contents)
            .bind(now)
            .execute(&mut *tx)
            .await;

            if let Err(err) = inserted {
                if is_unique_violation(&err) {
                    warn!(
                        "Tag {} appeared in {} before commit, rolling back",
                        doc.tag, collection
                    );
                    return Err(GatewayError::TagAlreadyExists {
                        collection: collection.to_string(),
                        tag: doc.tag.clone(),
                    });
                }
                return Err(unavailable("Failed to insert document", &err));
            }
        }

        tx.commit()
            .await
            .map_err(|e| unavailable("Failed to commit transaction", &e))?;

        debug!(
            "Committed {} documents to sqlite collection {}",
            documents.len(),
            collection
        );
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

fn unavailable(context: &str, err: &sqlx::Error) -> GatewayError {
    GatewayError::BackendUnavailable {
        backend: BACKEND_NAME,
        message: format!("{}: {}", context, err),
    }
}
