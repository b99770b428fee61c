use super::*;
use crate::backend::{MemoryBlobStore, ResourceHandle};
use crate::document::{FilterOp, StoredDocument};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};

fn doc(tag: &str, contents: Value) -> NewDocument {
    NewDocument::from_value(tag, contents)
}

fn contents(value: Value) -> Contents {
    match value {
        Value::Object(map) => map,
        _ => panic!("test contents must be an object"),
    }
}

fn memory_gateway() -> (Arc<MemoryDocumentStore>, DocumentStoreGateway) {
    let store = Arc::new(MemoryDocumentStore::new());
    let gateway = DocumentStoreGateway::new(store.clone(), Arc::new(MemoryBlobStore::new()));
    (store, gateway)
}

/// Counts calls and can pretend tags are absent or commits fail
#[derive(Default)]
struct InstrumentedStore {
    inner: MemoryDocumentStore,
    exists_calls: AtomicUsize,
    commit_calls: AtomicUsize,
    hide_existing: bool,
    fail_commits: bool,
}

#[async_trait]
impl DocumentBackend for InstrumentedStore {
    fn name(&self) -> &'static str {
        "instrumented"
    }

    async fn lookup(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>> {
        self.inner.lookup(collection, key).await
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredDocument>> {
        self.inner.query(collection, filters).await
    }

    async fn exists(&self, collection: &str, key: &str) -> Result<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if self.hide_existing {
            return Ok(false);
        }
        self.inner.exists(collection, key).await
    }

    async fn commit(&self, collection: &str, documents: Vec<NewDocument>) -> Result<()> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_commits {
            return Err(GatewayError::BackendUnavailable {
                backend: "instrumented",
                message: "connection reset".to_string(),
            });
        }
        self.inner.commit(collection, documents).await
    }
}

fn instrumented_gateway(store: InstrumentedStore) -> (Arc<InstrumentedStore>, DocumentStoreGateway) {
    let store = Arc::new(store);
    let gateway = DocumentStoreGateway::new(store.clone(), Arc::new(MemoryBlobStore::new()));
    (store, gateway)
}

#[tokio::test]
async fn write_then_read_scenario() -> Result<()> {
    let (_store, gateway) = memory_gateway();

    let receipt = gateway
        .write(
            "coll",
            vec![doc("a", json!({"x": 1})), doc("b", json!({"x": 2}))],
        )
        .await?;
    assert_eq!(receipt.tags, ["a", "b"]);

    assert_eq!(
        gateway.read("coll", Some("a"), &[]).await?,
        vec![contents(json!({"x": 1}))]
    );

    let rejected = gateway.write("coll", doc("a", json!({"x": 9}))).await;
    assert!(matches!(
        rejected,
        Err(GatewayError::TagAlreadyExists { ref tag, ref collection }) if tag == "a" && collection == "coll"
    ));

    assert_eq!(
        gateway.read("coll", Some("a"), &[]).await?,
        vec![contents(json!({"x": 1}))]
    );
    Ok(())
}

#[tokio::test]
async fn successful_write_makes_every_document_visible() -> Result<()> {
    let (_store, gateway) = memory_gateway();
    let batch: Vec<_> = (0..5)
        .map(|i| doc(&format!("doc-{}", i), json!({"i": i})))
        .collect();

    gateway.write("items", batch).await?;

    for i in 0..5 {
        let found = gateway.read("items", Some(&format!("doc-{}", i)), &[]).await?;
        assert_eq!(found, vec![contents(json!({"i": i}))]);
    }
    assert_eq!(gateway.read("items", None, &[]).await?.len(), 5);
    Ok(())
}

#[tokio::test]
async fn failed_commit_leaves_nothing_visible() -> Result<()> {
    let (store, gateway) = instrumented_gateway(InstrumentedStore {
        fail_commits: true,
        ..Default::default()
    });

    let result = gateway
        .write("items", vec![doc("a", json!({"x": 1})), doc("b", json!({"x": 2}))])
        .await;

    assert!(matches!(result, Err(GatewayError::BackendUnavailable { .. })));
    assert_eq!(store.commit_calls.load(Ordering::SeqCst), 1);
    assert!(gateway.read("items", None, &[]).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn duplicate_tag_in_batch_is_rejected() -> Result<()> {
    let (store, gateway) = instrumented_gateway(InstrumentedStore::default());

    let result = gateway
        .write(
            "items",
            vec![
                doc("a", json!({"x": 1})),
                doc("b", json!({"x": 2})),
                doc("a", json!({"x": 3})),
            ],
        )
        .await;

    assert!(matches!(
        result,
        Err(GatewayError::DuplicateTag { ref tag }) if tag == "a"
    ));
    assert_eq!(store.exists_calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.commit_calls.load(Ordering::SeqCst), 0);
    assert!(gateway.read("items", None, &[]).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn pre_existing_tag_rejects_whole_batch() -> Result<()> {
    let (store, gateway) = instrumented_gateway(InstrumentedStore::default());
    gateway.write("items", doc("t", json!({"v": "original"}))).await?;

    let result = gateway
        .write("items", vec![doc("fresh", json!({"v": 1})), doc("t", json!({"v": 2}))])
        .await;

    assert!(matches!(
        result,
        Err(GatewayError::TagAlreadyExists { ref tag, .. }) if tag == "t"
    ));
    assert_eq!(store.commit_calls.load(Ordering::SeqCst), 1);
    assert!(gateway.read("items", Some("fresh"), &[]).await?.is_empty());
    assert_eq!(
        gateway.read("items", Some("t"), &[]).await?,
        vec![contents(json!({"v": "original"}))]
    );
    Ok(())
}

#[tokio::test]
async fn commit_rejects_tag_that_appeared_after_precheck() -> Result<()> {
    // hide_existing makes the pre-check miss, as if another writer raced us
    let (store, gateway) = instrumented_gateway(InstrumentedStore {
        hide_existing: true,
        ..Default::default()
    });
    store.inner.commit("items", vec![doc("t", json!({"v": 1}))]).await?;

    let result = gateway
        .write("items", vec![doc("other", json!({"v": 2})), doc("t", json!({"v": 3}))])
        .await;

    assert!(matches!(result, Err(GatewayError::TagAlreadyExists { .. })));
    assert!(gateway.read("items", Some("other"), &[]).await?.is_empty());
    assert_eq!(
        gateway.read("items", Some("t"), &[]).await?,
        vec![contents(json!({"v": 1}))]
    );
    Ok(())
}

#[tokio::test]
async fn shape_errors_come_before_duplicates() {
    let (store, gateway) = instrumented_gateway(InstrumentedStore::default());

    let result = gateway
        .write(
            "items",
            vec![
                doc("a", json!({"x": 1})),
                doc("a", json!({"x": 2})),
                doc("", json!({"x": 3})),
            ],
        )
        .await;
    assert!(matches!(
        result,
        Err(GatewayError::InvalidDocument { index: 2, .. })
    ));

    let result = gateway
        .write("items", vec![doc("a", json!({"x": 1})), doc("b", json!({}))])
        .await;
    assert!(matches!(
        result,
        Err(GatewayError::InvalidDocument { index: 1, .. })
    ));

    assert_eq!(store.exists_calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.commit_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let (_store, gateway) = memory_gateway();

    assert!(matches!(
        gateway.write("items", Vec::<NewDocument>::new()).await,
        Err(GatewayError::InvalidRequest(_))
    ));
    assert!(matches!(
        gateway.write("", doc("a", json!({"x": 1}))).await,
        Err(GatewayError::InvalidRequest(_))
    ));
    assert!(matches!(
        gateway.read("a/b", None, &[]).await,
        Err(GatewayError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn read_miss_is_empty_not_error() -> Result<()> {
    let (_store, gateway) = memory_gateway();
    assert!(gateway.read("never-written", Some("ghost"), &[]).await?.is_empty());

    gateway.write("items", doc("a", json!({"x": 1}))).await?;
    assert!(gateway.read("items", Some("ghost"), &[]).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn identifier_takes_precedence_over_filters() -> Result<()> {
    let (_store, gateway) = memory_gateway();
    gateway
        .write("items", vec![doc("a", json!({"x": 1})), doc("b", json!({"x": 2}))])
        .await?;

    let found = gateway
        .read("items", Some("a"), &[Filter::equals("x", 2)])
        .await?;
    assert_eq!(found, vec![contents(json!({"x": 1}))]);

    // An empty identifier falls back to a query
    let found = gateway
        .read("items", Some(""), &[Filter::equals("x", 2)])
        .await?;
    assert_eq!(found, vec![contents(json!({"x": 2}))]);
    Ok(())
}

#[tokio::test]
async fn filters_are_conjunctive() -> Result<()> {
    let (_store, gateway) = memory_gateway();
    gateway
        .write(
            "items",
            vec![
                doc("both", json!({"f1": "v1", "f2": "v2"})),
                doc("first", json!({"f1": "v1", "f2": "other"})),
                doc("second", json!({"f1": "other", "f2": "v2"})),
                doc("neither", json!({"f3": true})),
            ],
        )
        .await?;

    let found = gateway
        .read(
            "items",
            None,
            &[
                Filter::new("f1", FilterOp::Equal, "v1"),
                Filter::new("f2", FilterOp::Equal, "v2"),
            ],
        )
        .await?;
    assert_eq!(found, vec![contents(json!({"f1": "v1", "f2": "v2"}))]);
    Ok(())
}

async fn media_gateway(blobs: MemoryBlobStore) -> Result<DocumentStoreGateway> {
    let gateway = DocumentStoreGateway::new(Arc::new(MemoryDocumentStore::new()), Arc::new(blobs));
    gateway
        .write(
            "products",
            vec![
                doc("1-no-media", json!({"name": "plain"})),
                doc(
                    "2-good",
                    json!({"name": "lamp", "image": "https://cdn.example.com/lamp.png"}),
                ),
            ],
        )
        .await?;
    Ok(gateway)
}

#[tokio::test]
async fn multimedia_skips_documents_without_url() -> Result<()> {
    let blobs = MemoryBlobStore::new().with_blob(
        "https://cdn.example.com/lamp.png",
        b"lamp-bytes".to_vec(),
        Some("image/png"),
    );
    let gateway = media_gateway(blobs).await?;

    let records = gateway.read_multimedia("products", None, "image").await?;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].metadata.get("name"), Some(&json!("lamp")));
    assert_eq!(
        records[0].metadata.get("image"),
        Some(&json!("https://cdn.example.com/lamp.png"))
    );
    assert_eq!(records[0].content.data, b"lamp-bytes");
    Ok(())
}

#[tokio::test]
async fn multimedia_fails_on_unresolvable_url() -> Result<()> {
    let blobs = MemoryBlobStore::new().with_blob(
        "https://cdn.example.com/lamp.png",
        b"lamp-bytes".to_vec(),
        None,
    );
    let gateway = media_gateway(blobs).await?;
    gateway
        .write(
            "products",
            doc("3-broken", json!({"image": "https://cdn.example.com/revoked.png"})),
        )
        .await?;

    let result = gateway.read_multimedia("products", None, "image").await;
    assert!(matches!(
        result,
        Err(GatewayError::ResourceResolutionFailed { ref url, .. }) if url == "https://cdn.example.com/revoked.png"
    ));
    Ok(())
}

#[tokio::test]
async fn multimedia_blank_and_null_fields_are_absent() -> Result<()> {
    let gateway = DocumentStoreGateway::new(
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(MemoryBlobStore::new()),
    );
    gateway
        .write(
            "products",
            vec![
                doc("blank", json!({"image": "  "})),
                doc("null", json!({"image": null})),
            ],
        )
        .await?;

    assert!(gateway.read_multimedia("products", None, "image").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn multimedia_non_string_field_is_malformed() -> Result<()> {
    let gateway = DocumentStoreGateway::new(
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(MemoryBlobStore::new()),
    );
    gateway
        .write("products", doc("numeric", json!({"image": 42})))
        .await?;

    assert!(matches!(
        gateway.read_multimedia("products", None, "image").await,
        Err(GatewayError::ResourceResolutionFailed { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn multimedia_by_identifier() -> Result<()> {
    let blobs = MemoryBlobStore::new().with_blob(
        "https://cdn.example.com/lamp.png",
        b"lamp-bytes".to_vec(),
        None,
    );
    let gateway = media_gateway(blobs).await?;

    let records = gateway
        .read_multimedia("products", Some("2-good"), "image")
        .await?;
    assert_eq!(records.len(), 1);

    assert!(gateway
        .read_multimedia("products", Some("1-no-media"), "image")
        .await?
        .is_empty());
    assert!(gateway
        .read_multimedia("products", Some("missing"), "image")
        .await?
        .is_empty());
    Ok(())
}

/// Blob backend that must never be reached
struct UnreachableBlobs;

#[async_trait]
impl BlobBackend for UnreachableBlobs {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    async fn resolve(&self, url: &str) -> Result<ResourceHandle> {
        panic!("resolve called for {}", url);
    }

    async fn fetch(&self, handle: &ResourceHandle) -> Result<crate::backend::BlobContent> {
        panic!("fetch called for {}", handle.source);
    }
}

#[tokio::test]
async fn multimedia_without_urls_never_touches_blobs() -> Result<()> {
    let gateway = DocumentStoreGateway::new(
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(UnreachableBlobs),
    );
    gateway
        .write("products", doc("plain", json!({"name": "no media"})))
        .await?;

    assert!(gateway.read_multimedia("products", None, "image").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn null_fields_are_reported_with_their_position() -> Result<()> {
    let (store, gateway) = instrumented_gateway(InstrumentedStore::default());

    let batch: WriteBatch = serde_json::from_value(json!([
        {"tag": "a", "contents": {"x": 1}},
        {"tag": "b", "contents": null}
    ]))
    .map_err(|e| GatewayError::Other(e.into()))?;
    assert!(matches!(
        gateway.write("items", batch).await,
        Err(GatewayError::InvalidDocument { index: 1, .. })
    ));

    let batch: WriteBatch = serde_json::from_value(json!({"tag": null, "contents": {"x": 1}}))
        .map_err(|e| GatewayError::Other(e.into()))?;
    assert!(matches!(
        gateway.write("items", batch).await,
        Err(GatewayError::InvalidDocument { index: 0, .. })
    ));

    assert_eq!(store.commit_calls.load(Ordering::SeqCst), 0);
    assert!(gateway.read("items", None, &[]).await?.is_empty());
    Ok(())
}
