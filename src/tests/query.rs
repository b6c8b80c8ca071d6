use std::sync::Arc;

use super::fixtures::{adapter, service, write_png, CountingStore, FailingStore};
use crate::index::{QueryEngine, QueryError};
use crate::semantic::l2_norm;
use crate::service::{IndexOptions, ServiceError};
use crate::store::{path_metadata, MemoryStore, StoreError};

/// 30 entries at strictly increasing distance from the fake text vector.
fn ranked_store(dims: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new("test"));
    for i in 0..30 {
        let mut v = vec![0.0; dims];
        v[0] = 1.0;
        v[2] = i as f32 * 0.1;
        store
            .insert_raw(&format!("id-{i}"), v, Some(path_metadata(&format!("/img/{i}.png"))))
            .unwrap();
    }
    store
}

#[test]
fn test_offset_slices_full_ranking() {
    let store = ranked_store(8);
    let engine = QueryEngine::new(adapter(8), store);

    let full = engine.search("cat", 30, 0).unwrap();
    let page = engine.search("cat", 10, 5).unwrap();

    assert_eq!(full.len(), 30);
    assert_eq!(page.hits, full.hits[5..15].to_vec());
    assert_eq!(page.hits[0].id, "id-5");
    assert_eq!(page.hits[9].id, "id-14");
}

#[test]
fn test_matching_dimension_queries_store() {
    let store = Arc::new(CountingStore::new());
    let mut v = vec![0.0; 512];
    v[0] = 1.0;
    store.inner.insert_raw("a", v, Some(path_metadata("/a.png"))).unwrap();

    let result = QueryEngine::new(adapter(512), store.clone())
        .search("cat", 5, 0)
        .unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(store.query_count(), 1);
}

#[test]
fn test_dimension_guard_skips_store_query() {
    let store = Arc::new(CountingStore::new());
    let mut v = vec![0.0; 512];
    v[0] = 1.0;
    store.inner.insert_raw("a", v, Some(path_metadata("/a.png"))).unwrap();

    let result = QueryEngine::new(adapter(256), store.clone()).search("cat", 5, 0);

    assert!(matches!(
        result,
        Err(QueryError::DimensionMismatch {
            expected: 512,
            got: 256
        })
    ));
    assert_eq!(store.query_count(), 0);
}

#[test]
fn test_store_query_failure_surfaces() {
    let store = Arc::new(FailingStore::new(None, true));
    let mut v = vec![0.0; 8];
    v[0] = 1.0;
    store.inner.insert_raw("a", v, Some(path_metadata("/a.png"))).unwrap();

    let result = QueryEngine::new(adapter(8), store).search("cat", 5, 0);

    assert!(matches!(
        result,
        Err(QueryError::Store(StoreError::Status { status: 503, .. }))
    ));
}

#[test]
fn test_configured_dimension_guard() {
    let store = Arc::new(CountingStore::new());
    let result = QueryEngine::new(adapter(256), store.clone())
        .with_dimension(Some(512))
        .search("cat", 5, 0);

    assert!(matches!(result, Err(QueryError::DimensionMismatch { .. })));
    assert_eq!(store.query_count(), 0);
}

#[test]
fn test_empty_collection_is_empty_result() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(dir.path(), Arc::new(MemoryStore::new("test")), 8);

    let result = svc.search("anything", 24, 0).unwrap();
    assert!(result.is_empty());
    assert_eq!(serde_json::to_string(&result).unwrap(), "[]");
}

#[test]
fn test_blank_query_is_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(dir.path(), Arc::new(MemoryStore::new("test")), 8);

    assert!(matches!(
        svc.search("  ", 24, 0),
        Err(ServiceError::Query(QueryError::InvalidInput(_)))
    ));
}

#[test]
fn test_stored_and_query_vectors_are_unit_length() {
    let dir = tempfile::tempdir().unwrap();
    write_png(dir.path(), "a.png", 10, [200, 10, 10]);
    write_png(dir.path(), "b.png", 50, [10, 200, 10]);

    let store = Arc::new(MemoryStore::new("test"));
    let svc = service(dir.path(), store.clone(), 8);
    svc.index(IndexOptions::default()).unwrap();

    let snapshot = crate::index::StoreSnapshot::read(store.as_ref()).unwrap();
    for embedding in &snapshot.embeddings {
        assert!((l2_norm(embedding) - 1.0).abs() < 1e-5);
    }

    let query = adapter(8).embed_query("a red square").unwrap();
    assert!((l2_norm(&query) - 1.0).abs() < 1e-5);
}

#[test]
fn test_indexed_hits_are_valid() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_png(dir.path(), "a.png", 10, [200, 10, 10]);

    let store = Arc::new(MemoryStore::new("test"));
    let svc = service(dir.path(), store, 8);
    svc.index(IndexOptions::default()).unwrap();

    let hits = svc.search("red", 5, 0).unwrap().hits;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path.as_deref(), Some(a.as_str()));
    assert!(hits[0].valid);

    std::fs::remove_file(&a).unwrap();
    assert!(!svc.search("red", 5, 0).unwrap().hits[0].valid);
}
