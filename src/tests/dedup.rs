use std::cell::Cell;
use std::sync::Arc;

use super::fixtures::service;
use crate::index::{DedupKey, SweepOutcome};
use crate::store::{path_metadata, MemoryStore, VectorStore};

fn store_with_duplicates() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new("test"));
    let entries = [
        ("1", Some("/downloads/cat.jpg")),
        ("2", Some("/downloads/dog.jpg")),
        ("3", Some("/archive/cat.jpg")),
        ("4", None),
        ("5", Some("/downloads/dog.jpg")),
        ("6", Some("/old/cat.jpg")),
    ];
    for (i, (id, path)) in entries.iter().enumerate() {
        store
            .insert_raw(id, vec![1.0, i as f32], path.map(path_metadata))
            .unwrap();
    }
    store
}

#[test]
fn test_sweep_converges() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_duplicates();
    let svc = service(dir.path(), store.clone(), 2);

    let plan = svc.plan_dedup(None).unwrap();
    assert_eq!(plan.removed, vec!["3", "6", "5"]);

    let outcome = svc.apply_dedup(&plan, |_| true).unwrap();
    assert_eq!(
        outcome,
        SweepOutcome::Removed {
            removed: 3,
            remaining: 3
        }
    );

    let ids = store.get(&Default::default()).unwrap().ids;
    assert_eq!(ids, vec!["1", "2", "4"]);
    assert!(svc.plan_dedup(None).unwrap().is_empty());
}

#[test]
fn test_declined_sweep_keeps_entries() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_duplicates();
    let svc = service(dir.path(), store.clone(), 2);

    let plan = svc.plan_dedup(None).unwrap();
    let outcome = svc.apply_dedup(&plan, |_| false).unwrap();

    assert_eq!(outcome, SweepOutcome::Cancelled);
    assert_eq!(store.count().unwrap(), 6);
}

#[test]
fn test_empty_plan_never_asks() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service(dir.path(), Arc::new(MemoryStore::new("test")), 2);

    let asked = Cell::new(false);
    let plan = svc.plan_dedup(None).unwrap();
    let outcome = svc
        .apply_dedup(&plan, |_| {
            asked.set(true);
            true
        })
        .unwrap();

    assert_eq!(outcome, SweepOutcome::NothingToDo);
    assert!(!asked.get());
}

#[test]
fn test_full_path_key_only_removes_exact_repeats() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_duplicates();
    let svc = service(dir.path(), store.clone(), 2);

    let plan = svc.plan_dedup(Some(DedupKey::FullPath)).unwrap();
    assert_eq!(plan.removed, vec!["5"]);
}
