//! Integration tests for record stores.

use keystash::{
    is_guid_shaped, FileNamespace, FileNamespaceConfig, MemoryNamespace, Namespace, Record,
    RecordId, Store,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn record(value: Value) -> Record {
    Record::from_json(value).unwrap()
}

fn test_namespace(dir: &TempDir) -> FileNamespace {
    FileNamespace::open_or_create(FileNamespaceConfig {
        path: dir.path().join("ns"),
        cache_size: 100,
        create_if_missing: true,
    })
    .unwrap()
}

// --- Record lifecycle ---

#[test]
fn test_create_assigns_mirrored_guid() {
    let mut store = Store::open("todos", Arc::new(MemoryNamespace::new())).unwrap();

    for title in ["a", "b", "c"] {
        let created = store.create(record(json!({ "title": title }))).unwrap();
        let id = created.id.clone().unwrap();

        assert!(!id.as_str().is_empty());
        assert!(is_guid_shaped(id.as_str()));
        assert_eq!(created.get("id"), Some(&json!(id.as_str())));
    }
}

#[test]
fn test_create_then_find_round_trip() {
    let mut store = Store::open("todos", Arc::new(MemoryNamespace::new())).unwrap();

    let created = store
        .create(record(json!({"title": "milk", "done": false, "tags": ["shop"]})))
        .unwrap();
    let id = created.id.clone().unwrap();

    let found = store.find(&Record::with_id(id)).unwrap().unwrap();
    assert_eq!(found, created);
}

#[test]
fn test_destroy_then_find_is_none() {
    let mut store = Store::open("todos", Arc::new(MemoryNamespace::new())).unwrap();

    let created = store.create(record(json!({"title": "a"}))).unwrap();
    let id = created.id.clone().unwrap();

    store.destroy(created).unwrap();

    assert!(store.find(&Record::with_id(id.clone())).unwrap().is_none());
    assert!(!store.contains(&id));
}

#[test]
fn test_find_all_follows_index_order() {
    let mut store = Store::open("todos", Arc::new(MemoryNamespace::new())).unwrap();

    for i in 0..5 {
        store
            .create(record(json!({"id": format!("t{}", i), "n": i})))
            .unwrap();
    }
    store.destroy(Record::with_id("t2")).unwrap();

    let all = store.find_all().unwrap();
    assert_eq!(all.len(), store.len());
    for (slot, id) in all.iter().zip(store.ids()) {
        assert_eq!(slot.as_ref().unwrap().id.as_ref(), Some(id));
    }
    let order: Vec<_> = store.ids().iter().map(RecordId::as_str).collect();
    assert_eq!(order, vec!["t0", "t1", "t3", "t4"]);
}

#[test]
fn test_update_indexes_once() {
    let ns = MemoryNamespace::new();
    let mut store = Store::open("todos", Arc::new(ns.clone())).unwrap();

    let todo = record(json!({"id": "u1", "title": "a"}));
    store.update(todo.clone()).unwrap();
    assert_eq!(store.ids(), &[RecordId::from("u1")]);

    let mut changed = todo;
    changed.set("title", json!("b"));
    store.update(changed).unwrap();

    assert_eq!(store.ids(), &[RecordId::from("u1")]);
    assert_eq!(ns.get_item("todos").unwrap().as_deref(), Some("u1"));

    let found = store.find_by_id(&RecordId::from("u1")).unwrap().unwrap();
    assert_eq!(found.get("title"), Some(&json!("b")));
}

#[test]
fn test_fresh_store_sees_earlier_writes() {
    let ns = MemoryNamespace::new();

    let id = {
        let mut store = Store::open("todos", Arc::new(ns.clone())).unwrap();
        store
            .create(record(json!({"title": "a"})))
            .unwrap()
            .id
            .unwrap()
    };

    let store2 = Store::open("todos", Arc::new(ns)).unwrap();
    let all = store2.find_all().unwrap();

    assert_eq!(all.len(), 1);
    let todo = all[0].as_ref().unwrap();
    assert_eq!(todo.get("title"), Some(&json!("a")));
    assert_eq!(todo.id, Some(id));
}

#[test]
fn test_stores_with_different_names_are_separate() {
    let ns: Arc<dyn Namespace> = Arc::new(MemoryNamespace::new());
    let mut todos = Store::open("todos", ns.clone()).unwrap();
    let mut notes = Store::open("notes", ns.clone()).unwrap();

    todos.create(record(json!({"id": "1"}))).unwrap();
    notes.create(record(json!({"id": "1", "body": "x"}))).unwrap();

    assert_eq!(ns.get_item("todos").unwrap().as_deref(), Some("1"));
    assert_eq!(ns.get_item("notes").unwrap().as_deref(), Some("1"));
    assert!(todos.find_by_id(&RecordId::from("1")).unwrap().unwrap().get("body").is_none());
}

#[test]
fn test_persisted_layout() {
    let ns = MemoryNamespace::new();
    let mut store = Store::open("todos", Arc::new(ns.clone())).unwrap();

    store.create(record(json!({"id": "a", "title": "x"}))).unwrap();
    store.create(record(json!({"id": "b"}))).unwrap();

    assert_eq!(ns.get_item("todos").unwrap().as_deref(), Some("a,b"));
    let stored: Value = serde_json::from_str(&ns.get_item("todos-a").unwrap().unwrap()).unwrap();
    assert_eq!(stored, json!({"id": "a", "title": "x"}));
}

#[test]
fn test_two_instances_last_index_write_wins() {
    let ns = MemoryNamespace::new();
    let mut first = Store::open("todos", Arc::new(ns.clone())).unwrap();
    let mut second = Store::open("todos", Arc::new(ns.clone())).unwrap();

    first.create(record(json!({"id": "a"}))).unwrap();
    second.create(record(json!({"id": "b"}))).unwrap();

    // second never saw "a", so its index overwrote it
    assert_eq!(ns.get_item("todos").unwrap().as_deref(), Some("b"));
    assert!(ns.get_item("todos-a").unwrap().is_some());
}

// --- File namespace ---

#[test]
fn test_file_namespace_survives_reopen() {
    let dir = TempDir::new().unwrap();

    let id = {
        let mut store = Store::open("todos", Arc::new(test_namespace(&dir))).unwrap();
        store
            .create(record(json!({"title": "persisted"})))
            .unwrap()
            .id
            .unwrap()
    };

    let store = Store::open("todos", Arc::new(test_namespace(&dir))).unwrap();
    assert_eq!(store.ids(), &[id.clone()]);
    let found = store.find_by_id(&id).unwrap().unwrap();
    assert_eq!(found.get("title"), Some(&json!("persisted")));
}

#[test]
fn test_file_namespace_destroy_removes_entry() {
    let dir = TempDir::new().unwrap();
    let ns = Arc::new(test_namespace(&dir));
    let mut store = Store::open("todos", ns.clone()).unwrap();

    store.create(record(json!({"id": "gone"}))).unwrap();
    store.destroy(Record::with_id("gone")).unwrap();

    let keys = ns.keys().unwrap();
    assert_eq!(keys, vec!["todos".to_string()]);
    assert_eq!(ns.get_item("todos").unwrap().as_deref(), Some(""));
}

#[test]
fn test_file_namespace_accepts_long_ids() {
    let dir = TempDir::new().unwrap();
    let id = "x".repeat(200);

    {
        let mut store = Store::open("todos", Arc::new(test_namespace(&dir))).unwrap();
        store
            .create(record(json!({"id": id.clone(), "title": "long"})))
            .unwrap();
    }

    let store = Store::open("todos", Arc::new(test_namespace(&dir))).unwrap();
    let found = store.find_by_id(&RecordId::from(id.as_str())).unwrap().unwrap();
    assert_eq!(found.get("title"), Some(&json!("long")));
    assert_eq!(store.find_all().unwrap().len(), 1);
}

// --- Properties ---

#[derive(Clone, Debug)]
enum Op {
    Create(u8),
    Update(u8),
    Destroy(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6).prop_map(Op::Create),
        (0u8..6).prop_map(Op::Update),
        (0u8..6).prop_map(Op::Destroy),
    ]
}

proptest! {
    #[test]
    fn prop_index_matches_entries(ops in proptest::collection::vec(op(), 0..40)) {
        let ns = MemoryNamespace::new();
        let mut store = Store::open("p", Arc::new(ns.clone())).unwrap();

        for op in ops {
            match op {
                Op::Create(n) => { store.create(record(json!({"id": format!("r{}", n)}))).unwrap(); }
                Op::Update(n) => { store.update(record(json!({"id": format!("r{}", n)}))).unwrap(); }
                Op::Destroy(n) => { store.destroy(Record::with_id(format!("r{}", n))).unwrap(); }
            }
        }

        // every indexed id has an entry and every entry is indexed
        for id in store.ids() {
            prop_assert!(ns.get_item(&store.record_key(id)).unwrap().is_some());
        }
        for key in ns.keys().unwrap() {
            if let Some(id) = key.strip_prefix("p-") {
                prop_assert!(store.contains(&RecordId::from(id)));
            }
        }

        // a fresh instance loads the same index
        let reopened = Store::open("p", Arc::new(ns.clone())).unwrap();
        prop_assert_eq!(reopened.ids(), store.ids());
        prop_assert_eq!(store.find_all().unwrap().len(), store.len());
    }
}
