//! End-to-end scenarios for tidepool-engine
//!
//! Each test drives a full database: mutations, live queries and sync
//! against an in-process remote.

use std::cell::RefCell;
use std::rc::Rc;

use futures::future::{self, Either};
use futures::StreamExt;
use serde_json::{json, Value};
use tidepool_engine::{
    sync, Database, Document, Error, InMemoryRemote, LiveQuery, ManualClock, NumberEntry, Order,
    RemoteStore, SyncEngine, SyncEntity, Todo, WireDocument,
};

fn open() -> Database {
    Database::builder()
        .clock(ManualClock::new(1_000))
        .with_entity::<Todo>()
        .with_entity::<NumberEntry>()
        .open()
        .unwrap()
}

fn number_values(docs: &[Document]) -> Vec<f64> {
    docs.iter()
        .map(|d| d.get("value").and_then(Value::as_f64).unwrap())
        .collect()
}

fn todo(completed: bool, changed: u64, deleted: Option<u64>) -> Todo {
    Todo {
        text: "water plants".into(),
        completed,
        completed_changed_time: changed,
        deleted_time: deleted,
    }
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn recent_first_then_reversed_to_chronological() {
    let db = open();
    for value in [1.0, 2.0, 3.0] {
        sync::insert_entity(&db, &NumberEntry { value }).unwrap();
    }

    let recent = db
        .query("numbers")
        .order(Order::Descending)
        .unwrap()
        .take(2)
        .unwrap();
    assert_eq!(number_values(&recent), vec![3.0, 2.0]);

    let mut chronological = recent;
    chronological.reverse();
    assert_eq!(number_values(&chronological), vec![2.0, 3.0]);
}

#[test]
fn unique_on_filtered_attribute() {
    let db = open();
    for text in ["milk", "eggs", "milk"] {
        sync::insert_entity(&db, &Todo::new(text, 1)).unwrap();
    }
    let by_text = |text: &'static str| {
        db.query("todos")
            .filter(move |doc| doc.get("text") == Some(&json!(text)))
            .unwrap()
            .unique()
    };

    assert_eq!(
        by_text("milk").unwrap_err(),
        Error::MultipleResults("todos".into())
    );
    assert_eq!(by_text("bread").unwrap(), None);
    let eggs = by_text("eggs").unwrap().unwrap();
    assert_eq!(eggs.get("text"), Some(&json!("eggs")));
}

// ============================================================================
// Merge
// ============================================================================

#[test]
fn newer_remote_completion_wins() {
    let merged = Todo::merge(&todo(false, 10, None), &todo(true, 20, None));
    assert!(merged.completed);
    assert_eq!(merged.completed_changed_time, 20);
}

#[test]
fn tombstone_older_than_resolved_change_is_cleared() {
    let merged = Todo::merge(&todo(false, 20, None), &todo(false, 15, Some(18)));
    assert_eq!(merged.completed_changed_time, 20);
    assert_eq!(merged.deleted_time, None);
}

// ============================================================================
// Sync
// ============================================================================

#[tokio::test]
async fn push_then_acknowledge_marks_synced() {
    let db = open();
    let id = sync::insert_entity(&db, &Todo::new("milk", 5)).unwrap();
    let before = db.get(&id).unwrap().unwrap();
    assert!(!before.is_synced());

    let remote = InMemoryRemote::<Todo>::new();
    let engine = SyncEngine::new(&db, remote.clone());
    let report = engine.push().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.acknowledged, 1);

    let after = db.get(&id).unwrap().unwrap();
    assert!(after.is_synced());
    let mut expected = before.fields.clone();
    expected.insert("synced".into(), json!(true));
    assert_eq!(after.fields, expected);
    assert_eq!(after.creation_time, before.creation_time);

    let row = remote.row(&id).unwrap();
    assert_eq!(row.entity, Todo::new("milk", 5));
}

#[tokio::test]
async fn local_winner_is_pushed_back() {
    let db = open();
    let remote = InMemoryRemote::<Todo>::new();
    let engine = SyncEngine::new(&db, remote.clone());

    // Remote knows the todo as open at t=10.
    remote
        .add(vec![WireDocument::new("client:shared", 1, todo(false, 10, None))])
        .await
        .unwrap();
    engine.pull(10).await.unwrap();
    assert!(db.get("client:shared").unwrap().unwrap().is_synced());

    // Local completes it at t=30 while offline.
    sync::update_entity(&db, "client:shared", &todo(true, 30, None)).unwrap();

    // Remote snapshot still has the older state: local fields win and the
    // document stays unsynced.
    let report = engine.pull(10).await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(engine.unsynced().unwrap().len(), 1);

    let pushed = engine.push().await.unwrap();
    assert_eq!(pushed.remote.merged, 1);
    assert_eq!(remote.row("client:shared").unwrap().entity, todo(true, 30, None));

    // The next snapshot matches local exactly.
    let report = engine.pull(10).await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert!(engine.unsynced().unwrap().is_empty());
}

#[tokio::test]
async fn remote_winner_marks_synced() {
    let db = open();
    let id = sync::insert_entity(&db, &todo(false, 10, None)).unwrap();
    let remote = InMemoryRemote::<Todo>::new();
    let engine = SyncEngine::new(&db, remote.clone());

    let report = engine
        .apply_snapshot(vec![WireDocument::new(id.clone(), 1_000, todo(true, 20, None))])
        .unwrap();
    assert_eq!(report.merged, 1);

    let local = sync::load_all::<Todo>(&db).unwrap().pop().unwrap();
    assert_eq!(local.entity, todo(true, 20, None));
    assert!(local.synced);
}

#[tokio::test]
async fn retries_are_safe() {
    let db = open();
    sync::insert_entity(&db, &Todo::new("milk", 5)).unwrap();
    let remote = InMemoryRemote::<Todo>::new();
    let engine = SyncEngine::new(&db, remote.clone());

    remote.fail_next_add("connection reset");
    assert!(matches!(engine.push().await, Err(Error::Remote(_))));
    assert_eq!(engine.unsynced().unwrap().len(), 1);

    let batch = engine.unsynced().unwrap();
    remote.add(batch.clone()).await.unwrap();
    let outcome = remote.add(batch).await.unwrap();
    assert_eq!(outcome.unchanged, 1);
    assert_eq!(remote.len(), 1);
}

#[tokio::test]
async fn follow_applies_every_snapshot() {
    let db = open();
    let remote = InMemoryRemote::<Todo>::new();
    let writer = remote.clone();
    let engine = SyncEngine::new(&db, remote);

    let follow = Box::pin(engine.follow(50));
    let produce = Box::pin(async {
        for (id, text) in [("client:a", "a"), ("client:b", "b")] {
            writer
                .add(vec![WireDocument::new(id, 1, Todo::new(text, 1))])
                .await
                .unwrap();
            tokio::task::yield_now().await;
        }
    });

    // The engine keeps a remote handle, so the stream never ends on its own.
    match future::select(follow, produce).await {
        Either::Left((result, _)) => panic!("follow ended early: {result:?}"),
        Either::Right(((), _)) => {}
    }
    assert_eq!(db.store().len("todos"), 2);
    assert!(engine.unsynced().unwrap().is_empty());
}

#[tokio::test]
async fn watch_stream_starts_with_current_state() {
    let remote = InMemoryRemote::<NumberEntry>::new();
    remote
        .add(vec![WireDocument::new("client:n", 1, NumberEntry { value: 9.0 })])
        .await
        .unwrap();
    let mut stream = remote.watch(10);
    let first = stream.next().await.unwrap();
    assert_eq!(first.len(), 1);
}

// ============================================================================
// Reactivity
// ============================================================================

#[test]
fn nested_mutation_cascades_are_serialized() {
    let db = open();
    let trace = Rc::new(RefCell::new(Vec::<String>::new()));

    let query_trace = trace.clone();
    let count = LiveQuery::new("count", move |reader, _| {
        let n = reader.query("numbers").collect()?.len();
        query_trace.borrow_mut().push(format!("recompute:{n}"));
        Ok(json!(n))
    });

    let listener_db = db.clone();
    let listener_trace = trace.clone();
    let listener_query = count.clone();
    let _sub = db
        .subscribe(&count, json!({}), move || {
            let n: usize = listener_db
                .retrieve_as(&listener_query, "{}")
                .unwrap()
                .unwrap();
            listener_trace.borrow_mut().push(format!("listener:{n}"));
            if n == 1 {
                sync::insert_entity(&listener_db, &NumberEntry { value: 2.0 }).unwrap();
                listener_trace.borrow_mut().push("nested-returned".into());
            }
        })
        .unwrap();

    sync::insert_entity(&db, &NumberEntry { value: 1.0 }).unwrap();

    assert_eq!(
        *trace.borrow(),
        vec![
            // subscribe: first computation, then the global recompute
            "recompute:0",
            "recompute:0",
            "listener:0",
            // outer insert
            "recompute:1",
            "listener:1",
            "nested-returned",
            // nested insert, only after the outer cascade finished
            "recompute:2",
            "listener:2",
        ]
    );
    db.close();
}

#[test]
fn read_after_write_without_manual_recompute() {
    let db = open();
    let ids = LiveQuery::typed("ids", |reader, _: Value| {
        Ok(reader
            .query("todos")
            .collect()?
            .into_iter()
            .map(|d| d.id)
            .collect::<Vec<_>>())
    });
    let sub = db.subscribe(&ids, json!(null), || {}).unwrap();

    let id = sync::insert_entity(&db, &Todo::new("milk", 1)).unwrap();
    let seen: Vec<String> = db
        .retrieve_as(&ids, sub.serialized_args())
        .unwrap()
        .unwrap();
    assert_eq!(seen, vec![id.clone()]);

    db.delete(&id).unwrap();
    assert_eq!(sub.current().unwrap(), Some(json!([])));
}
