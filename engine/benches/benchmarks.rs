//! Performance benchmarks for tidepool-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use tidepool_engine::{
    sync, CollectionSchema, CollectionSnapshot, Database, FieldDef, FieldType, InMemoryRemote,
    LiveQuery, ManualClock, Order, Schema, SyncEngine, SyncEntity, Todo, WireDocument,
};

fn create_test_schema() -> Schema {
    let fields = vec![
        FieldDef::required("name", FieldType::String),
        FieldDef::optional("email", FieldType::String),
        FieldDef::optional("age", FieldType::Int),
    ];
    Schema::new(1).with_collection(CollectionSchema::new("users", fields))
}

fn populated(size: usize) -> Database {
    let db = Database::builder()
        .schema(create_test_schema())
        .clock(ManualClock::new(1_000))
        .with_entity::<Todo>()
        .open()
        .unwrap();
    for i in 0..size {
        db.insert("users", json!({"name": format!("User {i}"), "age": i}))
            .unwrap();
    }
    db
}

fn bench_store_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_operations");

    group.bench_function("insert", |b| {
        let db = populated(0);
        b.iter(|| db.insert("users", black_box(json!({"name": "Test User"}))))
    });

    group.bench_function("get_document", |b| {
        let db = populated(1000);
        let id = db.query("users").take(500).unwrap().pop().unwrap().id;
        b.iter(|| db.get(black_box(&id)))
    });

    group.bench_function("patch", |b| {
        let db = populated(1000);
        let id = db.query("users").first().unwrap().unwrap().id;
        let mut age = 0;
        b.iter(|| {
            age += 1;
            db.patch(&id, black_box(json!({ "age": age })))
        })
    });

    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("queries");

    for size in [100, 1000, 10_000].iter() {
        let db = populated(*size);

        group.bench_with_input(BenchmarkId::new("collect", size), size, |b, _| {
            b.iter(|| db.query(black_box("users")).collect())
        });

        group.bench_with_input(BenchmarkId::new("desc_take_10", size), size, |b, _| {
            b.iter(|| {
                db.query("users")
                    .order(Order::Descending)
                    .and_then(|q| q.take(black_box(10)))
            })
        });

        group.bench_with_input(BenchmarkId::new("filter_first", size), size, |b, _| {
            b.iter(|| {
                db.query("users")
                    .filter(|doc| doc.get("age").and_then(Value::as_u64) == Some(50))
                    .and_then(|q| q.first())
            })
        });
    }

    group.finish();
}

fn bench_reactivity(c: &mut Criterion) {
    let mut group = c.benchmark_group("reactivity");

    for live in [1, 10, 50].iter() {
        group.bench_with_input(
            BenchmarkId::new("insert_with_live_queries", live),
            live,
            |b, &live| {
                let db = populated(100);
                let count = LiveQuery::new("count", |reader, args| {
                    let min = args["min"].as_u64().unwrap_or(0);
                    let docs = reader
                        .query("users")
                        .filter(move |doc| {
                            doc.get("age").and_then(Value::as_u64).unwrap_or(0) >= min
                        })?
                        .collect()?;
                    Ok(json!(docs.len()))
                });
                let subs: Vec<_> = (0..live)
                    .map(|min| db.subscribe(&count, json!({ "min": min }), || {}).unwrap())
                    .collect();

                b.iter(|| db.insert("users", black_box(json!({"name": "Live", "age": 1}))));
                drop(subs);
            },
        );
    }

    group.finish();
}

fn bench_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync");

    group.bench_function("todo_merge", |b| {
        let mut local = Todo::new("milk", 10);
        local.tombstone(12);
        let mut remote = Todo::new("milk", 10);
        remote.set_completed(true, 20);
        b.iter(|| Todo::merge(black_box(&local), black_box(&remote)))
    });

    for size in [10, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("apply_snapshot", size), size, |b, &size| {
            let snapshot: Vec<WireDocument<Todo>> = (0..size)
                .map(|i| {
                    let mut todo = Todo::new(format!("todo {i}"), i as u64);
                    todo.set_completed(i % 2 == 0, 100 + i as u64);
                    WireDocument::new(format!("client:{i}"), i as u64, todo)
                })
                .collect();

            b.iter(|| {
                let db = populated(0);
                let engine = SyncEngine::new(&db, InMemoryRemote::<Todo>::new());
                // Half the snapshot already exists locally and has to merge.
                for wire in snapshot.iter().step_by(2) {
                    db.insert_with_identity(
                        Todo::COLLECTION,
                        &wire.client_id,
                        wire.client_creation_time,
                        json!({
                            "text": wire.entity.text,
                            "completed": false,
                            "completedChangedTime": 0,
                            "synced": false
                        }),
                    )
                    .unwrap();
                }
                engine.apply_snapshot(black_box(snapshot.clone()))
            })
        });

        group.bench_with_input(BenchmarkId::new("collect_unsynced", size), size, |b, &size| {
            let db = populated(0);
            for i in 0..size {
                sync::insert_entity(&db, &Todo::new(format!("todo {i}"), i as u64)).unwrap();
            }
            let engine = SyncEngine::new(&db, InMemoryRemote::<Todo>::new());
            b.iter(|| engine.unsynced())
        });
    }

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    for size in [100, 1000].iter() {
        let db = populated(*size);
        let snapshot = db.export("users");
        let bytes = snapshot.to_bytes().unwrap();

        group.bench_with_input(BenchmarkId::new("export", size), size, |b, _| {
            b.iter(|| db.export(black_box("users")))
        });

        group.bench_with_input(BenchmarkId::new("snapshot_from_bytes", size), size, |b, _| {
            b.iter(|| CollectionSnapshot::from_bytes(black_box(&bytes)))
        });
    }

    group.bench_function("wire_document_to_json", |b| {
        let wire = WireDocument::new("client:1", 1000, Todo::new("Test todo", 1000));
        b.iter(|| serde_json::to_string(black_box(&wire)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_store_operations,
    bench_queries,
    bench_reactivity,
    bench_sync,
    bench_serialization,
);
criterion_main!(benches);
