//! Edge case tests for tidepool-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use serde_json::json;
use tidepool_engine::{
    ClosedReason, CollectionSchema, Database, Error, FieldDef, FieldType, IndexRange, ManualClock,
    MemoryBackend, Order, QueryPhase, Schema,
};

fn create_test_schema() -> Schema {
    let fields = vec![
        FieldDef::required("name", FieldType::String),
        FieldDef::optional("count", FieldType::Int),
        FieldDef::optional("data", FieldType::Json),
    ];
    Schema::new(1).with_collection(CollectionSchema::new("items", fields))
}

fn open() -> Database {
    Database::builder()
        .schema(create_test_schema())
        .clock(ManualClock::new(1_000))
        .open()
        .unwrap()
}

// ============================================================================
// String Edge Cases
// ============================================================================

#[test]
fn empty_string_fields() {
    let db = open();
    let id = db.insert("items", json!({"name": ""})).unwrap();
    assert_eq!(db.get(&id).unwrap().unwrap().get("name"), Some(&json!("")));
}

#[test]
fn unicode_strings() {
    let db = open();
    let names = [
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Ω≈ç√∫",
        "Hello\nWorld\tTab",
        "Null\0Test",
    ];

    for name in names {
        let id = db.insert("items", json!({ "name": name })).unwrap();
        let doc = db.get(&id).unwrap().unwrap();
        assert_eq!(doc.get("name"), Some(&json!(name)), "Failed for: {name}");
    }
}

#[test]
fn very_long_strings() {
    let db = open();
    let long = "x".repeat(1_000_000);
    let id = db.insert("items", json!({ "name": long })).unwrap();
    let doc = db.get(&id).unwrap().unwrap();
    assert_eq!(doc.get("name").and_then(|v| v.as_str()).map(str::len), Some(1_000_000));
}

// ============================================================================
// Numeric Edge Cases
// ============================================================================

#[test]
fn integer_boundaries() {
    let db = open();
    for count in [i64::MIN, -1, 0, 1, i64::MAX] {
        let id = db.insert("items", json!({"name": "n", "count": count})).unwrap();
        assert_eq!(db.get(&id).unwrap().unwrap().get("count"), Some(&json!(count)));
    }
    let id = db
        .insert("items", json!({"name": "n", "count": u64::MAX}))
        .unwrap();
    assert_eq!(db.get(&id).unwrap().unwrap().get("count"), Some(&json!(u64::MAX)));
}

#[test]
fn float_rejected_for_int_field() {
    let db = open();
    let result = db.insert("items", json!({"name": "n", "count": 1.5}));
    assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    assert!(db.store().is_empty("items"));
}

#[test]
fn clock_saturates_at_max() {
    let db = Database::builder()
        .clock(ManualClock::new(u64::MAX))
        .open()
        .unwrap();
    let a = db.insert("loose", json!({})).unwrap();
    let b = db.insert("loose", json!({})).unwrap();
    assert_eq!(db.get(&a).unwrap().unwrap().creation_time, u64::MAX);
    assert_eq!(db.get(&b).unwrap().unwrap().creation_time, u64::MAX);
}

// ============================================================================
// JSON Edge Cases
// ============================================================================

#[test]
fn deeply_nested_json() {
    let db = open();
    let mut nested = json!({"leaf": true});
    for _ in 0..50 {
        nested = json!({ "child": nested });
    }
    let id = db
        .insert("items", json!({"name": "deep", "data": nested.clone()}))
        .unwrap();
    assert_eq!(db.get(&id).unwrap().unwrap().get("data"), Some(&nested));
}

#[test]
fn json_with_all_types() {
    let db = open();
    let data = json!({
        "null": null,
        "bool": true,
        "int": 42,
        "float": 3.25,
        "string": "text",
        "array": [1, "two", null, {"three": 3}],
        "object": {"nested": [true, false]}
    });
    let id = db
        .insert("items", json!({"name": "all", "data": data.clone()}))
        .unwrap();
    assert_eq!(db.get(&id).unwrap().unwrap().get("data"), Some(&data));
}

#[test]
fn non_object_values_are_rejected() {
    let db = open();
    for value in [json!(null), json!(1), json!("x"), json!([1, 2])] {
        assert!(matches!(
            db.insert("loose", value),
            Err(Error::InvalidDocument(_))
        ));
    }
}

// ============================================================================
// System Field Edge Cases
// ============================================================================

#[test]
fn system_fields_cannot_be_inserted() {
    let db = open();
    for field in ["_id", "_creationTime", "_custom"] {
        let result = db.insert("items", json!({ "name": "n", field: 1 }));
        assert_eq!(result, Err(Error::SystemField(field.to_string())));
    }
}

#[test]
fn patch_with_matching_system_fields_is_accepted() {
    let db = open();
    let id = db.insert("items", json!({"name": "a"})).unwrap();
    let doc = db.get(&id).unwrap().unwrap();

    let patched = db
        .patch(
            &id,
            json!({"_id": id, "_creationTime": doc.creation_time, "name": "b"}),
        )
        .unwrap()
        .unwrap();
    assert_eq!(patched.get("name"), Some(&json!("b")));
    assert_eq!(patched.creation_time, doc.creation_time);

    let result = db.patch(&id, json!({"_creationTime": doc.creation_time + 1}));
    assert!(matches!(result, Err(Error::SystemField(_))));
}

#[test]
fn replace_removes_absent_fields() {
    let db = open();
    let id = db
        .insert("items", json!({"name": "a", "count": 1}))
        .unwrap();
    let replaced = db.replace(&id, json!({"name": "b"})).unwrap().unwrap();
    assert_eq!(replaced.get("count"), None);
    assert_eq!(replaced.id, id);
}

// ============================================================================
// Query Edge Cases
// ============================================================================

#[test]
fn query_on_unknown_collection_is_empty() {
    let db = open();
    assert!(db.query("nothing").collect().unwrap().is_empty());
    assert_eq!(db.query("nothing").first().unwrap(), None);
}

#[test]
fn limit_zero_yields_nothing() {
    let db = open();
    db.insert("items", json!({"name": "a"})).unwrap();
    assert!(db.query("items").take(0).unwrap().is_empty());
}

#[test]
fn limits_apply_in_chain_order() {
    let db = open();
    for count in 0..10 {
        db.insert("items", json!({"name": "n", "count": count})).unwrap();
    }
    let even = |doc: &tidepool_engine::Document| {
        doc.get("count").and_then(|v| v.as_i64()).unwrap_or(1) % 2 == 0
    };

    // limit then filter: first three, of which evens
    let docs = db.query("items").limit(3).unwrap().filter(even).unwrap().collect().unwrap();
    assert_eq!(docs.len(), 2);

    // filter then limit: first three evens
    let docs = db.query("items").filter(even).unwrap().limit(3).unwrap().collect().unwrap();
    assert_eq!(docs.len(), 3);
}

#[test]
fn stage_is_single_use() {
    let db = open();
    let base = db.query("items");
    let _next = base.order(Order::Ascending).unwrap();
    assert_eq!(base.limit(1).unwrap_err(), Error::AlreadyChained);
    assert_eq!(
        base.collect().unwrap_err(),
        Error::QueryClosed(ClosedReason::Chained)
    );
}

#[test]
fn consumed_query_cannot_restart() {
    let db = open();
    db.insert("items", json!({"name": "a"})).unwrap();
    let query = db.query("items");
    assert_eq!(query.collect().unwrap().len(), 1);
    assert_eq!(query.phase(), QueryPhase::Consumed);
    assert_eq!(
        query.collect().unwrap_err(),
        Error::QueryClosed(ClosedReason::Consumed)
    );
}

#[test]
fn order_twice_is_rejected() {
    let db = open();
    let ordered = db.query("items").order(Order::Descending).unwrap();
    assert_eq!(
        ordered.order(Order::Ascending).unwrap_err(),
        Error::OrderAlreadySet
    );
}

#[test]
fn index_after_other_stages_is_rejected() {
    let db = open();
    let limited = db.query("items").limit(1).unwrap();
    let result = limited.with_index("by_name", IndexRange::new().eq("name", "a"));
    assert!(matches!(result, Err(Error::InvalidQuery(_))));
}

#[test]
fn snapshot_isolation_during_iteration() {
    let db = open();
    db.insert("items", json!({"name": "a"})).unwrap();
    let query = db.query("items");
    let mut cursor = query.execute().unwrap();

    db.insert("items", json!({"name": "b"})).unwrap();
    assert!(cursor.advance().unwrap().is_some());
    assert_eq!(cursor.advance().unwrap(), None);
    assert_eq!(db.query("items").collect().unwrap().len(), 2);
}

// ============================================================================
// Persistence Edge Cases
// ============================================================================

#[test]
fn export_empty_collection() {
    let db = open();
    let snapshot = db.export("items");
    assert!(snapshot.is_empty());
    assert_eq!(snapshot.collection, "items");
}

#[test]
fn memory_backend_receives_every_commit() {
    let db = Database::builder()
        .schema(create_test_schema())
        .backend(MemoryBackend::new())
        .open()
        .unwrap();
    let id = db.insert("items", json!({"name": "a"})).unwrap();
    db.delete(&id).unwrap();
    assert!(db.export("items").is_empty());
}

// ============================================================================
// Schema Edge Cases
// ============================================================================

#[test]
fn schema_with_many_collections() {
    let mut schema = Schema::new(1);
    for i in 0..100 {
        schema.add_collection(CollectionSchema::new(
            format!("collection_{i}"),
            vec![FieldDef::required("value", FieldType::Int)],
        ));
    }
    let db = Database::builder().schema(schema).open().unwrap();
    for i in 0..100 {
        db.insert(&format!("collection_{i}"), json!({ "value": i }))
            .unwrap();
    }
    assert_eq!(db.store().collection_names().len(), 100);
}

#[test]
fn field_with_special_characters_in_name() {
    let db = open();
    let id = db
        .insert(
            "items",
            json!({"name": "n", "with space": 1, "dot.ted": 2, "ключ": 3}),
        )
        .unwrap();
    let doc = db.get(&id).unwrap().unwrap();
    assert_eq!(doc.get("dot.ted"), Some(&json!(2)));
    assert_eq!(doc.get("ключ"), Some(&json!(3)));
}

// ============================================================================
// ID Edge Cases
// ============================================================================

#[test]
fn ids_with_special_characters() {
    let db = open();
    for id in ["client:with spaces", "client:ünïcödé", "client:a/b\\c", "client:🚀"] {
        db.insert_with_identity("items", id, 1, json!({"name": id}))
            .unwrap();
        assert_eq!(db.get(id).unwrap().unwrap().id, id);
    }
}

#[test]
fn blank_ids_are_invalid() {
    let db = open();
    assert!(matches!(db.get("  "), Err(Error::InvalidId(_))));
    assert!(matches!(
        db.insert_with_identity("items", "", 1, json!({"name": "a"})),
        Err(Error::InvalidId(_))
    ));
}

#[test]
fn ids_are_unique_across_collections() {
    let db = open();
    db.insert_with_identity("items", "client:x", 1, json!({"name": "a"}))
        .unwrap();
    assert_eq!(
        db.insert_with_identity("other", "client:x", 1, json!({})),
        Err(Error::DuplicateId("client:x".into()))
    );
}

#[test]
fn missing_documents_are_none() {
    let db = open();
    assert_eq!(db.get("client:missing").unwrap(), None);
    assert_eq!(db.delete("client:missing").unwrap(), None);
}
