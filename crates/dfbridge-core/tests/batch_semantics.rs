//! Batch outcomes: bulk shortfall, rollback, halt and continue modes.

use std::sync::Arc;

use dfbridge_backend::{BackendConnection, BackendKind, MemoryConnection, Record};
use dfbridge_core::{AdapterError, RequestOptions, TableAdapter};
use serde_json::{json, Value};

fn rec(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

async fn seeded(
    kind: BackendKind,
    collection: &str,
    ids: &[&str],
) -> TableAdapter<MemoryConnection> {
    let conn = MemoryConnection::new(kind).with_collection(collection);
    let id_field = kind.id_field();
    for id in ids {
        conn.store(collection, rec(json!({ id_field: id, "n": 1 })))
            .await
            .expect("seed");
    }
    TableAdapter::new(Arc::new(conn))
}

// ===========================================================================
// Bulk dispatch
// ===========================================================================

#[tokio::test]
async fn delete_by_ids_with_missing_id_reports_shortfall() {
    let table = seeded(BackendKind::CouchDb, "todo", &["1", "2"]).await;

    let err = table
        .delete_by_ids(
            "todo",
            vec![json!(1), json!(2), json!(3)],
            &RequestOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AdapterError::BadRequest(_)));
    assert!(err.to_string().contains("not all requested ids were found"));
    assert_eq!(table.connection().len("todo"), 2);
}

#[tokio::test]
async fn bulk_patch_is_one_store_many_call() {
    let table = seeded(BackendKind::CouchDb, "todo", &["a", "b", "c"]).await;

    let out = table
        .patch_by_ids(
            "todo",
            vec![json!("a"), json!("b"), json!("c")],
            &rec(json!({"n": 2})),
            &RequestOptions::new(),
        )
        .await
        .expect("patch");

    assert_eq!(out.len(), 3);
    let ids: Vec<&Value> = out.resource.iter().map(|r| &r["_id"]).collect();
    assert_eq!(ids, vec![&json!("a"), &json!("b"), &json!("c")]);
    assert!(out.resource.iter().all(|r| r["_rev"] == json!("2")));

    let calls = table.connection().calls();
    assert_eq!(calls.store_many, 1);
    assert_eq!(calls.store, 3, "only the seed writes are per-record");
    assert_eq!(table.connection().document("todo", "b").unwrap()["n"], json!(2));
}

#[tokio::test]
async fn bulk_patch_reports_records_the_backend_rejected() {
    let table = seeded(BackendKind::CouchDb, "todo", &["a", "b", "c"]).await;
    table.connection().fail_writes_for("b");

    let err = table
        .patch_by_ids(
            "todo",
            vec![json!("a"), json!("b"), json!("c")],
            &rec(json!({"n": 2})),
            &RequestOptions::new(),
        )
        .await
        .unwrap_err();

    match err {
        AdapterError::Batch {
            message,
            outcomes,
            rolled_back,
        } => {
            assert!(!rolled_back);
            assert_eq!(message, "Not all records could be updated.");
            assert_eq!(outcomes.len(), 3);
            assert_eq!(
                outcomes[0].as_ref().ok(),
                Some(&rec(json!({"_id": "a", "_rev": "2"})))
            );
            let failure = outcomes[1].as_ref().unwrap_err();
            assert!(failure.to_string().contains("write rejected for 'b'"));
            assert_eq!(
                outcomes[2].as_ref().ok(),
                Some(&rec(json!({"_id": "c", "_rev": "2"})))
            );
        }
        other => panic!("expected batch error, got {other:?}"),
    }
    assert_eq!(table.connection().calls().store_many, 1);
    assert_eq!(table.connection().document("todo", "a").unwrap()["n"], json!(2));
    assert_eq!(table.connection().document("todo", "b").unwrap()["n"], json!(1));
    assert_eq!(table.connection().document("todo", "c").unwrap()["n"], json!(2));
}

#[tokio::test]
async fn bulk_delete_reports_records_the_backend_rejected() {
    let table = seeded(BackendKind::CouchDb, "todo", &["a", "b"]).await;
    table.connection().fail_writes_for("a");

    let err = table
        .delete_by_ids("todo", vec![json!("a"), json!("b")], &RequestOptions::new())
        .await
        .unwrap_err();

    match err {
        AdapterError::Batch { outcomes, .. } => {
            assert!(outcomes[0].is_err());
            assert_eq!(outcomes[1].as_ref().unwrap()["_id"], json!("b"));
        }
        other => panic!("expected batch error, got {other:?}"),
    }
    assert_eq!(table.connection().len("todo"), 1);
    assert!(table.connection().document("todo", "a").is_some());
}

// ===========================================================================
// Rollback
// ===========================================================================

#[tokio::test]
async fn rollback_of_post_batch_removes_created_records() {
    let table = seeded(BackendKind::CouchDb, "todo", &[]).await;
    table.connection().fail_writes_for("bad");

    let err = table
        .create(
            "todo",
            vec![
                rec(json!({"name": "a"})),
                rec(json!({"name": "b"})),
                rec(json!({"name": "c"})),
                rec(json!({"_id": "bad", "name": "d"})),
            ],
            &RequestOptions::new().with_rollback(),
        )
        .await
        .unwrap_err();

    match err {
        AdapterError::Batch {
            message,
            outcomes,
            rolled_back,
        } => {
            assert!(rolled_back);
            assert_eq!(message, "Not all records could be created. All changes rolled back.");
            assert_eq!(outcomes.len(), 4);
            assert!(outcomes[..3].iter().all(Result::is_ok));
            assert!(outcomes[3].is_err());
        }
        other => panic!("expected batch error, got {other:?}"),
    }
    assert!(table.connection().is_empty("todo"));
}

#[tokio::test]
async fn rollback_of_patch_batch_restores_snapshots() {
    let table = seeded(BackendKind::CouchDb, "todo", &["a", "b", "c"]).await;
    table.connection().fail_writes_for("c");

    let err = table
        .patch(
            "todo",
            vec![
                rec(json!({"_id": "a", "n": 2})),
                rec(json!({"_id": "b", "n": 2})),
                rec(json!({"_id": "c", "n": 2})),
            ],
            &RequestOptions::new().with_rollback(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Batch { rolled_back: true, .. }));

    for id in ["a", "b"] {
        let doc = table.connection().document("todo", id).unwrap();
        assert_eq!(doc["n"], json!(1), "{id} restored");
        assert_eq!(doc["_rev"], json!("3"), "{id} rewritten twice");
    }
    assert_eq!(table.connection().document("todo", "c").unwrap()["n"], json!(1));
}

#[tokio::test]
async fn single_record_rollback_surfaces_underlying_error() {
    let table = seeded(BackendKind::Salesforce, "Account", &["001"]).await;

    let err = table
        .patch_by_id(
            "Account",
            json!("999"),
            &rec(json!({"Name": "x"})),
            &RequestOptions::new().with_rollback(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::NotFound(_)));
    assert_eq!(err.to_string(), "Record with identifier '999' not found.");
}

// ===========================================================================
// Halt and continue
// ===========================================================================

#[tokio::test]
async fn strict_patch_halts_at_first_invalid_record() {
    let table = seeded(BackendKind::CouchDb, "todo", &["a", "b", "c"]).await;

    let err = table
        .patch(
            "todo",
            vec![
                rec(json!({"_id": "a", "n": 5})),
                rec(json!({"n": 5})),
                rec(json!({"_id": "c", "n": 5})),
            ],
            &RequestOptions::new(),
        )
        .await
        .unwrap_err();

    match err {
        AdapterError::Batch {
            outcomes,
            rolled_back,
            ..
        } => {
            assert!(!rolled_back);
            assert_eq!(outcomes.len(), 2);
            assert_eq!(
                outcomes[0].as_ref().ok(),
                Some(&rec(json!({"_id": "a", "_rev": "2"})))
            );
            let failure = outcomes[1].as_ref().unwrap_err();
            assert_eq!(failure.to_string(), "Identifying field(s) could not be determined.");
        }
        other => panic!("expected batch error, got {other:?}"),
    }
    assert_eq!(table.connection().document("todo", "a").unwrap()["n"], json!(5));
    assert_eq!(table.connection().document("todo", "c").unwrap()["n"], json!(1));
}

#[tokio::test]
async fn continue_mode_attempts_every_unit() {
    let table = seeded(BackendKind::Salesforce, "Account", &["001", "002"]).await;

    let err = table
        .patch_by_ids(
            "Account",
            vec![json!("001"), json!("404"), json!("002")],
            &rec(json!({"Active": true})),
            &RequestOptions::new().with_continue(),
        )
        .await
        .unwrap_err();

    match err {
        AdapterError::Batch {
            message,
            outcomes,
            rolled_back,
        } => {
            assert!(!rolled_back);
            assert_eq!(message, "Not all records could be updated.");
            assert_eq!(outcomes.len(), 3);
            assert!(outcomes[0].is_ok());
            assert!(matches!(outcomes[1], Err(AdapterError::NotFound(_))));
            assert!(outcomes[2].is_ok());
        }
        other => panic!("expected batch error, got {other:?}"),
    }
    for id in ["001", "002"] {
        assert_eq!(
            table.connection().document("Account", id).unwrap()["Active"],
            json!(true)
        );
    }
}

#[tokio::test]
async fn batch_error_reports_bad_request_status() {
    let table = seeded(BackendKind::Salesforce, "Account", &["001"]).await;
    let err = table
        .delete_by_ids(
            "Account",
            vec![json!("001"), json!("002")],
            &RequestOptions::new().with_continue(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert!(err.to_string().starts_with("Batch Error: "));
    assert!(table.connection().is_empty("Account"));
}
