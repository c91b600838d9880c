//! TableAdapter behaviour across backend kinds.

use std::sync::Arc;

use dfbridge_backend::{
    BackendConnection, BackendKind, FieldInfo, MemoryConnection, Record, SessionRefresh,
    SurrealConnection,
};
use dfbridge_core::{AdapterError, IdType, RequestOptions, TableAdapter};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rec(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn couch() -> TableAdapter<MemoryConnection> {
    TableAdapter::new(Arc::new(
        MemoryConnection::new(BackendKind::CouchDb).with_collection("todo"),
    ))
}

fn salesforce() -> TableAdapter<MemoryConnection> {
    TableAdapter::new(Arc::new(
        MemoryConnection::new(BackendKind::Salesforce).with_collection("Account"),
    ))
}

async fn seed_accounts(table: &TableAdapter<MemoryConnection>) {
    let records = vec![
        rec(json!({"Id": "001", "Name": "Acme", "Type": "customer"})),
        rec(json!({"Id": "002", "Name": "Globex", "Type": "customer"})),
        rec(json!({"Id": "003", "Name": "Initech", "Type": "partner"})),
        rec(json!({"Id": "004", "Name": "Umbrella", "Type": "customer"})),
        rec(json!({"Id": "005", "Name": "Hooli", "Type": "partner"})),
    ];
    for record in records {
        table
            .connection()
            .store("Account", record)
            .await
            .expect("seed account");
    }
}

// ---------------------------------------------------------------------------
// Write results
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_with_require_more_returns_submitted_fields() {
    let table = couch();
    let out = table
        .create(
            "todo",
            vec![rec(json!({"name": "a"}))],
            &RequestOptions::new().with_require_more(),
        )
        .await
        .expect("create");

    assert_eq!(out.len(), 1);
    let record = &out.resource[0];
    assert!(record["_id"].is_string());
    assert_eq!(record["_rev"], json!("1"));
    assert_eq!(record["name"], json!("a"));
    assert_eq!(record.len(), 3);
}

#[tokio::test]
async fn write_results_carry_revision_only_on_revision_backends() {
    let couch = couch();
    let created = couch
        .create(
            "todo",
            vec![rec(json!({"name": "a"})), rec(json!({"name": "b"}))],
            &RequestOptions::new(),
        )
        .await
        .expect("couch create");
    assert_eq!(created.len(), 2);
    for record in &created.resource {
        assert!(record.contains_key("_id"));
        assert!(record.contains_key("_rev"));
    }

    let sf = salesforce();
    let created = sf
        .create(
            "Account",
            vec![rec(json!({"Name": "Acme"}))],
            &RequestOptions::new(),
        )
        .await
        .expect("salesforce create");
    let record = &created.resource[0];
    assert!(record.contains_key("Id"));
    assert!(!record.contains_key("_rev"));
    assert!(!record.contains_key("rev"));
}

#[tokio::test]
async fn replace_uses_identifier_from_record() {
    let table = couch();
    table
        .connection()
        .store("todo", rec(json!({"_id": "a", "name": "old", "done": false})))
        .await
        .unwrap();

    let out = table
        .replace(
            "todo",
            vec![rec(json!({"_id": "a", "name": "new"}))],
            &RequestOptions::new(),
        )
        .await
        .expect("replace");
    assert_eq!(out.resource[0], rec(json!({"_id": "a", "_rev": "2"})));

    let stored = table.connection().document("todo", "a").unwrap();
    assert_eq!(stored["name"], json!("new"));
    assert!(!stored.contains_key("done"));
}

#[tokio::test]
async fn patch_by_id_merges_into_stored_record() {
    let table = couch();
    table
        .connection()
        .store("todo", rec(json!({"_id": "a", "name": "old", "done": false})))
        .await
        .unwrap();

    let out = table
        .patch_by_id(
            "todo",
            json!("a"),
            &rec(json!({"done": true})),
            &RequestOptions::new().with_fields("*"),
        )
        .await
        .expect("patch");
    assert_eq!(
        out,
        rec(json!({"_id": "a", "_rev": "2", "name": "old", "done": true}))
    );
}

#[tokio::test]
async fn empty_request_is_bad_request() {
    let err = couch()
        .create("todo", Vec::new(), &RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "There are no record sets in the request.");

    let err = couch()
        .retrieve_by_ids(" ", vec![json!("a")], &RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Table name can not be empty.");
}

#[tokio::test]
async fn unknown_collection_is_not_found() {
    let err = couch()
        .retrieve_by_id("missing", json!("a"), &RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::NotFound(_)));
    assert_eq!(err.status_code(), 404);
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retrieve_by_ids_keeps_request_order() {
    let table = couch();
    for id in ["a", "b", "c"] {
        table
            .connection()
            .store("todo", rec(json!({"_id": id, "name": id})))
            .await
            .unwrap();
    }

    let out = table
        .retrieve_by_ids(
            "todo",
            vec![json!("c"), json!("a")],
            &RequestOptions::new().with_fields("name"),
        )
        .await
        .expect("retrieve");
    assert_eq!(
        out.resource,
        vec![
            rec(json!({"_id": "c", "_rev": "1", "name": "c"})),
            rec(json!({"_id": "a", "_rev": "1", "name": "a"})),
        ]
    );
}

#[tokio::test]
async fn alias_named_user_fields_survive_cleaning() {
    let table = couch();
    let stored = json!({"id": 5, "rev": "draft", "ok": false, "errors": 2, "n": 1});
    let mut seed = rec(stored.clone());
    seed.insert("_id".to_string(), json!("x"));
    table.connection().store("todo", seed).await.unwrap();

    let mut expected = rec(stored);
    expected.insert("_id".to_string(), json!("x"));
    expected.insert("_rev".to_string(), json!("1"));

    let all = RequestOptions::new().with_fields("*");
    let one = table
        .retrieve_by_id("todo", json!("x"), &all)
        .await
        .expect("retrieve");
    assert_eq!(one, expected);

    let listed = table
        .retrieve_by_filter("todo", None, &all)
        .await
        .expect("list");
    assert_eq!(listed.resource, vec![expected]);

    let projected = table
        .retrieve_by_id("todo", json!("x"), &RequestOptions::new().with_fields("id"))
        .await
        .expect("retrieve");
    assert_eq!(projected, rec(json!({"_id": "x", "_rev": "1", "id": 5})));

    let created = table
        .create(
            "todo",
            vec![rec(json!({"id": 7, "name": "b"}))],
            &RequestOptions::new().with_require_more(),
        )
        .await
        .expect("create");
    let record = &created.resource[0];
    assert_eq!(record["id"], json!(7));
    assert_ne!(record["_id"], json!(7));
    assert_eq!(record["_rev"], json!("1"));
}

#[tokio::test]
async fn couchdb_listing_reports_count_for_offset() {
    let table = couch();
    for id in ["a", "b", "c"] {
        table
            .connection()
            .store("todo", rec(json!({"_id": id})))
            .await
            .unwrap();
    }

    let first = table
        .retrieve_by_filter("todo", None, &RequestOptions::new())
        .await
        .expect("list");
    assert_eq!(first.len(), 3);
    assert!(first.meta.is_none());
    assert_eq!(first.resource[0], rec(json!({"_id": "a", "_rev": "1"})));

    let paged = table
        .retrieve_by_filter("todo", None, &RequestOptions::new().with_offset(2))
        .await
        .expect("page");
    assert_eq!(paged.len(), 1);
    assert_eq!(paged.meta.and_then(|m| m.count), Some(3));
}

#[tokio::test]
async fn filters_fail_on_backends_without_filter_support() {
    let table = couch();
    let opts = RequestOptions::new();
    let expected = "SQL-like filters are not currently available for CouchDB.";

    let err = table
        .retrieve_by_filter("todo", Some("name = 'a'"), &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::BadRequest(_)));
    assert_eq!(err.to_string(), expected);

    let err = table
        .update_by_filter("todo", None, &rec(json!({"n": 1})), &opts)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), expected);

    let err = table
        .patch_by_filter("todo", Some("n = 1"), &rec(json!({"n": 2})), &opts)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), expected);

    let err = table
        .delete_by_filter("todo", Some("n = 1"), &opts)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), expected);
}

#[tokio::test]
async fn salesforce_filter_pages_with_cursor() {
    let table = salesforce();
    seed_accounts(&table).await;

    let opts = RequestOptions::new()
        .with_fields("Name")
        .with_limit(2)
        .with_include_count();
    let first = table
        .retrieve_by_filter("Account", Some("Type = 'customer'"), &opts)
        .await
        .expect("first page");
    assert_eq!(first.len(), 2);
    let meta = first.meta.clone().expect("meta");
    assert_eq!(meta.count, Some(3));
    let next = meta.next.expect("next cursor");
    for record in &first.resource {
        assert_eq!(record.len(), 2);
        assert!(record.contains_key("Id"));
        assert!(record.contains_key("Name"));
    }

    let second = table
        .retrieve_by_filter(
            "Account",
            Some("Type = 'customer'"),
            &RequestOptions::new().with_fields("Name").with_limit(2).with_next(next),
        )
        .await
        .expect("second page");
    assert_eq!(second.len(), 1);
    let meta = second.meta.expect("meta");
    assert_eq!(meta.count, Some(3));
    assert!(meta.next.is_none());
}

#[tokio::test]
async fn malformed_filter_surfaces_rest_error() {
    let table = salesforce();
    let err = table
        .retrieve_by_filter("Account", Some("Name ~~ nonsense"), &RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Rest { status: 400, .. }));
}

#[tokio::test]
async fn patch_and_delete_by_filter_touch_matching_records() {
    let table = salesforce();
    seed_accounts(&table).await;

    let patched = table
        .patch_by_filter(
            "Account",
            Some("Type = 'partner'"),
            &rec(json!({"Active": true})),
            &RequestOptions::new(),
        )
        .await
        .expect("patch by filter");
    assert_eq!(patched.len(), 2);
    let partner = table.connection().document("Account", "003").unwrap();
    assert_eq!(partner["Active"], json!(true));
    assert_eq!(partner["Name"], json!("Initech"));
    let customer = table.connection().document("Account", "001").unwrap();
    assert!(!customer.contains_key("Active"));

    let deleted = table
        .delete_by_filter("Account", Some("Type = 'partner'"), &RequestOptions::new())
        .await
        .expect("delete by filter");
    assert_eq!(deleted.len(), 2);
    assert_eq!(table.connection().len("Account"), 3);

    let none = table
        .delete_by_filter("Account", Some("Type = 'partner'"), &RequestOptions::new())
        .await
        .expect("nothing left to delete");
    assert!(none.is_empty());
}

#[tokio::test]
async fn delete_by_filter_requires_a_filter() {
    let err = salesforce()
        .delete_by_filter("Account", Some("  "), &RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::BadRequest(_)));
}

// ---------------------------------------------------------------------------
// Identifier metadata
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identifier_overrides_ignored_on_fixed_backends() {
    let table = couch();
    let opts = RequestOptions::new()
        .with_id_field("key")
        .with_id_type(IdType::Integer);
    let descriptor = table.get_ids_info("todo", &opts).await.unwrap();
    assert_eq!(descriptor.id_field, "_id");
    assert_eq!(descriptor.id_type, IdType::String);
    assert_eq!(descriptor.revision_field.as_deref(), Some("_rev"));
}

#[tokio::test]
async fn descriptor_carries_published_fields() {
    let conn = MemoryConnection::new(BackendKind::Salesforce).with_fields(
        "Contact",
        vec![
            FieldInfo::new("LastName", "string").required(),
            FieldInfo::new("Email", "email"),
        ],
    );
    let table = TableAdapter::new(Arc::new(conn));
    let descriptor = table
        .get_ids_info("Contact", &RequestOptions::new())
        .await
        .unwrap();
    assert!(descriptor.field("lastname").is_some_and(|f| f.required));

    let err = table
        .create(
            "Contact",
            vec![rec(json!({"email": "a@example.com"}))],
            &RequestOptions::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Required field 'LastName' can not be NULL.");

    let out = table
        .create(
            "Contact",
            vec![rec(json!({"lastname": "Doe", "nickname": "jd"}))],
            &RequestOptions::new().with_fields("*"),
        )
        .await
        .expect("create contact");
    assert_eq!(out.resource[0]["LastName"], json!("Doe"));
    assert!(!out.resource[0].contains_key("nickname"));
}

#[tokio::test]
async fn descriptor_resolved_once_per_collection() {
    let table = couch();
    for _ in 0..3 {
        table
            .retrieve_by_filter("todo", None, &RequestOptions::new())
            .await
            .unwrap();
    }
    assert_eq!(table.connection().calls().select_collection, 1);

    table.refresh("todo").await;
    table
        .retrieve_by_filter("todo", None, &RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(table.connection().calls().select_collection, 2);
}

// ---------------------------------------------------------------------------
// Truncate, sessions, dynamic dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn truncate_removes_every_record() {
    let table = couch();
    table
        .create(
            "todo",
            vec![rec(json!({"n": 1})), rec(json!({"n": 2}))],
            &RequestOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(table.connection().len("todo"), 2);

    let out = table.truncate("todo").await.expect("truncate");
    assert_eq!(out, rec(json!({"success": true})));
    assert!(table.connection().is_empty("todo"));
}

#[tokio::test]
async fn expired_session_is_refreshed_transparently() {
    let conn = SessionRefresh::new(
        MemoryConnection::new(BackendKind::Salesforce).with_collection("Account"),
    );
    let table = TableAdapter::new(Arc::new(conn));

    table.connection().inner().expire_session();
    let out = table
        .create(
            "Account",
            vec![rec(json!({"Name": "Acme"}))],
            &RequestOptions::new(),
        )
        .await
        .expect("create after refresh");
    assert_eq!(out.len(), 1);
    assert_eq!(table.connection().inner().refresh_count(), 1);
}

#[tokio::test]
async fn adapter_works_over_trait_objects() {
    let conn: Arc<dyn BackendConnection> =
        Arc::new(MemoryConnection::new(BackendKind::CouchDb).with_collection("todo"));
    let table = TableAdapter::new(conn);
    let out = table
        .create(
            "todo",
            vec![rec(json!({"_id": "x", "n": 1}))],
            &RequestOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(out.resource[0], rec(json!({"_id": "x", "_rev": "1"})));
}

// ---------------------------------------------------------------------------
// SurrealDB end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn surreal_document_lifecycle() {
    let conn = SurrealConnection::in_memory().await.expect("surreal");
    conn.create_collection("notes", &Record::new())
        .await
        .expect("collection");
    let table = TableAdapter::new(Arc::new(conn));
    let opts = RequestOptions::new();

    let created = table
        .create(
            "notes",
            vec![
                rec(json!({"id": "a", "n": 3})),
                rec(json!({"id": "b", "n": 1})),
                rec(json!({"id": "c", "n": 2})),
            ],
            &opts,
        )
        .await
        .expect("create");
    assert_eq!(created.resource[1], rec(json!({"id": "b", "rev": "1"})));

    let patched = table
        .patch_by_id("notes", json!("b"), &rec(json!({"n": 10})), &opts)
        .await
        .expect("patch");
    assert_eq!(patched, rec(json!({"id": "b", "rev": "2"})));

    let listed = table
        .retrieve_by_filter(
            "notes",
            None,
            &RequestOptions::new().with_fields("n").with_order("n DESC"),
        )
        .await
        .expect("list");
    let ns: Vec<Value> = listed.resource.iter().map(|r| r["n"].clone()).collect();
    assert_eq!(ns, vec![json!(10), json!(3), json!(2)]);
    assert_eq!(listed.resource[0]["rev"], json!("2"));

    let deleted = table
        .delete_by_ids("notes", vec![json!("a"), json!("c")], &opts)
        .await
        .expect("delete");
    assert_eq!(deleted.len(), 2);

    let remaining = table
        .retrieve_by_filter("notes", None, &RequestOptions::new().with_include_count())
        .await
        .expect("count");
    assert_eq!(remaining.meta.and_then(|m| m.count), Some(1));
}
