//! SchemaAdapter lifecycle, capability gating and cache invalidation.

use std::sync::Arc;

use dfbridge_backend::{
    BackendConnection, BackendKind, FieldInfo, MemoryConnection, Record, SurrealConnection,
};
use dfbridge_core::{
    AdapterError, DescriptorCache, RequestOptions, SchemaAdapter, TableAdapter,
};
use serde_json::{json, Value};

fn rec(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn shared(
    conn: MemoryConnection,
) -> (TableAdapter<MemoryConnection>, SchemaAdapter<MemoryConnection>) {
    let conn = Arc::new(conn);
    let cache = Arc::new(DescriptorCache::new());
    (
        TableAdapter::with_cache(conn.clone(), cache.clone()),
        SchemaAdapter::with_cache(conn, cache),
    )
}

#[tokio::test]
async fn metadata_mutations_not_implemented_on_salesforce() {
    let schema = SchemaAdapter::new(Arc::new(
        MemoryConnection::new(BackendKind::Salesforce).with_collection("Account"),
    ));

    let err = schema
        .create_collection("Lead", &Record::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::NotImplemented(_)));
    assert_eq!(err.to_string(), "Metadata actions currently not supported.");
    assert_eq!(err.status_code(), 501);

    assert!(schema.update_collection("Account", &Record::new()).await.is_err());
    assert!(schema.delete_collection("Account").await.is_err());

    let info = schema.describe_collection("Account").await.expect("describe");
    assert_eq!(info["name"], json!("Account"));
}

#[tokio::test]
async fn empty_names_are_bad_requests() {
    let schema = SchemaAdapter::new(Arc::new(MemoryConnection::new(BackendKind::CouchDb)));

    let err = schema.create_collection("  ", &Record::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "No 'name' field in data.");

    let err = schema.delete_collection("").await.unwrap_err();
    assert_eq!(err.to_string(), "Table name can not be empty.");

    let err = schema.describe_collection("").await.unwrap_err();
    assert!(matches!(err, AdapterError::BadRequest(_)));
}

#[tokio::test]
async fn couchdb_collection_lifecycle() {
    let schema = SchemaAdapter::new(Arc::new(MemoryConnection::new(BackendKind::CouchDb)));

    let created = schema
        .create_collection("inventory", &rec(json!({"label": "Stock"})))
        .await
        .expect("create");
    assert_eq!(created, rec(json!({"name": "inventory"})));

    schema
        .update_collection("inventory", &rec(json!({"owner": "ops"})))
        .await
        .expect("update");
    let info = schema.describe_collection("inventory").await.expect("describe");
    assert_eq!(info["label"], json!("Stock"));
    assert_eq!(info["owner"], json!("ops"));
    assert_eq!(info["doc_count"], json!(0));

    assert_eq!(schema.list_collections(false).await.unwrap(), vec!["inventory"]);

    schema.delete_collection("inventory").await.expect("delete");
    assert!(schema.list_collections(false).await.unwrap().is_empty());

    let err = schema.describe_collection("inventory").await.unwrap_err();
    assert!(matches!(err, AdapterError::NotFound(_)));
}

#[tokio::test]
async fn mutations_invalidate_cached_descriptors() {
    let (table, schema) =
        shared(MemoryConnection::new(BackendKind::CouchDb).with_collection("todo"));

    table
        .retrieve_by_filter("todo", None, &RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(schema.cache().len().await, 1);

    schema.delete_collection("todo").await.unwrap();
    assert!(schema.cache().is_empty().await);

    let err = table
        .retrieve_by_filter("todo", None, &RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::NotFound(_)));
}

#[tokio::test]
async fn listing_drops_descriptors_of_vanished_collections() {
    let conn = MemoryConnection::new(BackendKind::CouchDb)
        .with_collection("a")
        .with_collection("b");
    let (table, schema) = shared(conn);
    for name in ["a", "b"] {
        table
            .retrieve_by_filter(name, None, &RequestOptions::new())
            .await
            .unwrap();
    }
    assert_eq!(schema.cache().len().await, 2);

    // removed behind the adapter's back
    table.connection().delete_collection("b").await.unwrap();
    assert_eq!(schema.list_collections(false).await.unwrap(), vec!["a"]);
    assert_eq!(schema.cache().len().await, 1);
    assert!(schema.cache().get("a").await.is_some());

    schema.list_collections(true).await.unwrap();
    assert!(schema.cache().is_empty().await);
}

#[tokio::test]
async fn describe_field_is_case_insensitive() {
    let schema = SchemaAdapter::new(Arc::new(
        MemoryConnection::new(BackendKind::Salesforce).with_fields(
            "Account",
            vec![
                FieldInfo::new("Name", "string").required(),
                FieldInfo::new("CreatedDate", "datetime").read_only(),
            ],
        ),
    ));

    let field = schema.describe_field("Account", "createddate").await.unwrap();
    assert_eq!(field.name, "CreatedDate");
    assert!(field.read_only);

    let err = schema.describe_field("Account", "Phone").await.unwrap_err();
    assert!(matches!(err, AdapterError::NotFound(_)));
    assert_eq!(err.to_string(), "Field 'Phone' not found.");
}

#[tokio::test]
async fn surreal_collections_round_trip() {
    let conn = SurrealConnection::in_memory().await.expect("surreal");
    let schema = SchemaAdapter::new(Arc::new(conn));

    schema
        .create_collection("notes", &rec(json!({"label": "Notes"})))
        .await
        .expect("create");
    let err = schema
        .create_collection("notes", &Record::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Failed to create table 'notes'."));

    let info = schema.describe_collection("notes").await.unwrap();
    assert_eq!(info["label"], json!("Notes"));
    assert_eq!(schema.list_collections(false).await.unwrap(), vec!["notes"]);

    schema.delete_collection("notes").await.unwrap();
    assert!(schema.list_collections(false).await.unwrap().is_empty());
}
