//! Backend connection trait definition
//!
//! [`BackendConnection`] is the opaque capability the adapter layer calls
//! into. Implementations wrap a vendor client (CouchDB, Salesforce REST,
//! object storage, SurrealDB) and speak in backend-native records: the
//! identifier and revision live under whatever names the backend uses, and
//! write acknowledgements are returned verbatim for the adapter to clean.
//!
//! All methods are async and take the target collection explicitly; a
//! connection carries no "current collection" state between calls.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BackendError;
use crate::kind::BackendKind;

/// Result type for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// A record: field name to scalar or structured value.
pub type Record = Map<String, Value>;

/// Per-record status of a bulk write, in input order.
pub type BulkOutcome = Vec<BackendResult<Record>>;

/// Canonical string key for an identifier value.
///
/// Strings are used verbatim; every other JSON value uses its compact JSON
/// rendering, so `1` and `"1"` address the same record.
pub fn record_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Field metadata published by backends with a fixed schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub read_only: bool,
}

fn default_field_type() -> String {
    "string".to_string()
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            required: false,
            read_only: false,
        }
    }

    /// Mark the field as required on create
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark the field as not writable by callers
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Native listing query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeQuery {
    /// Backend filter expression (only for backends with filter support)
    pub filter: Option<String>,
    /// Fields to project; `None` returns whole records
    pub fields: Option<Vec<String>>,
    /// Order expression, e.g. `"Name DESC"`
    pub order: Option<String>,
    pub offset: u64,
    pub limit: Option<u64>,
    /// View-row backends: embed the full document in each row
    pub include_docs: bool,
    /// View-row backends: design document holding `view`
    pub design: Option<String>,
    pub view: Option<String>,
    /// Cursor backends: continuation token from a previous page
    pub cursor: Option<String>,
}

/// What [`BackendConnection::fetch_many`] should return.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchRequest {
    /// Records by identifier. Missing identifiers are omitted from the page.
    Ids {
        ids: Vec<Value>,
        include_docs: bool,
    },
    /// Records selected by a native query
    Query(NativeQuery),
}

/// One page of native rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchPage {
    pub rows: Vec<Record>,
    /// Total matching rows, when the backend reports it
    pub total: Option<u64>,
    /// Offset the backend applied to this page
    pub offset: u64,
    /// Continuation token for the next page
    pub next: Option<String>,
}

/// Primitive operations a backend exposes to the adapter layer.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`select_collection`](BackendConnection::select_collection) | Verify a collection is addressable |
/// | [`fetch_one`](BackendConnection::fetch_one) | Latest native record by identifier |
/// | [`fetch_many`](BackendConnection::fetch_many) | Records by identifiers or query |
/// | [`store`](BackendConnection::store) | Insert or replace one record |
/// | [`store_many`](BackendConnection::store_many) | Bulk insert or replace |
/// | [`remove`](BackendConnection::remove) | Delete one record |
/// | [`remove_many`](BackendConnection::remove_many) | Bulk delete |
/// | [`list_collections`](BackendConnection::list_collections) | Collection names |
/// | [`describe_collection`](BackendConnection::describe_collection) | Collection properties |
///
/// Absent capabilities are declared statically through
/// [`BackendKind::capabilities`]; optional methods default to
/// [`BackendError::Unsupported`].
#[async_trait]
pub trait BackendConnection: Send + Sync {
    /// Which backend this connection talks to.
    fn kind(&self) -> BackendKind;

    /// Verify the collection exists and can be addressed.
    async fn select_collection(&self, name: &str) -> BackendResult<()>;

    /// Fetch the latest version of one record. `Ok(None)` when absent.
    async fn fetch_one(&self, collection: &str, id: &Value) -> BackendResult<Option<Record>>;

    /// Fetch records by identifiers or by native query.
    async fn fetch_many(&self, collection: &str, request: FetchRequest)
        -> BackendResult<FetchPage>;

    /// Insert or replace a record, returning the backend acknowledgement.
    ///
    /// Revision backends require the current revision to replace an
    /// existing record.
    async fn store(&self, collection: &str, record: Record) -> BackendResult<Record>;

    /// Insert or replace several records.
    ///
    /// Every record is attempted. The outer error means the call as a whole
    /// was refused and nothing was written; otherwise each record carries
    /// its own acknowledgement or failure, in input order.
    async fn store_many(&self, collection: &str, records: Vec<Record>)
        -> BackendResult<BulkOutcome>;

    /// Delete the record addressed by the identifier (and revision) in `record`.
    async fn remove(&self, collection: &str, record: Record) -> BackendResult<Record>;

    /// Delete several records, with per-record status as in
    /// [`store_many`](BackendConnection::store_many).
    async fn remove_many(&self, collection: &str, records: Vec<Record>)
        -> BackendResult<BulkOutcome>;

    /// Names of all collections visible to this connection.
    async fn list_collections(&self) -> BackendResult<Vec<String>>;

    /// Backend-native description of a collection.
    async fn describe_collection(&self, name: &str) -> BackendResult<Record>;

    /// Field metadata for backends with a fixed schema. `None` means any
    /// field is accepted.
    async fn fields(&self, _collection: &str) -> BackendResult<Option<Vec<FieldInfo>>> {
        Ok(None)
    }

    async fn create_collection(&self, name: &str, _properties: &Record) -> BackendResult<()> {
        Err(BackendError::Unsupported(format!("create collection '{name}'")))
    }

    async fn update_collection(&self, name: &str, _properties: &Record) -> BackendResult<()> {
        Err(BackendError::Unsupported(format!("update collection '{name}'")))
    }

    async fn delete_collection(&self, name: &str) -> BackendResult<()> {
        Err(BackendError::Unsupported(format!("delete collection '{name}'")))
    }

    /// Discard any cached session and authenticate again.
    async fn refresh_session(&self) -> BackendResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<T> BackendConnection for Arc<T>
where
    T: BackendConnection + ?Sized,
{
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    async fn select_collection(&self, name: &str) -> BackendResult<()> {
        (**self).select_collection(name).await
    }

    async fn fetch_one(&self, collection: &str, id: &Value) -> BackendResult<Option<Record>> {
        (**self).fetch_one(collection, id).await
    }

    async fn fetch_many(
        &self,
        collection: &str,
        request: FetchRequest,
    ) -> BackendResult<FetchPage> {
        (**self).fetch_many(collection, request).await
    }

    async fn store(&self, collection: &str, record: Record) -> BackendResult<Record> {
        (**self).store(collection, record).await
    }

    async fn store_many(
        &self,
        collection: &str,
        records: Vec<Record>,
    ) -> BackendResult<BulkOutcome> {
        (**self).store_many(collection, records).await
    }

    async fn remove(&self, collection: &str, record: Record) -> BackendResult<Record> {
        (**self).remove(collection, record).await
    }

    async fn remove_many(
        &self,
        collection: &str,
        records: Vec<Record>,
    ) -> BackendResult<BulkOutcome> {
        (**self).remove_many(collection, records).await
    }

    async fn list_collections(&self) -> BackendResult<Vec<String>> {
        (**self).list_collections().await
    }

    async fn describe_collection(&self, name: &str) -> BackendResult<Record> {
        (**self).describe_collection(name).await
    }

    async fn fields(&self, collection: &str) -> BackendResult<Option<Vec<FieldInfo>>> {
        (**self).fields(collection).await
    }

    async fn create_collection(&self, name: &str, properties: &Record) -> BackendResult<()> {
        (**self).create_collection(name, properties).await
    }

    async fn update_collection(&self, name: &str, properties: &Record) -> BackendResult<()> {
        (**self).update_collection(name, properties).await
    }

    async fn delete_collection(&self, name: &str) -> BackendResult<()> {
        (**self).delete_collection(name).await
    }

    async fn refresh_session(&self) -> BackendResult<()> {
        (**self).refresh_session().await
    }
}
