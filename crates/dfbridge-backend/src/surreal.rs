//! SurrealDB-backed document connection
//!
//! Presents SurrealDB as a revisioned document store: every collection is a
//! set of JSON documents keyed by `id`, each write bumps the `rev` token and
//! replacing or deleting a document requires the current revision.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::connection::{
    record_key, BackendConnection, BackendResult, BulkOutcome, FetchPage, FetchRequest,
    NativeQuery, Record,
};
use crate::error::BackendError;
use crate::kind::BackendKind;
use crate::migrations;
use crate::query::{project, sort_records};

const ID_FIELD: &str = "id";
const REV_FIELD: &str = "rev";

/// Connection settings for [`SurrealConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurrealConfig {
    /// Endpoint URL (`mem://`, `surrealkv://path`, `ws://host:port`)
    pub url: String,
    pub namespace: String,
    pub database: String,
    /// Root credentials, used when both are set
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for SurrealConfig {
    fn default() -> Self {
        Self {
            url: "mem://".to_string(),
            namespace: "dfbridge".to_string(),
            database: "main".to_string(),
            username: None,
            password: None,
        }
    }
}

impl SurrealConfig {
    /// Load from environment variables
    ///
    /// - `DFBRIDGE_SURREAL_URL` (default `mem://`)
    /// - `DFBRIDGE_SURREAL_NAMESPACE` (default `dfbridge`)
    /// - `DFBRIDGE_SURREAL_DATABASE` (default `main`)
    /// - `DFBRIDGE_SURREAL_USERNAME`, `DFBRIDGE_SURREAL_PASSWORD` (optional)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("DFBRIDGE_SURREAL_URL").unwrap_or(defaults.url),
            namespace: std::env::var("DFBRIDGE_SURREAL_NAMESPACE").unwrap_or(defaults.namespace),
            database: std::env::var("DFBRIDGE_SURREAL_DATABASE").unwrap_or(defaults.database),
            username: std::env::var("DFBRIDGE_SURREAL_USERNAME").ok(),
            password: std::env::var("DFBRIDGE_SURREAL_PASSWORD").ok(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

// -- rows ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocRow {
    collection: String,
    doc_id: String,
    id_json: String,
    rev: u64,
    body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionRow {
    name: String,
    properties: String,
}

#[derive(Debug, Deserialize)]
struct RevRow {
    rev: u64,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    total: u64,
}

#[derive(Debug, Deserialize)]
struct NameRow {
    name: String,
}

const DOC_COLUMNS: &str = "collection, doc_id, id_json, rev, body";

/// SurrealDB implementation of [`BackendConnection`].
pub struct SurrealConnection {
    db: Surreal<Any>,
}

impl SurrealConnection {
    /// In-memory instance for tests.
    pub async fn in_memory() -> BackendResult<Self> {
        Self::connect(&SurrealConfig::default()).await
    }

    #[instrument(skip(config), fields(url = %config.url, namespace = %config.namespace, database = %config.database))]
    pub async fn connect(config: &SurrealConfig) -> BackendResult<Self> {
        if let Some(path) = config.url.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(path).map_err(|e| {
                BackendError::Connection(format!(
                    "Failed to create database directory {path}: {e}"
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(config.url.as_str())
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            db.signin(Root {
                username: username.as_str(),
                password: password.as_str(),
            })
            .await
            .map_err(|e| BackendError::Connection(format!("Root auth failed: {e}")))?;
        }

        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!(url = %config.url, "SurrealConnection connected");
        Ok(Self { db })
    }

    // -- private helpers -----------------------------------------------------

    async fn require_collection(&self, name: &str) -> BackendResult<CollectionRow> {
        let mut res = self
            .db
            .query("SELECT name, properties FROM dfb_collections WHERE name = $name")
            .bind(("name", name.to_string()))
            .await?;
        let rows: Vec<CollectionRow> = res.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))
    }

    async fn fetch_row(&self, collection: &str, key: &str) -> BackendResult<Option<DocRow>> {
        let mut res = self
            .db
            .query(format!(
                "SELECT {DOC_COLUMNS} FROM dfb_documents WHERE collection = $c AND doc_id = $d"
            ))
            .bind(("c", collection.to_string()))
            .bind(("d", key.to_string()))
            .await?;
        let rows: Vec<DocRow> = res.take(0)?;
        Ok(rows.into_iter().next())
    }

    async fn count(&self, collection: &str) -> BackendResult<u64> {
        let mut res = self
            .db
            .query("SELECT count() AS total FROM dfb_documents WHERE collection = $c GROUP ALL")
            .bind(("c", collection.to_string()))
            .await?;
        let rows: Vec<CountRow> = res.take(0)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }

    fn materialize(row: &DocRow) -> BackendResult<Record> {
        let mut out = Record::new();
        out.insert(ID_FIELD.to_string(), serde_json::from_str(&row.id_json)?);
        out.insert(REV_FIELD.to_string(), Value::String(row.rev.to_string()));
        let body: Record = serde_json::from_str(&row.body)?;
        out.extend(body);
        Ok(out)
    }

    fn ack(id: &Value, rev: u64) -> Record {
        let mut ack = Record::new();
        ack.insert("ok".to_string(), Value::Bool(true));
        ack.insert("id".to_string(), id.clone());
        ack.insert("rev".to_string(), Value::String(rev.to_string()));
        ack
    }

    fn supplied_revision(record: &Record) -> Option<u64> {
        match record.get(REV_FIELD)? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    async fn store_one(&self, collection: &str, mut record: Record) -> BackendResult<Record> {
        let id = match record.remove(ID_FIELD) {
            Some(Value::Null) | None => Value::String(uuid::Uuid::new_v4().simple().to_string()),
            Some(id) => id,
        };
        let key = record_key(&id);
        let supplied = Self::supplied_revision(&record);
        record.remove(REV_FIELD);
        let body = serde_json::to_string(&record)?;

        match self.fetch_row(collection, &key).await? {
            Some(existing) => {
                if supplied != Some(existing.rev) {
                    return Err(BackendError::RevisionConflict {
                        id: key,
                        expected: supplied
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| "none".to_string()),
                        actual: existing.rev.to_string(),
                    });
                }
                let mut res = self
                    .db
                    .query(
                        "UPDATE dfb_documents SET rev = $next, body = $body \
                         WHERE collection = $c AND doc_id = $d AND rev = $rev RETURN rev",
                    )
                    .bind(("next", existing.rev + 1))
                    .bind(("body", body))
                    .bind(("c", collection.to_string()))
                    .bind(("d", key.clone()))
                    .bind(("rev", existing.rev))
                    .await?
                    .check()?;
                let updated: Vec<RevRow> = res.take(0)?;
                match updated.first() {
                    Some(row) => Ok(Self::ack(&id, row.rev)),
                    None => Err(BackendError::RevisionConflict {
                        id: key,
                        expected: existing.rev.to_string(),
                        actual: "unknown".to_string(),
                    }),
                }
            }
            None => {
                let row = DocRow {
                    collection: collection.to_string(),
                    doc_id: key,
                    id_json: id.to_string(),
                    rev: 1,
                    body,
                };
                self.db
                    .query("CREATE dfb_documents CONTENT $row RETURN NONE")
                    .bind(("row", row))
                    .await?
                    .check()?;
                Ok(Self::ack(&id, 1))
            }
        }
    }

    async fn remove_one(&self, collection: &str, record: &Record) -> BackendResult<Record> {
        let id = record
            .get(ID_FIELD)
            .cloned()
            .ok_or_else(|| BackendError::Query("record identifier missing".to_string()))?;
        let key = record_key(&id);
        let existing = self
            .fetch_row(collection, &key)
            .await?
            .ok_or_else(|| BackendError::RecordNotFound {
                collection: collection.to_string(),
                id: key.clone(),
            })?;
        if let Some(supplied) = Self::supplied_revision(record) {
            if supplied != existing.rev {
                return Err(BackendError::RevisionConflict {
                    id: key,
                    expected: supplied.to_string(),
                    actual: existing.rev.to_string(),
                });
            }
        }
        self.db
            .query("DELETE dfb_documents WHERE collection = $c AND doc_id = $d")
            .bind(("c", collection.to_string()))
            .bind(("d", key))
            .await?
            .check()?;
        Ok(Self::ack(&id, existing.rev + 1))
    }

    async fn query_rows(&self, collection: &str, query: &NativeQuery) -> BackendResult<FetchPage> {
        if query.filter.as_deref().is_some_and(|f| !f.trim().is_empty()) {
            return Err(BackendError::Unsupported(
                "filter expressions on SurrealDB documents".to_string(),
            ));
        }

        let total = self.count(collection).await?;
        let mut records = if query.order.is_some() {
            // Order is over document fields held in the JSON body.
            let mut res = self
                .db
                .query(format!(
                    "SELECT {DOC_COLUMNS} FROM dfb_documents WHERE collection = $c"
                ))
                .bind(("c", collection.to_string()))
                .await?;
            let rows: Vec<DocRow> = res.take(0)?;
            let mut records = rows
                .iter()
                .map(Self::materialize)
                .collect::<BackendResult<Vec<_>>>()?;
            sort_records(&mut records, query.order.as_deref());
            records
                .into_iter()
                .skip(query.offset as usize)
                .take(query.limit.map(|l| l as usize).unwrap_or(usize::MAX))
                .collect::<Vec<_>>()
        } else {
            let limit = query.limit.unwrap_or(u64::from(u32::MAX));
            let mut res = self
                .db
                .query(format!(
                    "SELECT {DOC_COLUMNS} FROM dfb_documents WHERE collection = $c \
                     ORDER BY doc_id LIMIT $limit START $start"
                ))
                .bind(("c", collection.to_string()))
                .bind(("limit", limit))
                .bind(("start", query.offset))
                .await?;
            let rows: Vec<DocRow> = res.take(0)?;
            rows.iter()
                .map(Self::materialize)
                .collect::<BackendResult<Vec<_>>>()?
        };

        if let Some(fields) = &query.fields {
            records = records
                .iter()
                .map(|r| project(r, ID_FIELD, fields))
                .collect();
        }

        Ok(FetchPage {
            rows: records,
            total: Some(total),
            offset: query.offset,
            next: None,
        })
    }
}

#[async_trait]
impl BackendConnection for SurrealConnection {
    fn kind(&self) -> BackendKind {
        BackendKind::SurrealDb
    }

    async fn select_collection(&self, name: &str) -> BackendResult<()> {
        self.require_collection(name).await.map(|_| ())
    }

    async fn fetch_one(&self, collection: &str, id: &Value) -> BackendResult<Option<Record>> {
        self.require_collection(collection).await?;
        self.fetch_row(collection, &record_key(id))
            .await?
            .as_ref()
            .map(Self::materialize)
            .transpose()
    }

    async fn fetch_many(
        &self,
        collection: &str,
        request: FetchRequest,
    ) -> BackendResult<FetchPage> {
        self.require_collection(collection).await?;
        match request {
            FetchRequest::Ids { ids, .. } => {
                let keys: Vec<String> = ids.iter().map(record_key).collect();
                let mut res = self
                    .db
                    .query(format!(
                        "SELECT {DOC_COLUMNS} FROM dfb_documents \
                         WHERE collection = $c AND doc_id IN $keys"
                    ))
                    .bind(("c", collection.to_string()))
                    .bind(("keys", keys.clone()))
                    .await?;
                let found: Vec<DocRow> = res.take(0)?;
                let mut rows = Vec::with_capacity(found.len());
                for key in &keys {
                    if let Some(row) = found.iter().find(|r| &r.doc_id == key) {
                        rows.push(Self::materialize(row)?);
                    }
                }
                Ok(FetchPage {
                    total: Some(rows.len() as u64),
                    rows,
                    offset: 0,
                    next: None,
                })
            }
            FetchRequest::Query(query) => self.query_rows(collection, &query).await,
        }
    }

    async fn store(&self, collection: &str, record: Record) -> BackendResult<Record> {
        self.require_collection(collection).await?;
        self.store_one(collection, record).await
    }

    async fn store_many(
        &self,
        collection: &str,
        records: Vec<Record>,
    ) -> BackendResult<BulkOutcome> {
        self.require_collection(collection).await?;
        debug!(collection, count = records.len(), "bulk store");
        let mut acks = Vec::with_capacity(records.len());
        for record in records {
            acks.push(self.store_one(collection, record).await);
        }
        Ok(acks)
    }

    async fn remove(&self, collection: &str, record: Record) -> BackendResult<Record> {
        self.require_collection(collection).await?;
        self.remove_one(collection, &record).await
    }

    async fn remove_many(
        &self,
        collection: &str,
        records: Vec<Record>,
    ) -> BackendResult<BulkOutcome> {
        self.require_collection(collection).await?;
        debug!(collection, count = records.len(), "bulk remove");
        let mut acks = Vec::with_capacity(records.len());
        for record in &records {
            acks.push(self.remove_one(collection, record).await);
        }
        Ok(acks)
    }

    async fn list_collections(&self) -> BackendResult<Vec<String>> {
        let mut res = self
            .db
            .query("SELECT name FROM dfb_collections ORDER BY name")
            .await?;
        let rows: Vec<NameRow> = res.take(0)?;
        Ok(rows.into_iter().map(|r| r.name).collect())
    }

    async fn describe_collection(&self, name: &str) -> BackendResult<Record> {
        let row = self.require_collection(name).await?;
        let mut info: Record = serde_json::from_str(&row.properties)?;
        info.insert("doc_count".to_string(), json!(self.count(name).await?));
        Ok(info)
    }

    async fn create_collection(&self, name: &str, properties: &Record) -> BackendResult<()> {
        if self.require_collection(name).await.is_ok() {
            return Err(BackendError::CollectionExists(name.to_string()));
        }
        let row = CollectionRow {
            name: name.to_string(),
            properties: serde_json::to_string(properties)?,
        };
        self.db
            .query("CREATE dfb_collections CONTENT $row RETURN NONE")
            .bind(("row", row))
            .await?
            .check()?;
        info!(collection = name, "collection created");
        Ok(())
    }

    async fn update_collection(&self, name: &str, properties: &Record) -> BackendResult<()> {
        let row = self.require_collection(name).await?;
        let mut merged: Record = serde_json::from_str(&row.properties)?;
        merged.extend(properties.clone());
        self.db
            .query("UPDATE dfb_collections SET properties = $p WHERE name = $name")
            .bind(("p", serde_json::to_string(&merged)?))
            .bind(("name", name.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> BackendResult<()> {
        self.require_collection(name).await?;
        self.db
            .query(
                "DELETE dfb_documents WHERE collection = $name; \
                 DELETE dfb_collections WHERE name = $name;",
            )
            .bind(("name", name.to_string()))
            .await?
            .check()?;
        info!(collection = name, "collection deleted");
        Ok(())
    }
}
