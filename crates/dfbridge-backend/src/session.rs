//! Session refresh for REST backends.
//!
//! REST backends (Salesforce, OpenStack identity) hand out session tokens
//! that expire server-side. [`SessionRefresh`] wraps any connection and,
//! when a call fails with an expired session, re-authenticates and resends
//! the call exactly once. A second failure is returned to the caller.

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::connection::{
    BackendConnection, BackendResult, BulkOutcome, FetchPage, FetchRequest, FieldInfo, Record,
};
use crate::kind::BackendKind;

/// Connection wrapper that retries once after refreshing an expired session.
#[derive(Debug, Clone)]
pub struct SessionRefresh<C> {
    inner: C,
}

impl<C: BackendConnection> SessionRefresh<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    async fn with_refresh<T, F, Fut>(&self, op: &'static str, call: F) -> BackendResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        match call().await {
            Err(err) if err.is_session_expired() => {
                warn!(
                    event = "session.expired",
                    backend = %self.inner.kind(),
                    op,
                    error = %err,
                );
                self.inner.refresh_session().await?;
                call().await
            }
            other => other,
        }
    }
}

#[async_trait]
impl<C: BackendConnection> BackendConnection for SessionRefresh<C> {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn select_collection(&self, name: &str) -> BackendResult<()> {
        self.with_refresh("select_collection", || self.inner.select_collection(name))
            .await
    }

    async fn fetch_one(&self, collection: &str, id: &Value) -> BackendResult<Option<Record>> {
        self.with_refresh("fetch_one", || self.inner.fetch_one(collection, id))
            .await
    }

    async fn fetch_many(
        &self,
        collection: &str,
        request: FetchRequest,
    ) -> BackendResult<FetchPage> {
        self.with_refresh("fetch_many", || {
            self.inner.fetch_many(collection, request.clone())
        })
        .await
    }

    async fn store(&self, collection: &str, record: Record) -> BackendResult<Record> {
        self.with_refresh("store", || self.inner.store(collection, record.clone()))
            .await
    }

    async fn store_many(
        &self,
        collection: &str,
        records: Vec<Record>,
    ) -> BackendResult<BulkOutcome> {
        self.with_refresh("store_many", || {
            self.inner.store_many(collection, records.clone())
        })
        .await
    }

    async fn remove(&self, collection: &str, record: Record) -> BackendResult<Record> {
        self.with_refresh("remove", || self.inner.remove(collection, record.clone()))
            .await
    }

    async fn remove_many(
        &self,
        collection: &str,
        records: Vec<Record>,
    ) -> BackendResult<BulkOutcome> {
        self.with_refresh("remove_many", || {
            self.inner.remove_many(collection, records.clone())
        })
        .await
    }

    async fn list_collections(&self) -> BackendResult<Vec<String>> {
        self.with_refresh("list_collections", || self.inner.list_collections())
            .await
    }

    async fn describe_collection(&self, name: &str) -> BackendResult<Record> {
        self.with_refresh("describe_collection", || {
            self.inner.describe_collection(name)
        })
        .await
    }

    async fn fields(&self, collection: &str) -> BackendResult<Option<Vec<FieldInfo>>> {
        self.with_refresh("fields", || self.inner.fields(collection))
            .await
    }

    async fn create_collection(&self, name: &str, properties: &Record) -> BackendResult<()> {
        self.with_refresh("create_collection", || {
            self.inner.create_collection(name, properties)
        })
        .await
    }

    async fn update_collection(&self, name: &str, properties: &Record) -> BackendResult<()> {
        self.with_refresh("update_collection", || {
            self.inner.update_collection(name, properties)
        })
        .await
    }

    async fn delete_collection(&self, name: &str) -> BackendResult<()> {
        self.with_refresh("delete_collection", || self.inner.delete_collection(name))
            .await
    }

    async fn refresh_session(&self) -> BackendResult<()> {
        self.inner.refresh_session().await
    }
}
