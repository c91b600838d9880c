//! Collection lifecycle operations.

use std::sync::Arc;

use dfbridge_backend::{BackendConnection, BackendKind, FieldInfo, Record};
use serde_json::Value;
use tracing::info;

use crate::descriptor::DescriptorCache;
use crate::error::{AdapterError, AdapterResult};

const METADATA_UNSUPPORTED: &str = "Metadata actions currently not supported.";

/// List, describe and mutate the collections of one connection.
pub struct SchemaAdapter<C: ?Sized> {
    connection: Arc<C>,
    cache: Arc<DescriptorCache>,
}

impl<C: ?Sized> Clone for SchemaAdapter<C> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            cache: self.cache.clone(),
        }
    }
}

fn name_record(name: &str) -> Record {
    let mut out = Record::new();
    out.insert("name".to_string(), Value::String(name.to_string()));
    out
}

impl<C> SchemaAdapter<C>
where
    C: BackendConnection + ?Sized,
{
    pub fn new(connection: Arc<C>) -> Self {
        Self::with_cache(connection, Arc::new(DescriptorCache::new()))
    }

    pub fn with_cache(connection: Arc<C>, cache: Arc<DescriptorCache>) -> Self {
        Self { connection, cache }
    }

    pub fn kind(&self) -> BackendKind {
        self.connection.kind()
    }

    pub fn cache(&self) -> &Arc<DescriptorCache> {
        &self.cache
    }

    fn require_metadata_mutation(&self) -> AdapterResult<()> {
        if self.kind().capabilities().metadata_mutation {
            Ok(())
        } else {
            Err(AdapterError::NotImplemented(METADATA_UNSUPPORTED.to_string()))
        }
    }

    /// Collection names. Cached descriptors of collections that no longer
    /// exist are dropped; `refresh` drops every cached descriptor.
    pub async fn list_collections(&self, refresh: bool) -> AdapterResult<Vec<String>> {
        if refresh {
            self.cache.clear().await;
        }
        let mut names = self.connection.list_collections().await.map_err(|e| {
            AdapterError::wrap("Failed to list tables.", e.into())
        })?;
        names.sort();
        self.cache.retain(&names).await;
        Ok(names)
    }

    /// Backend properties of `name`, with the name included.
    pub async fn describe_collection(&self, name: &str) -> AdapterResult<Record> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AdapterError::bad_request("Table name can not be empty."));
        }
        let mut info = self.connection.describe_collection(name).await.map_err(|e| {
            AdapterError::wrap(
                &format!("Failed to get table properties for table '{name}'."),
                e.into(),
            )
        })?;
        info.insert("name".to_string(), Value::String(name.to_string()));
        Ok(info)
    }

    /// Metadata of one field on fixed-schema backends.
    pub async fn describe_field(&self, collection: &str, field: &str) -> AdapterResult<FieldInfo> {
        let collection = collection.trim();
        if collection.is_empty() {
            return Err(AdapterError::bad_request("Table name can not be empty."));
        }
        let fields = self.connection.fields(collection).await?.unwrap_or_default();
        fields
            .into_iter()
            .find(|f| f.name.eq_ignore_ascii_case(field.trim()))
            .ok_or_else(|| AdapterError::not_found(format!("Field '{}' not found.", field.trim())))
    }

    pub async fn create_collection(&self, name: &str, properties: &Record) -> AdapterResult<Record> {
        self.require_metadata_mutation()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(AdapterError::bad_request("No 'name' field in data."));
        }
        self.connection
            .create_collection(name, properties)
            .await
            .map_err(|e| {
                AdapterError::wrap(&format!("Failed to create table '{name}'."), e.into())
            })?;
        self.cache.invalidate(name).await;
        info!(collection = name, "collection created");
        Ok(name_record(name))
    }

    pub async fn update_collection(&self, name: &str, properties: &Record) -> AdapterResult<Record> {
        self.require_metadata_mutation()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(AdapterError::bad_request("No 'name' field in data."));
        }
        self.connection
            .update_collection(name, properties)
            .await
            .map_err(|e| {
                AdapterError::wrap(&format!("Failed to update table '{name}'."), e.into())
            })?;
        self.cache.invalidate(name).await;
        info!(collection = name, "collection updated");
        Ok(name_record(name))
    }

    pub async fn delete_collection(&self, name: &str) -> AdapterResult<Record> {
        self.require_metadata_mutation()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(AdapterError::bad_request("Table name can not be empty."));
        }
        self.connection.delete_collection(name).await.map_err(|e| {
            AdapterError::wrap(&format!("Failed to delete table '{name}'."), e.into())
        })?;
        self.cache.invalidate(name).await;
        info!(collection = name, "collection deleted");
        Ok(name_record(name))
    }
}
