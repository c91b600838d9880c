//! Collection descriptors and their cache.
//!
//! A [`CollectionDescriptor`] names the identifier and revision fields of a
//! collection. Descriptors are resolved lazily on first access and kept in a
//! [`DescriptorCache`] owned by the adapters until explicitly invalidated.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use dfbridge_backend::{BackendKind, FieldInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AdapterError, AdapterResult};

/// Type of a collection's identifier values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdType {
    #[default]
    String,
    Integer,
}

impl IdType {
    /// Coerce a caller-supplied identifier to this type.
    pub fn coerce(self, id: &Value) -> AdapterResult<Value> {
        match (self, id) {
            (IdType::String, Value::String(_)) => Ok(id.clone()),
            (IdType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (IdType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(id.clone()),
            (IdType::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| AdapterError::bad_request(format!("Invalid integer identifier '{s}'."))),
            _ => Err(AdapterError::bad_request(format!(
                "Invalid identifier value {id}."
            ))),
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdType::String => f.write_str("string"),
            IdType::Integer => f.write_str("integer"),
        }
    }
}

impl FromStr for IdType {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "text" => Ok(IdType::String),
            "integer" | "int" | "id" | "bigint" => Ok(IdType::Integer),
            other => Err(AdapterError::bad_request(format!(
                "Invalid identifier type '{other}'."
            ))),
        }
    }
}

/// Identifier metadata of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    pub name: String,
    pub id_field: String,
    pub id_type: IdType,
    pub revision_field: Option<String>,
    /// Field metadata for fixed-schema backends
    pub fields: Option<Vec<FieldInfo>>,
}

impl CollectionDescriptor {
    /// Descriptor using the backend kind's identifier conventions.
    pub fn for_kind(name: &str, kind: BackendKind) -> Self {
        Self {
            name: name.to_string(),
            id_field: kind.id_field().to_string(),
            id_type: IdType::String,
            revision_field: kind.revision_field().map(str::to_string),
            fields: None,
        }
    }

    pub fn with_fields(mut self, fields: Option<Vec<FieldInfo>>) -> Self {
        self.fields = fields;
        self
    }

    pub fn has_revisions(&self) -> bool {
        self.revision_field.is_some()
    }

    /// Look up a field case-insensitively.
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields
            .as_ref()?
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// Shared cache of resolved descriptors, keyed by collection name.
///
/// Reads proceed concurrently; resolution of a missing entry takes the
/// write lock so a collection is resolved by one writer at a time.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    entries: RwLock<HashMap<String, Arc<CollectionDescriptor>>>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<CollectionDescriptor>> {
        self.entries.read().await.get(name).cloned()
    }

    /// Cached descriptor, or resolve and cache it.
    pub async fn get_or_resolve<F, Fut>(
        &self,
        name: &str,
        resolve: F,
    ) -> AdapterResult<Arc<CollectionDescriptor>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AdapterResult<CollectionDescriptor>>,
    {
        if let Some(found) = self.get(name).await {
            return Ok(found);
        }

        let mut entries = self.entries.write().await;
        if let Some(found) = entries.get(name) {
            return Ok(found.clone());
        }
        let descriptor = Arc::new(resolve().await?);
        debug!(collection = name, "descriptor resolved");
        entries.insert(name.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    pub async fn invalidate(&self, name: &str) {
        if self.entries.write().await.remove(name).is_some() {
            debug!(collection = name, "descriptor invalidated");
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Drop descriptors of collections not in `live`.
    pub async fn retain(&self, live: &[String]) {
        self.entries
            .write()
            .await
            .retain(|name, _| live.iter().any(|l| l == name));
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn coerces_identifiers() {
        assert_eq!(IdType::Integer.coerce(&json!("42")).unwrap(), json!(42));
        assert_eq!(IdType::String.coerce(&json!(7)).unwrap(), json!("7"));
        assert!(matches!(
            IdType::Integer.coerce(&json!("abc")),
            Err(AdapterError::BadRequest(_))
        ));
    }

    #[test]
    fn descriptor_follows_kind_conventions() {
        let d = CollectionDescriptor::for_kind("db", BackendKind::CouchDb);
        assert_eq!(d.id_field, "_id");
        assert_eq!(d.revision_field.as_deref(), Some("_rev"));
        let d = CollectionDescriptor::for_kind("Account", BackendKind::Salesforce);
        assert!(!d.has_revisions());
    }

    #[tokio::test]
    async fn resolves_once_until_invalidated() {
        let cache = DescriptorCache::new();
        let calls = AtomicUsize::new(0);
        let resolve = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(CollectionDescriptor::for_kind("todo", BackendKind::SurrealDb))
        };

        cache.get_or_resolve("todo", resolve).await.unwrap();
        cache.get_or_resolve("todo", resolve).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate("todo").await;
        cache.get_or_resolve("todo", resolve).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retain_drops_stale_entries() {
        let cache = DescriptorCache::new();
        for name in ["a", "b"] {
            cache
                .get_or_resolve(name, || async {
                    Ok(CollectionDescriptor::for_kind(name, BackendKind::CouchDb))
                })
                .await
                .unwrap();
        }
        cache.retain(&["b".to_string()]).await;
        assert!(cache.get("a").await.is_none());
        assert_eq!(cache.len().await, 1);
    }
}
