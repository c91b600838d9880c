//! Response envelope returned by table operations.

use dfbridge_backend::Record;
use serde::{Deserialize, Serialize};

/// Listing metadata, attached only when requested or implied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Total number of matching records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Continuation token for the next page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl ResponseMeta {
    pub fn is_empty(&self) -> bool {
        self.count.is_none() && self.next.is_none()
    }
}

/// Ordered cleaned records plus optional metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub resource: Vec<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

impl Response {
    pub fn new(resource: Vec<Record>) -> Self {
        Self {
            resource,
            meta: None,
        }
    }

    /// Attach metadata; empty metadata is dropped.
    pub fn with_meta(mut self, meta: ResponseMeta) -> Self {
        self.meta = (!meta.is_empty()).then_some(meta);
        self
    }

    pub fn len(&self) -> usize {
        self.resource.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resource.is_empty()
    }

    /// First record, for single-record operations.
    pub fn into_first(self) -> Option<Record> {
        self.resource.into_iter().next()
    }
}
