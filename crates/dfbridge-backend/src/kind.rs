//! Backend kinds and their static capability descriptors.
//!
//! Every backend a service can be configured with is one variant of
//! [`BackendKind`]. The kind fixes what the adapter layer may ask of the
//! connection (filters, bulk calls, revisions, metadata mutation) and the
//! identifier/revision field names of its records. The kind is resolved once
//! from configuration and never re-dispatched per call.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendKind {
    /// CouchDB document store
    CouchDb,
    /// Salesforce REST API (SObjects queried with SOQL)
    Salesforce,
    /// Generic OpenStack Swift object storage
    OpenStack,
    /// Rackspace Cloud Files (OpenStack with Rackspace identity defaults)
    RackspaceCloudFiles,
    /// SurrealDB used as a revisioned document store
    SurrealDb,
}

/// What a backend natively supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Native filter/query language for record selection
    pub filter: bool,
    /// True multi-record store/delete calls
    pub batch: bool,
    /// Optimistic-concurrency revision tokens on records
    pub revisions: bool,
    /// Collections can be created, updated and deleted
    pub metadata_mutation: bool,
    /// Listing returns view rows (`id`, `key`, `value`, optional `doc`)
    pub view_rows: bool,
    /// Listing pages through a continuation token
    pub cursor: bool,
    /// Identifier field name is fixed by the backend
    pub fixed_identifier: bool,
}

impl BackendKind {
    /// Every kind, in declaration order.
    pub const ALL: [BackendKind; 5] = [
        BackendKind::CouchDb,
        BackendKind::Salesforce,
        BackendKind::OpenStack,
        BackendKind::RackspaceCloudFiles,
        BackendKind::SurrealDb,
    ];

    /// The capability descriptor bound to this kind.
    pub const fn capabilities(self) -> Capabilities {
        match self {
            BackendKind::CouchDb => Capabilities {
                filter: false,
                batch: true,
                revisions: true,
                metadata_mutation: true,
                view_rows: true,
                cursor: false,
                fixed_identifier: true,
            },
            BackendKind::Salesforce => Capabilities {
                filter: true,
                batch: false,
                revisions: false,
                metadata_mutation: false,
                view_rows: false,
                cursor: true,
                fixed_identifier: true,
            },
            BackendKind::OpenStack | BackendKind::RackspaceCloudFiles => Capabilities {
                filter: false,
                batch: false,
                revisions: false,
                metadata_mutation: true,
                view_rows: false,
                cursor: false,
                fixed_identifier: false,
            },
            BackendKind::SurrealDb => Capabilities {
                filter: false,
                batch: true,
                revisions: true,
                metadata_mutation: true,
                view_rows: false,
                cursor: false,
                fixed_identifier: true,
            },
        }
    }

    /// Default identifier field of records on this backend.
    pub const fn id_field(self) -> &'static str {
        match self {
            BackendKind::CouchDb => "_id",
            BackendKind::Salesforce => "Id",
            BackendKind::OpenStack | BackendKind::RackspaceCloudFiles => "name",
            BackendKind::SurrealDb => "id",
        }
    }

    /// Revision field, for backends with optimistic concurrency.
    pub const fn revision_field(self) -> Option<&'static str> {
        match self {
            BackendKind::CouchDb => Some("_rev"),
            BackendKind::SurrealDb => Some("rev"),
            _ => None,
        }
    }

    /// Human-readable product name used in error messages.
    pub const fn label(self) -> &'static str {
        match self {
            BackendKind::CouchDb => "CouchDB",
            BackendKind::Salesforce => "Salesforce",
            BackendKind::OpenStack => "OpenStack Object Storage",
            BackendKind::RackspaceCloudFiles => "Rackspace Cloud Files",
            BackendKind::SurrealDb => "SurrealDB",
        }
    }

    /// Configuration string for this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            BackendKind::CouchDb => "couchdb",
            BackendKind::Salesforce => "salesforce",
            BackendKind::OpenStack => "openstack",
            BackendKind::RackspaceCloudFiles => "rackspace cloudfiles",
            BackendKind::SurrealDb => "surrealdb",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "couchdb" | "couch_db" | "couch" => Ok(BackendKind::CouchDb),
            "salesforce" | "salesforce_db" => Ok(BackendKind::Salesforce),
            "openstack" | "openstack object storage" | "openstack_obj_store" => {
                Ok(BackendKind::OpenStack)
            }
            "rackspace cloudfiles" | "rackspace" | "rackspace_cloud_files" => {
                Ok(BackendKind::RackspaceCloudFiles)
            }
            "surrealdb" | "surreal" => Ok(BackendKind::SurrealDb),
            other => Err(format!("unknown backend type: {other}")),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BackendKind> for String {
    fn from(kind: BackendKind) -> Self {
        kind.as_str().to_string()
    }
}
