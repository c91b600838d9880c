//! dfbridge-core: generic table and schema adapters
//!
//! ## Layer 1 - Request Semantics
//!
//! Turns caller requests (records, identifiers, filters, options) into
//! primitive calls on a `dfbridge_backend::BackendConnection` and shapes
//! the results into one response envelope, whatever the backend kind.
//!
//! ## Key Components
//!
//! - `TableAdapter`: retrieve / create / replace / patch / delete records
//! - `SchemaAdapter`: list, describe and mutate collections
//! - `BatchCoordinator`: bulk vs per-record dispatch, continue and rollback
//! - `RecordCodec`: write preparation and result cleaning
//! - `DescriptorCache`: lazily resolved identifier metadata per collection
//! - `ServiceConfig`: per-backend service settings and validation

pub mod batch;
pub mod codec;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod obs;
pub mod options;
pub mod response;
pub mod schema;
pub mod table;
pub mod telemetry;

pub use batch::{
    BatchCoordinator, BatchPolicy, BatchResult, BatchState, BatchUnit, UnitOutcome, Verb,
};
pub use codec::RecordCodec;
pub use config::{ConfigError, ConnectionSettings, ServiceConfig};
pub use descriptor::{CollectionDescriptor, DescriptorCache, IdType};
pub use error::{AdapterError, AdapterResult};
pub use options::{FieldSecurity, FieldSelection, RequestOptions};
pub use response::{Response, ResponseMeta};
pub use schema::SchemaAdapter;
pub use table::TableAdapter;
pub use telemetry::init_tracing;

/// dfbridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
