//! dfbridge-backend: backend connections for dfbridge adapters
//!
//! ## Layer 0 - Backend Access
//!
//! Focus: the primitive operations a backend exposes (fetch, store, remove,
//! collection metadata) and the static capabilities of each backend kind.
//! Request semantics (field selection, batching, rollback) live in
//! `dfbridge-core`.
//!
//! ## Key Components
//!
//! - `BackendConnection`: async trait every backend implements
//! - `BackendKind` / `Capabilities`: closed set of backends and what they support
//! - `SessionRefresh`: resend-once wrapper for expiring REST sessions
//! - `SurrealConnection`: SurrealDB as a revisioned document store
//! - `MemoryConnection`: in-memory fake mimicking any backend kind

pub mod connection;
mod error;
pub mod fakes;
pub mod kind;
mod migrations;
mod query;
pub mod session;
pub mod surreal;

pub use connection::{
    record_key, BackendConnection, BackendResult, BulkOutcome, FetchPage, FetchRequest, FieldInfo,
    NativeQuery, Record,
};
pub use error::BackendError;
pub use fakes::{CallCounts, MemoryConnection};
pub use kind::{BackendKind, Capabilities};
pub use session::SessionRefresh;
pub use surreal::{SurrealConfig, SurrealConnection};
