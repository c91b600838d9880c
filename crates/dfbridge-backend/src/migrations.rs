//! SurrealDB schema initialization for the document backend
//!
//! Collections and their documents live in two tables. Document bodies and
//! identifiers are stored as JSON text so that arbitrary record shapes round
//! trip without coercion through SurrealDB's own value model.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::connection::BackendResult;

/// Initialize all dfbridge tables. Idempotent.
pub async fn init_schema(db: &Surreal<Any>) -> BackendResult<()> {
    init_collections_table(db).await?;
    init_documents_table(db).await?;
    info!("dfbridge schema initialized");
    Ok(())
}

/// `dfb_collections` table
///
/// ```text
/// TABLE dfb_collections {
///   name:        STRING (unique)
///   properties:  STRING (JSON object)
/// }
/// ```
async fn init_collections_table(db: &Surreal<Any>) -> BackendResult<()> {
    debug!("Initializing dfb_collections table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS dfb_collections SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_collection_name ON TABLE dfb_collections COLUMNS name UNIQUE;
    "#;

    db.query(sql).await?.check()?;
    Ok(())
}

/// `dfb_documents` table
///
/// ```text
/// TABLE dfb_documents {
///   collection:  STRING
///   doc_id:      STRING (canonical identifier key)
///   id_json:     STRING (identifier as submitted, JSON)
///   rev:         INT (starts at 1, +1 per write)
///   body:        STRING (JSON object without identifier and revision)
/// }
/// ```
///
/// `(collection, doc_id)` is unique.
async fn init_documents_table(db: &Surreal<Any>) -> BackendResult<()> {
    debug!("Initializing dfb_documents table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS dfb_documents SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_collection_doc ON TABLE dfb_documents COLUMNS collection, doc_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_collection ON TABLE dfb_documents COLUMNS collection;
    "#;

    db.query(sql).await?.check()?;
    Ok(())
}
