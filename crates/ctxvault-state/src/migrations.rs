//! SurrealDB schema initialization

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all ctxvault tables.
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing ctxvault SurrealDB schema");
    init_memory_entries_table(db).await?;
    Ok(())
}

/// Initialize `memory_entries` table with indexes
///
/// Schema:
/// ```text
/// TABLE memory_entries {
///   id:                RECORD (memory_entries:⟨owner/entry_id⟩)
///   owner:             STRING (indexed; "workspace" | "agent:<id>")
///   entry_id:          STRING
///   title, content:    STRING
///   category, scope:   STRING
///   tags:              ARRAY<STRING>
///   token_count:       INT
///   created_at:        STRING (RFC 3339, nanosecond precision)
///   updated_at:        STRING
///   last_accessed_at:  STRING?
///   access_count:      INT
///   pinned:            BOOL
///   source_type:       STRING?
///   source_ref:        STRING?
/// }
/// ```
///
/// Constraints:
/// - `(owner, entry_id)` is unique; the record id is derived from it
/// - Budget and pin rules are enforced by the entry store, not the database
async fn init_memory_entries_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing memory_entries table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS memory_entries SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_owner ON TABLE memory_entries COLUMNS owner;
        DEFINE INDEX IF NOT EXISTS idx_owner_entry ON TABLE memory_entries COLUMNS owner, entry_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_owner_created_at ON TABLE memory_entries COLUMNS owner, created_at;
    "#;

    db.query(sql)
        .await
        .and_then(|res| res.check())
        .map_err(|e| StateError::SchemaSetup(format!("memory_entries: {e}")))?;
    info!("memory_entries table initialized");
    Ok(())
}
