//! Storage trait definitions for ctxvault
//!
//! - `EntryRepository`: durable entry collection for one owner, keyed by entry id
//! - `StorageBackend`: hands out one repository per owner and enumerates owners
//!
//! Both traits are async and backend-agnostic. In-memory fakes live in the
//! `fakes` module; the SurrealDB implementation lives in `surreal_repository`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::{MemoryEntry, OwnerId};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Durable entry collection for a single owner.
///
/// Guarantees:
/// - `put` inserts or replaces by `entry.id`.
/// - `get_all` returns every stored entry in a stable order (oldest first).
/// - Field values round-trip exactly, including timestamps and token counts.
/// - `delete` of an absent id is a no-op.
#[async_trait]
pub trait EntryRepository: Send + Sync {
    /// Load every entry for this owner.
    async fn get_all(&self) -> StorageResult<Vec<MemoryEntry>>;

    /// Load one entry by id.
    async fn get(&self, id: &str) -> StorageResult<Option<MemoryEntry>>;

    /// Insert or replace an entry.
    async fn put(&self, entry: &MemoryEntry) -> StorageResult<()>;

    /// Remove an entry by id. No-op if absent.
    async fn delete(&self, id: &str) -> StorageResult<()>;

    /// Remove every entry for this owner.
    async fn clear(&self) -> StorageResult<()>;
}

/// Source of per-owner repositories.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Repository scoped to `owner`. Repositories for different owners never
    /// observe each other's entries.
    fn repository(&self, owner: &OwnerId) -> Arc<dyn EntryRepository>;

    /// Owners that currently hold at least one durable entry.
    async fn owners(&self) -> StorageResult<Vec<OwnerId>>;
}
