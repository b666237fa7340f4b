//! SurrealDB-backed EntryRepository and StorageBackend
//!
//! Uses `schema::EntryRow` for persistence, converting to/from `MemoryEntry`
//! at the boundary. All owners share the `memory_entries` table, partitioned
//! by the `owner` column.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, instrument};

use crate::handle;
use crate::schema::{EntryRow, MemoryEntry, OwnerId};
use crate::storage_traits::{EntryRepository, StorageBackend, StorageResult};

/// SurrealDB-backed implementation of [`EntryRepository`] for one owner.
#[derive(Clone)]
pub struct SurrealEntryRepository {
    db: Surreal<Any>,
    owner: OwnerId,
}

impl SurrealEntryRepository {
    pub fn new(db: Surreal<Any>, owner: OwnerId) -> Self {
        Self { db, owner }
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    fn key(&self, id: &str) -> [String; 2] {
        EntryRow::record_key(&self.owner, id)
    }
}

#[async_trait]
impl EntryRepository for SurrealEntryRepository {
    #[instrument(skip(self), fields(owner = %self.owner))]
    async fn get_all(&self) -> StorageResult<Vec<MemoryEntry>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM memory_entries WHERE owner = $owner \
                 ORDER BY created_at ASC, entry_id ASC",
            )
            .bind(("owner", self.owner.key()))
            .await?;

        let rows: Vec<EntryRow> = res.take(0)?;
        debug!(count = rows.len(), "loaded entries");
        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    #[instrument(skip(self), fields(owner = %self.owner))]
    async fn get(&self, id: &str) -> StorageResult<Option<MemoryEntry>> {
        let mut res = self
            .db
            .query("SELECT * FROM type::thing('memory_entries', $key)")
            .bind(("key", self.key(id)))
            .await?;

        let rows: Vec<EntryRow> = res.take(0)?;
        rows.into_iter().next().map(EntryRow::into_entry).transpose()
    }

    #[instrument(skip(self, entry), fields(owner = %self.owner, entry_id = %entry.id))]
    async fn put(&self, entry: &MemoryEntry) -> StorageResult<()> {
        let row = EntryRow::from_entry(&self.owner, entry);

        self.db
            .query("UPSERT type::thing('memory_entries', $key) CONTENT $row")
            .bind(("key", self.key(&entry.id)))
            .bind(("row", row))
            .await?
            .check()?;

        Ok(())
    }

    #[instrument(skip(self), fields(owner = %self.owner))]
    async fn delete(&self, id: &str) -> StorageResult<()> {
        self.db
            .query("DELETE type::thing('memory_entries', $key)")
            .bind(("key", self.key(id)))
            .await?
            .check()?;

        Ok(())
    }

    #[instrument(skip(self), fields(owner = %self.owner))]
    async fn clear(&self) -> StorageResult<()> {
        self.db
            .query("DELETE memory_entries WHERE owner = $owner")
            .bind(("owner", self.owner.key()))
            .await?
            .check()?;

        Ok(())
    }
}

/// SurrealDB-backed [`StorageBackend`]: one shared connection, one
/// [`SurrealEntryRepository`] view per owner.
#[derive(Clone)]
pub struct SurrealStorageBackend {
    db: Surreal<Any>,
}

#[derive(Deserialize)]
struct OwnerRow {
    owner: String,
}

impl SurrealStorageBackend {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// In-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Ok(Self::new(handle::connect_in_memory().await?))
    }

    /// Resolve the connection from the environment, falling back to
    /// `local_path` on disk. See [`handle::connect_from_env`].
    pub async fn from_env(local_path: &Path) -> crate::Result<Self> {
        Ok(Self::new(handle::connect_from_env(local_path).await?))
    }
}

#[async_trait]
impl StorageBackend for SurrealStorageBackend {
    fn repository(&self, owner: &OwnerId) -> Arc<dyn EntryRepository> {
        Arc::new(SurrealEntryRepository::new(self.db.clone(), owner.clone()))
    }

    async fn owners(&self) -> StorageResult<Vec<OwnerId>> {
        let mut res = self
            .db
            .query("SELECT owner FROM memory_entries GROUP BY owner")
            .await?;

        let rows: Vec<OwnerRow> = res.take(0)?;
        let mut owners = rows
            .into_iter()
            .map(|r| r.owner.parse::<OwnerId>())
            .collect::<StorageResult<Vec<_>>>()?;
        owners.sort();
        Ok(owners)
    }
}
