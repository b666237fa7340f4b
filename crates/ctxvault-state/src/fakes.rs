//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryEntryRepository` satisfies the `EntryRepository` contract without
//! any external dependencies, counts every call it receives, and can be told
//! to fail specific operations. `MemoryStorageBackend` hands out one such
//! repository per owner.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::{MemoryEntry, OwnerId};
use crate::storage_traits::*;

/// Repository operation, used for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoOp {
    GetAll,
    Get,
    Put,
    Delete,
    Clear,
}

/// Number of calls received per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_all: usize,
    pub get: usize,
    pub put: usize,
    pub delete: usize,
    pub clear: usize,
}

impl CallCounts {
    /// Calls that change durable state.
    pub fn mutations(&self) -> usize {
        self.put + self.delete + self.clear
    }
}

#[derive(Debug, Default)]
struct Counters {
    get_all: AtomicUsize,
    get: AtomicUsize,
    put: AtomicUsize,
    delete: AtomicUsize,
    clear: AtomicUsize,
}

#[derive(Debug, Default)]
struct Faults {
    ops: HashSet<RepoOp>,
    delete_ids: HashSet<String>,
}

// ---------------------------------------------------------------------------
// MemoryEntryRepository
// ---------------------------------------------------------------------------

/// In-memory repository backed by an insertion-ordered `Vec<MemoryEntry>`.
#[derive(Debug, Default)]
pub struct MemoryEntryRepository {
    entries: Mutex<Vec<MemoryEntry>>,
    counters: Counters,
    faults: Mutex<Faults>,
}

impl MemoryEntryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository pre-populated with `entries`, without counting any calls.
    pub fn with_entries(entries: Vec<MemoryEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            ..Self::default()
        }
    }

    /// Snapshot of the call counters.
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            get_all: self.counters.get_all.load(Ordering::SeqCst),
            get: self.counters.get.load(Ordering::SeqCst),
            put: self.counters.put.load(Ordering::SeqCst),
            delete: self.counters.delete.load(Ordering::SeqCst),
            clear: self.counters.clear.load(Ordering::SeqCst),
        }
    }

    /// Make every subsequent call of `op` fail until [`Self::clear_failures`].
    pub fn fail_op(&self, op: RepoOp) {
        self.faults.lock().unwrap().ops.insert(op);
    }

    /// Make deletes of this specific id fail.
    pub fn fail_delete_of(&self, id: &str) {
        self.faults.lock().unwrap().delete_ids.insert(id.to_string());
    }

    pub fn clear_failures(&self) {
        let mut faults = self.faults.lock().unwrap();
        faults.ops.clear();
        faults.delete_ids.clear();
    }

    /// Current stored entries, bypassing the counters.
    pub fn stored(&self) -> Vec<MemoryEntry> {
        self.entries.lock().unwrap().clone()
    }

    fn record(&self, op: RepoOp) -> StorageResult<()> {
        let counter = match op {
            RepoOp::GetAll => &self.counters.get_all,
            RepoOp::Get => &self.counters.get,
            RepoOp::Put => &self.counters.put,
            RepoOp::Delete => &self.counters.delete,
            RepoOp::Clear => &self.counters.clear,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        if self.faults.lock().unwrap().ops.contains(&op) {
            return Err(StorageError::Backend(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl EntryRepository for MemoryEntryRepository {
    async fn get_all(&self) -> StorageResult<Vec<MemoryEntry>> {
        self.record(RepoOp::GetAll)?;
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn get(&self, id: &str) -> StorageResult<Option<MemoryEntry>> {
        self.record(RepoOp::Get)?;
        let entries = self.entries.lock().unwrap();
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    async fn put(&self, entry: &MemoryEntry) -> StorageResult<()> {
        self.record(RepoOp::Put)?;
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry.clone(),
            None => entries.push(entry.clone()),
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        self.record(RepoOp::Delete)?;
        if self.faults.lock().unwrap().delete_ids.contains(id) {
            return Err(StorageError::Backend(format!("injected delete failure for {id}")));
        }
        self.entries.lock().unwrap().retain(|e| e.id != id);
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        self.record(RepoOp::Clear)?;
        self.entries.lock().unwrap().clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStorageBackend
// ---------------------------------------------------------------------------

/// In-memory backend backed by a `HashMap<OwnerId, MemoryEntryRepository>`.
#[derive(Debug, Default)]
pub struct MemoryStorageBackend {
    repos: Mutex<HashMap<OwnerId, Arc<MemoryEntryRepository>>>,
}

impl MemoryStorageBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete fake for `owner`, created on first use.
    pub fn fake(&self, owner: &OwnerId) -> Arc<MemoryEntryRepository> {
        let mut repos = self.repos.lock().unwrap();
        repos
            .entry(owner.clone())
            .or_insert_with(|| Arc::new(MemoryEntryRepository::new()))
            .clone()
    }

    /// Seed an owner's durable collection.
    pub fn seed(&self, owner: &OwnerId, entries: Vec<MemoryEntry>) -> Arc<MemoryEntryRepository> {
        let repo = Arc::new(MemoryEntryRepository::with_entries(entries));
        self.repos
            .lock()
            .unwrap()
            .insert(owner.clone(), repo.clone());
        repo
    }
}

#[async_trait]
impl StorageBackend for MemoryStorageBackend {
    fn repository(&self, owner: &OwnerId) -> Arc<dyn EntryRepository> {
        self.fake(owner)
    }

    async fn owners(&self) -> StorageResult<Vec<OwnerId>> {
        let repos = self.repos.lock().unwrap();
        let mut owners: Vec<OwnerId> = repos
            .iter()
            .filter(|(_, repo)| !repo.entries.lock().unwrap().is_empty())
            .map(|(owner, _)| owner.clone())
            .collect();
        owners.sort();
        Ok(owners)
    }
}
