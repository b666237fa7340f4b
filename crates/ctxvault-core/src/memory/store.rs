//! Per-owner entry store with token-budget enforcement.
//!
//! The store keeps the canonical in-memory collection for one owner and
//! mirrors every mutation to its [`EntryRepository`]. Mutations are
//! durable-first: the repository call must succeed before memory changes,
//! so a persistence failure never leaves the two diverged.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use ctxvault_state::{Category, EntryRepository, MemoryEntry, OwnerId, Scope};

use super::error::{MemoryError, MemoryResult};
use crate::obs;
use crate::tokens::{count_tokens, TOKEN_BUDGET};

/// Fields supplied by the caller when creating an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    pub title: String,
    pub content: String,
    pub category: Category,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub scope: Scope,
}

impl NewEntry {
    pub fn new(title: impl Into<String>, content: impl Into<String>, category: Category) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            category,
            tags: Vec::new(),
            scope: Scope::default(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
}

/// Optional overrides applied at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOptions {
    pub pinned: bool,
    pub source_type: Option<String>,
    pub source_ref: Option<String>,
}

impl EntryOptions {
    pub fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }

    pub fn source(mut self, source_type: impl Into<String>, source_ref: Option<String>) -> Self {
        self.source_type = Some(source_type.into());
        self.source_ref = source_ref;
        self
    }
}

/// Partial update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<Category>,
    pub tags: Option<Vec<String>>,
    pub scope: Option<Scope>,
}

impl EntryPatch {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    fn apply(self, entry: &mut MemoryEntry) {
        if let Some(title) = self.title {
            entry.title = title;
        }
        if let Some(content) = self.content {
            entry.token_count = count_tokens(&content);
            entry.content = content;
        }
        if let Some(category) = self.category {
            entry.category = category;
        }
        if let Some(tags) = self.tags {
            entry.tags = tags;
        }
        if let Some(scope) = self.scope {
            entry.scope = scope;
        }
    }
}

/// Why an insert was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetRejection {
    /// Token cost of the rejected entry.
    pub requested: usize,
    /// Owner total at the time of the attempt.
    pub current_total: usize,
    pub budget: usize,
}

impl BudgetRejection {
    pub fn available(&self) -> usize {
        self.budget.saturating_sub(self.current_total)
    }
}

impl std::fmt::Display for BudgetRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "token budget exceeded: entry needs {} tokens, {} of {} available",
            self.requested,
            self.available(),
            self.budget
        )
    }
}

/// Result of [`EntryStore::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(MemoryEntry),
    Rejected(BudgetRejection),
}

impl InsertOutcome {
    pub fn entry(&self) -> Option<&MemoryEntry> {
        match self {
            InsertOutcome::Inserted(entry) => Some(entry),
            InsertOutcome::Rejected(_) => None,
        }
    }

    pub fn into_entry(self) -> Option<MemoryEntry> {
        match self {
            InsertOutcome::Inserted(entry) => Some(entry),
            InsertOutcome::Rejected(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, InsertOutcome::Rejected(_))
    }
}

#[derive(Debug, Default)]
struct StoreState {
    entries: Vec<MemoryEntry>,
    pinned: BTreeSet<String>,
    hydrated: bool,
}

impl StoreState {
    fn total_tokens(&self) -> usize {
        self.entries.iter().map(|e| e.token_count).sum()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    fn replace_all(&mut self, entries: Vec<MemoryEntry>) {
        self.pinned = entries
            .iter()
            .filter(|e| e.pinned)
            .map(|e| e.id.clone())
            .collect();
        self.entries = entries;
    }
}

/// Timestamps never move backwards, even if the wall clock does.
fn bump(previous: DateTime<Utc>) -> DateTime<Utc> {
    previous.max(Utc::now())
}

/// Canonical entry collection for one owner.
pub struct EntryStore {
    owner: OwnerId,
    repo: Arc<dyn EntryRepository>,
    budget: usize,
    state: RwLock<StoreState>,
}

impl std::fmt::Debug for EntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryStore")
            .field("owner", &self.owner)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl EntryStore {
    /// Un-hydrated store for `owner`. The first mutation or [`Self::hydrate`]
    /// loads the durable collection.
    pub fn new(owner: OwnerId, repo: Arc<dyn EntryRepository>) -> Self {
        Self {
            owner,
            repo,
            budget: TOKEN_BUDGET,
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    async fn load_if_needed(&self, state: &mut StoreState) -> MemoryResult<()> {
        if state.hydrated {
            return Ok(());
        }
        let entries = self.repo.get_all().await?;
        debug!(owner = %self.owner, count = entries.len(), "hydrated entry store");
        state.replace_all(entries);
        state.hydrated = true;
        Ok(())
    }

    /// Load the durable collection once per store lifetime. Later and
    /// concurrent calls wait on the same load and never re-issue it.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn hydrate(&self) -> MemoryResult<()> {
        let mut state = self.state.write().await;
        self.load_if_needed(&mut state).await
    }

    pub async fn is_hydrated(&self) -> bool {
        self.state.read().await.hydrated
    }

    /// Create an entry, or reject it if it would push the owner past the
    /// token budget. A rejection leaves memory and storage untouched.
    #[instrument(skip(self, new, opts), fields(owner = %self.owner, category = %new.category))]
    pub async fn insert(&self, new: NewEntry, opts: EntryOptions) -> MemoryResult<InsertOutcome> {
        if new.title.trim().is_empty() && new.content.trim().is_empty() {
            return Err(MemoryError::InvalidEntry("nothing to save".to_string()));
        }

        let token_count = count_tokens(&new.content);
        let mut state = self.state.write().await;
        self.load_if_needed(&mut state).await?;

        let current_total = state.total_tokens();
        if current_total + token_count > self.budget {
            let rejection = BudgetRejection {
                requested: token_count,
                current_total,
                budget: self.budget,
            };
            obs::emit_entry_rejected(&self.owner, &rejection);
            return Ok(InsertOutcome::Rejected(rejection));
        }

        let now = Utc::now();
        let entry = MemoryEntry {
            id: Uuid::new_v4().to_string(),
            title: new.title,
            content: new.content,
            category: new.category,
            scope: new.scope,
            tags: new.tags,
            token_count,
            created_at: now,
            updated_at: now,
            last_accessed_at: Some(now),
            access_count: 0,
            pinned: opts.pinned,
            source_type: opts.source_type,
            source_ref: opts.source_ref,
        };

        self.repo.put(&entry).await?;

        if entry.pinned {
            state.pinned.insert(entry.id.clone());
        }
        state.entries.push(entry.clone());
        obs::emit_entry_inserted(&self.owner, &entry.id, token_count);
        Ok(InsertOutcome::Inserted(entry))
    }

    /// Apply `patch` to an entry. Returns `None` without touching storage
    /// when the id is unknown.
    ///
    /// The collection-wide budget is only enforced on insert; an update that
    /// grows content past the budget is accepted and logged.
    #[instrument(skip(self, patch), fields(owner = %self.owner))]
    pub async fn update(&self, id: &str, patch: EntryPatch) -> MemoryResult<Option<MemoryEntry>> {
        self.modify(id, |entry| {
            patch.apply(entry);
            entry.updated_at = bump(entry.updated_at);
        })
        .await
    }

    /// Record an explicit access: bumps `last_accessed_at` and `access_count`.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn record_access(&self, id: &str) -> MemoryResult<Option<MemoryEntry>> {
        self.modify(id, |entry| {
            let now = Utc::now();
            entry.last_accessed_at = Some(entry.last_accessed_at.map_or(now, |prev| prev.max(now)));
            entry.access_count = entry.access_count.saturating_add(1);
        })
        .await
    }

    /// Pin or unpin an entry. Pinned entries are exempt from eviction.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn set_pinned(&self, id: &str, pinned: bool) -> MemoryResult<Option<MemoryEntry>> {
        self.modify(id, |entry| {
            entry.pinned = pinned;
            entry.updated_at = bump(entry.updated_at);
        })
        .await
    }

    async fn modify<F>(&self, id: &str, mutate: F) -> MemoryResult<Option<MemoryEntry>>
    where
        F: FnOnce(&mut MemoryEntry),
    {
        let mut state = self.state.write().await;
        self.load_if_needed(&mut state).await?;

        let Some(index) = state.position(id) else {
            debug!(entry_id = %id, "modify of unknown entry ignored");
            return Ok(None);
        };

        let mut updated = state.entries[index].clone();
        mutate(&mut updated);
        self.repo.put(&updated).await?;

        if updated.pinned {
            state.pinned.insert(updated.id.clone());
        } else {
            state.pinned.remove(&updated.id);
        }
        state.entries[index] = updated.clone();

        let total = state.total_tokens();
        if total > self.budget {
            warn!(
                entry_id = %id,
                total_tokens = total,
                budget = self.budget,
                "owner is over token budget after update"
            );
        }
        Ok(Some(updated))
    }

    /// Delete an entry. Returns the removed entry, or `None` without
    /// touching storage when the id is unknown.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn delete(&self, id: &str) -> MemoryResult<Option<MemoryEntry>> {
        let mut state = self.state.write().await;
        self.load_if_needed(&mut state).await?;

        let Some(index) = state.position(id) else {
            debug!(entry_id = %id, "delete of unknown entry ignored");
            return Ok(None);
        };

        self.repo.delete(id).await?;

        state.pinned.remove(id);
        let removed = state.entries.remove(index);
        debug!(entry_id = %id, tokens = removed.token_count, "entry deleted");
        Ok(Some(removed))
    }

    /// Remove every entry for this owner.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn clear_all(&self) -> MemoryResult<()> {
        let mut state = self.state.write().await;
        self.repo.clear().await?;

        let removed = state.entries.len();
        state.entries.clear();
        state.pinned.clear();
        state.hydrated = true;
        info!(removed, "entry store cleared");
        Ok(())
    }

    /// Every durable entry, read straight from the repository.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn export_all(&self) -> MemoryResult<Vec<MemoryEntry>> {
        let _state = self.state.read().await;
        Ok(self.repo.get_all().await?)
    }

    /// Replace the whole collection with `entries`, durably and in memory.
    ///
    /// This is a trusted bulk load: no merge and no budget check. If the
    /// durable replace fails part way, the in-memory collection is dropped
    /// and the store is marked un-hydrated, so reads see nothing until the
    /// next load re-reads storage.
    #[instrument(skip(self, entries), fields(owner = %self.owner, count = entries.len()))]
    pub async fn import_all(&self, entries: Vec<MemoryEntry>) -> MemoryResult<()> {
        let mut state = self.state.write().await;

        let written = async {
            self.repo.clear().await?;
            for entry in &entries {
                self.repo.put(entry).await?;
            }
            Ok::<(), MemoryError>(())
        }
        .await;

        if let Err(err) = written {
            warn!(error = %err, "import failed; store will re-hydrate");
            state.replace_all(Vec::new());
            state.hydrated = false;
            return Err(err);
        }

        state.replace_all(entries);
        state.hydrated = true;
        info!(count = state.entries.len(), "entries imported");
        Ok(())
    }

    /// Export as the JSON interchange format.
    pub async fn export_json(&self) -> MemoryResult<String> {
        Ok(serde_json::to_string_pretty(&self.export_all().await?)?)
    }

    /// Import from the JSON interchange format.
    pub async fn import_json(&self, json: &str) -> MemoryResult<()> {
        let entries: Vec<MemoryEntry> = serde_json::from_str(json)?;
        self.import_all(entries).await
    }

    // ---- read side -------------------------------------------------------

    /// Consistent copy of the in-memory collection, in insertion order.
    pub async fn snapshot(&self) -> Vec<MemoryEntry> {
        self.state.read().await.entries.clone()
    }

    pub async fn get(&self, id: &str) -> Option<MemoryEntry> {
        let state = self.state.read().await;
        state.entries.iter().find(|e| e.id == id).cloned()
    }

    pub async fn total_tokens(&self) -> usize {
        self.state.read().await.total_tokens()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    pub async fn pinned_ids(&self) -> Vec<String> {
        self.state.read().await.pinned.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxvault_state::fakes::{MemoryEntryRepository, RepoOp};

    fn store() -> (EntryStore, Arc<MemoryEntryRepository>) {
        let repo = Arc::new(MemoryEntryRepository::new());
        (EntryStore::new(OwnerId::Workspace, repo.clone()), repo)
    }

    fn note(content: &str) -> NewEntry {
        NewEntry::new("note", content, Category::Facts)
    }

    #[tokio::test]
    async fn test_insert_sets_defaults() {
        let (store, repo) = store();
        let entry = store
            .insert(note("x".repeat(17).as_str()), EntryOptions::default())
            .await
            .unwrap()
            .into_entry()
            .unwrap();

        assert_eq!(entry.token_count, 5);
        assert_eq!(entry.access_count, 0);
        assert!(!entry.pinned);
        assert_eq!(entry.source_type, None);
        assert_eq!(entry.created_at, entry.updated_at);
        assert_eq!(entry.last_accessed_at, Some(entry.created_at));
        assert_eq!(repo.calls().put, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_insert_applies_options() {
        let (store, _) = store();
        let opts = EntryOptions::default()
            .pinned(true)
            .source("template", Some("onboarding".into()));
        let entry = store
            .insert(note("pinned"), opts)
            .await
            .unwrap()
            .into_entry()
            .unwrap();

        assert!(entry.pinned);
        assert_eq!(entry.source_type.as_deref(), Some("template"));
        assert_eq!(entry.source_ref.as_deref(), Some("onboarding"));
        assert_eq!(store.pinned_ids().await, vec![entry.id]);
    }

    #[tokio::test]
    async fn test_insert_nothing_to_save() {
        let (store, repo) = store();
        let err = store
            .insert(NewEntry::new("  ", "", Category::Facts), EntryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidEntry(_)));
        assert_eq!(repo.calls().mutations(), 0);
    }

    #[tokio::test]
    async fn test_update_recomputes_tokens_and_bumps_updated_at() {
        let (store, repo) = store();
        let entry = store
            .insert(note("abcd"), EntryOptions::default())
            .await
            .unwrap()
            .into_entry()
            .unwrap();

        let updated = store
            .update(&entry.id, EntryPatch::default().content("a".repeat(9)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.token_count, 3);
        assert!(updated.updated_at >= entry.updated_at);
        assert_eq!(updated.created_at, entry.created_at);
        assert_eq!(repo.calls().put, 2);
        assert_eq!(store.get(&entry.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_update_unknown_is_noop() {
        let (store, repo) = store();
        store.hydrate().await.unwrap();
        let r = store
            .update("missing", EntryPatch::default().title("x"))
            .await
            .unwrap();
        assert!(r.is_none());
        assert_eq!(repo.calls().mutations(), 0);
    }

    #[tokio::test]
    async fn test_record_access() {
        let (store, _) = store();
        let entry = store
            .insert(note("seen"), EntryOptions::default())
            .await
            .unwrap()
            .into_entry()
            .unwrap();

        store.record_access(&entry.id).await.unwrap();
        let after = store.record_access(&entry.id).await.unwrap().unwrap();

        assert_eq!(after.access_count, 2);
        assert!(after.last_accessed_at.unwrap() >= entry.last_accessed_at.unwrap());
        assert_eq!(after.updated_at, entry.updated_at);
    }

    #[tokio::test]
    async fn test_pin_and_delete_maintain_pinned_set() {
        let (store, repo) = store();
        let entry = store
            .insert(note("keep"), EntryOptions::default())
            .await
            .unwrap()
            .into_entry()
            .unwrap();

        store.set_pinned(&entry.id, true).await.unwrap();
        assert_eq!(store.pinned_ids().await, vec![entry.id.clone()]);

        let removed = store.delete(&entry.id).await.unwrap().unwrap();
        assert_eq!(removed.id, entry.id);
        assert!(store.pinned_ids().await.is_empty());
        assert!(store.is_empty().await);
        assert_eq!(repo.calls().delete, 1);

        // Second delete is a silent no-op without a durable call
        assert!(store.delete(&entry.id).await.unwrap().is_none());
        assert_eq!(repo.calls().delete, 1);
    }

    #[tokio::test]
    async fn test_failed_put_leaves_memory_untouched() {
        let (store, repo) = store();
        let entry = store
            .insert(note("original"), EntryOptions::default())
            .await
            .unwrap()
            .into_entry()
            .unwrap();

        repo.fail_op(RepoOp::Put);
        let err = store
            .update(&entry.id, EntryPatch::default().content("changed"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.get(&entry.id).await.unwrap(), entry);

        assert!(store
            .insert(note("another"), EntryOptions::default())
            .await
            .is_err());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_entry() {
        let (store, repo) = store();
        let entry = store
            .insert(note("sticky"), EntryOptions::default())
            .await
            .unwrap()
            .into_entry()
            .unwrap();

        repo.fail_op(RepoOp::Delete);
        assert!(store.delete(&entry.id).await.is_err());
        assert!(store.get(&entry.id).await.is_some());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (store, repo) = store();
        for i in 0..3 {
            store
                .insert(note(&format!("n{i}")), EntryOptions::default().pinned(i == 0))
                .await
                .unwrap();
        }
        store.clear_all().await.unwrap();
        assert!(store.is_empty().await);
        assert!(store.pinned_ids().await.is_empty());
        assert!(repo.stored().is_empty());
        assert_eq!(repo.calls().clear, 1);
    }

    #[tokio::test]
    async fn test_failed_import_forces_rehydrate() {
        let (store, repo) = store();
        store
            .insert(note("before"), EntryOptions::default())
            .await
            .unwrap();
        let exported = store.export_all().await.unwrap();

        repo.fail_op(RepoOp::Put);
        assert!(store.import_all(exported.clone()).await.is_err());
        assert!(!store.is_hydrated().await);
        // No stale pre-import view while durable state is half replaced
        assert!(store.snapshot().await.is_empty());
        assert!(store.get(&exported[0].id).await.is_none());
        assert_eq!(store.total_tokens().await, 0);

        repo.clear_failures();
        store.hydrate().await.unwrap();
        // The durable clear went through before the failing put
        assert!(store.is_empty().await);
        assert_eq!(repo.calls().get_all, 3);
    }

    #[tokio::test]
    async fn test_json_interchange() {
        let (store, _) = store();
        store
            .insert(
                note("exported").with_tags(["t1", "t2"]),
                EntryOptions::default(),
            )
            .await
            .unwrap();
        let json = store.export_json().await.unwrap();
        assert!(json.contains("\"tokenCount\""));

        let (other, _) = self::store();
        other.import_json(&json).await.unwrap();
        assert_eq!(other.snapshot().await, store.snapshot().await);
    }
}
