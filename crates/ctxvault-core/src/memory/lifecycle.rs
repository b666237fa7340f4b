//! Importance scoring, stale/expired classification and pruning.
//!
//! The classification functions are pure and take an explicit `now`.
//! Pruning runs three ordered phases against a store, each on a fresh
//! snapshot:
//! 1. Expired (created before `now - default_ttl_days`)
//! 2. Stale (not accessed since `now - stale_days`)
//! 3. Capacity overflow, lowest importance first (capacity-bounded owners only)
//!
//! Pinned entries are never selected by any phase.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use ctxvault_state::{Category, MemoryEntry};

use super::error::MemoryResult;
use super::store::EntryStore;
use crate::config::LifecycleConfig;
use crate::obs;

/// Window within which accesses count toward importance.
pub const RECENT_ACCESS_DAYS: i64 = 7;

const BASE_SCORE: u64 = 1;
const PINNED_BONUS: u64 = 100;
const ACCESS_WEIGHT: u64 = 10;
const CATEGORY_BONUS: u64 = 20;

/// `now - n days`, or `None` when that falls before the earliest
/// representable instant. Nothing can be older than that.
fn cutoff(now: DateTime<Utc>, n: u32) -> Option<DateTime<Utc>> {
    now.checked_sub_signed(Duration::days(i64::from(n)))
}

/// Higher means more worth keeping.
pub fn importance_score(entry: &MemoryEntry, now: DateTime<Utc>) -> u64 {
    let mut score = BASE_SCORE;
    if entry.pinned {
        score += PINNED_BONUS;
    }
    let recent_cutoff = now - Duration::days(RECENT_ACCESS_DAYS);
    if entry.last_accessed_at.is_some_and(|at| at >= recent_cutoff) {
        score = score.saturating_add(entry.access_count.saturating_mul(ACCESS_WEIGHT));
    }
    if matches!(entry.category, Category::Decisions | Category::Workflows) {
        score += CATEGORY_BONUS;
    }
    score
}

/// Unpinned entries never accessed, or last accessed before `now - stale_days`.
pub fn identify_stale(
    entries: &[MemoryEntry],
    stale_days: u32,
    now: DateTime<Utc>,
) -> Vec<&MemoryEntry> {
    let cutoff = cutoff(now, stale_days);
    entries
        .iter()
        .filter(|e| !e.pinned)
        .filter(|e| match (e.last_accessed_at, cutoff) {
            (None, _) => true,
            (Some(at), Some(cutoff)) => at < cutoff,
            (Some(_), None) => false,
        })
        .collect()
}

/// Unpinned entries created before `now - ttl_days`.
pub fn identify_expired(
    entries: &[MemoryEntry],
    ttl_days: u32,
    now: DateTime<Utc>,
) -> Vec<&MemoryEntry> {
    let Some(cutoff) = cutoff(now, ttl_days) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter(|e| !e.pinned && e.created_at < cutoff)
        .collect()
}

/// The lowest-importance unpinned entries that must go for `entries` to fit
/// in `max_entries`. Ties keep snapshot order.
///
/// Pinned entries count toward the total but are never selected, so the
/// result may leave the collection above `max_entries` when too many are
/// pinned.
pub fn select_overflow(
    entries: &[MemoryEntry],
    max_entries: usize,
    now: DateTime<Utc>,
) -> Vec<&MemoryEntry> {
    let excess = entries.len().saturating_sub(max_entries);
    if excess == 0 {
        return Vec::new();
    }

    let mut candidates: Vec<(u64, &MemoryEntry)> = entries
        .iter()
        .filter(|e| !e.pinned)
        .map(|e| (importance_score(e, now), e))
        .collect();
    // sort_by_key is stable
    candidates.sort_by_key(|(score, _)| *score);
    candidates
        .into_iter()
        .take(excess)
        .map(|(_, e)| e)
        .collect()
}

/// Which pruning phase selected an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrunePhase {
    Expired,
    Stale,
    Overflow,
}

impl std::fmt::Display for PrunePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PrunePhase::Expired => "expired",
            PrunePhase::Stale => "stale",
            PrunePhase::Overflow => "overflow",
        })
    }
}

/// A deletion that failed during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneFailure {
    pub entry_id: String,
    pub phase: PrunePhase,
    pub message: String,
}

/// Aggregate outcome of one pruning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneResult {
    pub deleted_count: usize,
    pub freed_tokens: usize,
    pub deleted_ids: Vec<String>,
    /// Deletions that failed. Earlier deletions are not rolled back.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<PruneFailure>,
}

impl PruneResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn record_deleted(&mut self, entry: MemoryEntry) {
        self.deleted_count += 1;
        self.freed_tokens += entry.token_count;
        self.deleted_ids.push(entry.id);
    }
}

/// Prune a capacity-bounded owner: expired, then stale, then overflow.
pub async fn prune_owner(store: &EntryStore, config: &LifecycleConfig) -> MemoryResult<PruneResult> {
    prune_owner_at(store, config, Utc::now()).await
}

pub async fn prune_owner_at(
    store: &EntryStore,
    config: &LifecycleConfig,
    now: DateTime<Utc>,
) -> MemoryResult<PruneResult> {
    run_phases(store, config, now, true).await
}

/// Prune an owner with no entry ceiling: expired, then stale.
pub async fn prune_unbounded(
    store: &EntryStore,
    config: &LifecycleConfig,
) -> MemoryResult<PruneResult> {
    prune_unbounded_at(store, config, Utc::now()).await
}

pub async fn prune_unbounded_at(
    store: &EntryStore,
    config: &LifecycleConfig,
    now: DateTime<Utc>,
) -> MemoryResult<PruneResult> {
    run_phases(store, config, now, false).await
}

async fn run_phases(
    store: &EntryStore,
    config: &LifecycleConfig,
    now: DateTime<Utc>,
    capacity_bounded: bool,
) -> MemoryResult<PruneResult> {
    store.hydrate().await?;
    let mut result = PruneResult::default();

    let snapshot = store.snapshot().await;
    let expired = ids(identify_expired(&snapshot, config.default_ttl_days, now));
    delete_each(store, PrunePhase::Expired, expired, &mut result).await;

    let snapshot = store.snapshot().await;
    let stale = ids(identify_stale(&snapshot, config.stale_days, now));
    delete_each(store, PrunePhase::Stale, stale, &mut result).await;

    if capacity_bounded {
        let snapshot = store.snapshot().await;
        let overflow = ids(select_overflow(&snapshot, config.max_entries_per_owner, now));
        delete_each(store, PrunePhase::Overflow, overflow, &mut result).await;
    }

    obs::emit_prune_finished(store.owner(), &result);
    Ok(result)
}

fn ids(entries: Vec<&MemoryEntry>) -> Vec<String> {
    entries.into_iter().map(|e| e.id.clone()).collect()
}

async fn delete_each(
    store: &EntryStore,
    phase: PrunePhase,
    ids: Vec<String>,
    result: &mut PruneResult,
) {
    for id in ids {
        match store.delete(&id).await {
            Ok(Some(entry)) => result.record_deleted(entry),
            // Removed by someone else since the snapshot
            Ok(None) => {}
            Err(err) => {
                obs::emit_prune_failed(store.owner(), &id, &err);
                result.failures.push(PruneFailure {
                    entry_id: id,
                    phase,
                    message: err.to_string(),
                });
            }
        }
    }
}
