//! Auto-capture ingestion.
//!
//! Producers send [`CaptureCandidate`]s over an mpsc channel; each one goes
//! through the ordinary insert path, budget rejection included.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ctxvault_state::{Category, Scope};

use super::error::MemoryError;
use super::store::{EntryOptions, EntryStore, InsertOutcome, NewEntry};

/// `source_type` stamped on captured entries.
pub const AUTO_CAPTURE_SOURCE: &str = "auto-capture";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureCandidate {
    pub title: String,
    pub content: String,
    pub category: Category,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub source_ref: Option<String>,
}

impl CaptureCandidate {
    fn into_parts(self) -> (NewEntry, EntryOptions) {
        let new = NewEntry {
            title: self.title,
            content: self.content,
            category: self.category,
            tags: self.tags,
            scope: self.scope,
        };
        let opts = EntryOptions::default().source(AUTO_CAPTURE_SOURCE, self.source_ref);
        (new, opts)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    pub inserted: usize,
    /// Turned away by the token budget.
    pub rejected: usize,
    /// Empty candidates with nothing to save.
    pub skipped: usize,
    /// Persistence failures.
    pub failed: usize,
}

/// Drain `rx` into `store` until every sender is dropped.
///
/// Failures are counted and logged; one bad candidate never stops ingestion.
pub async fn ingest_captures(
    store: &EntryStore,
    mut rx: mpsc::Receiver<CaptureCandidate>,
) -> CaptureStats {
    let mut stats = CaptureStats::default();

    while let Some(candidate) = rx.recv().await {
        let (new, opts) = candidate.into_parts();
        match store.insert(new, opts).await {
            Ok(InsertOutcome::Inserted(entry)) => {
                debug!(entry_id = %entry.id, "captured entry stored");
                stats.inserted += 1;
            }
            Ok(InsertOutcome::Rejected(rejection)) => {
                debug!(%rejection, "captured entry rejected");
                stats.rejected += 1;
            }
            Err(MemoryError::InvalidEntry(reason)) => {
                debug!(%reason, "captured entry skipped");
                stats.skipped += 1;
            }
            Err(err) => {
                warn!(owner = %store.owner(), error = %err, "failed to store captured entry");
                stats.failed += 1;
            }
        }
    }

    info!(
        owner = %store.owner(),
        inserted = stats.inserted,
        rejected = stats.rejected,
        skipped = stats.skipped,
        failed = stats.failed,
        "capture channel closed"
    );
    stats
}
