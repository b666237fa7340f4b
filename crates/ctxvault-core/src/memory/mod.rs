//! Memory subsystem: per-owner entry stores, lifecycle policy and health.
//!
//! Each owner (the shared workspace or one agent) gets its own token-budgeted
//! [`EntryStore`]. The lifecycle functions score and classify snapshots and
//! prune stores; [`MemoryRegistry`] selects stores by owner.

pub mod capture;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod registry;
pub mod store;

pub use capture::{ingest_captures, CaptureCandidate, CaptureStats, AUTO_CAPTURE_SOURCE};
pub use error::{MemoryError, MemoryResult};
pub use health::{report, HealthReport, Recommendation};
pub use lifecycle::{
    identify_expired, identify_stale, importance_score, prune_owner, prune_owner_at,
    prune_unbounded, prune_unbounded_at, select_overflow, PruneFailure, PrunePhase, PruneResult,
    RECENT_ACCESS_DAYS,
};
pub use registry::{MemoryRegistry, OwnerSweep};
pub use store::{BudgetRejection, EntryOptions, EntryPatch, EntryStore, InsertOutcome, NewEntry};
