//! ctxvault core library
//!
//! Token-budgeted memory entries for agent context, with importance-driven
//! eviction and health reporting. Storage lives in `ctxvault-state`.

pub mod config;
pub mod memory;
pub mod obs;
pub mod telemetry;
pub mod tokens;

pub use config::{ConfigError, LifecycleConfig};

pub use memory::{
    ingest_captures, BudgetRejection, CaptureCandidate, CaptureStats, EntryOptions, EntryPatch,
    EntryStore, HealthReport, InsertOutcome, MemoryError, MemoryRegistry, MemoryResult, NewEntry,
    OwnerSweep, PruneResult, Recommendation,
};

pub use telemetry::init_tracing;

pub use tokens::{count_tokens, format_token_count, TOKEN_BUDGET};

pub use ctxvault_state::{Category, MemoryEntry, OwnerId, Scope};
