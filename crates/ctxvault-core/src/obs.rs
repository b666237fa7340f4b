//! Structured lifecycle events for the memory store.
//!
//! Every event carries an `event` field so log pipelines can filter on it:
//! `entry.inserted`, `entry.rejected`, `prune.finished`, `prune.failed`,
//! `health.reported`.

use tracing::{info, warn};

use ctxvault_state::OwnerId;

use crate::memory::{BudgetRejection, HealthReport, PruneResult};

/// Owner-scoped span for one prune pass. Attach with
/// [`tracing::Instrument::instrument`] so it follows the task across awaits.
pub fn sweep_span(owner: &OwnerId) -> tracing::Span {
    tracing::info_span!("ctxvault.sweep", owner = %owner)
}

pub fn emit_entry_inserted(owner: &OwnerId, entry_id: &str, tokens: usize) {
    info!(event = "entry.inserted", owner = %owner, entry_id = %entry_id, tokens = tokens);
}

/// Budget rejections are expected outcomes, logged at info.
pub fn emit_entry_rejected(owner: &OwnerId, rejection: &BudgetRejection) {
    info!(
        event = "entry.rejected",
        owner = %owner,
        requested = rejection.requested,
        current_total = rejection.current_total,
        budget = rejection.budget,
    );
}

pub fn emit_prune_finished(owner: &OwnerId, result: &PruneResult) {
    info!(
        event = "prune.finished",
        owner = %owner,
        deleted = result.deleted_count,
        freed_tokens = result.freed_tokens,
        failures = result.failures.len(),
    );
}

pub fn emit_prune_failed(owner: &OwnerId, entry_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "prune.failed", owner = %owner, entry_id = %entry_id, error = %error);
}

pub fn emit_health_reported(owner: Option<&OwnerId>, report: &HealthReport) {
    let owner = owner.map_or_else(|| "all".to_string(), ToString::to_string);
    info!(
        event = "health.reported",
        owner = %owner,
        total_entries = report.total_entries,
        total_tokens = report.total_tokens,
        budget_usage_pct = report.token_budget_usage_pct,
        recommendation = %report.recommendation,
    );
}
