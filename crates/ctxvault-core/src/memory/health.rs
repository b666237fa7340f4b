//! Utilization counters and the recommendation tier derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ctxvault_state::MemoryEntry;

use super::lifecycle::{identify_expired, identify_stale};
use crate::config::LifecycleConfig;

const PRUNING_THRESHOLD_PCT: f64 = 80.0;
const REVIEW_THRESHOLD_PCT: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Healthy,
    ReviewRecommended,
    PruningNeeded,
}

impl Recommendation {
    /// Tier for a budget usage percentage. Both thresholds are exclusive.
    pub fn for_usage(usage_pct: f64) -> Self {
        if usage_pct > PRUNING_THRESHOLD_PCT {
            Recommendation::PruningNeeded
        } else if usage_pct > REVIEW_THRESHOLD_PCT {
            Recommendation::ReviewRecommended
        } else {
            Recommendation::Healthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Healthy => "healthy",
            Recommendation::ReviewRecommended => "review_recommended",
            Recommendation::PruningNeeded => "pruning_needed",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub total_entries: usize,
    pub total_tokens: usize,
    pub stale_count: usize,
    pub expired_count: usize,
    pub pinned_count: usize,
    pub token_budget_usage_pct: f64,
    pub recommendation: Recommendation,
}

/// Summarize a snapshot. Never mutates anything.
pub fn report(entries: &[MemoryEntry], config: &LifecycleConfig, now: DateTime<Utc>) -> HealthReport {
    let total_tokens: usize = entries.iter().map(|e| e.token_count).sum();
    let usage = if config.max_total_tokens == 0 {
        0.0
    } else {
        total_tokens as f64 * 100.0 / config.max_total_tokens as f64
    };

    HealthReport {
        total_entries: entries.len(),
        total_tokens,
        stale_count: identify_stale(entries, config.stale_days, now).len(),
        expired_count: identify_expired(entries, config.default_ttl_days, now).len(),
        pinned_count: entries.iter().filter(|e| e.pinned).count(),
        token_budget_usage_pct: usage,
        recommendation: Recommendation::for_usage(usage),
    }
}
