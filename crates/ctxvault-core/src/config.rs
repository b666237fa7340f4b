//! Lifecycle policy configuration.

use serde::{Deserialize, Serialize};

use crate::tokens::TOKEN_BUDGET;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not a valid number: {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be at most {max} days, got {value}")]
    TooManyDays {
        field: &'static str,
        value: u32,
        max: u32,
    },
}

/// Upper bound for day-count settings (about a century).
pub const MAX_DAYS: u32 = 36_500;

/// Policy knobs shared by pruning and health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Entries created longer ago than this are expired.
    pub default_ttl_days: u32,
    /// Entries not accessed for this long are stale.
    pub stale_days: u32,
    /// Hard entry ceiling for capacity-bounded owners (agents).
    pub max_entries_per_owner: usize,
    /// Denominator for budget utilization.
    pub max_total_tokens: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_ttl_days: 90,
            stale_days: 30,
            max_entries_per_owner: 1000,
            max_total_tokens: TOKEN_BUDGET,
        }
    }
}

impl LifecycleConfig {
    /// Defaults overridden by environment variables
    ///
    /// Reads:
    /// - CTXVAULT_TTL_DAYS
    /// - CTXVAULT_STALE_DAYS
    /// - CTXVAULT_MAX_ENTRIES
    /// - CTXVAULT_MAX_TOKENS
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = env_number("CTXVAULT_TTL_DAYS")? {
            config.default_ttl_days = v;
        }
        if let Some(v) = env_number("CTXVAULT_STALE_DAYS")? {
            config.stale_days = v;
        }
        if let Some(v) = env_number("CTXVAULT_MAX_ENTRIES")? {
            config.max_entries_per_owner = v;
        }
        if let Some(v) = env_number("CTXVAULT_MAX_TOKENS")? {
            config.max_total_tokens = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_days("default_ttl_days", self.default_ttl_days)?;
        check_days("stale_days", self.stale_days)?;
        if self.max_entries_per_owner == 0 {
            return Err(ConfigError::Zero {
                field: "max_entries_per_owner",
            });
        }
        if self.max_total_tokens == 0 {
            return Err(ConfigError::Zero {
                field: "max_total_tokens",
            });
        }
        Ok(())
    }
}

fn check_days(field: &'static str, value: u32) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero { field });
    }
    if value > MAX_DAYS {
        return Err(ConfigError::TooManyDays {
            field,
            value,
            max: MAX_DAYS,
        });
    }
    Ok(())
}

fn env_number<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        Err(_) => Ok(None),
    }
}
