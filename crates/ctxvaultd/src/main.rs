//! ctxvaultd - prunes every known owner on a fixed interval.
//!
//! Flags, each with an environment fallback:
//! - `--interval-secs` / `CTXVAULT_SWEEP_INTERVAL_SECS` (default 3600)
//! - `--once` / `CTXVAULT_SWEEP_ONCE=true` runs a single pass and exits
//! - `--db` / `CTXVAULT_DB` local database directory when no SurrealDB endpoint is set
//!
//! Environment only:
//! - `CTXVAULT_LOG_FORMAT=json` for JSON log lines
//! - lifecycle knobs read by `LifecycleConfig::from_env`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn, Level};

use ctxvault_core::telemetry::json_requested;
use ctxvault_core::{LifecycleConfig, MemoryRegistry};
use ctxvault_state::handle::DEFAULT_LOCAL_PATH;
use ctxvault_state::SurrealStorageBackend;

const DEFAULT_INTERVAL_SECS: u64 = 3600;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "ctxvaultd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Prunes every ctxvault owner on a fixed interval", long_about = None)]
struct DaemonConfig {
    /// Seconds between sweep passes
    #[arg(
        long,
        env = "CTXVAULT_SWEEP_INTERVAL_SECS",
        default_value_t = DEFAULT_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    interval_secs: u64,

    /// Run a single pass and exit
    #[arg(long, env = "CTXVAULT_SWEEP_ONCE")]
    once: bool,

    /// Local database directory, used when no SurrealDB endpoint is configured
    #[arg(long, env = "CTXVAULT_DB", default_value = DEFAULT_LOCAL_PATH)]
    db: PathBuf,
}

impl DaemonConfig {
    fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct PassSummary {
    owners: usize,
    deleted: usize,
    freed_tokens: usize,
    failed_owners: usize,
    failed_deletions: usize,
}

async fn run_pass(registry: &MemoryRegistry, config: &LifecycleConfig) -> Result<PassSummary> {
    let sweeps = registry
        .sweep(config)
        .await
        .context("Failed to enumerate owners")?;

    let mut summary = PassSummary {
        owners: sweeps.len(),
        ..PassSummary::default()
    };
    for sweep in &sweeps {
        match &sweep.outcome {
            Ok(result) => {
                summary.deleted += result.deleted_count;
                summary.freed_tokens += result.freed_tokens;
                summary.failed_deletions += result.failures.len();
            }
            Err(err) => {
                warn!(owner = %sweep.owner, error = %err, "owner skipped this pass");
                summary.failed_owners += 1;
            }
        }
    }

    info!(
        owners = summary.owners,
        deleted = summary.deleted,
        freed_tokens = summary.freed_tokens,
        failed_owners = summary.failed_owners,
        failed_deletions = summary.failed_deletions,
        "sweep pass finished"
    );
    Ok(summary)
}

#[tokio::main]
async fn main() -> Result<()> {
    ctxvault_core::init_tracing(json_requested(), Level::INFO);

    let daemon = DaemonConfig::parse();
    let lifecycle = LifecycleConfig::from_env().context("Invalid lifecycle configuration")?;

    let backend = SurrealStorageBackend::from_env(&daemon.db)
        .await
        .context("Failed to connect to ctxvault database")?;
    let registry = MemoryRegistry::new(Arc::new(backend));

    info!(
        interval_secs = daemon.interval_secs,
        once = daemon.once,
        "ctxvaultd started"
    );

    if daemon.once {
        run_pass(&registry, &lifecycle).await?;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(daemon.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = run_pass(&registry, &lifecycle).await {
                    error!(error = %err, "sweep pass failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("ctxvaultd shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use ctxvault_state::fakes::MemoryStorageBackend;
    use ctxvault_state::{Category, MemoryEntry, OwnerId, Scope};
    fn old_entry(id: &str) -> MemoryEntry {
        let at = Utc::now() - ChronoDuration::days(365);
        MemoryEntry {
            id: id.into(),
            title: id.into(),
            content: "abcd".into(),
            category: Category::Facts,
            scope: Scope::Workspace,
            tags: Vec::new(),
            token_count: 1,
            created_at: at,
            updated_at: at,
            last_accessed_at: Some(at),
            access_count: 0,
            pinned: false,
            source_type: None,
            source_ref: None,
        }
    }

    #[test]
    fn test_config_defaults() {
        let c = DaemonConfig::try_parse_from(["ctxvaultd"]).unwrap();
        assert_eq!(c.interval(), Duration::from_secs(3600));
        assert!(!c.once);
        assert_eq!(c.db, PathBuf::from(DEFAULT_LOCAL_PATH));
    }

    #[test]
    fn test_config_overrides() {
        let c = DaemonConfig::try_parse_from([
            "ctxvaultd",
            "--interval-secs",
            "60",
            "--once",
            "--db",
            "/tmp/vault",
        ])
        .unwrap();
        assert_eq!(c.interval(), Duration::from_secs(60));
        assert!(c.once);
        assert_eq!(c.db, PathBuf::from("/tmp/vault"));
    }

    #[test]
    fn test_config_rejects_bad_interval() {
        assert!(DaemonConfig::try_parse_from(["ctxvaultd", "--interval-secs", "0"]).is_err());
        assert!(DaemonConfig::try_parse_from(["ctxvaultd", "--interval-secs", "soon"]).is_err());
    }

    #[tokio::test]
    async fn test_pass_prunes_all_owners() {
        let backend = Arc::new(MemoryStorageBackend::new());
        backend.seed(&OwnerId::Workspace, vec![old_entry("w1")]);
        backend.seed(&OwnerId::agent("a"), vec![old_entry("a1"), old_entry("a2")]);
        let failing = backend.seed(&OwnerId::agent("b"), vec![old_entry("b1")]);
        failing.fail_delete_of("b1");

        let registry = MemoryRegistry::new(backend.clone());
        let summary = run_pass(&registry, &LifecycleConfig::default()).await.unwrap();

        assert_eq!(summary.owners, 3);
        assert_eq!(summary.deleted, 3);
        assert_eq!(summary.freed_tokens, 3);
        // b1 is both expired and stale
        assert_eq!(summary.failed_deletions, 2);
        assert_eq!(summary.failed_owners, 0);
        assert!(backend.fake(&OwnerId::agent("a")).stored().is_empty());
    }
}
