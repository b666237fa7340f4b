//! One independently addressable store per owner.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn, Instrument};

use ctxvault_state::{OwnerId, StorageBackend};

use super::error::{MemoryError, MemoryResult};
use super::health::{self, HealthReport};
use super::lifecycle::{prune_owner, prune_unbounded, PruneResult};
use super::store::EntryStore;
use crate::config::LifecycleConfig;
use crate::obs;

/// Outcome of pruning one owner during [`MemoryRegistry::sweep`].
#[derive(Debug)]
pub struct OwnerSweep {
    pub owner: OwnerId,
    pub outcome: MemoryResult<PruneResult>,
}

/// Maps owners to lazily opened, hydrated [`EntryStore`]s over a shared
/// storage backend.
pub struct MemoryRegistry {
    backend: Arc<dyn StorageBackend>,
    stores: Mutex<HashMap<OwnerId, Arc<EntryStore>>>,
}

impl MemoryRegistry {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// The store for `owner`, opened on first use and hydrated before return.
    pub async fn store(&self, owner: &OwnerId) -> MemoryResult<Arc<EntryStore>> {
        let store = {
            let mut stores = self.stores.lock().await;
            stores
                .entry(owner.clone())
                .or_insert_with(|| {
                    debug!(%owner, "opening entry store");
                    Arc::new(EntryStore::new(
                        owner.clone(),
                        self.backend.repository(owner),
                    ))
                })
                .clone()
        };
        store.hydrate().await?;
        Ok(store)
    }

    /// Owners with an open store, sorted.
    pub async fn open_owners(&self) -> Vec<OwnerId> {
        let stores = self.stores.lock().await;
        let mut owners: Vec<OwnerId> = stores.keys().cloned().collect();
        owners.sort();
        owners
    }

    /// Prune one owner with the policy its kind calls for: agents are
    /// capacity-bounded, the workspace is not.
    pub async fn prune(&self, owner: &OwnerId, config: &LifecycleConfig) -> MemoryResult<PruneResult> {
        let store = self.store(owner).await?;
        prune_store(&store, config).await
    }

    /// Health of one owner, defaulting to the workspace and the default
    /// lifecycle config.
    pub async fn health(
        &self,
        owner: Option<&OwnerId>,
        config: Option<&LifecycleConfig>,
    ) -> MemoryResult<HealthReport> {
        let owner = owner.cloned().unwrap_or_default();
        let default_config = LifecycleConfig::default();
        let config = config.unwrap_or(&default_config);

        let store = self.store(&owner).await?;
        let report = health::report(&store.snapshot().await, config, Utc::now());
        obs::emit_health_reported(Some(&owner), &report);
        Ok(report)
    }

    /// Prune every owner the backend knows about plus every open store.
    /// Owners run concurrently; one failing does not stop the others.
    pub async fn sweep(&self, config: &LifecycleConfig) -> MemoryResult<Vec<OwnerSweep>> {
        let mut owners: BTreeSet<OwnerId> = self.backend.owners().await?.into_iter().collect();
        owners.extend(self.open_owners().await);
        let owners: Vec<OwnerId> = owners.into_iter().collect();

        let mut join_set = JoinSet::new();
        for (idx, owner) in owners.iter().cloned().enumerate() {
            let opened = self.store(&owner).await;
            let config = config.clone();
            let span = obs::sweep_span(&owner);
            join_set.spawn(
                async move {
                    let outcome = match opened {
                        Ok(store) => prune_store(&store, &config).await,
                        Err(err) => Err(err),
                    };
                    (idx, outcome)
                }
                .instrument(span),
            );
        }

        let mut outcomes: Vec<Option<MemoryResult<PruneResult>>> =
            owners.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(err) => warn!(error = %err, "sweep task did not complete"),
            }
        }

        Ok(owners
            .into_iter()
            .zip(outcomes)
            .map(|(owner, outcome)| {
                let outcome = outcome
                    .unwrap_or_else(|| Err(MemoryError::Task(format!("sweep of {owner} aborted"))));
                if let Err(err) = &outcome {
                    warn!(%owner, error = %err, "owner sweep failed");
                }
                OwnerSweep { owner, outcome }
            })
            .collect())
    }
}

async fn prune_store(store: &EntryStore, config: &LifecycleConfig) -> MemoryResult<PruneResult> {
    if store.owner().is_capacity_bounded() {
        prune_owner(store, config).await
    } else {
        prune_unbounded(store, config).await
    }
}
