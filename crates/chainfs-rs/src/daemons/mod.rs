//! Registered storage daemons and replica placement.


use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FsError, FsResult};

pub type DaemonId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonInfo {
    pub id: DaemonId,
    pub address: String,
    pub name: String,
}

/// Live storage daemons known to the coordinator.
///
/// Identities start at 1 and are only reset when the coordinator restarts,
/// at which point every daemon registers again.
pub struct DaemonRegistry {
    daemons: BTreeMap<DaemonId, DaemonInfo>,
    last_id: DaemonId,
    rng: StdRng,
}

impl DaemonRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    #[must_use]
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            daemons: BTreeMap::new(),
            last_id: 0,
            rng,
        }
    }

    /// Assign a fresh identity to a daemon.
    ///
    /// A daemon re-registering from an address that is already known replaces
    /// the stale entry.
    pub fn register(&mut self, address: &str, name: &str) -> DaemonInfo {
        self.daemons.retain(|_, d| d.address != address);
        self.last_id += 1;
        let info = DaemonInfo {
            id: self.last_id,
            address: address.to_string(),
            name: name.to_string(),
        };
        info!(id = info.id, address, name, "daemon registered");
        self.daemons.insert(info.id, info.clone());
        info
    }

    #[must_use]
    pub fn get(&self, id: DaemonId) -> Option<&DaemonInfo> {
        self.daemons.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.daemons.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.daemons.is_empty()
    }

    /// Pick `n` distinct daemons uniformly at random, in random order.
    ///
    /// # Errors
    /// Returns [`FsError::Configuration`] if fewer than `n` daemons are registered.
    pub fn select_replica_set(&mut self, n: usize) -> FsResult<Vec<DaemonInfo>> {
        let all: Vec<&DaemonInfo> = self.daemons.values().collect();
        if all.len() < n {
            return Err(FsError::Configuration {
                wanted: n,
                registered: all.len(),
            });
        }
        Ok(rand::seq::index::sample(&mut self.rng, all.len(), n)
            .into_iter()
            .map(|i| all[i].clone())
            .collect())
    }
}

impl Default for DaemonRegistry {
    fn default() -> Self {
        Self::new()
    }
}
