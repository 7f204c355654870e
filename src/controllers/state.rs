//! In-memory cluster state
//!
//! [`ClusterStateStore`] is owned by the dispatcher task and is the only
//! place cluster snapshots are mutated. [`WatchCursor`] is owned by the watch
//! task and remembers where to resume the stream and which versions it has
//! delivered, for the stability check after watch history expires.

use std::collections::{BTreeMap, HashMap, HashSet};

use kube::ResourceExt;

use super::event::ClusterEvent;
use crate::crd::{DbCluster, DbClusterStatus, Store};
use crate::error::{OperatorError, Result};

/// Known clusters and their last observed resource versions
#[derive(Debug, Default)]
pub struct ClusterStateStore {
    clusters: BTreeMap<String, DbCluster>,
    versions: HashMap<String, String>,
}

impl ClusterStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the startup list
    pub fn seeded(items: &[DbCluster]) -> Self {
        let mut store = Self::new();
        for cluster in items {
            store.insert(cluster.clone());
        }
        store
    }

    fn insert(&mut self, cluster: DbCluster) {
        let name = cluster.name_any();
        self.versions
            .insert(name.clone(), cluster.resource_version().unwrap_or_default());
        self.clusters.insert(name, cluster);
    }

    /// Apply one event and return the snapshot it replaced or removed.
    ///
    /// Modified or Deleted for an unknown name leaves the store untouched and
    /// fails with [`OperatorError::UnsafeState`].
    pub fn apply(&mut self, event: &ClusterEvent) -> Result<Option<DbCluster>> {
        let name = event.name();
        match event {
            ClusterEvent::Added(c) => {
                let previous = self.clusters.get(&name).cloned();
                self.insert(c.clone());
                Ok(previous)
            }
            ClusterEvent::Modified(c) => {
                let previous = self.clusters.get(&name).cloned().ok_or_else(|| {
                    OperatorError::UnsafeState {
                        name: name.clone(),
                        event: event.kind(),
                    }
                })?;
                self.insert(c.clone());
                Ok(Some(previous))
            }
            ClusterEvent::Deleted(_) => {
                let previous =
                    self.clusters
                        .remove(&name)
                        .ok_or_else(|| OperatorError::UnsafeState {
                            name: name.clone(),
                            event: event.kind(),
                        })?;
                self.versions.remove(&name);
                Ok(Some(previous))
            }
        }
    }

    /// Keep the status the operator last computed for `name`
    pub fn update_status(&mut self, name: &str, status: Option<DbClusterStatus>) {
        if let Some(cluster) = self.clusters.get_mut(name) {
            cluster.status = status;
        }
    }

    /// Forget the buried stores of `name` once their volumes are reclaimed
    pub fn drop_buried(&mut self, name: &str) {
        if let Some(status) = self.clusters.get_mut(name).and_then(|c| c.status.as_mut()) {
            status.storage.stores.retain(|s| !s.buried);
        }
    }

    pub fn get(&self, name: &str) -> Option<&DbCluster> {
        self.clusters.get(name)
    }

    pub fn resource_version(&self, name: &str) -> Option<&str> {
        self.versions.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn snapshot(&self) -> Vec<DbCluster> {
        self.clusters.values().cloned().collect()
    }

    /// Every store of every known cluster
    pub fn all_stores(&self) -> Vec<Store> {
        self.clusters
            .values()
            .flat_map(|c| c.stores().iter().cloned())
            .collect()
    }
}

/// Carry the operator-owned status of `previous` over to a newer snapshot.
///
/// Status written by the operator reaches the watch later than the operator
/// itself knows it, so the cached status wins. Buried stores the incoming
/// snapshot no longer lists were reclaimed by the collector and are dropped.
pub fn carry_status(previous: Option<&DbCluster>, incoming: &mut DbCluster) {
    let Some(mut ours) = previous.and_then(|p| p.status.clone()) else {
        return;
    };
    let reported: HashSet<&str> = incoming.stores().iter().map(|s| s.id.as_str()).collect();
    ours.storage
        .stores
        .retain(|s| !s.buried || reported.contains(s.id.as_str()));
    incoming.status = Some(ours);
}

/// Resume point of the watch stream
#[derive(Debug, Clone, Default)]
pub struct WatchCursor {
    resource_version: String,
    seen: HashMap<String, String>,
}

impl WatchCursor {
    /// Start from a list result
    pub fn from_list(items: &[DbCluster], resource_version: &str) -> Self {
        let mut cursor = Self {
            resource_version: resource_version.to_string(),
            seen: HashMap::new(),
        };
        cursor.reset(items, resource_version);
        cursor
    }

    pub fn resource_version(&self) -> &str {
        &self.resource_version
    }

    /// Record a delivered event and advance to its version
    pub fn observe(&mut self, event: &ClusterEvent) {
        let name = event.name();
        let version = event.resource_version();
        match event {
            ClusterEvent::Added(_) | ClusterEvent::Modified(_) => {
                self.seen.insert(name, version.clone());
            }
            ClusterEvent::Deleted(_) => {
                self.seen.remove(&name);
            }
        }
        if !version.is_empty() {
            self.resource_version = version;
        }
    }

    /// Advance without an object change (bookmarks)
    pub fn advance(&mut self, resource_version: String) {
        if !resource_version.is_empty() {
            self.resource_version = resource_version;
        }
    }

    /// Stable iff the relisted set has the same size and every cached
    /// name/version pair is unchanged.
    pub fn is_stable(&self, current: &[DbCluster]) -> bool {
        is_stable(&self.seen, current)
    }

    /// Resume from a fresh list after a stable relist
    pub fn reset(&mut self, items: &[DbCluster], resource_version: &str) {
        self.seen = items
            .iter()
            .map(|c| (c.name_any(), c.resource_version().unwrap_or_default()))
            .collect();
        self.resource_version = resource_version.to_string();
    }
}

/// Compare cached resource versions against a relisted cluster set
pub fn is_stable(cached: &HashMap<String, String>, current: &[DbCluster]) -> bool {
    if cached.len() != current.len() {
        return false;
    }
    current.iter().all(|c| {
        cached.get(&c.name_any()).map(String::as_str) == c.resource_version().as_deref()
    })
}
