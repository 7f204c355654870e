//! Cluster events decoded from the watch stream

use kube::api::WatchEvent;
use kube::core::ErrorResponse;
use kube::ResourceExt;

use crate::crd::DbCluster;

/// A change to one DbCluster, carrying its snapshot
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    Added(DbCluster),
    Modified(DbCluster),
    Deleted(DbCluster),
}

impl ClusterEvent {
    pub fn cluster(&self) -> &DbCluster {
        match self {
            ClusterEvent::Added(c) | ClusterEvent::Modified(c) | ClusterEvent::Deleted(c) => c,
        }
    }

    pub fn name(&self) -> String {
        self.cluster().name_any()
    }

    pub fn resource_version(&self) -> String {
        self.cluster().resource_version().unwrap_or_default()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClusterEvent::Added(_) => "ADDED",
            ClusterEvent::Modified(_) => "MODIFIED",
            ClusterEvent::Deleted(_) => "DELETED",
        }
    }
}

/// What the watch task should do with one raw watch event
#[derive(Debug)]
pub enum Parsed {
    Event(ClusterEvent),
    /// Progress marker without an object change
    Bookmark(String),
    /// Error status sent inside the stream
    Status(ErrorResponse),
}

pub fn parse(event: WatchEvent<DbCluster>) -> Parsed {
    match event {
        WatchEvent::Added(c) => Parsed::Event(ClusterEvent::Added(c)),
        WatchEvent::Modified(c) => Parsed::Event(ClusterEvent::Modified(c)),
        WatchEvent::Deleted(c) => Parsed::Event(ClusterEvent::Deleted(c)),
        WatchEvent::Bookmark(b) => Parsed::Bookmark(b.metadata.resource_version),
        WatchEvent::Error(status) => Parsed::Status(status),
    }
}
