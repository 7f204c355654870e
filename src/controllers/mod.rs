//! Controllers for the DbCluster operator
//!
//! The [`Watcher`] follows DbCluster changes and hands them, one at a time,
//! to the [`Reconciler`], which drives each role of a cluster through its
//! lifecycle.

mod audit;
pub mod event;
pub mod reconciler;
pub mod state;
mod watcher;

pub use audit::AuditEvent;
pub use event::ClusterEvent;
pub use reconciler::{
    validate_scale, HealthScope, ReconcileTimings, Reconciler, ReconcilerSettings, ScaleDecision,
};
pub use state::{ClusterStateStore, WatchCursor};
pub use watcher::{Watcher, WatcherTimings};
