//! Watch controller
//!
//! Lists the DbClusters once, then runs three tasks until something fatal
//! happens:
//!
//! - the watch task follows the DbCluster watch stream and forwards events,
//!   relisting when watch history expires;
//! - the dispatcher owns the cluster state, reconciles one event at a time
//!   and sweeps buried stores when asked;
//! - the GC ticker periodically asks the dispatcher for a sweep.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::ResourceExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::event::{self, ClusterEvent, Parsed};
use super::reconciler::{ReconcileTimings, Reconciler, ReconcilerSettings};
use super::state::{carry_status, ClusterStateStore, WatchCursor};
use crate::config::OperatorConfig;
use crate::crd::DbCluster;
use crate::error::{OperatorError, Result, STATUS_GONE};
use crate::gc::{select_provisioner, GarbageCollector, Provisioner};
use crate::platform::{ClusterList, HealthChecker, Platform};
use crate::retry::{retry_with_config, RetryConfig};

#[derive(Debug, Clone)]
pub struct WatcherTimings {
    /// Delay between startup attempts
    pub startup_retry: Duration,
    /// Period of the buried store sweep
    pub gc_interval: Duration,
    /// Event handling longer than this is reported
    pub watchdog: Duration,
}

impl Default for WatcherTimings {
    fn default() -> Self {
        Self {
            startup_retry: Duration::from_secs(30),
            gc_interval: Duration::from_secs(30),
            watchdog: Duration::from_secs(60),
        }
    }
}

pub struct Watcher {
    platform: Arc<dyn Platform>,
    health: Arc<dyn HealthChecker>,
    config: OperatorConfig,
    timings: WatcherTimings,
    reconcile_timings: ReconcileTimings,
}

impl Watcher {
    pub fn new(
        platform: Arc<dyn Platform>,
        health: Arc<dyn HealthChecker>,
        config: OperatorConfig,
    ) -> Self {
        let reconcile_timings = ReconcilerSettings::from_config(&config).timings;
        Self {
            platform,
            health,
            config,
            timings: WatcherTimings::default(),
            reconcile_timings,
        }
    }

    pub fn timings(mut self, timings: WatcherTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn reconcile_timings(mut self, timings: ReconcileTimings) -> Self {
        self.reconcile_timings = timings;
        self
    }

    /// Run until an unrecoverable error; never returns `Ok`.
    pub async fn run(&self) -> Result<()> {
        self.config.validate()?;

        let retry = RetryConfig::with_max_attempts(self.config.startup_max_attempts)
            .interval(self.timings.startup_retry);
        let (list, provisioner) =
            retry_with_config(&retry, "operator startup", || self.startup()).await?;

        let store = ClusterStateStore::seeded(&list.items);
        let gc = Arc::new(GarbageCollector::new(
            self.platform.clone(),
            provisioner.clone(),
            &self.config.namespace,
        ));
        if let Err(e) = gc.recycle(&store.all_stores()) {
            error!(error = %e, "Failed to recycle storage volumes");
        }

        let mut settings = ReconcilerSettings::from_config(&self.config);
        settings.timings = self.reconcile_timings.clone();
        let reconciler = Arc::new(Reconciler::new(
            self.platform.clone(),
            self.health.clone(),
            provisioner,
            settings,
        ));

        let (event_tx, event_rx) = mpsc::channel(1);
        let (err_tx, mut err_rx) = mpsc::channel(1);
        let (sweep_tx, sweep_rx) = mpsc::channel(1);

        let dispatcher = Dispatcher {
            reconciler,
            gc,
            store,
            watchdog: self.timings.watchdog,
        };
        let cursor = WatchCursor::from_list(&list.items, &list.resource_version);

        let tasks: Vec<JoinHandle<()>> = vec![
            tokio::spawn(stream_events(
                self.platform.clone(),
                cursor,
                event_tx,
                err_tx,
            )),
            tokio::spawn(dispatcher.run(event_rx, sweep_rx)),
            tokio::spawn(collect_garbage(sweep_tx, self.timings.gc_interval)),
        ];
        info!(namespace = %self.config.namespace, "Watching DbClusters");

        let result = match err_rx.recv().await {
            Some(e) => Err(e),
            None => Err(OperatorError::InvalidState(
                "watch task stopped without an error".to_string(),
            )),
        };
        for task in &tasks {
            task.abort();
        }
        if let Err(e) = &result {
            error!(error = %e, "Watch controller stopped");
        }
        result
    }

    async fn startup(&self) -> Result<(ClusterList, Arc<dyn Provisioner>)> {
        self.platform.ensure_cluster_crd().await?;
        let list = self.platform.list_clusters().await?;
        let provisioner = select_provisioner(&self.config)?;
        info!(
            clusters = list.items.len(),
            resource_version = %list.resource_version,
            provisioner = provisioner.name(),
            "Operator initialized"
        );
        Ok((list, provisioner))
    }
}

/// Follow the watch stream from `cursor`, forwarding cluster events in order.
///
/// Fatal conditions are sent on `errors` and end the task.
pub(crate) async fn stream_events(
    platform: Arc<dyn Platform>,
    mut cursor: WatchCursor,
    events: mpsc::Sender<ClusterEvent>,
    errors: mpsc::Sender<OperatorError>,
) {
    loop {
        debug!(resource_version = %cursor.resource_version(), "Opening watch");
        let mut stream = match platform.watch_clusters(cursor.resource_version()).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Failed to watch DbClusters");
                let _ = errors.send(e).await;
                return;
            }
        };

        while let Some(item) = stream.next().await {
            let expired = match item {
                Ok(raw) => match event::parse(raw) {
                    Parsed::Event(ev) => {
                        debug!(cluster = %ev.name(), event = ev.kind(), "Received event");
                        cursor.observe(&ev);
                        if events.send(ev).await.is_err() {
                            return;
                        }
                        false
                    }
                    Parsed::Bookmark(resource_version) => {
                        cursor.advance(resource_version);
                        false
                    }
                    Parsed::Status(status) if status.code == STATUS_GONE => true,
                    Parsed::Status(status) => {
                        error!(
                            code = status.code,
                            reason = %status.reason,
                            message = %status.message,
                            "Critical error in watch stream"
                        );
                        false
                    }
                },
                Err(e) if e.is_gone() => true,
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable watch event");
                    false
                }
            };

            if expired {
                if let Err(e) = relist(platform.as_ref(), &mut cursor).await {
                    let _ = errors.send(e).await;
                    return;
                }
                break;
            }
        }
    }
}

/// After watch history expired: resume from a fresh list if nothing changed
/// behind our back, otherwise the cached state can no longer be trusted.
async fn relist(platform: &dyn Platform, cursor: &mut WatchCursor) -> Result<()> {
    let list = match platform.list_clusters().await {
        Ok(list) => list,
        Err(e) => {
            error!(error = %e, "Relist after expired watch failed");
            return Err(OperatorError::VersionOutdated);
        }
    };
    if !cursor.is_stable(&list.items) {
        error!(
            clusters = list.items.len(),
            "Clusters changed while watch history was unavailable"
        );
        return Err(OperatorError::VersionOutdated);
    }
    info!(resource_version = %list.resource_version, "Watch history expired, resuming from relist");
    cursor.reset(&list.items, &list.resource_version);
    Ok(())
}

/// Owns the cluster state; handles one event at a time
pub(crate) struct Dispatcher {
    reconciler: Arc<Reconciler>,
    gc: Arc<GarbageCollector>,
    store: ClusterStateStore,
    watchdog: Duration,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<ClusterEvent>,
        mut sweeps: mpsc::Receiver<()>,
    ) {
        for cluster in self.store.snapshot() {
            let name = cluster.name_any();
            let watchdog = self.watchdog;
            let result = supervise(watchdog, "RESYNC", &name, self.resync(cluster)).await;
            if let Err(e) = result {
                warn!(cluster = %name, error = %e, "Resync failed");
            }
        }

        loop {
            tokio::select! {
                biased;
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.dispatch(event).await;
                }
                Some(()) = sweeps.recv() => self.sweep().await,
            }
        }
        debug!("Event channel closed, dispatcher stopping");
    }

    async fn dispatch(&mut self, event: ClusterEvent) {
        let name = event.name();
        let kind = event.kind();
        let watchdog = self.watchdog;
        match supervise(watchdog, kind, &name, self.handle(event)).await {
            Ok(()) => {}
            Err(e @ OperatorError::UnsafeState { .. }) => {
                error!(cluster = %name, event = kind, error = %e, "Dropping event");
            }
            Err(e) => warn!(cluster = %name, event = kind, error = %e, "Event handling failed"),
        }
    }

    /// Reclaim buried stores of every cluster from the cached state
    async fn sweep(&mut self) {
        let clusters = self.store.snapshot();
        debug!(clusters = clusters.len(), "Sweeping buried stores");
        let swept = supervise(self.watchdog, "SWEEP", "*", self.gc.sweep(&clusters)).await;
        for name in swept {
            self.store.drop_buried(&name);
        }
    }

    async fn resync(&mut self, mut cluster: DbCluster) -> Result<()> {
        let name = cluster.name_any();
        let result = self.reconciler.reconcile(&mut cluster).await;
        self.store.update_status(&name, cluster.status);
        result
    }

    pub(crate) async fn handle(&mut self, event: ClusterEvent) -> Result<()> {
        let previous = self.store.apply(&event)?;
        let name = event.name();

        match event {
            ClusterEvent::Added(mut cluster) => {
                carry_status(previous.as_ref(), &mut cluster);
                let result = self.reconciler.reconcile(&mut cluster).await;
                self.store.update_status(&name, cluster.status);
                result
            }
            ClusterEvent::Modified(mut cluster) => {
                carry_status(previous.as_ref(), &mut cluster);
                let result = self.reconciler.reconcile(&mut cluster).await;
                let reclaimed = self.gc.delete_buried_stores(&cluster).await;
                self.store.update_status(&name, cluster.status);
                match reclaimed {
                    Ok(0) => {}
                    Ok(_) => self.store.drop_buried(&name),
                    Err(e) => warn!(cluster = %name, error = %e, "Failed to delete buried stores"),
                }
                result
            }
            ClusterEvent::Deleted(cluster) => {
                let mut cluster = previous.unwrap_or(cluster);
                let stores = cluster.clone();
                let result = self.reconciler.uninstall_all(&mut cluster).await;
                self.gc.reclaim_cluster(&stores).await;
                info!(cluster = %name, "Cluster removed");
                result
            }
        }
    }
}

/// Await `work`, reporting once if it outlives `limit`. The work is never
/// cancelled.
async fn supervise<F, T>(limit: Duration, kind: &str, name: &str, work: F) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(work);
    tokio::select! {
        out = &mut work => return out,
        _ = tokio::time::sleep(limit) => {
            error!(
                cluster = %name,
                event = kind,
                limit_secs = limit.as_secs(),
                "Event handling exceeded the watchdog limit"
            );
        }
    }
    work.await
}

/// Ask the dispatcher for a sweep every `period`. Ticks arriving while a
/// request is still pending are coalesced.
async fn collect_garbage(sweeps: mpsc::Sender<()>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match sweeps.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => debug!("Sweep already pending"),
            Err(TrySendError::Closed(())) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProvisionerKind, RoleLimits};
    use crate::crd::{DbClusterStatus, RolePhase, Store};
    use crate::gc::NoopProvisioner;
    use crate::platform::{MockHealthChecker, MockPlatform};
    use kube::api::WatchEvent;
    use kube::core::ErrorResponse;
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> OperatorConfig {
        OperatorConfig {
            node_name: "node-1".to_string(),
            namespace: "db".to_string(),
            provisioner: ProvisionerKind::None,
            host_path_root: None,
            gc_exclude: vec![],
            registry: "reg.local".to_string(),
            limits: RoleLimits::default(),
            health_timeout: Duration::from_millis(10),
            startup_max_attempts: 2,
        }
    }

    fn timings() -> WatcherTimings {
        WatcherTimings {
            startup_retry: Duration::from_millis(1),
            gc_interval: Duration::from_secs(3600),
            watchdog: Duration::from_secs(60),
        }
    }

    /// A cluster whose coordinator failed to start; reconciling it is a no-op.
    fn parked(name: &str, rv: &str) -> DbCluster {
        let mut c = DbCluster::new(name, serde_json::from_str("{}").unwrap());
        c.metadata.resource_version = Some(rv.to_string());
        c.status_mut().coordinator.phase = Some(RolePhase::StartFailed);
        c
    }

    fn gone() -> WatchEvent<DbCluster> {
        WatchEvent::Error(ErrorResponse {
            status: "Failure".to_string(),
            message: "too old resource version".to_string(),
            reason: "Expired".to_string(),
            code: 410,
        })
    }

    fn list(items: Vec<DbCluster>, rv: &str) -> ClusterList {
        ClusterList {
            items,
            resource_version: rv.to_string(),
        }
    }

    fn watcher(platform: MockPlatform) -> Watcher {
        Watcher::new(
            Arc::new(platform),
            Arc::new(MockHealthChecker::new()),
            config(),
        )
        .timings(timings())
    }

    #[tokio::test]
    async fn test_expired_watch_with_changed_cluster_is_outdated() {
        let mut platform = MockPlatform::new();
        platform.expect_ensure_cluster_crd().returning(|| Ok(()));
        let lists = AtomicU32::new(0);
        platform.expect_list_clusters().returning(move || {
            if lists.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(list(vec![parked("c1", "100")], "100"))
            } else {
                Ok(list(vec![parked("c1", "105")], "105"))
            }
        });
        platform
            .expect_watch_clusters()
            .with(eq("100"))
            .times(1)
            .returning(|_| Ok(futures::stream::iter(vec![Ok(gone())]).boxed()));

        let result = watcher(platform).run().await;
        assert!(matches!(result, Err(OperatorError::VersionOutdated)));
    }

    #[tokio::test]
    async fn test_expired_watch_with_stable_clusters_resumes() {
        let mut platform = MockPlatform::new();
        platform.expect_ensure_cluster_crd().returning(|| Ok(()));
        let lists = AtomicU32::new(0);
        platform.expect_list_clusters().returning(move || {
            if lists.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(list(vec![parked("c1", "100")], "100"))
            } else {
                Ok(list(vec![parked("c1", "100")], "120"))
            }
        });
        platform
            .expect_watch_clusters()
            .with(eq("100"))
            .times(1)
            .returning(|_| Ok(futures::stream::iter(vec![Ok(gone())]).boxed()));
        platform
            .expect_watch_clusters()
            .with(eq("120"))
            .times(1)
            .returning(|_| {
                Err(OperatorError::Api {
                    code: 500,
                    message: "stop".to_string(),
                })
            });

        let result = watcher(platform).run().await;
        assert!(matches!(result, Err(OperatorError::Api { code: 500, .. })));
    }

    #[tokio::test]
    async fn test_startup_gives_up_after_max_attempts() {
        let mut platform = MockPlatform::new();
        platform
            .expect_ensure_cluster_crd()
            .times(2)
            .returning(|| Err(OperatorError::KubeApi("forbidden".to_string())));

        let result = watcher(platform).run().await;
        assert!(matches!(result, Err(OperatorError::KubeApi(_))));
    }

    #[tokio::test]
    async fn test_host_path_without_node_fails_before_startup() {
        let mut cfg = config();
        cfg.provisioner = ProvisionerKind::HostPath;
        cfg.host_path_root = Some("/data".into());
        cfg.node_name.clear();
        cfg.startup_max_attempts = 0;
        // No platform expectations: a startup attempt would panic.
        let w = Watcher::new(
            Arc::new(MockPlatform::new()),
            Arc::new(MockHealthChecker::new()),
            cfg,
        )
        .timings(timings());

        let result = w.run().await;
        assert!(matches!(result, Err(OperatorError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_stream_forwards_events_and_follows_bookmarks() {
        let mut platform = MockPlatform::new();
        platform
            .expect_watch_clusters()
            .with(eq("100"))
            .times(1)
            .returning(|_| {
                let bookmark: WatchEvent<DbCluster> = serde_json::from_value(serde_json::json!({
                    "type": "BOOKMARK",
                    "object": {
                        "apiVersion": "dbcluster.io/v1alpha1",
                        "kind": "DbCluster",
                        "metadata": { "resourceVersion": "105" }
                    }
                }))
                .unwrap();
                Ok(futures::stream::iter(vec![
                    Ok(WatchEvent::Added(parked("c2", "101"))),
                    Err(OperatorError::Serialization("bad object".to_string())),
                    Ok(bookmark),
                ])
                .boxed())
            });
        platform
            .expect_watch_clusters()
            .with(eq("105"))
            .times(1)
            .returning(|_| Err(OperatorError::KubeApi("closed".to_string())));

        let (event_tx, mut event_rx) = mpsc::channel(1);
        let (err_tx, mut err_rx) = mpsc::channel(1);
        let task = tokio::spawn(stream_events(
            Arc::new(platform),
            WatchCursor::from_list(&[], "100"),
            event_tx,
            err_tx,
        ));

        let event = event_rx.recv().await.unwrap();
        assert_eq!(event.kind(), "ADDED");
        assert_eq!(event.name(), "c2");
        assert!(matches!(err_rx.recv().await, Some(OperatorError::KubeApi(_))));
        task.await.unwrap();
    }

    fn dispatcher(platform: MockPlatform) -> Dispatcher {
        let platform: Arc<dyn Platform> = Arc::new(platform);
        let provisioner: Arc<dyn Provisioner> = Arc::new(NoopProvisioner);
        Dispatcher {
            reconciler: Arc::new(Reconciler::new(
                platform.clone(),
                Arc::new(MockHealthChecker::new()),
                provisioner.clone(),
                ReconcilerSettings::from_config(&config()),
            )),
            gc: Arc::new(GarbageCollector::new(platform, provisioner, "db")),
            store: ClusterStateStore::new(),
            watchdog: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_dispatcher_drops_events_for_unknown_clusters() {
        let mut d = dispatcher(MockPlatform::new());
        let err = d
            .handle(ClusterEvent::Modified(parked("c1", "2")))
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::UnsafeState { .. }));
        let err = d
            .handle(ClusterEvent::Deleted(parked("c1", "3")))
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::UnsafeState { .. }));
        assert!(d.store.is_empty());
    }

    #[tokio::test]
    async fn test_dispatcher_uninstalls_deleted_cluster() {
        let mut platform = MockPlatform::new();
        platform
            .expect_delete_workload()
            .times(3)
            .returning(|_| Ok(()));
        platform
            .expect_delete_service()
            .times(3)
            .returning(|_| Ok(()));
        let mut d = dispatcher(platform);

        d.handle(ClusterEvent::Added(parked("c1", "1")))
            .await
            .unwrap();
        d.handle(ClusterEvent::Modified(parked("c1", "2")))
            .await
            .unwrap();
        assert_eq!(d.store.resource_version("c1"), Some("2"));

        d.handle(ClusterEvent::Deleted(parked("c1", "3")))
            .await
            .unwrap();
        assert!(d.store.get("c1").is_none());
    }

    fn with_stores(mut c: DbCluster, stores: &[(&str, bool)]) -> DbCluster {
        c.status_mut().storage.stores = stores
            .iter()
            .map(|(id, buried)| Store {
                id: id.to_string(),
                node: None,
                buried: *buried,
            })
            .collect();
        c
    }

    fn store_ids(d: &Dispatcher, name: &str) -> Vec<String> {
        d.store
            .get(name)
            .map(|c| c.stores().iter().map(|s| s.id.clone()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_dispatcher_modified_deletes_buried_stores() {
        let mut platform = MockPlatform::new();
        platform
            .expect_patch_cluster_status()
            .withf(|name, status: &DbClusterStatus| {
                name == "c1"
                    && status.storage.stores.len() == 1
                    && status.storage.stores[0].id == "c1-storage-live"
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let mut d = dispatcher(platform);
        let stores = [("c1-storage-dead", true), ("c1-storage-live", false)];

        d.handle(ClusterEvent::Added(with_stores(parked("c1", "1"), &stores)))
            .await
            .unwrap();
        assert_eq!(store_ids(&d, "c1").len(), 2);

        d.handle(ClusterEvent::Modified(with_stores(parked("c1", "2"), &stores)))
            .await
            .unwrap();
        assert_eq!(store_ids(&d, "c1"), vec!["c1-storage-live"]);
    }

    #[tokio::test]
    async fn test_dispatcher_sweep_uses_cached_status() {
        let mut platform = MockPlatform::new();
        platform
            .expect_patch_cluster_status()
            .withf(|name, status: &DbClusterStatus| {
                name == "c1"
                    && status.coordinator.phase == Some(RolePhase::StartFailed)
                    && status.storage.stores.is_empty()
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let mut d = dispatcher(platform);

        d.handle(ClusterEvent::Added(with_stores(
            parked("c1", "1"),
            &[("c1-storage-dead", true)],
        )))
        .await
        .unwrap();
        d.handle(ClusterEvent::Added(with_stores(
            parked("c2", "1"),
            &[("c2-storage-live", false)],
        )))
        .await
        .unwrap();

        d.sweep().await;

        assert!(store_ids(&d, "c1").is_empty());
        assert_eq!(store_ids(&d, "c2"), vec!["c2-storage-live"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_ticker_requests_sweeps_and_coalesces() {
        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(collect_garbage(tx, Duration::from_secs(30)));

        assert_eq!(rx.recv().await, Some(()));

        // Ticks at 60 s, 90 s and 120 s leave a single pending request.
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        drop(rx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_keeps_going_after_error_status() {
        let mut platform = MockPlatform::new();
        platform
            .expect_watch_clusters()
            .with(eq("100"))
            .times(1)
            .returning(|_| {
                Ok(futures::stream::iter(vec![
                    Ok(WatchEvent::Error(ErrorResponse {
                        status: "Failure".to_string(),
                        message: "internal error".to_string(),
                        reason: "InternalError".to_string(),
                        code: 500,
                    })),
                    Ok(WatchEvent::Added(parked("c2", "101"))),
                ])
                .boxed())
            });
        platform
            .expect_watch_clusters()
            .with(eq("101"))
            .times(1)
            .returning(|_| Err(OperatorError::KubeApi("closed".to_string())));

        let (event_tx, mut event_rx) = mpsc::channel(1);
        let (err_tx, mut err_rx) = mpsc::channel(1);
        let task = tokio::spawn(stream_events(
            Arc::new(platform),
            WatchCursor::from_list(&[], "100"),
            event_tx,
            err_tx,
        ));

        let event = event_rx.recv().await.unwrap();
        assert_eq!(event.name(), "c2");
        assert!(matches!(err_rx.recv().await, Some(OperatorError::KubeApi(_))));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_supervise_reports_without_cancelling() {
        let out = supervise(Duration::from_millis(1), "ADDED", "c1", async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            7
        })
        .await;
        assert_eq!(out, 7);
    }
}
