//! Storage provisioners
//!
//! A provisioner decides how storage pods get their data volume and how the
//! volume of a dead store is reclaimed.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{EmptyDirVolumeSource, HostPathVolumeSource, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::{debug, info, warn};

use crate::config::{OperatorConfig, ProvisionerKind};
use crate::crd::{ComponentSpec, Store};
use crate::error::{OperatorError, Result};

/// Volume name used by storage pods
pub const DATA_VOLUME: &str = "data";

/// Mount path of the data volume inside storage pods
pub const DATA_MOUNT_PATH: &str = "/data";

/// Volume and mount to add to the storage pod template
#[derive(Debug, Clone)]
pub struct StorageVolume {
    pub volume: Volume,
    pub mount: VolumeMount,
}

/// What reclaiming a store's volume amounted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reclaim {
    /// Nothing on disk to remove
    Nothing,
    /// Removed locally
    Removed(PathBuf),
    /// Lives on another node; `dir` must be removed under `root` there
    Remote {
        node: String,
        root: PathBuf,
        dir: String,
    },
}

pub trait Provisioner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Data volume for storage pods
    fn volume(&self, component: &ComponentSpec) -> StorageVolume;

    /// Remove every volume not backing a store in `live`; returns removed paths
    fn clean(&self, live: &[Store]) -> Result<Vec<PathBuf>>;

    /// Reclaim the volume of one store
    fn reclaim(&self, store: &Store) -> Result<Reclaim>;
}

/// Pod-local `emptyDir` volumes that vanish with the pod
#[derive(Debug, Default)]
pub struct NoopProvisioner;

impl Provisioner for NoopProvisioner {
    fn name(&self) -> &'static str {
        "none"
    }

    fn volume(&self, component: &ComponentSpec) -> StorageVolume {
        StorageVolume {
            volume: Volume {
                name: DATA_VOLUME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource {
                    size_limit: component.storage_size.clone().map(Quantity),
                    ..Default::default()
                }),
                ..Default::default()
            },
            mount: VolumeMount {
                name: DATA_VOLUME.to_string(),
                mount_path: DATA_MOUNT_PATH.to_string(),
                ..Default::default()
            },
        }
    }

    fn clean(&self, _live: &[Store]) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    fn reclaim(&self, _store: &Store) -> Result<Reclaim> {
        Ok(Reclaim::Nothing)
    }
}

/// One directory per storage pod under a host mount: `{root}/{pod}`
#[derive(Debug, Clone)]
pub struct HostPathProvisioner {
    host_name: String,
    root: PathBuf,
    exclude: HashSet<String>,
}

impl HostPathProvisioner {
    pub fn new(host_name: &str, root: impl Into<PathBuf>, exclude: &[String]) -> Self {
        Self {
            host_name: host_name.to_string(),
            root: root.into(),
            exclude: exclude.iter().cloned().collect(),
        }
    }

    fn store_dir(&self, store: &Store) -> Result<PathBuf> {
        if store.id.is_empty()
            || store.id.contains('/')
            || store.id == "."
            || store.id == ".."
        {
            return Err(OperatorError::InvalidState(format!(
                "store id {:?} is not a directory name",
                store.id
            )));
        }
        Ok(self.root.join(&store.id))
    }
}

impl Provisioner for HostPathProvisioner {
    fn name(&self) -> &'static str {
        "host-path"
    }

    fn volume(&self, _component: &ComponentSpec) -> StorageVolume {
        StorageVolume {
            volume: Volume {
                name: DATA_VOLUME.to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: self.root.to_string_lossy().into_owned(),
                    type_: Some("DirectoryOrCreate".to_string()),
                }),
                ..Default::default()
            },
            mount: VolumeMount {
                name: DATA_VOLUME.to_string(),
                mount_path: DATA_MOUNT_PATH.to_string(),
                sub_path_expr: Some("$(POD_NAME)".to_string()),
                ..Default::default()
            },
        }
    }

    fn clean(&self, live: &[Store]) -> Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(root = %self.root.display(), "Host path root does not exist, nothing to clean");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let live: HashSet<&str> = live.iter().map(|s| s.id.as_str()).collect();
        let mut removed = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if live.contains(name.as_str()) || self.exclude.contains(&name) {
                debug!(dir = %name, "Keeping volume directory");
                continue;
            }
            let path = entry.path();
            std::fs::remove_dir_all(&path)?;
            info!(path = %path.display(), "Removed orphaned volume directory");
            removed.push(path);
        }
        removed.sort();
        Ok(removed)
    }

    fn reclaim(&self, store: &Store) -> Result<Reclaim> {
        let dir = self.store_dir(store)?;
        match store.node.as_deref() {
            Some(node) if node != self.host_name => Ok(Reclaim::Remote {
                node: node.to_string(),
                root: self.root.clone(),
                dir: store.id.clone(),
            }),
            _ => match std::fs::remove_dir_all(&dir) {
                Ok(()) => {
                    info!(path = %dir.display(), store = %store.id, "Reclaimed store volume");
                    Ok(Reclaim::Removed(dir))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Reclaim::Nothing),
                Err(e) => Err(e.into()),
            },
        }
    }
}

/// Build the provisioner named by the configuration
pub fn select(config: &OperatorConfig) -> Result<Arc<dyn Provisioner>> {
    match config.provisioner {
        ProvisionerKind::None => Ok(Arc::new(NoopProvisioner)),
        ProvisionerKind::HostPath => {
            let root = config.host_path_root.clone().ok_or_else(|| {
                OperatorError::Configuration("host-path provisioner requires a root".to_string())
            })?;
            if config.node_name.is_empty() {
                return Err(OperatorError::Configuration(
                    "host-path provisioner requires the node name".to_string(),
                ));
            }
            Ok(Arc::new(HostPathProvisioner::new(
                &config.node_name,
                root,
                &config.gc_exclude,
            )))
        }
    }
}

/// Labels put on cleanup jobs
pub fn cleanup_labels(cluster: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), "dbcluster".to_string());
    labels.insert("app.kubernetes.io/instance".to_string(), cluster.to_string());
    labels.insert("app.kubernetes.io/component".to_string(), "reclaim".to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoleLimits;
    use std::path::Path;
    use std::time::Duration;

    fn store(id: &str, node: Option<&str>) -> Store {
        Store {
            id: id.to_string(),
            node: node.map(str::to_string),
            buried: false,
        }
    }

    fn mkdirs(root: &Path, names: &[&str]) {
        for name in names {
            std::fs::create_dir_all(root.join(name).join("db")).unwrap();
        }
    }

    #[test]
    fn test_clean_removes_only_orphans() {
        let tmp = tempfile::tempdir().unwrap();
        mkdirs(tmp.path(), &["c1-storage-a", "c1-storage-b", "c1-storage-old", "grafana"]);
        std::fs::write(tmp.path().join("notes.txt"), b"keep").unwrap();

        let provisioner =
            HostPathProvisioner::new("node-1", tmp.path(), &["grafana".to_string()]);
        let removed = provisioner
            .clean(&[store("c1-storage-a", None), store("c1-storage-b", Some("node-2"))])
            .unwrap();

        assert_eq!(removed, vec![tmp.path().join("c1-storage-old")]);
        assert!(tmp.path().join("c1-storage-a").exists());
        assert!(tmp.path().join("c1-storage-b").exists());
        assert!(tmp.path().join("grafana").exists());
        assert!(tmp.path().join("notes.txt").exists());
    }

    #[test]
    fn test_clean_missing_root_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let provisioner = HostPathProvisioner::new("node-1", tmp.path().join("absent"), &[]);
        assert!(provisioner.clean(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_noop_never_deletes() {
        let tmp = tempfile::tempdir().unwrap();
        mkdirs(tmp.path(), &["c1-storage-old"]);
        let provisioner = NoopProvisioner;
        assert!(provisioner.clean(&[]).unwrap().is_empty());
        assert_eq!(
            provisioner.reclaim(&store("c1-storage-old", None)).unwrap(),
            Reclaim::Nothing
        );
        assert!(tmp.path().join("c1-storage-old").exists());
    }

    #[test]
    fn test_reclaim_local_and_remote() {
        let tmp = tempfile::tempdir().unwrap();
        mkdirs(tmp.path(), &["c1-storage-a", "c1-storage-b"]);
        let provisioner = HostPathProvisioner::new("node-1", tmp.path(), &[]);

        let local = provisioner
            .reclaim(&store("c1-storage-a", Some("node-1")))
            .unwrap();
        assert_eq!(local, Reclaim::Removed(tmp.path().join("c1-storage-a")));
        assert!(!tmp.path().join("c1-storage-a").exists());

        let remote = provisioner
            .reclaim(&store("c1-storage-b", Some("node-2")))
            .unwrap();
        assert_eq!(
            remote,
            Reclaim::Remote {
                node: "node-2".to_string(),
                root: tmp.path().to_path_buf(),
                dir: "c1-storage-b".to_string(),
            }
        );
        assert!(tmp.path().join("c1-storage-b").exists());

        let again = provisioner
            .reclaim(&store("c1-storage-a", None))
            .unwrap();
        assert_eq!(again, Reclaim::Nothing);
    }

    #[test]
    fn test_reclaim_rejects_path_escape() {
        let provisioner = HostPathProvisioner::new("node-1", "/data", &[]);
        assert!(provisioner.reclaim(&store("..", None)).is_err());
        assert!(provisioner.reclaim(&store("a/b", None)).is_err());
    }

    #[test]
    fn test_host_path_volume_uses_pod_subpath() {
        let provisioner = HostPathProvisioner::new("node-1", "/mnt/db", &[]);
        let volume = provisioner.volume(&ComponentSpec::default());
        assert_eq!(
            volume.volume.host_path.map(|h| h.path),
            Some("/mnt/db".to_string())
        );
        assert_eq!(volume.mount.sub_path_expr.as_deref(), Some("$(POD_NAME)"));
    }

    #[test]
    fn test_noop_volume_sized_from_spec() {
        let component = ComponentSpec {
            storage_size: Some("10Gi".to_string()),
            ..Default::default()
        };
        let volume = NoopProvisioner.volume(&component);
        assert_eq!(
            volume.volume.empty_dir.and_then(|e| e.size_limit),
            Some(Quantity("10Gi".to_string()))
        );
    }

    #[test]
    fn test_select() {
        let mut config = OperatorConfig {
            node_name: "node-1".to_string(),
            namespace: "db".to_string(),
            provisioner: ProvisionerKind::None,
            host_path_root: None,
            gc_exclude: vec![],
            registry: "registry.local".to_string(),
            limits: RoleLimits::default(),
            health_timeout: Duration::from_secs(300),
            startup_max_attempts: 0,
        };
        assert_eq!(select(&config).unwrap().name(), "none");

        config.provisioner = ProvisionerKind::HostPath;
        assert!(select(&config).is_err());

        config.host_path_root = Some(PathBuf::from("/mnt/db"));
        assert_eq!(select(&config).unwrap().name(), "host-path");
    }
}
