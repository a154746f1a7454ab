#![allow(dead_code)] // each integration crate uses a subset

//! Shared harness for the integration suites.
//!
//! Wires the engine exactly as the binary does, but against a tempdir
//! source checkout, the in-memory cluster, and the static metrics
//! provider, with intervals tightened for test speed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use drift_controller::analysis::StaticMetricsProvider;
use drift_controller::cluster::InMemoryCluster;
use drift_controller::health::HealthRules;
use drift_controller::reconcile::ReconcilerConfig;
use drift_controller::registry::{NewApplication, Registry};
use drift_controller::scheduler::{AppStatusReport, AppWorkerDeps};
use drift_controller::source::FsSourceStore;
use drift_diff::BackoffPolicy;
use drift_id::AppId;
use drift_model::{Destination, SourceRef, SyncMode, SyncPolicy};

pub const REPO: &str = "repo";

pub struct Harness {
    pub tmp: tempfile::TempDir,
    pub cluster: Arc<InMemoryCluster>,
    pub metrics: Arc<StaticMetricsProvider>,
    pub registry: Registry,
}

pub fn harness() -> Harness {
    let tmp = tempfile::tempdir().expect("tempdir");
    let cluster = Arc::new(InMemoryCluster::new());
    let metrics = Arc::new(StaticMetricsProvider::new());

    let deps = AppWorkerDeps {
        source: Arc::new(FsSourceStore::new(tmp.path())),
        cluster: cluster.clone(),
        metrics: metrics.clone(),
        refresh_interval: Duration::from_millis(25),
        external_timeout: Duration::from_secs(2),
        reconciler: ReconcilerConfig {
            max_attempts: 3,
            backoff: BackoffPolicy {
                base: Duration::from_millis(1),
                max: Duration::from_millis(10),
                jitter: 0.0,
            },
            call_timeout: Duration::from_secs(2),
        },
        health: HealthRules::default(),
    };

    Harness {
        tmp,
        cluster,
        metrics,
        registry: Registry::new(deps),
    }
}

impl Harness {
    fn app_dir(&self, path: &str) -> PathBuf {
        let dir = self.tmp.path().join(REPO).join(path);
        std::fs::create_dir_all(&dir).expect("create app dir");
        dir
    }

    pub fn write_manifest(
        &self,
        path: &str,
        file: &str,
        kind: &str,
        namespace: &str,
        name: &str,
        spec: serde_json::Value,
    ) {
        let body = serde_json::json!({
            "kind": kind,
            "namespace": namespace,
            "name": name,
            "spec": spec,
        });
        std::fs::write(
            self.app_dir(path).join(file),
            serde_json::to_vec_pretty(&body).expect("manifest json"),
        )
        .expect("write manifest");
    }

    pub fn remove_manifest(&self, path: &str, file: &str) {
        std::fs::remove_file(self.app_dir(path).join(file)).expect("remove manifest");
    }

    /// A registration request with sensible test defaults: automatic
    /// sync, no prune, no self-heal, destination namespace unique per
    /// app name.
    pub fn new_app(&self, name: &str, path: &str) -> NewApplication {
        NewApplication {
            name: name.to_string(),
            namespace: "default".to_string(),
            source: SourceRef {
                repo: REPO.to_string(),
                path: path.to_string(),
                target: None,
            },
            destination: Destination {
                cluster: "in-memory".to_string(),
                namespace: format!("dest-{name}"),
            },
            sync_policy: SyncPolicy {
                mode: SyncMode::Automatic,
                prune: false,
                self_heal: false,
            },
            sync_windows: Vec::new(),
            rollout: None,
        }
    }
}

/// Poll the status channel until the predicate holds or 10 s elapse.
pub async fn wait_status(
    registry: &Registry,
    id: AppId,
    what: &str,
    pred: impl Fn(&AppStatusReport) -> bool,
) -> AppStatusReport {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(report) = registry.status(id).await {
            if pred(&report) {
                return report;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Let the workers take a few refresh ticks.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}
