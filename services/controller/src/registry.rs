//! Application registry.
//!
//! Owns the worker task for every registered application. Registration
//! spawns a worker; deregistration stops it (optionally cascading
//! deletion of managed resources). Resource ownership stays disjoint:
//! no two applications may claim the same destination, so no resource
//! is ever owned by two of them.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use drift_id::AppId;
use drift_model::{
    Application, Destination, RolloutSpec, RolloutSpecError, SourceRef, SyncPolicy, SyncWindow,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::rollout::{CommandRejected, OperatorCommand};
use crate::scheduler::worker::{TriggerDenied, MAILBOX_SIZE};
use crate::scheduler::{AppCommand, AppStatusReport, AppWorker, AppWorkerDeps, SyncReason, SyncTriggered};

/// How long deregistration waits for a worker to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Registration request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewApplication {
    pub name: String,
    pub namespace: String,
    pub source: SourceRef,
    pub destination: Destination,
    #[serde(default)]
    pub sync_policy: SyncPolicy,
    #[serde(default)]
    pub sync_windows: Vec<SyncWindow>,
    #[serde(default)]
    pub rollout: Option<RolloutSpec>,
}

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("application {namespace}/{name} already registered")]
    NameTaken { namespace: String, name: String },

    #[error("destination {cluster}/{namespace} already managed by application {owner}")]
    DestinationClaimed {
        cluster: String,
        namespace: String,
        owner: String,
    },

    #[error("invalid rollout spec: {0}")]
    InvalidRollout(#[from] RolloutSpecError),

    #[error("application not found: {0}")]
    NotFound(String),
}

/// Errors from commands routed to a worker.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("application not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    SyncDenied(String),

    #[error(transparent)]
    Rollout(#[from] CommandRejected),

    #[error("application worker is not running")]
    WorkerGone,
}

struct AppHandle {
    app: Application,
    cmd_tx: mpsc::Sender<AppCommand>,
    status_rx: watch::Receiver<AppStatusReport>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The application registry.
pub struct Registry {
    deps: AppWorkerDeps,
    apps: RwLock<HashMap<AppId, AppHandle>>,
}

impl Registry {
    pub fn new(deps: AppWorkerDeps) -> Self {
        Self {
            deps,
            apps: RwLock::new(HashMap::new()),
        }
    }

    /// Register an application and start its worker.
    pub async fn register(&self, new: NewApplication) -> Result<Application, RegistryError> {
        if let Some(rollout) = &new.rollout {
            rollout.validate()?;
        }

        let mut apps = self.apps.write().await;

        for handle in apps.values() {
            if handle.app.name == new.name && handle.app.namespace == new.namespace {
                return Err(RegistryError::NameTaken {
                    namespace: new.namespace,
                    name: new.name,
                });
            }
            if handle.app.destination == new.destination {
                return Err(RegistryError::DestinationClaimed {
                    cluster: new.destination.cluster,
                    namespace: new.destination.namespace,
                    owner: handle.app.name.clone(),
                });
            }
        }

        let app = Application {
            id: AppId::new(),
            name: new.name,
            namespace: new.namespace,
            source: new.source,
            destination: new.destination,
            sync_policy: new.sync_policy,
            sync_windows: new.sync_windows,
            rollout: new.rollout,
            created_at: Utc::now(),
        };

        let (worker, status_rx) = AppWorker::new(app.clone(), self.deps.clone());
        let (cmd_tx, cmd_rx) = mpsc::channel(MAILBOX_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(worker.run(cmd_rx, shutdown_rx));

        info!(app = %app.name, app_id = %app.id, "Application registered");

        apps.insert(
            app.id,
            AppHandle {
                app: app.clone(),
                cmd_tx,
                status_rx,
                shutdown_tx,
                task,
            },
        );

        Ok(app)
    }

    /// Deregister an application, stopping its worker. With `cascade`,
    /// managed resources are deleted first.
    pub async fn deregister(&self, id: AppId, cascade: bool) -> Result<(), RegistryError> {
        let handle = {
            let mut apps = self.apps.write().await;
            apps.remove(&id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?
        };

        info!(app = %handle.app.name, app_id = %id, cascade, "Application deregistering");

        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = handle
            .cmd_tx
            .send(AppCommand::Shutdown {
                cascade,
                reply: reply_tx,
            })
            .await;

        if sent.is_ok() {
            if tokio::time::timeout(SHUTDOWN_GRACE, reply_rx).await.is_err() {
                warn!(app_id = %id, "Worker did not confirm shutdown in time, aborting");
                handle.task.abort();
            }
        } else {
            handle.task.abort();
        }
        let _ = handle.shutdown_tx.send(true);

        Ok(())
    }

    /// Resolve an application reference: a typed ID, or a unique name.
    pub async fn resolve(&self, reference: &str) -> Option<AppId> {
        let apps = self.apps.read().await;

        if let Ok(id) = reference.parse::<AppId>() {
            return apps.contains_key(&id).then_some(id);
        }

        let mut matches = apps.values().filter(|h| h.app.name == reference);
        match (matches.next(), matches.next()) {
            (Some(handle), None) => Some(handle.app.id),
            _ => None,
        }
    }

    /// Trigger a sync for an application.
    pub async fn trigger_sync(
        &self,
        id: AppId,
        reason: SyncReason,
    ) -> Result<SyncTriggered, ControlError> {
        let cmd_tx = self.command_sender(id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(AppCommand::TriggerSync {
                reason,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ControlError::WorkerGone)?;

        match reply_rx.await {
            Ok(Ok(triggered)) => Ok(triggered),
            Ok(Err(TriggerDenied(why))) => Err(ControlError::SyncDenied(why)),
            Err(_) => Err(ControlError::WorkerGone),
        }
    }

    /// Route an operator rollout command to the owning worker.
    pub async fn rollout_command(
        &self,
        id: AppId,
        command: OperatorCommand,
    ) -> Result<drift_model::RolloutState, ControlError> {
        let cmd_tx = self.command_sender(id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(AppCommand::Rollout {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ControlError::WorkerGone)?;

        match reply_rx.await {
            Ok(result) => result.map_err(ControlError::from),
            Err(_) => Err(ControlError::WorkerGone),
        }
    }

    /// Latest status snapshot for one application.
    pub async fn status(&self, id: AppId) -> Option<AppStatusReport> {
        let apps = self.apps.read().await;
        apps.get(&id).map(|h| h.status_rx.borrow().clone())
    }

    /// Latest status snapshots for every application.
    pub async fn list(&self) -> Vec<AppStatusReport> {
        let apps = self.apps.read().await;
        let mut reports: Vec<_> = apps.values().map(|h| h.status_rx.borrow().clone()).collect();
        reports.sort_by(|a, b| a.app.name.cmp(&b.app.name));
        reports
    }

    /// Stop every worker (process shutdown).
    pub async fn shutdown_all(&self) {
        let mut apps = self.apps.write().await;
        info!(count = apps.len(), "Stopping all application workers");

        for handle in apps.values() {
            let _ = handle.shutdown_tx.send(true);
        }

        for (id, handle) in apps.drain() {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle.task).await.is_err() {
                warn!(app_id = %id, "Worker did not stop in time");
            }
        }
    }

    async fn command_sender(&self, id: AppId) -> Result<mpsc::Sender<AppCommand>, ControlError> {
        let apps = self.apps.read().await;
        apps.get(&id)
            .map(|h| h.cmd_tx.clone())
            .ok_or_else(|| ControlError::NotFound(id.to_string()))
    }
}
