//! Authoritative record of deployment lifecycles.
//!
//! Rows live in the [`Store`]; a [`DeploymentFsm`] is kept for every deployment
//! whose worker has not finished, so that queued deployments can be told apart
//! from running ones.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use tracing::{error, info, warn};

use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState};
use crate::deploy::log::{DeploymentLog, LogHub};
use crate::errors::ConsoleError;
use crate::models::deployment::DeploymentView;
use crate::models::{Deployment, DeploymentId, DeploymentStatus, PageId};
use crate::store::Store;

/// Exit code recorded for deployments left unfinished by a previous process
pub const ORPHANED_EXIT_CODE: i32 = -1;

pub struct DeploymentTracker {
    store: Arc<dyn Store>,
    hub: Arc<LogHub>,
    active: StdMutex<HashMap<DeploymentId, DeploymentFsm>>,
}

impl DeploymentTracker {
    pub fn new(store: Arc<dyn Store>, hub: Arc<LogHub>) -> Self {
        Self {
            store,
            hub,
            active: StdMutex::new(HashMap::new()),
        }
    }

    pub fn hub(&self) -> &Arc<LogHub> {
        &self.hub
    }

    /// Insert a new deployment and initialize its log with the banner
    pub async fn create(
        &self,
        page_id: PageId,
    ) -> Result<(Deployment, Arc<DeploymentLog>), ConsoleError> {
        let deployment = self.store.insert_deployment(page_id).await?;
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(deployment.id, DeploymentFsm::new());

        let log = match self.hub.create(deployment.id).await {
            Ok(log) => log,
            Err(e) => {
                error!("Failed to initialize log for deployment {}: {}", deployment.id, e);
                self.forget(deployment.id);
                let _ = self
                    .store
                    .complete_deployment(deployment.id, 1, Utc::now())
                    .await;
                return Err(e);
            }
        };

        info!("Created deployment {} for page {}", deployment.id, page_id);
        Ok((deployment, log))
    }

    /// Record that the worker has started the pipeline
    pub fn mark_running(&self, deployment_id: DeploymentId) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(fsm) = active.get_mut(&deployment_id) {
            if let Err(e) = fsm.process(DeploymentEvent::Start) {
                warn!("Deployment {}: {}", deployment_id, e);
            }
        }
    }

    /// Record the terminal exit code. The row is updated before the sentinel
    /// is appended, so a reader seeing the sentinel also sees the outcome.
    pub async fn complete(
        &self,
        deployment_id: DeploymentId,
        exit_code: i32,
    ) -> Result<Deployment, ConsoleError> {
        self.advance(deployment_id, exit_code);

        let result = self
            .store
            .complete_deployment(deployment_id, exit_code, Utc::now())
            .await;

        if let Some(log) = self.hub.get(deployment_id) {
            if let Err(e) = log.finish().await {
                error!("Failed to finish log for deployment {}: {}", deployment_id, e);
            }
        }
        self.hub.release(deployment_id);
        self.forget(deployment_id);

        match &result {
            Ok(_) => info!(
                "Deployment {} completed with exit code {}",
                deployment_id, exit_code
            ),
            Err(e) => error!("Failed to record completion of deployment {}: {}", deployment_id, e),
        }
        result
    }

    /// Derived status of a stored deployment
    pub fn status(&self, deployment: &Deployment) -> DeploymentStatus {
        if let Some(code) = deployment.exit_code {
            return DeploymentStatus::from_exit_code(code);
        }
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&deployment.id)
            .map(|fsm| fsm.state().into())
            .unwrap_or(DeploymentStatus::Running)
    }

    pub fn view(&self, deployment: Deployment) -> DeploymentView {
        let status = self.status(&deployment);
        DeploymentView { deployment, status }
    }

    /// Complete every deployment left without an exit code by a previous
    /// process. Must run before any worker is started.
    pub async fn reconcile_orphans(&self) -> Result<usize, ConsoleError> {
        let orphans = self.store.incomplete_deployments().await?;

        for deployment in &orphans {
            warn!(
                "Reconciling orphaned deployment {} of page {}",
                deployment.id, deployment.page_id
            );
            match self.hub.reopen(deployment.id).await {
                Ok(log) => {
                    if let Err(e) = log
                        .error("The console stopped before this deployment finished.")
                        .await
                    {
                        warn!("Unable to annotate log of deployment {}: {}", deployment.id, e);
                    }
                }
                Err(e) => warn!("Unable to reopen log of deployment {}: {}", deployment.id, e),
            }

            self.active
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(deployment.id, DeploymentFsm::new());
            if let Err(e) = self.complete(deployment.id, ORPHANED_EXIT_CODE).await {
                error!("Unable to reconcile deployment {}: {}", deployment.id, e);
            }
        }

        if !orphans.is_empty() {
            info!("Reconciled {} orphaned deployments", orphans.len());
        }
        Ok(orphans.len())
    }

    fn advance(&self, deployment_id: DeploymentId, exit_code: i32) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let Some(fsm) = active.get_mut(&deployment_id) else {
            return;
        };
        let event = match fsm.state() {
            DeploymentState::Pending => DeploymentEvent::Abort(exit_code),
            _ => DeploymentEvent::Complete(exit_code),
        };
        if let Err(e) = fsm.process(event) {
            warn!("Deployment {}: {}", deployment_id, e);
        }
    }

    fn forget(&self, deployment_id: DeploymentId) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&deployment_id);
    }
}
