//! Build workers: one isolated task per deployment

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::deploy::log::DeploymentLog;
use crate::deploy::pipeline::{run_pipeline, PipelineContext};
use crate::deploy::systemd::{deprovision, service_name};
use crate::deploy::tracker::DeploymentTracker;
use crate::errors::ConsoleError;
use crate::models::{DeploymentId, Page, PageId};

/// Exit code recorded when a deployment exceeds its deadline
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code recorded when shutdown cancels a deployment
pub const CANCELLED_EXIT_CODE: i32 = 130;

/// Exit code recorded for worker errors and panics
pub const WORKER_ERROR_EXIT_CODE: i32 = 1;

/// Deployer options
#[derive(Debug, Clone)]
pub struct Options {
    /// Deadline of a single deployment, queueing excluded
    pub timeout: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(1800)),
        }
    }
}

/// Exit code recorded for a pipeline that ended with `err`
pub fn exit_code_for(err: &ConsoleError) -> i32 {
    match err {
        ConsoleError::Timeout(_) => TIMEOUT_EXIT_CODE,
        ConsoleError::Cancelled(_) => CANCELLED_EXIT_CODE,
        _ => WORKER_ERROR_EXIT_CODE,
    }
}

/// Starts and supervises build workers. Deployments of the same page run one
/// at a time; different pages deploy in parallel.
pub struct Deployer {
    ctx: PipelineContext,
    tracker: Arc<DeploymentTracker>,
    options: Options,
    page_locks: StdMutex<HashMap<PageId, Arc<Mutex<()>>>>,
    workers: StdMutex<JoinSet<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Deployer {
    pub fn new(ctx: PipelineContext, tracker: Arc<DeploymentTracker>, options: Options) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            ctx,
            tracker,
            options,
            page_locks: StdMutex::new(HashMap::new()),
            workers: StdMutex::new(JoinSet::new()),
            shutdown_tx,
        }
    }

    pub fn tracker(&self) -> &Arc<DeploymentTracker> {
        &self.tracker
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Create a deployment for `page_id` and start its worker. Returns as soon
    /// as the worker is spawned.
    pub async fn trigger(self: &Arc<Self>, page_id: PageId) -> Result<DeploymentId, ConsoleError> {
        if self.is_shutting_down() {
            return Err(ConsoleError::ShutdownError(
                "console is shutting down".to_string(),
            ));
        }
        if self.ctx.store.get_page(page_id).await?.is_none() {
            return Err(ConsoleError::NotFound(format!("page {}", page_id)));
        }

        let (deployment, log) = self.tracker.create(page_id).await?;
        let deployment_id = deployment.id;

        let spawned = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            while let Some(res) = workers.try_join_next() {
                if let Err(e) = res {
                    error!("Worker supervisor failed: {}", e);
                }
            }
            if self.is_shutting_down() {
                false
            } else {
                let this = self.clone();
                workers.spawn(async move { this.supervise(page_id, deployment_id, log).await });
                true
            }
        };

        if !spawned {
            self.tracker
                .complete(deployment_id, CANCELLED_EXIT_CODE)
                .await?;
            return Err(ConsoleError::ShutdownError(
                "console is shutting down".to_string(),
            ));
        }

        info!("Triggered deployment {} for page {}", deployment_id, page_id);
        Ok(deployment_id)
    }

    /// Run the worker as its own task so a panic is recorded like any other
    /// failure.
    async fn supervise(
        self: Arc<Self>,
        page_id: PageId,
        deployment_id: DeploymentId,
        log: Arc<DeploymentLog>,
    ) {
        let worker = tokio::spawn({
            let this = self.clone();
            let log = log.clone();
            async move { this.work(page_id, &log).await }
        });

        let exit_code = match worker.await {
            Ok(code) => code,
            Err(e) => {
                error!("Worker for deployment {} crashed: {}", deployment_id, e);
                let _ = log.error(&format!("Build worker crashed: {}", e)).await;
                WORKER_ERROR_EXIT_CODE
            }
        };

        if let Err(e) = self.tracker.complete(deployment_id, exit_code).await {
            error!("Deployment {} could not be completed: {}", deployment_id, e);
        }
    }

    async fn work(&self, page_id: PageId, log: &DeploymentLog) -> i32 {
        let deployment_id = log.deployment_id();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let lock = self.page_lock(page_id);

        let _guard = match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Deployment {} queued behind page {}", deployment_id, page_id);
                let _ = log
                    .line("Waiting for the previous deployment of this page to finish...")
                    .await;
                tokio::select! {
                    guard = lock.lock_owned() => guard,
                    _ = stopped(&mut shutdown_rx) => {
                        let _ = log.error("Cancelled before start: the console is shutting down.").await;
                        return CANCELLED_EXIT_CODE;
                    }
                }
            }
        };

        let page = match self.ctx.store.get_page(page_id).await {
            Ok(Some(page)) => page,
            Ok(None) => {
                let _ = log.error("The page was deleted before this deployment started.").await;
                return WORKER_ERROR_EXIT_CODE;
            }
            Err(e) => {
                let _ = log.error(&e.to_string()).await;
                return WORKER_ERROR_EXIT_CODE;
            }
        };

        self.tracker.mark_running(deployment_id);
        info!("Deployment {} of page {} running", deployment_id, page_id);

        let result = tokio::select! {
            result = with_deadline(self.options.timeout, run_pipeline(&self.ctx, &page, log)) => result,
            _ = stopped(&mut shutdown_rx) => {
                Err(ConsoleError::Cancelled("the console is shutting down".to_string()))
            }
        };

        match result {
            Ok(code) => code,
            Err(e) => {
                warn!("Deployment {} failed: {}", deployment_id, e);
                let _ = log.error(&e.to_string()).await;
                exit_code_for(&e)
            }
        }
    }

    fn page_lock(&self, page_id: PageId) -> Arc<Mutex<()>> {
        self.page_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(page_id)
            .or_default()
            .clone()
    }

    /// Delete a page once its running deployment (if any) has finished:
    /// stop and remove its service, then its working tree, deployment logs
    /// and rows.
    pub async fn delete_page(&self, page_id: PageId) -> Result<Page, ConsoleError> {
        if self.ctx.store.get_page(page_id).await?.is_none() {
            return Err(ConsoleError::NotFound(format!("page {}", page_id)));
        }

        let lock = self.page_lock(page_id);
        let _guard = lock.lock().await;

        // A worker holding the lock may have provisioned under a new name
        let Some(page) = self.ctx.store.get_page(page_id).await? else {
            return Err(ConsoleError::NotFound(format!("page {}", page_id)));
        };

        let current = service_name(&page.name);
        if let Some(previous) = page.service.as_deref().filter(|previous| *previous != current) {
            deprovision(self.ctx.services.as_ref(), &self.ctx.layout, previous).await?;
        }
        deprovision(self.ctx.services.as_ref(), &self.ctx.layout, &current).await?;
        self.ctx.layout.working_tree(page_id).delete().await?;
        for deployment in self.ctx.store.deployments_for_page(page_id).await? {
            self.tracker.hub().remove(deployment.id).await?;
        }
        self.ctx.store.delete_page(page_id).await?;

        self.page_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&page_id);

        info!("Deleted page {} ({})", page_id, page.name);
        Ok(page)
    }

    /// Cancel queued and running workers and wait until each has recorded
    /// its exit code. Later triggers are refused.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let mut workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));

        info!("Waiting for {} deployment workers to stop...", workers.len());
        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                error!("Worker supervisor failed: {}", e);
            }
        }
    }
}

async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

async fn with_deadline<F>(timeout: Option<Duration>, pipeline: F) -> Result<i32, ConsoleError>
where
    F: Future<Output = Result<i32, ConsoleError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, pipeline)
            .await
            .map_err(|_| ConsoleError::Timeout(limit))?,
        None => pipeline.await,
    }
}
