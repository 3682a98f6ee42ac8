//! In-memory store with an optional JSON snapshot

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::ConsoleError;
use crate::filesys::file::File;
use crate::models::{Account, Deployment, DeploymentId, EnvVar, Page, PageId};
use crate::store::{PageDraft, Store};

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredAccount {
    login: String,
    access_token: String,
}

#[derive(Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StoreData {
    next_page_id: PageId,
    next_deployment_id: DeploymentId,
    pages: BTreeMap<PageId, Page>,
    env_vars: BTreeMap<PageId, Vec<EnvVar>>,
    deployments: BTreeMap<DeploymentId, Deployment>,
    accounts: BTreeMap<String, StoredAccount>,
}

/// Store keeping every table in memory. When opened with a snapshot file,
/// each mutation rewrites the snapshot atomically.
pub struct MemoryStore {
    data: RwLock<StoreData>,
    snapshot: Option<File>,
}

impl MemoryStore {
    /// Create an empty, purely in-memory store
    pub fn new() -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            snapshot: None,
        }
    }

    /// Open a store backed by a snapshot file, loading it if it exists
    pub async fn open(snapshot: File) -> Result<Self, ConsoleError> {
        let data = if snapshot.exists().await {
            let data: StoreData = snapshot.read_json().await?;
            info!(
                "Loaded store snapshot: {} pages, {} deployments",
                data.pages.len(),
                data.deployments.len()
            );
            data
        } else {
            StoreData::default()
        };

        Ok(Self {
            data: RwLock::new(data),
            snapshot: Some(snapshot),
        })
    }

    /// Register or replace a source-control account
    pub async fn insert_account(&self, account: Account) -> Result<(), ConsoleError> {
        let mut data = self.data.write().await;
        data.accounts.insert(
            account.login.clone(),
            StoredAccount {
                login: account.login,
                access_token: account.access_token.expose_secret().to_string(),
            },
        );
        self.persist(&data).await
    }

    async fn persist(&self, data: &StoreData) -> Result<(), ConsoleError> {
        if let Some(snapshot) = &self.snapshot {
            snapshot.write_json_atomic(data).await?;
            debug!("Store snapshot written to {}", snapshot.path().display());
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_page(&self, page_id: PageId) -> Result<Option<Page>, ConsoleError> {
        Ok(self.data.read().await.pages.get(&page_id).cloned())
    }

    async fn create_page(&self, draft: PageDraft) -> Result<Page, ConsoleError> {
        let mut data = self.data.write().await;
        data.next_page_id += 1;
        let page = draft.into_page(data.next_page_id);
        data.pages.insert(page.id, page.clone());
        self.persist(&data).await?;
        Ok(page)
    }

    async fn update_page(&self, page_id: PageId, draft: PageDraft) -> Result<Page, ConsoleError> {
        let mut data = self.data.write().await;
        let Some(existing) = data.pages.get(&page_id) else {
            return Err(ConsoleError::NotFound(format!("page {}", page_id)));
        };
        let mut page = draft.into_page(page_id);
        page.service = existing.service.clone();
        data.pages.insert(page_id, page.clone());
        self.persist(&data).await?;
        Ok(page)
    }

    async fn set_page_service(
        &self,
        page_id: PageId,
        service: Option<String>,
    ) -> Result<(), ConsoleError> {
        let mut data = self.data.write().await;
        let page = data
            .pages
            .get_mut(&page_id)
            .ok_or_else(|| ConsoleError::NotFound(format!("page {}", page_id)))?;
        page.service = service;
        self.persist(&data).await
    }

    async fn pages_for_push(&self, repo: &str, branch: &str) -> Result<Vec<Page>, ConsoleError> {
        let data = self.data.read().await;
        Ok(data
            .pages
            .values()
            .filter(|page| page.matches_push(repo, branch))
            .cloned()
            .collect())
    }

    async fn delete_page(&self, page_id: PageId) -> Result<Option<Page>, ConsoleError> {
        let mut data = self.data.write().await;
        let Some(page) = data.pages.remove(&page_id) else {
            return Ok(None);
        };
        data.env_vars.remove(&page_id);
        data.deployments.retain(|_, d| d.page_id != page_id);
        self.persist(&data).await?;
        Ok(Some(page))
    }

    async fn env_vars(&self, page_id: PageId) -> Result<Vec<EnvVar>, ConsoleError> {
        let data = self.data.read().await;
        Ok(data.env_vars.get(&page_id).cloned().unwrap_or_default())
    }

    async fn replace_env_vars(
        &self,
        page_id: PageId,
        env_vars: Vec<EnvVar>,
    ) -> Result<(), ConsoleError> {
        let mut data = self.data.write().await;
        if !data.pages.contains_key(&page_id) {
            return Err(ConsoleError::NotFound(format!("page {}", page_id)));
        }
        data.env_vars.insert(page_id, env_vars);
        self.persist(&data).await
    }

    async fn account(&self, login: &str) -> Result<Option<Account>, ConsoleError> {
        let data = self.data.read().await;
        Ok(data.accounts.get(login).map(|stored| Account {
            login: stored.login.clone(),
            access_token: SecretString::from(stored.access_token.clone()),
        }))
    }

    async fn insert_deployment(&self, page_id: PageId) -> Result<Deployment, ConsoleError> {
        let mut data = self.data.write().await;
        if !data.pages.contains_key(&page_id) {
            return Err(ConsoleError::NotFound(format!("page {}", page_id)));
        }
        data.next_deployment_id += 1;
        let deployment = Deployment {
            id: data.next_deployment_id,
            page_id,
            created_at: Utc::now(),
            completed_at: None,
            exit_code: None,
        };
        data.deployments.insert(deployment.id, deployment.clone());
        self.persist(&data).await?;
        Ok(deployment)
    }

    async fn complete_deployment(
        &self,
        deployment_id: DeploymentId,
        exit_code: i32,
        completed_at: DateTime<Utc>,
    ) -> Result<Deployment, ConsoleError> {
        let mut data = self.data.write().await;
        let deployment = data
            .deployments
            .get_mut(&deployment_id)
            .ok_or_else(|| ConsoleError::NotFound(format!("deployment {}", deployment_id)))?;

        if deployment.is_completed() {
            return Err(ConsoleError::DeployError(format!(
                "deployment {} is already completed",
                deployment_id
            )));
        }

        deployment.exit_code = Some(exit_code);
        deployment.completed_at = Some(completed_at);
        let deployment = deployment.clone();
        self.persist(&data).await?;
        Ok(deployment)
    }

    async fn get_deployment(
        &self,
        deployment_id: DeploymentId,
    ) -> Result<Option<Deployment>, ConsoleError> {
        Ok(self.data.read().await.deployments.get(&deployment_id).cloned())
    }

    async fn deployments_for_page(
        &self,
        page_id: PageId,
    ) -> Result<Vec<Deployment>, ConsoleError> {
        let data = self.data.read().await;
        Ok(data
            .deployments
            .values()
            .rev()
            .filter(|d| d.page_id == page_id)
            .cloned()
            .collect())
    }

    async fn incomplete_deployments(&self) -> Result<Vec<Deployment>, ConsoleError> {
        let data = self.data.read().await;
        Ok(data
            .deployments
            .values()
            .filter(|d| !d.is_completed())
            .cloned()
            .collect())
    }
}
