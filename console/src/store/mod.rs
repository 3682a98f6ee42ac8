//! Persistence seam.
//!
//! The console reads pages, environment entries and accounts through
//! [`Store`] and is the only writer of deployment outcomes. Any relational
//! backend can implement it; [`memory::MemoryStore`] ships for single-node use
//! and tests.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::errors::ConsoleError;
use crate::models::{Account, Deployment, DeploymentId, EnvVar, Page, PageId};

/// Fields accepted when creating or replacing a page
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDraft {
    pub account_login: Option<String>,
    pub repo: String,
    pub name: String,
    pub branch: String,
    pub build_script: Option<String>,
    pub build_output_dir: Option<String>,
}

impl PageDraft {
    pub fn into_page(self, id: PageId) -> Page {
        Page {
            id,
            account_login: self.account_login,
            repo: self.repo,
            name: self.name,
            branch: self.branch,
            build_script: self.build_script.filter(|s| !s.is_empty()),
            build_output_dir: self.build_output_dir.filter(|s| !s.is_empty()),
            service: None,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_page(&self, page_id: PageId) -> Result<Option<Page>, ConsoleError>;

    async fn create_page(&self, draft: PageDraft) -> Result<Page, ConsoleError>;

    /// Replace an existing page; `NotFound` if it does not exist
    async fn update_page(&self, page_id: PageId, draft: PageDraft) -> Result<Page, ConsoleError>;

    /// Record the unit provisioned for a page
    async fn set_page_service(
        &self,
        page_id: PageId,
        service: Option<String>,
    ) -> Result<(), ConsoleError>;

    /// Every page building `branch` of `repo`
    async fn pages_for_push(&self, repo: &str, branch: &str) -> Result<Vec<Page>, ConsoleError>;

    /// Delete a page with its environment entries and deployments.
    /// Returns the deleted page, or `None` if it did not exist.
    async fn delete_page(&self, page_id: PageId) -> Result<Option<Page>, ConsoleError>;

    async fn env_vars(&self, page_id: PageId) -> Result<Vec<EnvVar>, ConsoleError>;

    async fn replace_env_vars(
        &self,
        page_id: PageId,
        env_vars: Vec<EnvVar>,
    ) -> Result<(), ConsoleError>;

    async fn account(&self, login: &str) -> Result<Option<Account>, ConsoleError>;

    /// Insert a deployment row with a null exit code
    async fn insert_deployment(&self, page_id: PageId) -> Result<Deployment, ConsoleError>;

    /// Set exit code and completion time if, and only if, they are unset
    async fn complete_deployment(
        &self,
        deployment_id: DeploymentId,
        exit_code: i32,
        completed_at: DateTime<Utc>,
    ) -> Result<Deployment, ConsoleError>;

    async fn get_deployment(
        &self,
        deployment_id: DeploymentId,
    ) -> Result<Option<Deployment>, ConsoleError>;

    /// Deployments of a page, newest first
    async fn deployments_for_page(&self, page_id: PageId)
        -> Result<Vec<Deployment>, ConsoleError>;

    /// Deployments whose exit code is still null
    async fn incomplete_deployments(&self) -> Result<Vec<Deployment>, ConsoleError>;
}
