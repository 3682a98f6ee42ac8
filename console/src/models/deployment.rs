//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{DeploymentId, PageId};

/// One build-and-provision attempt for a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: DeploymentId,

    pub page_id: PageId,

    pub created_at: DateTime<Utc>,

    /// Set together with `exit_code`, exactly once
    pub completed_at: Option<DateTime<Utc>>,

    /// `None` while the deployment is pending or running
    pub exit_code: Option<i32>,
}

impl Deployment {
    pub fn is_completed(&self) -> bool {
        self.exit_code.is_some()
    }
}

/// Coarse status reported to API clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl DeploymentStatus {
    /// Status implied by a stored exit code
    pub fn from_exit_code(exit_code: i32) -> Self {
        if exit_code == 0 {
            DeploymentStatus::Succeeded
        } else {
            DeploymentStatus::Failed
        }
    }
}

/// A deployment row together with its derived status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentView {
    #[serde(flatten)]
    pub deployment: Deployment,

    pub status: DeploymentStatus,
}
