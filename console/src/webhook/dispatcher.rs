//! Push notification fan-out

use std::sync::Arc;

use futures::future::join_all;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::errors::ConsoleError;
use crate::models::DeploymentId;
use crate::store::Store;
use crate::webhook::signature::verify_signature;
use crate::workers::deployer::Deployer;

/// Event type that triggers deployments
pub const PUSH_EVENT: &str = "push";

#[derive(Debug, Deserialize)]
pub struct PushRepository {
    pub full_name: String,
}

/// The parts of a push payload the dispatcher reads
#[derive(Debug, Deserialize)]
pub struct PushPayload {
    pub repository: PushRepository,

    #[serde(rename = "ref")]
    pub git_ref: String,
}

impl PushPayload {
    pub fn branch(&self) -> &str {
        branch_from_ref(&self.git_ref)
    }
}

/// Branch named by a ref: the segment after the last `/`
pub fn branch_from_ref(git_ref: &str) -> &str {
    git_ref.rsplit('/').next().unwrap_or(git_ref)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Verified, but not an event that deploys anything
    Ignored { event: String },

    /// One deployment started per matching page
    Dispatched { deployment_ids: Vec<DeploymentId> },
}

pub struct WebhookDispatcher {
    secret: SecretString,
    store: Arc<dyn Store>,
    deployer: Arc<Deployer>,
}

impl WebhookDispatcher {
    pub fn new(secret: SecretString, store: Arc<dyn Store>, deployer: Arc<Deployer>) -> Self {
        Self {
            secret,
            store,
            deployer,
        }
    }

    /// Verify a delivery and, for pushes, deploy every matching page.
    ///
    /// Fails with `AuthError` on a bad signature and `NotFound` when no page
    /// builds the pushed repository and branch.
    pub async fn handle(
        &self,
        event: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, ConsoleError> {
        verify_signature(self.secret.expose_secret().as_bytes(), body, signature)?;

        let event = event.unwrap_or_default();
        if event != PUSH_EVENT {
            debug!("Ignoring webhook event '{}'", event);
            return Ok(WebhookOutcome::Ignored {
                event: event.to_string(),
            });
        }

        let payload: PushPayload = serde_json::from_slice(body)?;
        let repo = payload.repository.full_name.as_str();
        let branch = payload.branch();

        let pages = self.store.pages_for_push(repo, branch).await?;
        if pages.is_empty() {
            return Err(ConsoleError::NotFound(format!(
                "no page builds {} on branch {}",
                repo, branch
            )));
        }
        info!("Push to {}@{} matches {} pages", repo, branch, pages.len());

        let results = join_all(pages.iter().map(|page| self.deployer.trigger(page.id))).await;

        let mut deployment_ids = Vec::with_capacity(results.len());
        for (page, result) in pages.iter().zip(results) {
            match result {
                Ok(id) => deployment_ids.push(id),
                Err(e) => error!("Failed to deploy page {} after push: {}", page.id, e),
            }
        }
        Ok(WebhookOutcome::Dispatched { deployment_ids })
    }
}
