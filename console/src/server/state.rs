//! Server state

use std::sync::Arc;

use crate::deploy::tracker::DeploymentTracker;
use crate::store::Store;
use crate::webhook::dispatcher::WebhookDispatcher;
use crate::workers::deployer::Deployer;

/// Server state shared across handlers
pub struct ServerState {
    pub store: Arc<dyn Store>,
    pub deployer: Arc<Deployer>,
    pub tracker: Arc<DeploymentTracker>,
    pub dispatcher: Arc<WebhookDispatcher>,
}

impl ServerState {
    pub fn new(
        store: Arc<dyn Store>,
        deployer: Arc<Deployer>,
        dispatcher: Arc<WebhookDispatcher>,
    ) -> Self {
        let tracker = deployer.tracker().clone();
        Self {
            store,
            deployer,
            tracker,
            dispatcher,
        }
    }
}
