//! Application state management

use std::sync::Arc;

use secrecy::SecretString;
use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::git::{GitSync, SourceSync};
use crate::deploy::log::LogHub;
use crate::deploy::pipeline::{PipelineContext, Toolchain};
use crate::deploy::systemd::{ServiceManager, SystemdUser};
use crate::deploy::tracker::DeploymentTracker;
use crate::errors::ConsoleError;
use crate::server::state::ServerState;
use crate::storage::layout::StorageLayout;
use crate::storage::secret::get_or_create_webhook_secret;
use crate::store::memory::MemoryStore;
use crate::store::Store;
use crate::webhook::dispatcher::WebhookDispatcher;
use crate::workers::deployer::{self, Deployer};

/// The collaborators the console is assembled from
pub struct Components {
    pub layout: StorageLayout,
    pub store: Arc<dyn Store>,
    pub source: Arc<dyn SourceSync>,
    pub services: Arc<dyn ServiceManager>,
    pub toolchain: Toolchain,
    pub deployer: deployer::Options,
    pub webhook_secret: SecretString,
}

/// Main application state
pub struct AppState {
    pub layout: StorageLayout,
    pub store: Arc<dyn Store>,
    pub tracker: Arc<DeploymentTracker>,
    pub deployer: Arc<Deployer>,
    pub dispatcher: Arc<WebhookDispatcher>,
}

impl AppState {
    /// Initialize application state from options: directories, the store
    /// snapshot, the webhook secret and the git/systemd toolchain
    pub async fn init(options: &AppOptions) -> Result<Self, ConsoleError> {
        info!("Initializing application state...");

        let layout = options.layout.clone();
        layout.setup().await?;

        let store = Arc::new(MemoryStore::open(layout.store_file()).await?);
        let webhook_secret = get_or_create_webhook_secret(&layout.webhook_secret_file()).await?;

        let toolchain = &options.toolchain;
        Ok(Self::assemble(Components {
            layout,
            store,
            source: Arc::new(GitSync::new(&toolchain.git_binary, &toolchain.git_base_url)),
            services: Arc::new(SystemdUser::new(&toolchain.systemctl_binary)),
            toolchain: Toolchain::from(toolchain),
            deployer: options.deployer.clone(),
            webhook_secret,
        }))
    }

    /// Wire the components together
    pub fn assemble(components: Components) -> Self {
        let hub = Arc::new(LogHub::new(components.layout.clone()));
        let tracker = Arc::new(DeploymentTracker::new(components.store.clone(), hub));

        let ctx = PipelineContext {
            store: components.store.clone(),
            layout: components.layout.clone(),
            source: components.source,
            services: components.services,
            toolchain: components.toolchain,
        };
        let deployer = Arc::new(Deployer::new(ctx, tracker.clone(), components.deployer));
        let dispatcher = Arc::new(WebhookDispatcher::new(
            components.webhook_secret,
            components.store.clone(),
            deployer.clone(),
        ));

        Self {
            layout: components.layout,
            store: components.store,
            tracker,
            deployer,
            dispatcher,
        }
    }

    /// State handed to the HTTP handlers
    pub fn server_state(&self) -> ServerState {
        ServerState::new(
            self.store.clone(),
            self.deployer.clone(),
            self.dispatcher.clone(),
        )
    }

    /// Shutdown application state: cancel and drain the build workers
    pub async fn shutdown(&self) -> Result<(), ConsoleError> {
        info!("Shutting down application state...");
        self.deployer.shutdown().await;
        Ok(())
    }
}
