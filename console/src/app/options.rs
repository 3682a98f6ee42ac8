//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::{Settings, ToolchainSettings};
use crate::workers::deployer;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    /// External programs used by the pipeline
    pub toolchain: ToolchainSettings,

    /// Deployer options
    pub deployer: deployer::Options,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let timeout = match settings.deploy_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            layout: StorageLayout::new(&settings.pages_dir, &settings.unit_dir),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            toolchain: settings.toolchain.clone(),
            deployer: deployer::Options { timeout },
            ..Default::default()
        }
    }
}

/// Lifecycle options for the console
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}
