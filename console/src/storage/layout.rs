//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::{DeploymentId, PageId};

/// Everything the console keeps on disk lives under `base_dir`, except the
/// service unit descriptors, which belong to the service manager.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory (`pages_dir` in the settings)
    pub base_dir: PathBuf,

    /// Per-user systemd unit directory
    pub unit_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>, unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            unit_dir: unit_dir.into(),
        }
    }

    /// Directory holding one working tree per page
    pub fn pages_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("pages"))
    }

    /// Working tree of a single page
    pub fn working_tree(&self, page_id: PageId) -> Dir {
        self.pages_dir().subdir(&page_id.to_string())
    }

    /// Directory holding one log file per deployment
    pub fn deployments_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployments"))
    }

    /// Log file of a single deployment
    pub fn deployment_log(&self, deployment_id: DeploymentId) -> File {
        self.deployments_dir()
            .file(&format!("{}.log", deployment_id))
    }

    /// Shared secret used to sign webhook deliveries
    pub fn webhook_secret_file(&self) -> File {
        File::new(self.base_dir.join("webhook_secret"))
    }

    /// Snapshot of the in-memory store
    pub fn store_file(&self) -> File {
        File::new(self.base_dir.join("store.json"))
    }

    /// Unit descriptor for a service name such as `webpilotx-blog.service`
    pub fn unit_file(&self, service_name: &str) -> File {
        File::new(self.unit_dir.join(service_name))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::ConsoleError> {
        self.pages_dir().create().await?;
        self.deployments_dir().create().await?;
        Dir::new(&self.unit_dir).create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("./pages_dir", default_unit_dir())
    }
}

/// `$HOME/.config/systemd/user`, or a relative fallback without a home
pub fn default_unit_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("systemd")
        .join("user")
}
