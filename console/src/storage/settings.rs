//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;
use crate::storage::layout::default_unit_dir;

/// Console settings, read from `settings.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Log level
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    pub json_logs: bool,

    /// Optional directory for daily-rotated log files
    pub log_dir: Option<PathBuf>,

    /// HTTP server configuration
    pub server: ServerSettings,

    /// Root for working trees, deployment logs and the webhook secret
    pub pages_dir: PathBuf,

    /// Per-user systemd unit directory
    pub unit_dir: PathBuf,

    /// Toolchain used by the deployment pipeline
    pub toolchain: ToolchainSettings,

    /// Per-deployment deadline in seconds; 0 disables it
    pub deploy_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            log_dir: None,
            server: ServerSettings::default(),
            pages_dir: PathBuf::from("./pages_dir"),
            unit_dir: default_unit_dir(),
            toolchain: ToolchainSettings::default(),
            deploy_timeout_secs: 1800,
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// External programs invoked by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainSettings {
    /// Git executable
    pub git_binary: String,

    /// Remote base; repositories resolve to `<base>/<owner>/<name>.git`
    pub git_base_url: String,

    /// Shell that runs build recipes with `-c`
    pub shell: String,

    /// systemctl executable, always invoked with `--user`
    pub systemctl_binary: String,

    /// Runtime the generated unit starts
    pub runtime_binary: String,

    /// Entry script inside the build output
    pub entry_script: String,
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        Self {
            git_binary: "git".to_string(),
            git_base_url: "https://github.com".to_string(),
            shell: "bash".to_string(),
            systemctl_binary: "systemctl".to_string(),
            runtime_binary: "/usr/bin/node".to_string(),
            entry_script: "index.js".to_string(),
        }
    }
}
