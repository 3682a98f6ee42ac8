//! Service provisioning through the systemd user instance

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::deploy::log::DeploymentLog;
use crate::errors::ConsoleError;
use crate::models::EnvVar;
use crate::storage::layout::StorageLayout;

/// Prefix of every generated unit name
pub const SERVICE_PREFIX: &str = "webpilotx-";

/// Result of one service-manager invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    /// Combined stdout and stderr
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The external service manager. `args` follow `systemctl --user`.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn systemctl(&self, args: &[&str]) -> Result<CommandOutput, ConsoleError>;
}

/// [`ServiceManager`] invoking `systemctl --user`
#[derive(Debug, Clone)]
pub struct SystemdUser {
    binary: String,
}

impl SystemdUser {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ServiceManager for SystemdUser {
    async fn systemctl(&self, args: &[&str]) -> Result<CommandOutput, ConsoleError> {
        let output = Command::new(&self.binary)
            .arg("--user")
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConsoleError::ProvisionError(format!("failed to run systemctl: {}", e)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CommandOutput {
            exit_code: crate::deploy::process::exit_code(output.status),
            output: text,
        })
    }
}

/// Stable unit name for a page, e.g. `webpilotx-my-blog.service`
pub fn service_name(page_name: &str) -> String {
    let mut name: String = page_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if name.is_empty() {
        name.push_str("page");
    }
    format!("{}{}.service", SERVICE_PREFIX, name)
}

/// Directory holding the build output: the configured subdirectory, or the
/// working-tree root. The subdirectory must stay inside the tree.
pub fn output_dir(working_tree: &Path, build_output_dir: Option<&str>) -> Result<PathBuf, ConsoleError> {
    let Some(sub) = build_output_dir.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(working_tree.to_path_buf());
    };

    let sub_path = Path::new(sub);
    let escapes = sub_path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ConsoleError::ValidationError(format!(
            "build output directory must be relative to the repository: {}",
            sub
        )));
    }
    Ok(working_tree.join(sub_path))
}

/// Everything needed to render a page's unit descriptor
#[derive(Debug)]
pub struct UnitSpec<'a> {
    pub page_name: &'a str,
    pub working_tree: &'a Path,
    pub build_output_dir: Option<&'a str>,
    pub env_vars: &'a [EnvVar],
    pub runtime_binary: &'a str,
    pub entry_script: &'a str,
}

fn escape_unit_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '%' => out.push_str("%%"),
            c => out.push(c),
        }
    }
    out
}

/// Render the unit descriptor text
pub fn render_unit(spec: &UnitSpec<'_>) -> Result<String, ConsoleError> {
    let entry = output_dir(spec.working_tree, spec.build_output_dir)?.join(spec.entry_script);

    let mut unit = String::new();
    unit.push_str("[Unit]\n");
    unit.push_str(&format!("Description=webpilotx page {}\n", spec.page_name));
    unit.push_str("After=network-online.target\n\n");

    unit.push_str("[Service]\n");
    unit.push_str("Type=simple\n");
    unit.push_str(&format!("WorkingDirectory={}\n", spec.working_tree.display()));
    unit.push_str(&format!(
        "ExecStart={} \"{}\"\n",
        spec.runtime_binary,
        escape_unit_value(&entry.display().to_string())
    ));
    unit.push_str("Restart=always\n");
    unit.push_str("RestartSec=3\n");
    for var in spec.env_vars {
        unit.push_str(&format!(
            "Environment=\"{}={}\"\n",
            escape_unit_value(&var.name),
            escape_unit_value(&var.value)
        ));
    }
    unit.push('\n');

    unit.push_str("[Install]\n");
    unit.push_str("WantedBy=default.target\n");
    Ok(unit)
}

/// Write the unit, then reload, enable and restart it. Stops at the first
/// failing step; every step and its output is narrated into the log.
pub async fn provision(
    manager: &dyn ServiceManager,
    layout: &StorageLayout,
    spec: &UnitSpec<'_>,
    log: &DeploymentLog,
) -> Result<String, ConsoleError> {
    let name = service_name(spec.page_name);
    let unit = render_unit(spec)?;
    let unit_file = layout.unit_file(&name);

    log.step(&format!("Writing service unit {}", unit_file.path().display()))
        .await?;
    unit_file.write_string(&unit).await?;

    for args in [
        vec!["daemon-reload"],
        vec!["enable", name.as_str()],
        vec!["restart", name.as_str()],
    ] {
        log.step(&format!("systemctl --user {}", args.join(" ")))
            .await?;
        let result = manager.systemctl(&args).await?;
        log.append(result.output.as_bytes()).await?;

        if !result.success() {
            return Err(ConsoleError::ProvisionError(format!(
                "systemctl --user {} exited with code {}",
                args.join(" "),
                result.exit_code
            )));
        }
    }

    info!("Service {} (re)started", name);
    Ok(name)
}

/// Stop, disable and remove the unit `name`. Service-manager failures are
/// logged and do not stop the removal.
pub async fn deprovision(
    manager: &dyn ServiceManager,
    layout: &StorageLayout,
    name: &str,
) -> Result<(), ConsoleError> {
    for verb in ["stop", "disable"] {
        match manager.systemctl(&[verb, name]).await {
            Ok(result) if result.success() => {}
            Ok(result) => warn!(
                "systemctl --user {} {} exited with code {}: {}",
                verb,
                name,
                result.exit_code,
                result.output.trim()
            ),
            Err(e) => warn!("systemctl --user {} {} failed: {}", verb, name, e),
        }
    }

    layout.unit_file(name).delete().await?;

    match manager.systemctl(&["daemon-reload"]).await {
        Ok(result) if !result.success() => warn!(
            "systemctl --user daemon-reload exited with code {}",
            result.exit_code
        ),
        Err(e) => warn!("systemctl --user daemon-reload failed: {}", e),
        Ok(_) => {}
    }

    info!("Service {} removed", name);
    Ok(())
}
