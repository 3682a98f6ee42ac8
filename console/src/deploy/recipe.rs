//! Build executor: runs a page's build recipe

use std::collections::HashMap;

use tokio::process::Command;
use tracing::info;

use crate::deploy::log::DeploymentLog;
use crate::deploy::process::{run_logged, Redactor};
use crate::errors::ConsoleError;
use crate::filesys::dir::Dir;

/// Run `script` with `shell -c` inside the working tree and return its exit
/// code. Output is streamed into the log while the script runs, with
/// `redactor` applied.
pub async fn run_recipe(
    shell: &str,
    script: &str,
    working_tree: &Dir,
    env: &HashMap<String, String>,
    log: &DeploymentLog,
    redactor: &Redactor,
) -> Result<i32, ConsoleError> {
    info!(
        "Running build script for deployment {} in {}",
        log.deployment_id(),
        working_tree.path().display()
    );
    log.step("Running build script").await?;

    let mut command = Command::new(shell);
    command
        .arg("-c")
        .arg(script)
        .current_dir(working_tree.path())
        .envs(env);

    run_logged(command, log, redactor)
        .await
        .map_err(|e| ConsoleError::BuildError(format!("failed to run build script: {}", e)))
}
