//! Environment file materialization

use std::collections::HashMap;

use crate::errors::ConsoleError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::EnvVar;

/// Name of the generated file inside the working tree
pub const ENV_FILE_NAME: &str = ".env";

/// Render entries as `NAME="value"` lines. Values are written verbatim.
pub fn render_env_file(env_vars: &[EnvVar]) -> String {
    env_vars
        .iter()
        .map(|var| format!("{}=\"{}\"", var.name, var.value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Overwrite the working tree's env file with the page's entries
pub async fn write_env_file(working_tree: &Dir, env_vars: &[EnvVar]) -> Result<File, ConsoleError> {
    let file = working_tree.file(ENV_FILE_NAME);
    file.write_string(&render_env_file(env_vars)).await?;
    file.set_permissions_600().await?;
    Ok(file)
}

/// Entries as a map for a child process environment; later duplicates win
pub fn env_map(env_vars: &[EnvVar]) -> HashMap<String, String> {
    env_vars
        .iter()
        .map(|var| (var.name.clone(), var.value.clone()))
        .collect()
}
