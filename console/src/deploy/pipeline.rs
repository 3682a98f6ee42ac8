//! The build worker's pipeline: Sync, Materialize, Execute, Provision

use std::sync::Arc;

use secrecy::SecretString;
use tracing::{info, warn};

use crate::deploy::env::{env_map, write_env_file};
use crate::deploy::git::{credential_redactor, SourceSync, SyncRequest};
use crate::deploy::log::{DeploymentLog, NO_BUILD_SCRIPT};
use crate::deploy::recipe::run_recipe;
use crate::deploy::systemd::{deprovision, provision, service_name, ServiceManager, UnitSpec};
use crate::errors::ConsoleError;
use crate::models::Page;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::ToolchainSettings;
use crate::store::Store;

/// Programs the pipeline runs besides git and systemctl
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub shell: String,
    pub runtime_binary: String,
    pub entry_script: String,
}

impl From<&ToolchainSettings> for Toolchain {
    fn from(settings: &ToolchainSettings) -> Self {
        Self {
            shell: settings.shell.clone(),
            runtime_binary: settings.runtime_binary.clone(),
            entry_script: settings.entry_script.clone(),
        }
    }
}

/// Everything a worker needs, shared across workers
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn Store>,
    pub layout: StorageLayout,
    pub source: Arc<dyn SourceSync>,
    pub services: Arc<dyn ServiceManager>,
    pub toolchain: Toolchain,
}

impl PipelineContext {
    async fn credential(&self, page: &Page) -> Result<Option<SecretString>, ConsoleError> {
        let Some(login) = page.account_login.as_deref() else {
            return Ok(None);
        };
        match self.store.account(login).await? {
            Some(account) => Ok(Some(account.access_token)),
            None => {
                warn!("Account {} of page {} not found; syncing anonymously", login, page.id);
                Ok(None)
            }
        }
    }
}

/// Run the pipeline for `page` and return the exit code to record.
///
/// A failing build returns its own code without provisioning. Errors from
/// sync or materialization are returned as `Err`; provisioning errors are
/// only narrated in the log.
pub async fn run_pipeline(
    ctx: &PipelineContext,
    page: &Page,
    log: &DeploymentLog,
) -> Result<i32, ConsoleError> {
    let env_vars = ctx.store.env_vars(page.id).await?;
    let credential = ctx.credential(page).await?;
    let working_tree = ctx.layout.working_tree(page.id);

    ctx.source
        .sync(
            &SyncRequest {
                repo: &page.repo,
                branch: &page.branch,
                working_tree: &working_tree,
                credential: credential.as_ref(),
            },
            log,
        )
        .await?;

    log.step(&format!("Writing environment file ({} entries)", env_vars.len()))
        .await?;
    write_env_file(&working_tree, &env_vars).await?;

    match page.recipe() {
        None => log.line(NO_BUILD_SCRIPT).await?,
        Some(script) => {
            let code = run_recipe(
                &ctx.toolchain.shell,
                script,
                &working_tree,
                &env_map(&env_vars),
                log,
                &credential_redactor(credential.as_ref()),
            )
            .await?;
            if code != 0 {
                log.line(&format!("Build script exited with code {}", code))
                    .await?;
                return Ok(code);
            }
        }
    }

    let spec = UnitSpec {
        page_name: &page.name,
        working_tree: working_tree.path(),
        build_output_dir: page.build_output_dir.as_deref(),
        env_vars: &env_vars,
        runtime_binary: &ctx.toolchain.runtime_binary,
        entry_script: &ctx.toolchain.entry_script,
    };
    let name = service_name(&page.name);
    if let Some(previous) = page.service.as_deref().filter(|previous| *previous != name) {
        log.step(&format!("Removing previous service {}", previous))
            .await?;
        if let Err(e) = deprovision(ctx.services.as_ref(), &ctx.layout, previous).await {
            warn!("Removing service {} of page {} failed: {}", previous, page.id, e);
            log.line(&format!("Removing {} failed: {}", previous, e)).await?;
        }
    }
    ctx.store.set_page_service(page.id, Some(name)).await?;

    log.step("Provisioning service").await?;
    match provision(ctx.services.as_ref(), &ctx.layout, &spec, log).await {
        Ok(name) => {
            log.line(&format!("Service {} is active", name)).await?;
            info!("Page {} provisioned as {}", page.id, name);
        }
        Err(e) => {
            warn!("Provisioning page {} failed: {}", page.id, e);
            log.line(&format!("Provisioning failed: {}", e)).await?;
        }
    }

    Ok(0)
}
