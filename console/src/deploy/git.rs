//! Repository sync: clone-or-update a page's working tree

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tracing::{debug, info};

use crate::deploy::log::DeploymentLog;
use crate::deploy::process::{display_command, run_logged, Redactor};
use crate::errors::ConsoleError;
use crate::filesys::dir::Dir;

/// What to check out, and where
#[derive(Debug)]
pub struct SyncRequest<'a> {
    /// Repository identifier, `owner/name`
    pub repo: &'a str,
    pub branch: &'a str,
    pub working_tree: &'a Dir,
    /// Access token for private repositories
    pub credential: Option<&'a SecretString>,
}

/// Brings a working tree to the tip of a branch
#[async_trait]
pub trait SourceSync: Send + Sync {
    async fn sync(&self, request: &SyncRequest<'_>, log: &DeploymentLog) -> Result<(), ConsoleError>;
}

/// Redactor hiding `credential` from logged output
pub fn credential_redactor(credential: Option<&SecretString>) -> Redactor {
    match credential {
        Some(token) => Redactor::new().with_secret(token.expose_secret()),
        None => Redactor::new(),
    }
}

/// [`SourceSync`] backed by the git command line
#[derive(Debug, Clone)]
pub struct GitSync {
    git_binary: String,
    base_url: String,
}

impl GitSync {
    pub fn new(git_binary: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            git_binary: git_binary.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Remote URL of a repository, with the token embedded for https remotes
    pub fn remote_url(&self, repo: &str, credential: Option<&SecretString>) -> String {
        let url = format!("{}/{}.git", self.base_url, repo);
        match (credential, url.strip_prefix("https://")) {
            (Some(token), Some(rest)) => format!(
                "https://x-access-token:{}@{}",
                token.expose_secret(),
                rest
            ),
            _ => url,
        }
    }

    async fn git(
        &self,
        args: Vec<String>,
        cwd: Option<&Dir>,
        log: &DeploymentLog,
        redactor: &Redactor,
    ) -> Result<(), ConsoleError> {
        log.line(&display_command(&self.git_binary, &args, redactor))
            .await?;

        let mut command = Command::new(&self.git_binary);
        command.args(&args).env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = cwd {
            command.current_dir(dir.path());
        }

        let code = run_logged(command, log, redactor)
            .await
            .map_err(|e| ConsoleError::SyncError(format!("failed to run git: {}", e)))?;
        if code != 0 {
            let op = args.first().map(String::as_str).unwrap_or("command");
            return Err(ConsoleError::SyncError(format!(
                "git {} exited with code {}",
                op, code
            )));
        }
        Ok(())
    }

    /// Point `origin` at the credential-free URL so the token is not kept
    /// in the working tree's git config
    async fn forget_credential(
        &self,
        request: &SyncRequest<'_>,
        log: &DeploymentLog,
        redactor: &Redactor,
    ) -> Result<(), ConsoleError> {
        self.git(
            vec![
                "remote".into(),
                "set-url".into(),
                "origin".into(),
                self.remote_url(request.repo, None),
            ],
            Some(request.working_tree),
            log,
            redactor,
        )
        .await
    }
}

#[async_trait]
impl SourceSync for GitSync {
    async fn sync(&self, request: &SyncRequest<'_>, log: &DeploymentLog) -> Result<(), ConsoleError> {
        let url = self.remote_url(request.repo, request.credential);
        let redactor = credential_redactor(request.credential);
        let tree = request.working_tree;

        if tree.subdir(".git").exists().await {
            info!("Pulling {}@{} into {}", request.repo, request.branch, tree.path().display());
            log.step(&format!("Pulling {} ({})", request.repo, request.branch))
                .await?;

            self.forget_credential(request, log, &redactor).await?;
            self.git(
                vec!["fetch".into(), url, request.branch.to_string()],
                Some(tree),
                log,
                &redactor,
            )
            .await?;
            self.git(
                vec![
                    "checkout".into(),
                    "--force".into(),
                    "-B".into(),
                    request.branch.to_string(),
                    "FETCH_HEAD".into(),
                ],
                Some(tree),
                log,
                &redactor,
            )
            .await?;
        } else {
            info!("Cloning {}@{} into {}", request.repo, request.branch, tree.path().display());
            log.step(&format!("Cloning {} ({})", request.repo, request.branch))
                .await?;

            debug!("Recreating working tree {}", tree.path().display());
            tree.recreate().await?;
            self.git(
                vec![
                    "clone".into(),
                    "--branch".into(),
                    request.branch.to_string(),
                    "--single-branch".into(),
                    url,
                    tree.path().display().to_string(),
                ],
                None,
                log,
                &redactor,
            )
            .await?;
            self.forget_credential(request, log, &redactor).await?;
        }

        Ok(())
    }
}
