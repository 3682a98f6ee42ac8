//! Shared fixtures: a console wired to fakes of git and systemd

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tempfile::TempDir;

use webpilotx::app::state::{AppState, Components};
use webpilotx::deploy::git::{SourceSync, SyncRequest};
use webpilotx::deploy::log::DeploymentLog;
use webpilotx::deploy::pipeline::Toolchain;
use webpilotx::deploy::systemd::{CommandOutput, ServiceManager};
use webpilotx::errors::ConsoleError;
use webpilotx::models::{Deployment, DeploymentId, EnvVar, Page};
use webpilotx::storage::layout::StorageLayout;
use webpilotx::store::memory::MemoryStore;
use webpilotx::store::PageDraft;
use webpilotx::workers::deployer;

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Populates the working tree locally instead of cloning
#[derive(Default)]
pub struct LocalSync {
    pub fail: bool,
    pub calls: AtomicUsize,
    pub credentials: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl SourceSync for LocalSync {
    async fn sync(&self, request: &SyncRequest<'_>, log: &DeploymentLog) -> Result<(), ConsoleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.credentials
            .lock()
            .unwrap()
            .push(request.credential.map(|c| c.expose_secret().to_string()));
        log.step(&format!("Syncing {} ({})", request.repo, request.branch))
            .await?;
        if self.fail {
            log.line("fatal: repository not found").await?;
            return Err(ConsoleError::SyncError("git clone exited with code 128".to_string()));
        }

        request.working_tree.create().await?;
        request
            .working_tree
            .file("index.js")
            .write_string("console.log('hello')\n")
            .await?;
        Ok(())
    }
}

/// Records every systemctl invocation. Succeeds unless the verb is
/// `fail_verb`.
#[derive(Default)]
pub struct RecordingServices {
    pub calls: Mutex<Vec<Vec<String>>>,
    pub fail_verb: Option<String>,
}

impl RecordingServices {
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn verbs(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call[0].clone()).collect()
    }
}

#[async_trait]
impl ServiceManager for RecordingServices {
    async fn systemctl(&self, args: &[&str]) -> Result<CommandOutput, ConsoleError> {
        self.calls
            .lock()
            .unwrap()
            .push(args.iter().map(|a| a.to_string()).collect());
        if let Some(verb) = self.fail_verb.as_deref().filter(|verb| args.first() == Some(verb)) {
            return Ok(CommandOutput {
                exit_code: 1,
                output: format!("Failed to {} unit.\n", verb),
            });
        }
        Ok(CommandOutput {
            exit_code: 0,
            output: String::new(),
        })
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub app: AppState,
    pub memory: Arc<MemoryStore>,
    pub source: Arc<LocalSync>,
    pub services: Arc<RecordingServices>,
}

pub struct HarnessOptions {
    pub fail_sync: bool,
    pub fail_systemctl: Option<&'static str>,
    pub timeout: Option<Duration>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            fail_sync: false,
            fail_systemctl: None,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_options(HarnessOptions::default()).await
    }

    pub async fn with_options(options: HarnessOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("pages_dir"), dir.path().join("units"));
        layout.setup().await.unwrap();

        let source = Arc::new(LocalSync {
            fail: options.fail_sync,
            ..Default::default()
        });
        let services = Arc::new(RecordingServices {
            fail_verb: options.fail_systemctl.map(str::to_string),
            ..Default::default()
        });
        let memory = Arc::new(MemoryStore::new());

        let app = AppState::assemble(Components {
            layout,
            store: memory.clone(),
            source: source.clone(),
            services: services.clone(),
            toolchain: Toolchain {
                shell: "sh".to_string(),
                runtime_binary: "/usr/bin/node".to_string(),
                entry_script: "index.js".to_string(),
            },
            deployer: deployer::Options {
                timeout: options.timeout,
            },
            webhook_secret: SecretString::from(WEBHOOK_SECRET.to_string()),
        });

        Self {
            dir,
            app,
            memory,
            source,
            services,
        }
    }

    pub async fn page(&self, draft: PageDraft) -> Page {
        self.app.store.create_page(draft).await.unwrap()
    }

    pub async fn page_with_env(&self, draft: PageDraft, env: Vec<EnvVar>) -> Page {
        let page = self.page(draft).await;
        self.app.store.replace_env_vars(page.id, env).await.unwrap();
        page
    }

    /// Poll until the deployment has an exit code and its log is sealed
    pub async fn wait_for_completion(&self, deployment_id: DeploymentId) -> Deployment {
        for _ in 0..500 {
            if let Some(deployment) = self.app.store.get_deployment(deployment_id).await.unwrap() {
                let sealed = self.app.tracker.hub().get(deployment_id).is_none();
                if deployment.is_completed() && sealed {
                    return deployment;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("deployment {} did not complete", deployment_id);
    }

    pub async fn log_text(&self, deployment_id: DeploymentId) -> String {
        let bytes = self.app.tracker.hub().read(deployment_id).await.unwrap();
        String::from_utf8(bytes).unwrap()
    }
}

pub fn draft(repo: &str, branch: &str, name: &str, script: Option<&str>) -> PageDraft {
    PageDraft {
        account_login: None,
        repo: repo.to_string(),
        name: name.to_string(),
        branch: branch.to_string(),
        build_script: script.map(str::to_string),
        build_output_dir: None,
    }
}
