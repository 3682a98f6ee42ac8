//! Deployment pipeline tests: trigger, worker and completion

use std::sync::atomic::Ordering;
use std::time::Duration;

use secrecy::SecretString;

use webpilotx::deploy::log::{COMPLETION_SENTINEL, ERROR_MARKER, NO_BUILD_SCRIPT};
use webpilotx::deploy::systemd::service_name;
use webpilotx::errors::ConsoleError;
use webpilotx::models::{Account, EnvVar};

use crate::common::{draft, Harness, HarnessOptions};

#[tokio::test]
async fn test_no_recipe_provisions_and_succeeds() {
    let h = Harness::new().await;
    let page = h.page(draft("org/site", "main", "site", None)).await;

    let id = h.app.deployer.trigger(page.id).await.unwrap();
    let deployment = h.wait_for_completion(id).await;

    assert_eq!(deployment.exit_code, Some(0));
    assert!(deployment.completed_at.is_some());

    let log = h.log_text(id).await;
    assert!(log.starts_with("Deployment initialized. Logs will appear here."));
    assert!(log.contains(NO_BUILD_SCRIPT));
    assert!(log.trim_end().ends_with(COMPLETION_SENTINEL));

    assert_eq!(h.services.verbs(), vec!["daemon-reload", "enable", "restart"]);
    let unit = h.app.layout.unit_file(&service_name("site"));
    let text = unit.read_string().await.unwrap();
    assert!(text.contains("Restart=always"));
    assert!(text.contains("index.js"));
}

#[tokio::test]
async fn test_echo_recipe_output_reaches_log() {
    let h = Harness::new().await;
    let page = h
        .page(draft("org/site", "main", "site", Some("echo build-ok")))
        .await;

    let id = h.app.deployer.trigger(page.id).await.unwrap();
    let deployment = h.wait_for_completion(id).await;

    assert_eq!(deployment.exit_code, Some(0));
    let log = h.log_text(id).await;
    assert!(log.contains("build-ok"));
    assert!(log.contains(COMPLETION_SENTINEL));
}

#[tokio::test]
async fn test_failing_recipe_records_its_code_and_skips_provisioning() {
    let h = Harness::new().await;
    let page = h
        .page(draft("org/site", "main", "site", Some("echo partial\nexit 3")))
        .await;

    let id = h.app.deployer.trigger(page.id).await.unwrap();
    let deployment = h.wait_for_completion(id).await;

    assert_eq!(deployment.exit_code, Some(3));
    assert!(h.services.calls().is_empty());
    assert!(!h.app.layout.unit_file(&service_name("site")).exists().await);

    let log = h.log_text(id).await;
    assert!(log.contains("partial"));
    assert!(log.contains(COMPLETION_SENTINEL));
}

#[tokio::test]
async fn test_sync_failure_is_terminal() {
    let h = Harness::with_options(HarnessOptions {
        fail_sync: true,
        ..Default::default()
    })
    .await;
    let page = h
        .page(draft("org/site", "main", "site", Some("echo never")))
        .await;

    let id = h.app.deployer.trigger(page.id).await.unwrap();
    let deployment = h.wait_for_completion(id).await;

    assert_eq!(deployment.exit_code, Some(1));
    assert!(h.services.calls().is_empty());

    let log = h.log_text(id).await;
    assert!(log.contains(ERROR_MARKER));
    assert!(!log.contains("never"));
    assert!(log.contains(COMPLETION_SENTINEL));
}

#[tokio::test]
async fn test_env_entries_reach_file_and_build() {
    let h = Harness::new().await;
    let page = h
        .page_with_env(
            draft(
                "org/site",
                "main",
                "site",
                Some("echo \"port=$PORT\"\ncat .env"),
            ),
            vec![EnvVar::new("PORT", "4000"), EnvVar::new("MODE", "prod")],
        )
        .await;

    let id = h.app.deployer.trigger(page.id).await.unwrap();
    assert_eq!(h.wait_for_completion(id).await.exit_code, Some(0));

    let log = h.log_text(id).await;
    assert!(log.contains("port=4000"));
    assert!(log.contains("PORT=\"4000\"\nMODE=\"prod\""));

    let env_file = h.app.layout.working_tree(page.id).file(".env");
    assert_eq!(
        env_file.read_string().await.unwrap(),
        "PORT=\"4000\"\nMODE=\"prod\""
    );
}

#[tokio::test]
async fn test_account_token_is_the_sync_credential() {
    let h = Harness::new().await;
    h.memory
        .insert_account(Account {
            login: "octo".to_string(),
            access_token: SecretString::from("gho_token".to_string()),
        })
        .await
        .unwrap();

    let mut owned = draft("octo/private", "main", "private", Some("echo \"token=gho_token\""));
    owned.account_login = Some("octo".to_string());
    let owned = h.page(owned).await;
    let public = h.page(draft("org/public", "main", "public", None)).await;

    let first = h.app.deployer.trigger(owned.id).await.unwrap();
    h.wait_for_completion(first).await;
    let second = h.app.deployer.trigger(public.id).await.unwrap();
    h.wait_for_completion(second).await;

    let seen = h.source.credentials.lock().unwrap().clone();
    assert_eq!(seen, vec![Some("gho_token".to_string()), None]);
    let log = h.log_text(first).await;
    assert!(log.contains("token=***"));
    assert!(!log.contains("gho_token"));
}

#[tokio::test]
async fn test_failed_provisioning_keeps_build_success() {
    let h = Harness::with_options(HarnessOptions {
        fail_systemctl: Some("enable"),
        ..Default::default()
    })
    .await;
    let page = h.page(draft("org/site", "main", "site", Some("echo built"))).await;

    let id = h.app.deployer.trigger(page.id).await.unwrap();
    let deployment = h.wait_for_completion(id).await;

    assert_eq!(deployment.exit_code, Some(0));
    assert_eq!(h.services.verbs(), vec!["daemon-reload", "enable"]);

    let log = h.log_text(id).await;
    assert!(log.contains("Provisioning failed"));
    assert!(!log.contains("is active"));
    assert!(log.contains(COMPLETION_SENTINEL));
}

#[tokio::test]
async fn test_rename_replaces_previous_service() {
    let h = Harness::new().await;
    let page = h.page(draft("org/site", "main", "site", None)).await;
    let old_unit = h.app.layout.unit_file(&service_name("site"));
    let new_unit = h.app.layout.unit_file(&service_name("site-v2"));

    let first = h.app.deployer.trigger(page.id).await.unwrap();
    h.wait_for_completion(first).await;
    assert!(old_unit.exists().await);

    h.app
        .store
        .update_page(page.id, draft("org/site", "main", "site-v2", None))
        .await
        .unwrap();
    let second = h.app.deployer.trigger(page.id).await.unwrap();
    assert_eq!(h.wait_for_completion(second).await.exit_code, Some(0));

    assert!(!old_unit.exists().await);
    assert!(new_unit.exists().await);
    assert!(h
        .services
        .calls()
        .contains(&vec!["stop".to_string(), service_name("site")]));
    assert!(h
        .log_text(second)
        .await
        .contains("Removing previous service webpilotx-site.service"));

    h.app.deployer.delete_page(page.id).await.unwrap();
    assert!(!new_unit.exists().await);
}

#[tokio::test]
async fn test_delete_after_rename_removes_both_services() {
    let h = Harness::new().await;
    let page = h.page(draft("org/site", "main", "site", None)).await;

    let id = h.app.deployer.trigger(page.id).await.unwrap();
    h.wait_for_completion(id).await;
    h.app
        .store
        .update_page(page.id, draft("org/site", "main", "site-v2", None))
        .await
        .unwrap();

    h.app.deployer.delete_page(page.id).await.unwrap();

    let calls = h.services.calls();
    assert!(calls.contains(&vec!["disable".to_string(), service_name("site")]));
    assert!(calls.contains(&vec!["disable".to_string(), service_name("site-v2")]));
    assert!(!h.app.layout.unit_file(&service_name("site")).exists().await);
}

#[tokio::test]
async fn test_trigger_unknown_page_is_not_found() {
    let h = Harness::new().await;
    assert!(matches!(
        h.app.deployer.trigger(404).await,
        Err(ConsoleError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_same_page_deployments_are_serialized() {
    let h = Harness::new().await;
    let page = h
        .page(draft("org/site", "main", "site", Some("sleep 0.5")))
        .await;

    let first = h.app.deployer.trigger(page.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    let second = h.app.deployer.trigger(page.id).await.unwrap();
    assert_ne!(first, second);

    let first_done = h.wait_for_completion(first).await;
    let second_done = h.wait_for_completion(second).await;
    assert_eq!(first_done.exit_code, Some(0));
    assert_eq!(second_done.exit_code, Some(0));
    assert!(second_done.completed_at > first_done.completed_at);

    let queued = h.log_text(second).await;
    assert!(queued.contains("Waiting for the previous deployment"));
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_deadline_records_timeout_code() {
    let h = Harness::with_options(HarnessOptions {
        timeout: Some(Duration::from_millis(300)),
        ..Default::default()
    })
    .await;
    let page = h
        .page(draft("org/site", "main", "site", Some("sleep 10")))
        .await;

    let id = h.app.deployer.trigger(page.id).await.unwrap();
    let deployment = h.wait_for_completion(id).await;

    assert_eq!(deployment.exit_code, Some(124));
    assert!(h.log_text(id).await.contains(ERROR_MARKER));
}

#[tokio::test]
async fn test_shutdown_cancels_workers_and_refuses_triggers() {
    let h = Harness::new().await;
    let page = h
        .page(draft("org/site", "main", "site", Some("sleep 10")))
        .await;

    let id = h.app.deployer.trigger(page.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.app.deployer.shutdown().await;

    let deployment = h.app.store.get_deployment(id).await.unwrap().unwrap();
    assert_eq!(deployment.exit_code, Some(130));
    assert!(h.log_text(id).await.contains(COMPLETION_SENTINEL));

    assert!(matches!(
        h.app.deployer.trigger(page.id).await,
        Err(ConsoleError::ShutdownError(_))
    ));
}

#[tokio::test]
async fn test_delete_page_removes_everything() {
    let h = Harness::new().await;
    let page = h.page(draft("org/site", "main", "site", None)).await;

    let id = h.app.deployer.trigger(page.id).await.unwrap();
    h.wait_for_completion(id).await;
    let unit = h.app.layout.unit_file(&service_name("site"));
    assert!(unit.exists().await);

    h.app.deployer.delete_page(page.id).await.unwrap();

    assert!(h.app.store.get_page(page.id).await.unwrap().is_none());
    assert!(h.app.store.get_deployment(id).await.unwrap().is_none());
    assert!(h.app.store.deployments_for_page(page.id).await.unwrap().is_empty());
    assert!(!h.app.layout.working_tree(page.id).exists().await);
    assert!(!h.app.layout.deployment_log(id).exists().await);
    assert!(!unit.exists().await);
    assert!(h.services.verbs().ends_with(&[
        "stop".to_string(),
        "disable".to_string(),
        "daemon-reload".to_string()
    ]));

    assert!(matches!(
        h.app.deployer.trigger(page.id).await,
        Err(ConsoleError::NotFound(_))
    ));
    assert!(matches!(
        h.app.deployer.delete_page(page.id).await,
        Err(ConsoleError::NotFound(_))
    ));
}
