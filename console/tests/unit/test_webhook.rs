//! Webhook dispatcher tests

use webpilotx::errors::ConsoleError;
use webpilotx::models::PageId;
use webpilotx::webhook::dispatcher::WebhookOutcome;
use webpilotx::webhook::signature::sign;

use crate::common::{draft, Harness, WEBHOOK_SECRET};

fn push_body(repo: &str, git_ref: &str) -> Vec<u8> {
    format!(
        r#"{{"ref":"{}","repository":{{"full_name":"{}"}},"pusher":{{"name":"dev"}}}}"#,
        git_ref, repo
    )
    .into_bytes()
}

fn signature(body: &[u8]) -> String {
    sign(WEBHOOK_SECRET.as_bytes(), body).unwrap()
}

async fn deployment_count(h: &Harness, page_id: PageId) -> usize {
    h.app.store.deployments_for_page(page_id).await.unwrap().len()
}

#[tokio::test]
async fn test_push_deploys_every_matching_page() {
    let h = Harness::new().await;
    let a = h.page(draft("org/app", "main", "app-a", None)).await;
    let b = h.page(draft("org/app", "main", "app-b", None)).await;
    let other_branch = h.page(draft("org/app", "dev", "app-dev", None)).await;
    let other_repo = h.page(draft("org/other", "main", "other", None)).await;

    let body = push_body("org/app", "refs/heads/main");
    let outcome = h
        .app
        .dispatcher
        .handle(Some("push"), Some(&signature(&body)), &body)
        .await
        .unwrap();

    let ids = match outcome {
        WebhookOutcome::Dispatched { deployment_ids } => deployment_ids,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(ids.len(), 2);
    for id in &ids {
        assert_eq!(h.wait_for_completion(*id).await.exit_code, Some(0));
    }

    assert_eq!(deployment_count(&h, a.id).await, 1);
    assert_eq!(deployment_count(&h, b.id).await, 1);
    assert_eq!(deployment_count(&h, other_branch.id).await, 0);
    assert_eq!(deployment_count(&h, other_repo.id).await, 0);
}

#[tokio::test]
async fn test_any_single_byte_mutation_is_rejected() {
    let h = Harness::new().await;
    h.page(draft("org/app", "main", "app", None)).await;

    let body = push_body("org/app", "refs/heads/main");
    let header = signature(&body);

    for i in 0..body.len() {
        let mut tampered = body.clone();
        tampered[i] ^= 0x01;
        let result = h
            .app
            .dispatcher
            .handle(Some("push"), Some(&header), &tampered)
            .await;
        assert!(
            matches!(result, Err(ConsoleError::AuthError(_))),
            "mutation at byte {} was accepted",
            i
        );
    }
    assert!(h.app.store.incomplete_deployments().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_signature_is_rejected() {
    let h = Harness::new().await;
    let body = push_body("org/app", "refs/heads/main");
    assert!(matches!(
        h.app.dispatcher.handle(Some("push"), None, &body).await,
        Err(ConsoleError::AuthError(_))
    ));
}

#[tokio::test]
async fn test_other_events_are_ignored() {
    let h = Harness::new().await;
    h.page(draft("org/app", "main", "app", None)).await;

    let body = br#"{"zen":"Keep it logically awesome."}"#.to_vec();
    let outcome = h
        .app
        .dispatcher
        .handle(Some("ping"), Some(&signature(&body)), &body)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        WebhookOutcome::Ignored {
            event: "ping".to_string()
        }
    );
}

#[tokio::test]
async fn test_push_without_matching_page_is_not_found() {
    let h = Harness::new().await;
    h.page(draft("org/app", "main", "app", None)).await;

    let body = push_body("org/app", "refs/heads/feature/x");
    assert!(matches!(
        h.app
            .dispatcher
            .handle(Some("push"), Some(&signature(&body)), &body)
            .await,
        Err(ConsoleError::NotFound(_))
    ));
}
