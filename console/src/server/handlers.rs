//! HTTP request handlers

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::deploy::log::LogSubscription;
use crate::deploy::systemd::output_dir;
use crate::errors::ConsoleError;
use crate::models::deployment::DeploymentView;
use crate::models::{DeploymentId, EnvVar, PageId};
use crate::server::state::ServerState;
use crate::store::PageDraft;
use crate::utils::version_info;
use crate::webhook::dispatcher::WebhookOutcome;

/// Event type header of webhook deliveries
pub const EVENT_HEADER: &str = "x-github-event";

/// Signature header of webhook deliveries
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "webpilotx".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, ConsoleError> {
    value.ok_or_else(|| ConsoleError::ValidationError(format!("{} is required", name)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub page_id: Option<PageId>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub message: String,
    pub page_id: PageId,
    pub deployment_id: DeploymentId,
}

/// `POST /pages/api/deploy`
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<DeployRequest>,
) -> Result<Json<DeployResponse>, ConsoleError> {
    let page_id = required(request.page_id, "pageId")?;
    let deployment_id = state.deployer.trigger(page_id).await?;

    Ok(Json(DeployResponse {
        message: "Deployment started".to_string(),
        page_id,
        deployment_id,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAndDeployRequest {
    /// Existing page to replace; a new page is created when absent
    pub page_id: Option<PageId>,

    #[serde(flatten)]
    pub page: PageDraft,

    #[serde(default)]
    pub env_vars: Vec<EnvVar>,
}

/// `POST /pages/api/save-and-deploy`
pub async fn save_and_deploy_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<SaveAndDeployRequest>,
) -> Result<Json<DeployResponse>, ConsoleError> {
    let draft = request.page;
    if draft.repo.trim().is_empty() || draft.branch.trim().is_empty() || draft.name.trim().is_empty() {
        return Err(ConsoleError::ValidationError(
            "repo, branch and name are required".to_string(),
        ));
    }
    output_dir(FsPath::new("."), draft.build_output_dir.as_deref())?;

    let page = match request.page_id {
        Some(page_id) => state.store.update_page(page_id, draft).await?,
        None => state.store.create_page(draft).await?,
    };
    state.store.replace_env_vars(page.id, request.env_vars).await?;
    info!("Saved page {} ({})", page.id, page.name);

    let deployment_id = state.deployer.trigger(page.id).await?;
    Ok(Json(DeployResponse {
        message: "Page saved, deployment started".to_string(),
        page_id: page.id,
        deployment_id,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentsQuery {
    pub page_id: Option<PageId>,
}

/// `GET /pages/api/deployments?pageId=`
pub async fn deployments_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DeploymentsQuery>,
) -> Result<Json<Vec<DeploymentView>>, ConsoleError> {
    let page_id = required(query.page_id, "pageId")?;
    if state.store.get_page(page_id).await?.is_none() {
        return Err(ConsoleError::NotFound(format!("page {}", page_id)));
    }

    let deployments = state.store.deployments_for_page(page_id).await?;
    Ok(Json(
        deployments
            .into_iter()
            .map(|d| state.tracker.view(d))
            .collect(),
    ))
}

/// `GET /pages/{pageId}/deployments/{deploymentId}`
pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path((page_id, deployment_id)): Path<(PageId, DeploymentId)>,
) -> Result<Json<DeploymentView>, ConsoleError> {
    let deployment = state
        .store
        .get_deployment(deployment_id)
        .await?
        .filter(|d| d.page_id == page_id)
        .ok_or_else(|| ConsoleError::NotFound(format!("deployment {}", deployment_id)))?;

    Ok(Json(state.tracker.view(deployment)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStreamQuery {
    pub deployment_id: Option<DeploymentId>,
}

/// `GET /pages/api/deployment-log-stream?deploymentId=`
///
/// A completed log is returned whole. Otherwise the response stays open and
/// carries every append until the completion sentinel is written.
pub async fn log_stream_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<LogStreamQuery>,
) -> Result<Response, ConsoleError> {
    let deployment_id = required(query.deployment_id, "deploymentId")?;

    let body = match state.tracker.hub().subscribe(deployment_id).await? {
        LogSubscription::Complete(contents) => Body::from(contents),
        LogSubscription::Live(stream) => Body::from_stream(stream),
    };

    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8")),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no")),
    ];
    Ok((headers, body).into_response())
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub message: String,
    #[serde(default)]
    pub deployment_ids: Vec<DeploymentId>,
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `POST /pages/github-webhook-callback`
pub async fn webhook_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ConsoleError> {
    let outcome = state
        .dispatcher
        .handle(
            header_value(&headers, EVENT_HEADER),
            header_value(&headers, SIGNATURE_HEADER),
            &body,
        )
        .await?;

    Ok(Json(match outcome {
        WebhookOutcome::Ignored { event } => WebhookResponse {
            message: format!("Event '{}' ignored", event),
            deployment_ids: Vec::new(),
        },
        WebhookOutcome::Dispatched { deployment_ids } => WebhookResponse {
            message: format!("{} deployments started", deployment_ids.len()),
            deployment_ids,
        },
    }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePageResponse {
    pub message: String,
    pub page_id: PageId,
}

/// `DELETE /pages/api/pages/{id}`
pub async fn delete_page_handler(
    State(state): State<Arc<ServerState>>,
    Path(page_id): Path<PageId>,
) -> Result<Json<DeletePageResponse>, ConsoleError> {
    let page = state.deployer.delete_page(page_id).await?;
    Ok(Json(DeletePageResponse {
        message: format!("Page '{}' deleted", page.name),
        page_id,
    }))
}
