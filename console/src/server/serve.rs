//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::ConsoleError;
use crate::server::handlers::{
    delete_page_handler, deploy_handler, deployment_handler, deployments_handler,
    health_handler, log_stream_handler, save_and_deploy_handler, version_handler,
    webhook_handler,
};
use crate::server::state::ServerState;

/// Build the router of the orchestration endpoints
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route("/pages/api/deploy", post(deploy_handler))
        .route("/pages/api/save-and-deploy", post(save_and_deploy_handler))
        .route("/pages/api/deployments", get(deployments_handler))
        .route(
            "/pages/{page_id}/deployments/{deployment_id}",
            get(deployment_handler),
        )
        .route("/pages/api/deployment-log-stream", get(log_stream_handler))
        // Webhooks
        .route("/pages/github-webhook-callback", post(webhook_handler))
        // Pages
        .route("/pages/api/pages/{page_id}", delete(delete_page_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), ConsoleError>>, ConsoleError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ConsoleError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ConsoleError::ServerError(e.to_string()))
    });

    Ok(handle)
}
