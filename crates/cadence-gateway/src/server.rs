//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use cadence_core::error::{CadenceError, Result};
use cadence_engine::FollowupEngine;

/// Shared state for the gateway server.
pub struct AppState {
    /// The follow-up engine — all reads and writes go through it.
    pub engine: Arc<FollowupEngine>,
    /// Expected `hub.verify_token` for WhatsApp webhook verification.
    pub webhook_verify_token: String,
    pub start_time: std::time::Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    Router::new()
        .route("/api/v1/health", get(super::routes::health_check))
        // Campaign CRUD (admin screens)
        .route(
            "/api/v1/configs",
            get(super::routes::list_configs).post(super::routes::create_config),
        )
        .route(
            "/api/v1/configs/{id}",
            get(super::routes::get_config)
                .put(super::routes::update_config)
                .delete(super::routes::delete_config),
        )
        .route(
            "/api/v1/configs/{id}/steps",
            get(super::routes::list_steps).post(super::routes::create_step),
        )
        .route("/api/v1/steps/{id}", delete(super::routes::delete_step))
        // Funnel dashboard (read-only)
        .route("/api/v1/configs/{id}/funnel", get(super::routes::funnel))
        .route(
            "/api/v1/executions/failed",
            get(super::routes::failed_executions),
        )
        // Conversation control
        .route(
            "/api/v1/conversations/{id}/pause",
            post(super::routes::pause_conversation),
        )
        .route(
            "/api/v1/conversations/{id}/resume",
            post(super::routes::resume_conversation),
        )
        .route(
            "/api/v1/conversations/{id}/cancel",
            post(super::routes::cancel_conversation),
        )
        .route(
            "/api/v1/conversations/{id}/schedule",
            post(super::routes::schedule_conversation),
        )
        // WhatsApp webhook intake
        .route(
            "/api/v1/webhook/whatsapp",
            get(super::routes::verify_webhook).post(super::routes::receive_webhook),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Bind and serve the gateway until the process exits.
pub async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let router = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway listening on http://{addr}");
    axum::serve(listener, router)
        .await
        .map_err(|e| CadenceError::Config(format!("Gateway server: {e}")))?;
    Ok(())
}
