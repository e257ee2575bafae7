//! API route handlers for the gateway.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::NaiveTime;
use serde::Deserialize;
use serde_json::json;

use cadence_core::error::CadenceError;
use cadence_core::types::DelayUnit;
use cadence_store::{ConfigDraft, ConfigUpdate, StepDraft};

use super::server::AppState;

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn ok(value: serde_json::Value) -> ApiResponse {
    (StatusCode::OK, Json(value))
}

fn error_response(e: &CadenceError) -> ApiResponse {
    let status = match e {
        CadenceError::NotFound(_) => StatusCode::NOT_FOUND,
        CadenceError::ConfigInUse(_)
        | CadenceError::ConfigInactive(_)
        | CadenceError::NoSteps(_) => StatusCode::CONFLICT,
        CadenceError::InvalidConfig(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"ok": false, "error": e.to_string()})))
}

fn parse_clock(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResponse {
    ok(json!({
        "status": "ok",
        "service": "cadence-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

// ── Campaign CRUD ──────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateConfigBody {
    pub agent_id: String,
    pub name: String,
    #[serde(default)]
    pub auto_message: bool,
    pub business_start: Option<String>,
    pub business_end: Option<String>,
}

pub async fn create_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateConfigBody>,
) -> ApiResponse {
    let start = match body.business_start.as_deref() {
        Some(s) => match parse_clock(s) {
            Some(t) => t,
            None => {
                return error_response(&CadenceError::InvalidConfig(format!(
                    "bad business_start '{s}'"
                )));
            }
        },
        None => NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
    };
    let end = match body.business_end.as_deref() {
        Some(s) => match parse_clock(s) {
            Some(t) => t,
            None => {
                return error_response(&CadenceError::InvalidConfig(format!(
                    "bad business_end '{s}'"
                )));
            }
        },
        None => NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
    };

    let draft = ConfigDraft {
        agent_id: body.agent_id,
        name: body.name,
        auto_message: body.auto_message,
        business_start: start,
        business_end: end,
    };
    match state.engine.store().insert_config(&draft) {
        Ok(config) => ok(json!({"ok": true, "config": config})),
        Err(e) => error_response(&e),
    }
}

pub async fn list_configs(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.engine.store().list_configs() {
        Ok(configs) => ok(json!({"ok": true, "configs": configs})),
        Err(e) => error_response(&e),
    }
}

pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.engine.store().get_config(&id) {
        Ok(config) => ok(json!({"ok": true, "config": config})),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateConfigBody {
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub auto_message: Option<bool>,
    pub business_start: Option<String>,
    pub business_end: Option<String>,
    pub loop_from: Option<i64>,
    pub loop_to: Option<i64>,
    #[serde(default)]
    pub clear_loop: bool,
}

pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateConfigBody>,
) -> ApiResponse {
    let business_start = match body.business_start.as_deref() {
        Some(s) => match parse_clock(s) {
            Some(t) => Some(t),
            None => {
                return error_response(&CadenceError::InvalidConfig(format!(
                    "bad business_start '{s}'"
                )));
            }
        },
        None => None,
    };
    let business_end = match body.business_end.as_deref() {
        Some(s) => match parse_clock(s) {
            Some(t) => Some(t),
            None => {
                return error_response(&CadenceError::InvalidConfig(format!(
                    "bad business_end '{s}'"
                )));
            }
        },
        None => None,
    };

    let update = ConfigUpdate {
        name: body.name,
        is_active: body.is_active,
        auto_message: body.auto_message,
        business_start,
        business_end,
        loop_from: body.loop_from,
        loop_to: body.loop_to,
        clear_loop: body.clear_loop,
    };
    match state.engine.store().update_config(&id, &update) {
        Ok(config) => ok(json!({"ok": true, "config": config})),
        Err(e) => error_response(&e),
    }
}

/// Delete a campaign. Returns 409 while scheduled executions still
/// reference it — in-flight work is never silently orphaned.
pub async fn delete_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.engine.store().delete_config(&id) {
        Ok(()) => ok(json!({"ok": true})),
        Err(e) => error_response(&e),
    }
}

// ── Step catalog ──────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateStepBody {
    pub step_order: i64,
    #[serde(default)]
    pub title: String,
    pub delay_value: i64,
    pub delay_unit: String,
    pub message: String,
}

pub async fn create_step(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<CreateStepBody>,
) -> ApiResponse {
    let draft = StepDraft {
        step_order: body.step_order,
        title: body.title,
        delay_value: body.delay_value,
        delay_unit: DelayUnit::parse(&body.delay_unit),
        message: body.message,
    };
    match state.engine.store().insert_step(&id, &draft) {
        Ok(step) => ok(json!({"ok": true, "step": step})),
        Err(e) => error_response(&e),
    }
}

pub async fn list_steps(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.engine.store().steps_for_config(&id) {
        Ok(steps) => ok(json!({"ok": true, "steps": steps})),
        Err(e) => error_response(&e),
    }
}

pub async fn delete_step(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.engine.store().delete_step(&id) {
        Ok(()) => ok(json!({"ok": true})),
        Err(e) => error_response(&e),
    }
}

// ── Funnel dashboard (read-only) ──────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FunnelQuery {
    pub window_hours: Option<i64>,
}

pub async fn funnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<FunnelQuery>,
) -> ApiResponse {
    let window = query.window_hours.map(chrono::Duration::hours);
    match state.engine.funnel(&id, window) {
        Ok((entries, counts)) => ok(json!({"ok": true, "entries": entries, "counts": counts})),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct FailedQuery {
    pub limit: Option<usize>,
}

/// Operator-visible error log: failed sends with their reasons.
pub async fn failed_executions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FailedQuery>,
) -> ApiResponse {
    match state.engine.store().failed_executions(query.limit.unwrap_or(50)) {
        Ok(executions) => ok(json!({"ok": true, "executions": executions})),
        Err(e) => error_response(&e),
    }
}

// ── Conversation control ──────────────────────────────

pub async fn pause_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.engine.pause_conversation(&id) {
        Ok(cancelled) => ok(json!({"ok": true, "cancelled": cancelled})),
        Err(e) => error_response(&e),
    }
}

pub async fn resume_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.engine.resume_conversation(&id) {
        Ok(()) => ok(json!({"ok": true})),
        Err(e) => error_response(&e),
    }
}

pub async fn cancel_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.engine.cancel_conversation(&id) {
        Ok(cancelled) => ok(json!({"ok": true, "cancelled": cancelled})),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleBody {
    pub config_id: String,
}

/// Explicit scheduling pass — also the manual retry path after a failed
/// send, and the way a resumed conversation gets moving again.
pub async fn schedule_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ScheduleBody>,
) -> ApiResponse {
    match state.engine.schedule_next(&id, &body.config_id) {
        Ok(Some(execution)) => ok(json!({"ok": true, "scheduled": true, "execution": execution})),
        Ok(None) => ok(json!({"ok": true, "scheduled": false})),
        Err(e) => error_response(&e),
    }
}

// ── WhatsApp webhook ──────────────────────────────

/// Meta's webhook verification handshake: echo `hub.challenge` when the
/// verify token matches.
pub async fn verify_webhook(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    if mode == Some("subscribe") && token == Some(state.webhook_verify_token.as_str()) {
        (StatusCode::OK, challenge)
    } else {
        (StatusCode::FORBIDDEN, "verification failed".to_string())
    }
}

/// Inbound webhook payload: extract human text messages and feed them to
/// the engine. Always answers 200 — Meta retries anything else.
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResponse {
    let messages = cadence_channels::parse_webhook(&payload);
    let mut received = 0;
    for msg in &messages {
        match state.engine.handle_inbound(&msg.conversation_id, msg.timestamp) {
            Ok(()) => received += 1,
            Err(e) => tracing::warn!("⚠️ Inbound from {} dropped: {}", msg.conversation_id, e),
        }
    }
    ok(json!({"ok": true, "received": received}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{AppState, build_router};
    use async_trait::async_trait;
    use axum::Router;
    use axum::body::Body;
    use axum::http::Request;
    use cadence_core::config::EngineConfig;
    use cadence_core::error::Result;
    use cadence_core::traits::Messenger;
    use cadence_core::types::DeliveryReceipt;
    use cadence_engine::FollowupEngine;
    use cadence_store::FollowupStore;
    use tower::ServiceExt;

    struct NullMessenger;

    #[async_trait]
    impl Messenger for NullMessenger {
        fn name(&self) -> &str {
            "null"
        }

        async fn send(&self, _conversation_id: &str, _body: &str) -> Result<DeliveryReceipt> {
            Ok(DeliveryReceipt {
                message_id: "wamid-test".into(),
                accepted_at: chrono::Utc::now(),
            })
        }
    }

    fn app() -> Router {
        let store = Arc::new(FollowupStore::open_in_memory().unwrap());
        let engine = Arc::new(FollowupEngine::new(
            store.clone(),
            store,
            Arc::new(NullMessenger),
            &EngineConfig::default(),
        ));
        build_router(AppState {
            engine,
            webhook_verify_token: "secret-token".into(),
            start_time: std::time::Instant::now(),
        })
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = match body {
            Some(json) => Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let (status, body) = call(&app, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_campaign_crud_flow() {
        let app = app();

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/configs",
            Some(serde_json::json!({
                "agent_id": "agent-1",
                "name": "trial-welcome",
                "auto_message": true,
                "business_start": "09:00",
                "business_end": "18:00"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let config_id = body["config"]["id"].as_str().unwrap().to_string();

        for order in 1..=2 {
            let (status, _) = call(
                &app,
                "POST",
                &format!("/api/v1/configs/{config_id}/steps"),
                Some(serde_json::json!({
                    "step_order": order,
                    "title": format!("step-{order}"),
                    "delay_value": 0,
                    "delay_unit": "minutes",
                    "message": "olá"
                })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        // Loop range referencing real steps lands; a bad one is rejected
        let (status, _) = call(
            &app,
            "PUT",
            &format!("/api/v1/configs/{config_id}"),
            Some(serde_json::json!({"loop_from": 1, "loop_to": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            "PUT",
            &format!("/api/v1/configs/{config_id}"),
            Some(serde_json::json!({"loop_from": 1, "loop_to": 9})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        // Empty funnel reads fine
        let (status, body) = call(
            &app,
            "GET",
            &format!("/api/v1/configs/{config_id}/funnel"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["counts"]["active"], 0);

        // Scheduling creates a pending execution...
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/conversations/wa-123/schedule",
            Some(serde_json::json!({"config_id": config_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scheduled"], true);

        // ...which blocks campaign deletion with 409
        let (status, _) = call(&app, "DELETE", &format!("/api/v1/configs/{config_id}"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        // Cancelling the conversation drains it; delete then succeeds
        let (status, _) = call(&app, "POST", "/api/v1/conversations/wa-123/cancel", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "DELETE", &format!("/api/v1/configs/{config_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_campaign_is_404() {
        let app = app();
        let (status, _) = call(&app, "GET", "/api/v1/configs/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_webhook_verification() {
        let app = app();

        let request = Request::builder()
            .method("GET")
            .uri("/api/v1/webhook/whatsapp?hub.mode=subscribe&hub.verify_token=secret-token&hub.challenge=12345")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"12345");

        let request = Request::builder()
            .method("GET")
            .uri("/api/v1/webhook/whatsapp?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=12345")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_webhook_inbound_records_response() {
        let app = app();
        let payload = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{
                            "from": "5511999990000",
                            "timestamp": "1767225600",
                            "type": "text",
                            "text": { "body": "oi" }
                        }]
                    }
                }]
            }]
        });
        let (status, body) = call(&app, "POST", "/api/v1/webhook/whatsapp", Some(payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], 1);
    }
}
