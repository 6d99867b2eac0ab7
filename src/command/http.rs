//! HTTP transport for the command channel.
//!
//! A thin axum shell over the controller: token auth plus the actor
//! allow-list the controller enforces. The channel itself is deliberately
//! minimal; everything of substance lives behind `Controller::handle`.

use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::alerts::AlertBus;
use crate::command::{Command, Controller, Reply};
use crate::config::ApiConfig;
use crate::control::ControlFlags;
use crate::error::{BotError, Result};

pub struct ApiContext {
    pub controller: Arc<Controller>,
    pub alerts: AlertBus,
    pub flags: Arc<ControlFlags>,
    pub cfg: ApiConfig,
    pub started_at: DateTime<Utc>,
}

type AppState = Arc<ApiContext>;

#[derive(Debug, Deserialize)]
struct CommandRequest {
    actor_id: i64,
    command: Command,
}

pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .map(str::to_string)
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|raw| raw.strip_prefix("Bearer ").or_else(|| raw.strip_prefix("bearer ")))
                .map(|t| t.trim().to_string())
        })
}

/// Admin token check: the raw token or its SHA-256 fingerprint is accepted,
/// so clients can avoid storing the secret itself.
fn ensure_authorized(cfg: &ApiConfig, headers: &HeaderMap) -> std::result::Result<(), Response> {
    let Some(expected) = cfg.admin_token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    else {
        if cfg.auth_required {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "admin auth is required but no admin token is configured",
            )
                .into_response());
        }
        return Ok(());
    };

    let provided = extract_token(headers);
    let fingerprint = token_fingerprint(expected);
    if provided
        .as_deref()
        .is_some_and(|t| t == expected || t == fingerprint)
    {
        return Ok(());
    }

    Err((
        StatusCode::UNAUTHORIZED,
        "admin auth failed (missing/invalid token)",
    )
        .into_response())
}

async fn post_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CommandRequest>,
) -> Response {
    if let Err(response) = ensure_authorized(&state.cfg, &headers) {
        return response;
    }

    match state.controller.handle(request.actor_id, request.command).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(BotError::Unauthorized(actor)) => (
            StatusCode::FORBIDDEN,
            Json(Reply::rejected(format!("actor {} is not on the allow-list", actor))),
        )
            .into_response(),
        Err(BotError::Validation(reason)) => {
            (StatusCode::BAD_REQUEST, Json(Reply::rejected(reason))).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(Reply::rejected(e.to_string())),
        )
            .into_response(),
    }
}

async fn get_health(State(state): State<AppState>) -> Response {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(serde_json::json!({
        "status": "ok",
        "mode": state.flags.mode().as_str(),
        "paused": state.flags.is_paused(),
        "killed": state.flags.is_killed(),
        "uptime_secs": uptime,
    }))
    .into_response()
}

async fn get_alerts(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = ensure_authorized(&state.cfg, &headers) {
        return response;
    }
    Json(state.alerts.recent()).into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/command", post(post_command))
        .route("/health", get(get_health))
        .route("/alerts", get(get_alerts))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&state.cfg.bind).await?;
    info!(addr = %state.cfg.bind, "command api listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}
