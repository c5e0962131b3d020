//! Spacecraft HTTP surface

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use telecommand_shared::{TransmitRequest, TransmitResponse};
use tower_http::trace::TraceLayer;

use crate::command::{unix_seconds, CommandReceiver, CommandResult};
use crate::telemetry::TelemetryReader;

pub const BANNER: &str = "Spacecraft telecommand interface";

pub struct AppState {
    pub receiver: CommandReceiver,
    pub telemetry: TelemetryReader,
    pub instance: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { BANNER }))
        .route("/health", get(health))
        .route("/position", get(position))
        .route("/commands", post(receive_command).get(recent_commands))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "spacecraft",
        "timestamp": unix_seconds(),
        "uptime_seconds": state.telemetry.uptime_seconds(),
        "commands_received": state.receiver.received_total(),
        "container_id": state.instance,
    }))
}

async fn position(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.telemetry.position())
}

async fn receive_command(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TransmitRequest>, JsonRejection>,
) -> (StatusCode, Json<TransmitResponse>) {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let response =
                TransmitResponse::rejected("unknown", rejection.body_text(), unix_seconds());
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(response));
        }
    };

    match state.receiver.receive(&request).await {
        (CommandResult::Received, response) => (StatusCode::OK, Json(response)),
        (CommandResult::Rejected { .. }, response) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(response))
        }
    }
}

async fn recent_commands(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.receiver.recent().await)
}
