//! Ground station HTTP routes

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use telecommand_shared::{Command, CommandState, NewCommand, Producer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;

pub struct AppState {
    pub producer: Producer,
    pub database_url: String,
    pub instance: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/telecommands",
            get(list_telecommands).post(create_telecommand),
        )
        .route("/api/telecommands/{id}", get(get_telecommand))
        .route(
            "/api/telecommands/{id}/cancel",
            put(cancel_telecommand).delete(cancel_telecommand),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn unix_seconds() -> f64 {
    telecommand_shared::now().timestamp_micros() as f64 / 1_000_000.0
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::not_found(format!("Telecommand {raw} not found")))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, store) = match state.producer.store().ping().await {
        Ok(_) => (StatusCode::OK, "healthy"),
        Err(e) => {
            warn!("[GROUND] Health check: store unavailable: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
        }
    };

    (
        status,
        Json(json!({
            "status": store,
            "service": "ground",
            "database": state.database_url,
            "timestamp": unix_seconds(),
            "container_id": state.instance,
        })),
    )
}

async fn create_telecommand(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewCommand>, JsonRejection>,
) -> Result<(StatusCode, Json<Command>), ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let command = state.producer.create(request).await?;
    Ok((StatusCode::CREATED, Json(command)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn list_telecommands(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Command>>, ApiError> {
    let filter = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<CommandState>()
                .map_err(|e| ApiError::bad_request(e.to_string()))?,
        ),
    };

    Ok(Json(state.producer.list(filter).await?))
}

async fn get_telecommand(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Command>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.producer.get(id).await?))
}

async fn cancel_telecommand(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let command = state.producer.cancel(id).await?;

    Ok(Json(json!({
        "message": "Telecommand cancelled successfully",
        "telecommand": command,
    })))
}
