//! HTTP front end
//!
//! - `POST /query`: answer a natural-language question
//! - `POST /schema/refresh`: drop the cached schema description
//! - `GET /health`: liveness
//! - `GET /metrics`: Prometheus exposition
//! - everything else: the static browser UI

use asksql_engine::{Orchestrator, Record, Stage};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Registry,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub question: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum QueryResponse {
    Answered {
        success: bool,
        sql: String,
        result: Vec<Record>,
    },
    Failed {
        success: bool,
        stage: Stage,
        sql: String,
        error: String,
        result: Vec<Record>,
    },
}

pub fn router(state: AppState, static_dir: &str) -> Router {
    Router::new()
        .route("/query", post(query))
        .route("/schema/refresh", post(refresh_schema))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn query(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> Response {
    let question = req.question.trim();
    if question.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "Question cannot be empty"})),
        )
            .into_response();
    }

    let body = match state.orchestrator.ask(question).await {
        Ok(answer) => QueryResponse::Answered {
            success: true,
            sql: answer.sql.into_string(),
            result: answer.records,
        },
        Err(e) => {
            let message = e.to_string();
            QueryResponse::Failed {
                success: false,
                stage: e.stage(),
                sql: message.clone(),
                error: message,
                result: Vec::new(),
            }
        }
    };
    Json(body).into_response()
}

async fn refresh_schema(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.orchestrator.schema_cache().invalidate().await;
    crate::log_event!(level: tracing::Level::INFO, event: "schema_invalidated");
    Json(json!({"success": true}))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn metrics(State(state): State<AppState>) -> Response {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&state.registry.gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}
