//! Administrative HTTP surface.
//!
//! A thin axum adapter over the registry's administrative operations:
//! - `GET /` — service info
//! - `GET /health` — uptime and object counts
//! - `GET /stats` — per-topic message/subscriber counts
//! - `GET /topics` — topic listing
//! - `POST /topics` — create a topic (`{"name": "orders"}`)
//! - `DELETE /topics/{name}` — delete a topic, notifying its subscribers
//!
//! Handlers lock the registry only for the duration of the call and never
//! await while holding it. Unmapped failures surface as 500; the body
//! carries detail only when the `expose_errors` development flag is set.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, info};

use hubbub_broker::engine::SharedBroker;
use hubbub_broker::BrokerError;

#[cfg(test)]
mod tests;

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AdminState {
    pub broker: SharedBroker,
    /// Development flag: expose internal failure detail in 500 bodies.
    pub expose_errors: bool,
}

/// Start the admin server on the given address.
pub async fn serve(
    addr: String,
    broker: SharedBroker,
    expose_errors: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(broker, expose_errors);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("admin API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the axum router (separated for testing).
pub fn router(broker: SharedBroker, expose_errors: bool) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/topics", get(list_topics).post(create_topic))
        .route("/topics/{name}", delete(delete_topic))
        .fallback(not_found)
        .with_state(AdminState {
            broker,
            expose_errors,
        })
}

fn internal_error(state: &AdminState, detail: &str) -> Response {
    error!(detail, "admin request failed");
    let body = if state.expose_errors {
        json!({"error": "Internal server error", "detail": detail})
    } else {
        json!({"error": "Internal server error"})
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

async fn service_info(State(state): State<AdminState>) -> Response {
    let broker = match state.broker.lock() {
        Ok(broker) => broker,
        Err(e) => return internal_error(&state, &e.to_string()),
    };
    let health = broker.get_health();
    Json(json!({
        "service": "hubbub",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_sec": health.uptime_sec,
    }))
    .into_response()
}

async fn health(State(state): State<AdminState>) -> Response {
    match state.broker.lock() {
        Ok(broker) => Json(broker.get_health()).into_response(),
        Err(e) => internal_error(&state, &e.to_string()),
    }
}

async fn stats(State(state): State<AdminState>) -> Response {
    match state.broker.lock() {
        Ok(broker) => Json(json!({"topics": broker.get_stats()})).into_response(),
        Err(e) => internal_error(&state, &e.to_string()),
    }
}

async fn list_topics(State(state): State<AdminState>) -> Response {
    match state.broker.lock() {
        Ok(broker) => Json(json!({"topics": broker.list_topics()})).into_response(),
        Err(e) => internal_error(&state, &e.to_string()),
    }
}

async fn create_topic(
    State(state): State<AdminState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let Some(name) = body.get("name").and_then(|n| n.as_str()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "name is required"})),
        )
            .into_response();
    };

    let result = match state.broker.lock() {
        Ok(mut broker) => broker.create_topic(name),
        Err(e) => return internal_error(&state, &e.to_string()),
    };
    match result {
        Ok(topic) => (
            StatusCode::CREATED,
            Json(json!({"status": "created", "topic": topic})),
        )
            .into_response(),
        Err(err @ BrokerError::TopicAlreadyExists(_)) => {
            (StatusCode::CONFLICT, Json(json!({"error": err.to_string()}))).into_response()
        }
        Err(err @ BrokerError::InvalidTopicName) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": err.to_string()})),
        )
            .into_response(),
        Err(err) => internal_error(&state, &err.to_string()),
    }
}

async fn delete_topic(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    let result = match state.broker.lock() {
        Ok(mut broker) => broker.delete_topic(&name),
        Err(e) => return internal_error(&state, &e.to_string()),
    };
    match result {
        Ok(topic) => Json(json!({"status": "deleted", "topic": topic})).into_response(),
        Err(err @ BrokerError::TopicNotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": err.to_string()})),
        )
            .into_response(),
        Err(err) => internal_error(&state, &err.to_string()),
    }
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "Endpoint not found"})),
    )
        .into_response()
}
