//! Traffic controller routes

use std::any::Any;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::{error::GatewayError, models::InboundRequest, state::AppState};

/// Create the router for the traffic controller
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/", post(handle_traffic))
        .route("/traffic", post(handle_traffic))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Turn a handler panic into the standard 500 body
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    GatewayError::Internal(anyhow::anyhow!("handler panicked: {}", detail)).into_response()
}

/// Health check endpoint
///
/// Always 200; backends are reported, `null` when not configured.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.db_pool {
        Some(pool) => Some(common::database::health_check(pool).await.unwrap_or(false)),
        None => None,
    };
    let cache = match &state.redis_pool {
        Some(pool) => Some(pool.health_check().await.unwrap_or(false)),
        None => None,
    };

    Json(json!({
        "status": "ok",
        "service": "traffic-controller",
        "database": database,
        "cache": cache,
        "rate_limit_degraded": state.gateway.admission().is_degraded(),
    }))
}

/// Gateway entry point for both channels
pub async fn handle_traffic(
    State(state): State<AppState>,
    payload: Result<Json<InboundRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!("Rejected malformed request: {}", rejection.body_text());
        GatewayError::BadRequest(rejection.body_text())
    })?;

    state.gateway.dispatch(request).await
}
