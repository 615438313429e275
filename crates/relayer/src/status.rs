//! Operator status endpoint
//!
//! Small read-only HTTP surface: health probe, per-commitment status and
//! aggregate stats. Never exposes relay payloads or recipient hints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use bridge_core::Commitment;
use relay_engine::{EngineStats, RelayEngine, StatusReport};

pub fn router(engine: Arc<RelayEngine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status/:commitment", get(status))
        .route("/stats", get(stats))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

pub async fn serve(engine: Arc<RelayEngine>, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("status endpoint listening on {addr}");
    axum::serve(listener, router(engine)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn status(
    State(engine): State<Arc<RelayEngine>>,
    Path(commitment): Path<String>,
) -> Result<Json<StatusReport>, (StatusCode, String)> {
    let commitment: Commitment = commitment
        .parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, "malformed commitment".to_string()))?;

    match engine.status(&commitment) {
        Ok(Some(report)) => Ok(Json(report)),
        Ok(None) => Err((StatusCode::NOT_FOUND, "unknown commitment".to_string())),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn stats(
    State(engine): State<Arc<RelayEngine>>,
) -> Result<Json<EngineStats>, (StatusCode, String)> {
    engine
        .stats()
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
