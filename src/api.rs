//! Read-only stats API
//!
//! Serves the collector's output and the mined block list straight from the
//! store for dashboards.

use crate::store::{MinedBlock, MinerGroup, PoolStore, PoolSummary, WorkerRecord};
use crate::{Error, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
struct ApiState {
    store: Arc<dyn PoolStore>,
}

/// Store failures surface as a 500 with the error message
struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(category = self.0.category(), "API request failed: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

async fn summary(State(state): State<ApiState>) -> ApiResult<PoolSummary> {
    Ok(Json(state.store.summary().await?))
}

async fn miners(State(state): State<ApiState>) -> ApiResult<Vec<MinerGroup>> {
    Ok(Json(state.store.miners().await?))
}

async fn workers(State(state): State<ApiState>) -> ApiResult<Vec<WorkerRecord>> {
    let mut workers = state.store.workers().await?;
    workers.sort_by(|a, b| b.hashrate.total_cmp(&a.hashrate));
    Ok(Json(workers))
}

async fn blocks(State(state): State<ApiState>) -> ApiResult<Vec<MinedBlock>> {
    Ok(Json(state.store.mined_blocks().await?))
}

/// Build the API routes
pub fn router(store: Arc<dyn PoolStore>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/summary", get(summary))
        .route("/miners", get(miners))
        .route("/workers", get(workers))
        .route("/blocks", get(blocks))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ApiState { store })
}

/// Serve the API on `listener` until cancelled
pub async fn serve(
    listener: TcpListener,
    store: Arc<dyn PoolStore>,
    cancel: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!("Stats API listening on http://{}", addr);

    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| Error::network(format!("HTTP server error: {}", e)))?;

    info!("Stats API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_routes_serve_store_contents() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_mined_block(MinedBlock {
                hash: "ab".repeat(32),
                height: 7,
                prev_hash: None,
                mainchain: Some(true),
                found_at: Utc::now(),
            })
            .await
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, store, cancel.clone()));

        let client = reqwest::Client::new();
        let blocks: Vec<MinedBlock> = client
            .get(format!("http://{}/blocks", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].height, 7);

        let summary: PoolSummary = client
            .get(format!("http://{}/summary", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(summary, PoolSummary::default());

        let missing = client
            .get(format!("http://{}/nothing", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
