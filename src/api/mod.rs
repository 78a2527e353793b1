//! REST API over the dispatch engine and its store.
//!
//! - `GET /status?region=`: battery state of a region
//! - `POST /dispatch`: run a tick now, optionally overriding price and risk
//! - `GET /metrics?region=&days=`: dispatch metrics over a window
//! - `GET /logs?region=&limit=`: recent dispatch log entries

mod handlers;
mod types;

pub use handlers::ApiError;
pub use types::{
    DecisionBody, DispatchRequest, DispatchResponse, ErrorResponse, LogsQuery, MetricsQuery,
    StatusQuery, StatusResponse,
};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tracing::info;

use crate::dispatch::DispatchEngine;
use crate::store::SqliteStore;

/// Application state shared across all request handlers.
///
/// The engine serialises store access internally, so no further locking is
/// needed here.
pub struct AppState {
    pub engine: DispatchEngine<SqliteStore>,
}

/// Builds the axum router with all API routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(handlers::get_status))
        .route("/dispatch", post(handlers::post_dispatch))
        .route("/metrics", get(handlers::get_metrics))
        .route("/logs", get(handlers::get_logs))
        .with_state(state)
}

/// Binds to `addr` and serves the API until the server stops.
///
/// # Errors
///
/// Returns an `io::Error` if the listener cannot bind or the server fails.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, router(state)).await
}
