//! Request handlers for the API endpoints.
//!
//! Store and engine calls are synchronous, so every handler hops onto the
//! blocking pool before touching them.

use std::fmt;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tracing::warn;

use super::AppState;
use super::types::{
    DispatchRequest, DispatchResponse, ErrorResponse, LogsQuery, MetricsQuery, StatusQuery,
    StatusResponse,
};
use crate::dispatch::SnapshotOverrides;
use crate::error::CoreError;
use crate::metrics::DispatchMetrics;
use crate::model::DispatchLogEntry;
use crate::store::{Store, retry_once};

const DEFAULT_METRICS_DAYS: u32 = 7;
const MAX_METRICS_DAYS: u32 = 365;
const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 1000;

/// Error converted into a JSON response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, error: &str, message: impl fmt::Display) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.to_string(),
                message: message.to_string(),
            },
        }
    }

    fn bad_request(message: impl fmt::Display) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        let (status, kind) = match &e {
            CoreError::Configuration(_) => (StatusCode::BAD_REQUEST, "configuration"),
            CoreError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            CoreError::Persistence(_) => (StatusCode::SERVICE_UNAVAILABLE, "persistence"),
            CoreError::DataUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "data_unavailable"),
            CoreError::ExternalFetch(_) => (StatusCode::INTERNAL_SERVER_ERROR, "external_fetch"),
        };
        if status.is_server_error() {
            warn!(error = %e, "request failed");
        }
        Self::new(status, kind, e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Runs `f` on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", e))?
        .map_err(ApiError::from)
}

/// Current battery state of a region.
///
/// `GET /status?region=ON` → 200 + `StatusResponse` JSON. A configured
/// region that was never dispatched reports its initial state.
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Query(q) = query.map_err(ApiError::bad_request)?;
    let (battery, stored) = blocking(move || state.engine.battery_state(&q.region)).await?;
    Ok(Json(StatusResponse {
        battery,
        provenance: if stored { "stored" } else { "default" },
    }))
}

/// Runs a dispatch tick for the current time.
///
/// `POST /dispatch` `{region, price?, curtailment_risk?}` → 200 + `DispatchResponse`
pub async fn post_dispatch(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DispatchRequest>, JsonRejection>,
) -> Result<Json<DispatchResponse>, ApiError> {
    let Json(req) = payload.map_err(ApiError::bad_request)?;
    let overrides = SnapshotOverrides {
        price: req.price,
        curtailment_risk: req.curtailment_risk,
    };
    let outcome =
        blocking(move || state.engine.tick_with(&req.region, Utc::now(), overrides)).await?;
    Ok(Json(DispatchResponse::from(outcome)))
}

/// Dispatch metrics over the last `days` days.
///
/// `GET /metrics?region=ON&days=7` → 200 + `DispatchMetrics`; all regions when
/// `region` is omitted.
pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
    query: Result<Query<MetricsQuery>, QueryRejection>,
) -> Result<Json<DispatchMetrics>, ApiError> {
    let Query(q) = query.map_err(ApiError::bad_request)?;
    let days = q.days.unwrap_or(DEFAULT_METRICS_DAYS);
    if !(1..=MAX_METRICS_DAYS).contains(&days) {
        return Err(ApiError::bad_request(format!(
            "days must be between 1 and {MAX_METRICS_DAYS}, got {days}"
        )));
    }
    let metrics = blocking(move || {
        if let Some(region) = &q.region {
            state.engine.config().region(region)?;
        }
        DispatchMetrics::load(
            state.engine.store().as_ref(),
            q.region.as_deref(),
            days,
            Utc::now(),
            state.engine.config().store.retry_backoff(),
        )
    })
    .await?;
    Ok(Json(metrics))
}

/// Most recent dispatch log entries, newest first.
///
/// `GET /logs?region=ON&limit=50` → 200 + `Vec<DispatchLogEntry>`
pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Json<Vec<DispatchLogEntry>>, ApiError> {
    let Query(q) = query.map_err(ApiError::bad_request)?;
    let limit = q.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    if !(1..=MAX_LOG_LIMIT).contains(&limit) {
        return Err(ApiError::bad_request(format!(
            "limit must be between 1 and {MAX_LOG_LIMIT}, got {limit}"
        )));
    }
    let entries = blocking(move || {
        if let Some(region) = &q.region {
            state.engine.config().region(region)?;
        }
        let backoff = state.engine.config().store.retry_backoff();
        Ok(retry_once(backoff, "load recent dispatch log", || {
            state.engine.store().recent_dispatch_log(q.region.as_deref(), limit)
        })?)
    })
    .await?;
    Ok(Json(entries))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    use super::*;
    use crate::api::router;
    use crate::config::AppConfig;
    use crate::dispatch::DispatchEngine;
    use crate::store::SqliteStore;

    fn make_test_state() -> Arc<AppState> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        Arc::new(AppState {
            engine: DispatchEngine::from_config(store, AppConfig::baseline()),
        })
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn status_defaults_for_new_region() {
        let app = router(make_test_state());
        let req = Request::builder()
            .uri("/status?region=QC")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["provenance"], "default");
        assert_eq!(json["battery"]["soc_percent"], 50.0);
        assert_eq!(json["battery"]["capacity_mwh"], 60.0);
    }

    #[tokio::test]
    async fn status_unknown_region_is_400() {
        let app = router(make_test_state());
        let req = Request::builder()
            .uri("/status?region=NS")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "configuration");
        assert!(json["message"].as_str().unwrap().contains("NS"));
    }

    #[tokio::test]
    async fn status_missing_region_is_400() {
        let app = router(make_test_state());
        let req = Request::builder()
            .uri("/status")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn metrics_days_out_of_range() {
        let app = router(make_test_state());
        let req = Request::builder()
            .uri("/metrics?days=0")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_logs() {
        let app = router(make_test_state());
        let req = Request::builder()
            .uri("/logs?region=ON&limit=5")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json.as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn persistence_maps_to_503() {
        let e = ApiError::from(CoreError::Persistence(crate::error::StoreError::Conflict {
            region: "ON".into(),
        }));
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(e.body.error, "persistence");
    }
}
