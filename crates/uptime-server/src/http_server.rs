//! HTTP surface: Prometheus metrics and availability reports.

use crate::metrics::MetricsRegistry;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use prometheus_client::encoding::text::encode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uptime::types::MonitorId;
use uptime::{Availability, Storage, calculate_status_intervals, monitor_status};

const DEFAULT_DAYS: u32 = 90;
const MAX_DAYS: u32 = 3650;

#[derive(Clone)]
struct AppState {
    storage: Arc<dyn Storage>,
    metrics: Option<Arc<MetricsRegistry>>,
}

/// HTTP server for metrics and reports
pub struct HttpServer {
    storage: Arc<dyn Storage>,
    /// `/metrics` is only mounted when set
    metrics: Option<Arc<MetricsRegistry>>,
    /// Listen address
    listen_addr: String,
}

impl HttpServer {
    pub fn new(
        storage: Arc<dyn Storage>,
        metrics: Option<Arc<MetricsRegistry>>,
        listen_addr: String,
    ) -> Self {
        Self {
            storage,
            metrics,
            listen_addr,
        }
    }

    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    pub fn router(&self) -> Router {
        let mut router =
            Router::new().route("/monitors/:id/availability", get(availability_handler));
        if self.metrics.is_some() {
            router = router.route("/metrics", get(metrics_handler));
        }

        router
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(AppState {
                storage: self.storage.clone(),
                metrics: self.metrics.clone(),
            })
    }

    /// Serve until shutdown is signalled
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(listen_addr = %self.listen_addr, "Starting HTTP server");

        let listener = TcpListener::bind(&self.listen_addr).await?;
        info!(
            listen_addr = %self.listen_addr,
            metrics = self.metrics.is_some(),
            "HTTP server listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;

        Ok(())
    }
}

/// Handler for /metrics endpoint
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let Some(registry) = state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &registry.registry) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    days: Option<u32>,
    /// Bucket width, e.g. `1d` or `6h`
    bucket: Option<String>,
}

/// Availability report with the current status
#[derive(Debug, Serialize)]
pub struct AvailabilityReport {
    #[serde(flatten)]
    pub availability: Availability,
    pub up: Option<bool>,
    pub since: Option<DateTime<Utc>>,
}

struct ApiError(StatusCode, String);

impl From<common::Error> for ApiError {
    fn from(err: common::Error) -> Self {
        let status = match err {
            common::Error::NotFound { .. } => StatusCode::NOT_FOUND,
            common::Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

fn bucket_width(bucket: Option<&str>) -> Result<chrono::Duration, ApiError> {
    let Some(bucket) = bucket else {
        return Ok(chrono::Duration::days(1));
    };

    humantime_serde::re::humantime::parse_duration(bucket)
        .ok()
        .and_then(|width| chrono::Duration::from_std(width).ok())
        .filter(|width| *width > chrono::Duration::zero())
        .ok_or_else(|| ApiError(StatusCode::BAD_REQUEST, format!("invalid bucket '{}'", bucket)))
}

async fn availability_handler(
    State(state): State<AppState>,
    Path(id): Path<MonitorId>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityReport>, ApiError> {
    let days = query.days.unwrap_or(DEFAULT_DAYS);
    if !(1..=MAX_DAYS).contains(&days) {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            format!("days must be between 1 and {}", MAX_DAYS),
        ));
    }
    let width = bucket_width(query.bucket.as_deref())?;

    state.storage.get_monitor(id).await?;

    let now = Utc::now();
    let start = now - chrono::Duration::days(i64::from(days));
    let results = state.storage.list_results(id, start).await?;
    let availability = calculate_status_intervals(&results, &start, width, now)?;
    let status = monitor_status(state.storage.as_ref(), id).await?;

    Ok(Json(AvailabilityReport {
        availability,
        up: status.up,
        since: status.since,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_width() {
        assert_eq!(bucket_width(None).ok(), Some(chrono::Duration::days(1)));
        assert_eq!(bucket_width(Some("6h")).ok(), Some(chrono::Duration::hours(6)));
        assert!(bucket_width(Some("0s")).is_err());
        assert!(bucket_width(Some("soon")).is_err());
    }

    #[tokio::test]
    async fn test_metrics_handler() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.record_probe("tcp", true, std::time::Duration::from_millis(50));
        registry.update_monitor_count(5);

        let state = AppState {
            storage: Arc::new(uptime::MemoryStorage::new()),
            metrics: Some(registry),
        };
        let response = metrics_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_handler_without_registry() {
        let state = AppState {
            storage: Arc::new(uptime::MemoryStorage::new()),
            metrics: None,
        };
        let response = metrics_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
