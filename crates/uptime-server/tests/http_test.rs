//! Availability reports and metrics over HTTP.

use chrono::{Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use uptime::types::{Owner, Target};
use uptime::{MemoryStorage, Monitor, Storage};
use uptime_server::{HttpServer, MetricsRegistry};

async fn serve(storage: Arc<MemoryStorage>, metrics: Option<Arc<MetricsRegistry>>) -> String {
    let server = HttpServer::new(storage, metrics, "127.0.0.1:0".to_string());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn seeded() -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .insert_owner(Owner {
            id: 1,
            email: "ops@example.com".to_string(),
            full_name: String::new(),
        })
        .await;
    storage
        .upsert_monitor(Monitor {
            id: 7,
            owner_id: 1,
            name: "dns".to_string(),
            endpoint: "1.1.1.1".to_string(),
            target: Target::Ping { num_pings: 4 },
            alert_type: Default::default(),
            keyword: None,
            periodicity: std::time::Duration::from_secs(60),
            timeout: std::time::Duration::from_secs(4),
            recovery_period: std::time::Duration::ZERO,
            confirmation_period: std::time::Duration::ZERO,
            send_email: false,
        })
        .await;
    storage
}

#[tokio::test]
async fn test_availability_report() {
    let storage = seeded().await;
    let now = Utc::now();
    for (hours_ago, status) in [(30, true), (20, false), (10, true), (5, true)] {
        let at = now - Duration::hours(hours_ago);
        let handle = storage.create_result(7, at).await.unwrap();
        storage.update_result(&handle, at, 0.01, status).await.unwrap();
    }

    let base = serve(storage, None).await;
    let report: Value = reqwest::get(format!("{}/monitors/7/availability?days=3&bucket=1d", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(report["availability"], 0.75);
    assert_eq!(report["up"], true);
    let uptimes = report["uptimes"].as_array().unwrap();
    let intervals = report["starting_intervals"].as_array().unwrap();
    assert_eq!(uptimes.len(), intervals.len());
    assert!((2..=3).contains(&uptimes.len()));
}

#[tokio::test]
async fn test_unknown_monitor_is_not_found() {
    let base = serve(seeded().await, None).await;
    let response = reqwest::get(format!("{}/monitors/99/availability", base))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bad_query_is_rejected() {
    let base = serve(seeded().await, None).await;

    let response = reqwest::get(format!("{}/monitors/7/availability?bucket=later", base))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = reqwest::get(format!("{}/monitors/7/availability?days=0", base))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_bucket_count_is_rejected() {
    let base = serve(seeded().await, None).await;

    let response = reqwest::get(format!("{}/monitors/7/availability?days=3650&bucket=1us", base))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = reqwest::get(format!("{}/monitors/7/availability?days=3650&bucket=1d", base))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_route_follows_settings() {
    let base = serve(seeded().await, None).await;
    let response = reqwest::get(format!("{}/metrics", base)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let registry = Arc::new(MetricsRegistry::new());
    registry.record_incident_opened();
    let base = serve(seeded().await, Some(registry)).await;
    let body = reqwest::get(format!("{}/metrics", base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("uptime_incidents_opened_total 1"));
}
