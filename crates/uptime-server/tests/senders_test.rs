//! Notification senders against a local mock API.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use uptime::{BotSender, EmailSender, EmailTemplate, IncidentEmail, SenderError, WebhookSender};
use uptime_server::senders::{
    SendGridSender, SlackWebhookSender, TelegramBotSender, http_client,
};

#[derive(Debug, Clone)]
struct Captured {
    path: String,
    authorization: Option<String>,
    body: Value,
}

type Log = Arc<Mutex<Vec<Captured>>>;

async fn capture(
    State(log): State<Log>,
    Path(segment): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    log.lock().unwrap().push(Captured {
        path: segment.clone(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    if segment.contains("broken") {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

async fn capture_mail(
    State(log): State<Log>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    log.lock().unwrap().push(Captured {
        path: "mail".to_string(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    StatusCode::ACCEPTED
}

async fn mock_api() -> (String, Log) {
    let log: Log = Default::default();
    let app = Router::new()
        .route("/v3/mail/send", post(capture_mail))
        .route("/hooks/:segment", post(capture))
        .route("/tg/:segment/sendMessage", post(capture))
        .with_state(log.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), log)
}

fn incident_email() -> IncidentEmail {
    IncidentEmail {
        monitor_name: "website".to_string(),
        full_name: "Ops".to_string(),
        monitor_url: "https://example.com".to_string(),
        incident_url: "https://status.example.com/incidents/3".to_string(),
        ack_url: "https://status.example.com/incidents/3/acknowledge".to_string(),
        incident_cause: "HTTP 500 - Internal Server Error".to_string(),
        incident_started_at: "01 Jun 2024 at 10:00 UTC".to_string(),
        incident_ended_at: Some("01 Jun 2024 at 10:05 UTC".to_string()),
        incident_length: Some("5 minutes".to_string()),
    }
}

#[tokio::test]
async fn test_sendgrid_posts_dynamic_template() {
    let (base, log) = mock_api().await;
    let sender = SendGridSender::new(
        http_client(Duration::from_secs(5)).unwrap(),
        Some("SG.secret".to_string()),
        "alerts@example.com",
        "d-opened",
        "d-resolved",
    )
    .with_api_base(base);

    sender
        .send_template(EmailTemplate::IncidentResolved, "ops@example.com", &incident_email())
        .await
        .unwrap();

    let captured = log.lock().unwrap().clone();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].authorization.as_deref(), Some("Bearer SG.secret"));
    assert_eq!(captured[0].body["template_id"], "d-resolved");
    assert_eq!(
        captured[0].body["personalizations"][0]["dynamic_template_data"]["incident_length"],
        "5 minutes"
    );
}

#[tokio::test]
async fn test_slack_webhook_receives_blocks() {
    let (base, log) = mock_api().await;
    let sender = SlackWebhookSender::new(http_client(Duration::from_secs(5)).unwrap());

    let message = json!({ "text": "fallback", "blocks": [] });
    sender
        .post_blocks(&format!("{}/hooks/T000", base), &message)
        .await
        .unwrap();

    let captured = log.lock().unwrap().clone();
    assert_eq!(captured[0].path, "T000");
    assert_eq!(captured[0].body, message);
}

#[tokio::test]
async fn test_slack_rejection_is_reported() {
    let (base, _log) = mock_api().await;
    let sender = SlackWebhookSender::new(http_client(Duration::from_secs(5)).unwrap());

    let err = sender
        .post_blocks(&format!("{}/hooks/broken", base), &json!({}))
        .await
        .unwrap_err();
    match err {
        SenderError::Rejected { service, status, .. } => {
            assert_eq!(service, "Slack");
            assert_eq!(status, 500);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_telegram_send_message() {
    let (base, log) = mock_api().await;
    let sender = TelegramBotSender::new(
        http_client(Duration::from_secs(5)).unwrap(),
        Some("123:abc".to_string()),
    )
    .with_api_base(format!("{}/tg", base));

    sender.send_text("-100200", "Monitor is DOWN: website.").await.unwrap();

    let captured = log.lock().unwrap().clone();
    assert_eq!(captured[0].path, "bot123:abc");
    assert_eq!(captured[0].body["chat_id"], "-100200");
    assert_eq!(captured[0].body["text"], "Monitor is DOWN: website.");
}

#[tokio::test]
async fn test_unreachable_api_is_a_network_error() {
    // bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let sender = TelegramBotSender::new(
        http_client(Duration::from_secs(2)).unwrap(),
        Some("token".to_string()),
    )
    .with_api_base(format!("http://{}", addr));

    let err = sender.send_text("1", "hello").await.unwrap_err();
    assert!(matches!(err, SenderError::Network(_)));
}
