//! Monitor, probe, incident and channel types.

use chrono::{DateTime, Utc};
use common::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub type MonitorId = u64;
pub type OwnerId = u64;
pub type ResultId = u64;
pub type IncidentId = u64;
pub type EventId = u64;
pub type ChannelId = u64;

/// Fixed failure causes produced by the probe executors.
pub mod causes {
    pub const TIMEOUT: &str = "Timeout";
    pub const CONNECTION_ERROR: &str = "Connection Error";
    pub const CONNECTION_REFUSED: &str = "Connection Refused";
    pub const DNS_FAILURE: &str = "DNS lookup failure";
    pub const TOO_MANY_REDIRECTS: &str = "Too Many Redirects";
    pub const TLS_HANDSHAKE_FAILURE: &str = "TLS Handshake Failure";
    pub const KEYWORD_FOUND: &str = "Keyword found";
    pub const KEYWORD_NOT_FOUND: &str = "Keyword not found";
}

/// Protocol used to probe a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    Http,
    Ping,
    Tcp,
    Udp,
}

impl MonitorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::Http => "http",
            MonitorKind::Ping => "ping",
            MonitorKind::Tcp => "tcp",
            MonitorKind::Udp => "udp",
        }
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(MonitorKind::Http),
            "ping" => Ok(MonitorKind::Ping),
            "tcp" => Ok(MonitorKind::Tcp),
            "udp" => Ok(MonitorKind::Udp),
            other => Err(Error::config(format!("unknown monitor kind '{}'", other))),
        }
    }
}

/// How a probe run is judged as failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Endpoint unreachable or HTTP status not ok
    #[default]
    Unavailable,
    /// Failure when the body contains the keyword
    ContainsKeyword,
    /// Failure when the body lacks the keyword
    DoesNotContainKeyword,
}

fn default_true() -> bool {
    true
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_num_pings() -> u32 {
    4
}

fn default_periodicity() -> Duration {
    Duration::from_secs(120)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// HTTP request options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpOptions {
    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub auth_user: Option<String>,

    #[serde(default)]
    pub auth_pass: Option<String>,

    #[serde(default = "default_true")]
    pub follow_redirects: bool,

    #[serde(default = "default_true")]
    pub keep_cookies: bool,

    #[serde(default = "default_true")]
    pub verify_tls: bool,

    /// Warn when the certificate expires within this many days (0 disables)
    #[serde(default)]
    pub tls_expiry_threshold_days: u32,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
            auth_user: None,
            auth_pass: None,
            follow_redirects: true,
            keep_cookies: true,
            verify_tls: true,
            tls_expiry_threshold_days: 0,
        }
    }
}

/// Protocol-specific probe target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Target {
    Http(HttpOptions),
    Ping {
        #[serde(default = "default_num_pings")]
        num_pings: u32,
    },
    Tcp {
        port: u16,
        #[serde(default)]
        data: Option<String>,
    },
    Udp {
        port: u16,
        #[serde(default)]
        data: Option<String>,
    },
}

impl Target {
    pub fn kind(&self) -> MonitorKind {
        match self {
            Target::Http(_) => MonitorKind::Http,
            Target::Ping { .. } => MonitorKind::Ping,
            Target::Tcp { .. } => MonitorKind::Tcp,
            Target::Udp { .. } => MonitorKind::Udp,
        }
    }
}

/// A configured probe target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: MonitorId,

    pub owner_id: OwnerId,

    pub name: String,

    /// URL for HTTP monitors, host name or address otherwise
    pub endpoint: String,

    #[serde(flatten)]
    pub target: Target,

    #[serde(default)]
    pub alert_type: AlertType,

    #[serde(default)]
    pub keyword: Option<String>,

    #[serde(with = "humantime_serde", default = "default_periodicity")]
    pub periodicity: Duration,

    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// Reserved, not consulted by the incident tracker
    #[serde(with = "humantime_serde", default)]
    pub recovery_period: Duration,

    /// Reserved, not consulted by the incident tracker
    #[serde(with = "humantime_serde", default)]
    pub confirmation_period: Duration,

    #[serde(default = "default_true")]
    pub send_email: bool,
}

impl Monitor {
    pub fn kind(&self) -> MonitorKind {
        self.target.kind()
    }

    /// Short description of the request, stored on incidents.
    pub fn request_description(&self) -> String {
        match &self.target {
            Target::Http(http) => format!("{} {}", http.method.to_uppercase(), self.endpoint),
            Target::Ping { .. } => format!("ping {}", self.endpoint),
            Target::Tcp { port, .. } | Target::Udp { port, .. } => {
                format!("{} {}:{}", self.kind(), self.endpoint, port)
            }
        }
    }
}

/// Normalized result of one probe execution
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub response_preview: String,
    pub cause: Option<String>,
    pub response_time: Duration,
    pub success: bool,
}

impl Outcome {
    /// Create a successful outcome
    pub fn up(response_time: Duration, response_preview: impl Into<String>) -> Self {
        Self {
            response_preview: response_preview.into(),
            cause: None,
            response_time,
            success: true,
        }
    }

    /// Create a failed outcome
    pub fn down(
        cause: impl Into<String>,
        response_time: Duration,
        response_preview: impl Into<String>,
    ) -> Self {
        Self {
            response_preview: response_preview.into(),
            cause: Some(cause.into()),
            response_time,
            success: false,
        }
    }

    /// Create a failure that never produced a response
    pub fn unreachable(cause: impl Into<String>) -> Self {
        Self::down(cause, Duration::ZERO, String::new())
    }

    /// Create a timeout outcome
    pub fn timeout() -> Self {
        Self::unreachable(causes::TIMEOUT)
    }

    pub fn cause(&self) -> &str {
        self.cause.as_deref().unwrap_or_default()
    }

    pub fn response_time_secs(&self) -> f64 {
        self.response_time.as_secs_f64()
    }
}

/// Handle for an in-flight placeholder result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultHandle {
    pub id: ResultId,
    pub monitor_id: MonitorId,
    pub created_at: DateTime<Utc>,
}

/// One probe execution record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub id: ResultId,
    pub monitor_id: MonitorId,
    pub created_at: DateTime<Utc>,
    pub monitored_at: Option<DateTime<Utc>>,
    /// Response time in seconds
    pub response_time: Option<f64>,
    /// `None` while the probe is in flight
    pub status: Option<bool>,
}

impl ProbeResult {
    pub fn is_completed(&self) -> bool {
        self.status.is_some()
    }

    pub fn handle(&self) -> ResultHandle {
        ResultHandle {
            id: self.id,
            monitor_id: self.monitor_id,
            created_at: self.created_at,
        }
    }
}

/// A continuous failure window for one monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub monitor_id: MonitorId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cause: String,
    pub request: String,
    pub response: String,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Length of a closed incident
    pub fn length(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|ended| ended - self.started_at)
    }
}

/// Fields required to open an incident
#[derive(Debug, Clone, PartialEq)]
pub struct NewIncident {
    pub monitor_id: MonitorId,
    pub started_at: DateTime<Utc>,
    pub cause: String,
    pub request: String,
    pub response: String,
}

/// Incident audit trail entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    ProbeFailure,
    ProbeSuccess,
    AlertSent,
    Acknowledged,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::ProbeFailure => write!(f, "probe-failure"),
            EventType::ProbeSuccess => write!(f, "probe-success"),
            EventType::AlertSent => write!(f, "alert-sent"),
            EventType::Acknowledged => write!(f, "acknowledged"),
        }
    }
}

/// Append-only audit entry tied to an incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub id: EventId,
    pub incident_id: IncidentId,
    pub created_at: DateTime<Utc>,
    pub event_type: EventType,
    pub field: Option<String>,
    pub extra_field: Option<String>,
}

/// Monitor owner, recipient of incident emails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub id: OwnerId,
    pub email: String,
    #[serde(default)]
    pub full_name: String,
}

/// Notification channel destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelKind {
    /// Incoming webhook accepting block messages
    Slack {
        webhook_url: String,
        #[serde(default)]
        channel: Option<String>,
    },
    /// Bot API chat; `chat_id` is set once the activation handshake completes
    Telegram {
        #[serde(default)]
        chat_id: Option<String>,
        #[serde(default)]
        chat_name: Option<String>,
    },
    /// Any channel kind without a sender
    #[serde(other)]
    Unsupported,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Slack { .. } => "slack",
            ChannelKind::Telegram { .. } => "telegram",
            ChannelKind::Unsupported => "unsupported",
        }
    }
}

/// A configured notification channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub owner_id: OwnerId,
    #[serde(flatten)]
    pub kind: ChannelKind,
}
