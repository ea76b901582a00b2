//! Probe executors.
//!
//! A probe performs one check against one monitor and folds every transport
//! failure (timeouts, refused connections, DNS failures, redirect loops, TLS
//! problems) into a failed [`Outcome`]. Only configuration problems and
//! local setup failures surface as [`ProbeError`].

mod http;
mod ping;
mod socket;
mod tls;

use crate::types::{AlertType, Monitor, MonitorId, Outcome, Target, causes};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub use tls::days_remaining;

/// Errors that prevent a probe from running at all
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("monitor {monitor_id}: alert type {alert_type:?} requires a keyword")]
    MissingKeyword {
        monitor_id: MonitorId,
        alert_type: AlertType,
    },

    #[error("monitor {monitor_id}: {reason}")]
    InvalidConfig { monitor_id: MonitorId, reason: String },

    #[error("probe setup failed: {0}")]
    Setup(String),
}

impl ProbeError {
    pub(crate) fn invalid(monitor_id: MonitorId, reason: impl Into<String>) -> Self {
        ProbeError::InvalidConfig {
            monitor_id,
            reason: reason.into(),
        }
    }

    /// Whether this error points at bad monitor data rather than the host
    pub fn is_config(&self) -> bool {
        !matches!(self, ProbeError::Setup(_))
    }
}

impl From<ProbeError> for common::Error {
    fn from(err: ProbeError) -> Self {
        if err.is_config() {
            common::Error::config(err)
        } else {
            common::Error::probe(err)
        }
    }
}

/// Probe executor trait
#[async_trait]
pub trait Prober: Send + Sync {
    /// Run one check against the monitor
    async fn probe(&self, monitor: &Monitor) -> Result<Outcome, ProbeError>;
}

/// Settings shared by every network probe
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// User agent sent by HTTP probes unless the monitor overrides it
    pub user_agent: String,
    /// Upper bound applied to every monitor timeout
    pub max_timeout: Duration,
    /// Maximum size of the stored response preview in bytes
    pub preview_limit: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            user_agent: "Monitstatus".to_string(),
            max_timeout: Duration::from_secs(60),
            preview_limit: 4096,
        }
    }
}

impl ProbeSettings {
    /// Timeout that applies to a monitor
    pub fn effective_timeout(&self, monitor: &Monitor) -> Duration {
        monitor.timeout.min(self.max_timeout)
    }
}

/// Prober performing real network checks
pub struct NetworkProber {
    settings: ProbeSettings,
}

impl NetworkProber {
    pub fn new(settings: ProbeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }
}

#[async_trait]
impl Prober for NetworkProber {
    async fn probe(&self, monitor: &Monitor) -> Result<Outcome, ProbeError> {
        let timeout = self.settings.effective_timeout(monitor);
        let keyword = required_keyword(monitor)?;

        debug!(
            monitor_id = monitor.id,
            kind = %monitor.kind(),
            endpoint = %monitor.endpoint,
            timeout_ms = timeout.as_millis() as u64,
            "Probing monitor"
        );

        let mut outcome = match &monitor.target {
            Target::Http(options) => {
                http::probe(monitor, options, keyword, &self.settings, timeout).await?
            }
            Target::Ping { num_pings } => ping::probe(&monitor.endpoint, *num_pings, timeout).await?,
            Target::Tcp { port, data } => {
                let check = BodyCheck::for_socket(monitor.alert_type, keyword);
                socket::probe_tcp(&monitor.endpoint, *port, data.as_deref(), check, timeout).await
            }
            Target::Udp { port, data } => {
                let check = BodyCheck::for_socket(monitor.alert_type, keyword);
                socket::probe_udp(&monitor.endpoint, *port, data.as_deref(), check, timeout).await
            }
        };

        truncate_preview(&mut outcome.response_preview, self.settings.preview_limit);
        Ok(outcome)
    }
}

/// The keyword a monitor needs for its alert type, if any
fn required_keyword(monitor: &Monitor) -> Result<Option<&str>, ProbeError> {
    match (monitor.alert_type, monitor.kind()) {
        (AlertType::Unavailable, _) => Ok(None),
        (_, crate::types::MonitorKind::Ping) => Ok(None),
        (alert_type, _) => match monitor.keyword.as_deref() {
            Some(keyword) if !keyword.is_empty() => Ok(Some(keyword)),
            _ => Err(ProbeError::MissingKeyword {
                monitor_id: monitor.id,
                alert_type,
            }),
        },
    }
}

/// Body matching rule applied to a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyCheck<'a> {
    None,
    MustNotContain(&'a str),
    MustContain(&'a str),
}

impl<'a> BodyCheck<'a> {
    pub(crate) fn for_http(alert_type: AlertType, keyword: Option<&'a str>) -> Self {
        match (alert_type, keyword) {
            (AlertType::ContainsKeyword, Some(k)) => BodyCheck::MustNotContain(k),
            (AlertType::DoesNotContainKeyword, Some(k)) => BodyCheck::MustContain(k),
            _ => BodyCheck::None,
        }
    }

    /// Raw sockets only honour the does-not-contain rule
    pub(crate) fn for_socket(alert_type: AlertType, keyword: Option<&'a str>) -> Self {
        match (alert_type, keyword) {
            (AlertType::DoesNotContainKeyword, Some(k)) => BodyCheck::MustContain(k),
            _ => BodyCheck::None,
        }
    }

    /// Failure cause for the body, if it fails the rule
    pub(crate) fn failure(&self, body: &str) -> Option<&'static str> {
        match self {
            BodyCheck::None => None,
            BodyCheck::MustNotContain(k) if body.contains(k) => Some(causes::KEYWORD_FOUND),
            BodyCheck::MustContain(k) if !body.contains(k) => Some(causes::KEYWORD_NOT_FOUND),
            _ => None,
        }
    }
}

fn truncate_preview(preview: &mut String, limit: usize) {
    if preview.len() <= limit {
        return;
    }
    let mut cut = limit;
    while !preview.is_char_boundary(cut) {
        cut -= 1;
    }
    preview.truncate(cut);
}
