//! Runtime types shared by the scheduler, workers and HTTP surface.

use std::time::Duration;
use uptime::types::Monitor;
use uptime::types::ResultHandle;
use uptime::ProbeSettings;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interval between scheduler passes
    pub tick_interval: Duration,

    /// Maximum number of concurrent monitoring cycles
    pub workers: usize,

    /// Extra time a cycle gets on top of the probe timeout
    pub cycle_grace: Duration,

    /// Identity recorded on probe events
    pub worker_id: String,

    /// Probe executor settings
    pub probe: ProbeSettings,

    /// Base URL used for incident and acknowledge links
    pub front_base_url: String,

    /// From address of incident emails
    pub sender_address: String,

    pub sendgrid_api_key: Option<String>,

    pub opened_template: String,

    pub resolved_template: String,

    pub telegram_bot_token: Option<String>,

    /// Timeout applied to every outbound notification request
    pub alert_request_timeout: Duration,

    /// Whether `/metrics` is served
    pub metrics_enabled: bool,

    /// Listen address of the HTTP surface
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            workers: 64,
            cycle_grace: Duration::from_secs(5),
            worker_id: "local".to_string(),
            probe: ProbeSettings::default(),
            front_base_url: "http://localhost:3000".to_string(),
            sender_address: "alerts@localhost".to_string(),
            sendgrid_api_key: None,
            opened_template: String::new(),
            resolved_template: String::new(),
            telegram_bot_token: None,
            alert_request_timeout: Duration::from_secs(30),
            metrics_enabled: true,
            listen_addr: "127.0.0.1:9464".to_string(),
        }
    }
}

/// One monitoring cycle handed from the scheduler to the worker pool
#[derive(Debug, Clone)]
pub struct Job {
    pub monitor: Monitor,
    /// Placeholder result written when the cycle was scheduled
    pub handle: ResultHandle,
}
