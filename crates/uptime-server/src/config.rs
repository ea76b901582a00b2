//! Configuration loading and validation for the uptime server

use crate::types::ServerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uptime::types::{Channel, Monitor, Owner};
use validator::{Validate, ValidationError, ValidationErrors};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub probe: ProbeSettings,

    #[serde(default)]
    pub alerts: AlertSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    /// Seed data for the in-memory storage
    #[serde(default)]
    pub owners: Vec<Owner>,

    #[serde(default)]
    pub channels: Vec<Channel>,

    #[serde(default)]
    pub monitors: Vec<Monitor>,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.scheduler.validate()?;
        self.probe.validate()?;
        self.alerts.validate()?;
        self.metrics.validate()?;
        self.telemetry.validate()?;
        self.logging.validate()?;
        validate_seed(self)
    }
}

/// Scheduler and worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SchedulerSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_tick_interval")]
    pub tick_interval: Duration,

    #[validate(range(min = 1, max = 10000))]
    pub workers: usize,

    /// Extra time a cycle gets on top of the probe timeout
    #[serde(with = "humantime_serde")]
    pub cycle_grace: Duration,

    /// Identity recorded on probe events
    #[validate(length(min = 1))]
    pub worker_id: String,
}

/// Probe executor settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProbeSettings {
    #[validate(length(min = 1))]
    pub user_agent: String,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_max_timeout")]
    pub max_timeout: Duration,

    #[validate(range(min = 64, max = 1048576))]
    pub preview_limit: usize,
}

/// Email template ids
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSettings {
    pub incident_opened: String,
    pub incident_resolved: String,
}

/// Outbound notification settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AlertSettings {
    #[validate(custom = "validate_base_url")]
    pub front_base_url: String,

    pub sender_address: String,

    /// Falls back to `SENDGRID_API_KEY`
    pub sendgrid_api_key: Option<String>,

    pub templates: TemplateSettings,

    /// Falls back to `TELEGRAM_BOT_TOKEN`
    pub telegram_bot_token: Option<String>,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

/// Metrics and HTTP surface settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,

    #[validate(custom = "validate_listen_addr")]
    pub listen_addr: String,
}

/// OpenTelemetry settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub service_name: String,
    pub otlp_endpoint: String,
    /// `grpc` or `http`
    #[validate(custom = "validate_otlp_protocol")]
    pub protocol: String,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct LoggingSettings {
    pub level: Option<String>,

    #[validate(custom = "validate_log_format")]
    pub format: Option<String>,
}

// Default implementations

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            workers: 64,
            cycle_grace: Duration::from_secs(5),
            worker_id: "local".to_string(),
        }
    }
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

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            front_base_url: "http://localhost:3000".to_string(),
            sender_address: "alerts@localhost".to_string(),
            sendgrid_api_key: None,
            templates: TemplateSettings::default(),
            telegram_bot_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9464".to_string(),
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "uptime-server".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
            protocol: "grpc".to_string(),
        }
    }
}

// Custom validators

fn validate_tick_interval(interval: &Duration) -> Result<(), ValidationError> {
    let millis = interval.as_millis();
    if !(100..=60_000).contains(&millis) {
        return Err(ValidationError::new("tick_interval_out_of_range"));
    }
    Ok(())
}

fn validate_max_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let secs = timeout.as_secs();
    if !(1..=300).contains(&secs) {
        return Err(ValidationError::new("max_timeout_out_of_range"));
    }
    Ok(())
}

fn validate_base_url(url: &str) -> Result<(), ValidationError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ValidationError::new("base_url_invalid_scheme"));
    }
    Ok(())
}

fn validate_listen_addr(addr: &str) -> Result<(), ValidationError> {
    addr.parse::<std::net::SocketAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("listen_addr_invalid"))
}

fn validate_log_format(format: &str) -> Result<(), ValidationError> {
    match format {
        "text" | "json" => Ok(()),
        _ => Err(ValidationError::new("log_format_unknown")),
    }
}

fn validate_otlp_protocol(protocol: &str) -> Result<(), ValidationError> {
    match protocol {
        "grpc" | "http" => Ok(()),
        _ => Err(ValidationError::new("otlp_protocol_unknown")),
    }
}

/// Seed records must have unique ids and monitors must name a known owner
fn validate_seed(config: &Config) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let owners: HashSet<u64> = config.owners.iter().map(|o| o.id).collect();
    if owners.len() != config.owners.len() {
        errors.add("owners", ValidationError::new("duplicate_owner_id"));
    }

    let mut monitor_ids = HashSet::new();
    for monitor in &config.monitors {
        if !monitor_ids.insert(monitor.id) {
            errors.add("monitors", ValidationError::new("duplicate_monitor_id"));
        }
        if !owners.contains(&monitor.owner_id) {
            errors.add("monitors", ValidationError::new("unknown_owner"));
        }
        if monitor.periodicity.is_zero() || monitor.timeout.is_zero() {
            errors.add("monitors", ValidationError::new("zero_duration"));
        }
    }

    for channel in &config.channels {
        if !owners.contains(&channel.owner_id) {
            errors.add("channels", ValidationError::new("unknown_owner"));
        }
    }

    if errors.errors().is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// Configuration loading implementation

impl Config {
    /// Load configuration from an explicit path, or the default search paths
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            tracing::info!("Loading configuration from: {}", path.display());
            return Self::load_from_file(path);
        }

        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/uptime/uptime-server.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./uptime-server.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.exists() && p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/uptime/uptime-server.yaml"))
    }

    /// Convert to the runtime settings used by the server
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            tick_interval: self.scheduler.tick_interval,
            workers: self.scheduler.workers,
            cycle_grace: self.scheduler.cycle_grace,
            worker_id: self.scheduler.worker_id.clone(),
            probe: uptime::ProbeSettings {
                user_agent: self.probe.user_agent.clone(),
                max_timeout: self.probe.max_timeout,
                preview_limit: self.probe.preview_limit,
            },
            front_base_url: self.alerts.front_base_url.clone(),
            sender_address: self.alerts.sender_address.clone(),
            sendgrid_api_key: self
                .alerts
                .sendgrid_api_key
                .clone()
                .or_else(|| std::env::var("SENDGRID_API_KEY").ok()),
            opened_template: self.alerts.templates.incident_opened.clone(),
            resolved_template: self.alerts.templates.incident_resolved.clone(),
            telegram_bot_token: self
                .alerts
                .telegram_bot_token
                .clone()
                .or_else(|| std::env::var("TELEGRAM_BOT_TOKEN").ok()),
            alert_request_timeout: self.alerts.request_timeout,
            metrics_enabled: self.metrics.enabled,
            listen_addr: self.metrics.listen_addr.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uptime::types::{ChannelKind, Target};

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_valid_yaml_parsing() {
        let yaml = r##"
scheduler:
  tick_interval: 500ms
  workers: 16
  worker_id: eu-west-1

probe:
  user_agent: "Monitstatus/2.0"
  max_timeout: 45s

alerts:
  front_base_url: "https://status.example.com"
  templates:
    incident_opened: d-open
    incident_resolved: d-resolved

metrics:
  listen_addr: "0.0.0.0:9464"

owners:
  - id: 1
    email: ops@example.com
    full_name: Ops

channels:
  - id: 1
    owner_id: 1
    kind: slack
    webhook_url: "https://hooks.slack.com/services/T0/B0/X"
    channel: "#alerts"
  - id: 2
    owner_id: 1
    kind: telegram

monitors:
  - id: 1
    owner_id: 1
    name: website
    kind: http
    endpoint: "https://example.com"
    method: HEAD
    periodicity: 1m
    timeout: 10s
  - id: 2
    owner_id: 1
    name: redis
    kind: tcp
    endpoint: 10.0.0.5
    port: 6379
    data: "PING\r\n"
    alert_type: does_not_contain_keyword
    keyword: PONG
"##;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.scheduler.tick_interval, Duration::from_millis(500));
        assert_eq!(config.scheduler.workers, 16);
        assert_eq!(config.probe.max_timeout, Duration::from_secs(45));
        assert_eq!(config.alerts.templates.incident_opened, "d-open");

        assert_eq!(config.monitors.len(), 2);
        match &config.monitors[0].target {
            Target::Http(options) => {
                assert_eq!(options.method, "HEAD");
                assert!(options.follow_redirects);
            }
            other => panic!("expected an http target, got {:?}", other),
        }
        assert_eq!(config.monitors[0].periodicity, Duration::from_secs(60));
        assert_eq!(
            config.monitors[1].target,
            Target::Tcp {
                port: 6379,
                data: Some("PING\r\n".to_string())
            }
        );
        assert_eq!(config.monitors[1].timeout, Duration::from_secs(30));

        assert!(matches!(config.channels[0].kind, ChannelKind::Slack { .. }));
        assert_eq!(
            config.channels[1].kind,
            ChannelKind::Telegram {
                chat_id: None,
                chat_name: None
            }
        );
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
scheduler:
  workers: 8
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.scheduler.tick_interval, Duration::from_secs(1));
        assert_eq!(config.scheduler.worker_id, "local");
        assert_eq!(config.probe.user_agent, "Monitstatus");
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_unknown_monitor_kind_is_rejected() {
        let yaml = r#"
owners:
  - id: 1
    email: ops@example.com
monitors:
  - id: 1
    owner_id: 1
    name: mail
    kind: smtp
    endpoint: mail.example.com
"#;

        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_unknown_channel_kind_is_kept_as_unsupported() {
        let yaml = r#"
owners:
  - id: 1
    email: ops@example.com
channels:
  - id: 4
    owner_id: 1
    kind: discord
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.channels[0].kind, ChannelKind::Unsupported);
    }

    #[test]
    fn test_invalid_tick_interval() {
        let yaml = r#"
scheduler:
  tick_interval: 10ms  # Invalid: < 100ms
"#;
        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::ValidationError(_))));

        let yaml = r#"
scheduler:
  tick_interval: 2m  # Invalid: > 60s
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_worker_count() {
        let yaml = r#"
scheduler:
  workers: 0
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_max_timeout() {
        let yaml = r#"
probe:
  max_timeout: 10m
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_listen_addr_and_log_format() {
        let yaml = r#"
metrics:
  listen_addr: "not-an-address"
"#;
        assert!(Config::from_yaml(yaml).is_err());

        let yaml = r#"
logging:
  format: xml
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_otlp_protocol_is_rejected() {
        let yaml = r#"
telemetry:
  protocol: htpp
"#;
        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::ValidationError(_))));

        let yaml = r#"
telemetry:
  enabled: true
  protocol: http
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.telemetry.protocol, "http");
    }

    #[test]
    fn test_monitor_with_unknown_owner_is_rejected() {
        let yaml = r#"
monitors:
  - id: 1
    owner_id: 9
    name: api
    kind: ping
    endpoint: 10.0.0.1
"#;
        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_explicit_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/uptime.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_config_to_server_config_conversion() {
        let mut config = Config::default();
        config.alerts.sendgrid_api_key = Some("SG.key".to_string());
        let server_config = config.to_server_config();

        assert_eq!(server_config.tick_interval, Duration::from_secs(1));
        assert_eq!(server_config.workers, 64);
        assert_eq!(server_config.probe.max_timeout, Duration::from_secs(60));
        assert_eq!(server_config.sendgrid_api_key.as_deref(), Some("SG.key"));
        assert_eq!(server_config.listen_addr, "127.0.0.1:9464");
    }
}
