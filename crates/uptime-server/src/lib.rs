//! Uptime monitoring daemon.
//!
//! Drives the `uptime` core: a tick-based scheduler hands due monitors to a
//! bounded worker pool, every cycle probes the endpoint, updates the incident
//! state and fans alerts out through the HTTP notification senders.
//!
//! # Components
//!
//! - **Scheduler**: decides which monitors are due and writes placeholders
//! - **Worker pool**: runs probe, track and dispatch cycles concurrently
//! - **Senders**: SendGrid, Slack webhook and Telegram Bot API clients
//! - **HTTP server**: Prometheus metrics and availability reports

pub mod config;
pub mod http_server;
pub mod metrics;
pub mod scheduler;
pub mod senders;
pub mod server;
pub mod telemetry;
pub mod types;
pub mod worker;

pub use config::{Config, ConfigError};
pub use http_server::HttpServer;
pub use metrics::MetricsRegistry;
pub use scheduler::{Scheduler, is_due};
pub use server::UptimeServer;
pub use telemetry::{TelemetryGuard, init_telemetry, setup_tracing};
pub use types::{Job, ServerConfig};
pub use worker::{CycleRunner, WorkerPool};
