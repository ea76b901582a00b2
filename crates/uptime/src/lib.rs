//! Uptime monitoring core.
//!
//! This crate probes external endpoints and keeps a per-monitor incident
//! lifecycle on top of a pluggable [`Storage`]:
//! - HTTP/HTTPS probes with keyword matching and TLS expiry warnings
//! - ICMP ping probes
//! - Raw TCP and UDP probes
//!
//! # Features
//!
//! - Async probes, every network call bounded by the monitor timeout
//! - At most one open incident per monitor, even under concurrent cycles
//! - Email, Slack and Telegram fan-out behind mockable sender traits
//! - Time-bucketed availability reports
//!
//! # Example
//!
//! ```no_run
//! use uptime::{IncidentTracker, MemoryStorage, NetworkProber, ProbeSettings, Prober, Storage};
//! use std::sync::Arc;
//!
//! # async fn example(monitor: uptime::Monitor) -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(MemoryStorage::new());
//! storage.upsert_monitor(monitor.clone()).await;
//!
//! let prober = NetworkProber::new(ProbeSettings::default());
//! let tracker = IncidentTracker::new(storage.clone(), "worker-1");
//!
//! let handle = storage.create_result(monitor.id, chrono::Utc::now()).await?;
//! let outcome = prober.probe(&monitor).await?;
//! let result = storage
//!     .update_result(&handle, chrono::Utc::now(), outcome.response_time_secs(), outcome.success)
//!     .await?;
//! let transition = tracker.track(&monitor, &result, &outcome).await?;
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod availability;
pub mod probes;
pub mod status;
pub mod storage;
pub mod tracker;
pub mod types;

pub use alerts::{
    AlertDispatcher, BotSender, DeliveryStatus, DispatchReport, EmailSender, EmailTemplate,
    IncidentEmail, SenderError, WebhookSender,
};
pub use availability::{Availability, calculate_status_intervals};
pub use probes::{NetworkProber, ProbeError, ProbeSettings, Prober};
pub use status::{MonitorStatus, monitor_status};
pub use storage::{MemoryStorage, Storage};
pub use tracker::{IncidentTracker, Transition};
pub use types::{
    Channel, ChannelKind, Incident, IncidentEvent, Monitor, MonitorKind, Outcome, ProbeResult,
    Target,
};
