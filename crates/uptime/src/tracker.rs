//! Incident state tracking.
//!
//! The tracker turns a completed probe result into an incident transition.
//! Transitions for one monitor are serialized through a per-monitor lock so
//! two racing cycles can never both observe "no open incident" and each
//! open one. Different monitors never contend on the same lock.

use crate::storage::Storage;
use crate::types::{EventType, Incident, Monitor, MonitorId, NewIncident, Outcome, ProbeResult};
use common::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What a tracked result did to the monitor's incident state
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// A new incident was opened
    Opened(Incident),
    /// The open incident was closed
    Closed(Incident),
    /// Nothing changed
    Unchanged,
}

impl Transition {
    /// The incident that changed state, if any
    pub fn incident(&self) -> Option<&Incident> {
        match self {
            Transition::Opened(incident) | Transition::Closed(incident) => Some(incident),
            Transition::Unchanged => None,
        }
    }
}

/// Incident state tracker
pub struct IncidentTracker {
    storage: Arc<dyn Storage>,
    worker_id: String,
    locks: DashMap<MonitorId, Arc<Mutex<()>>>,
}

impl IncidentTracker {
    /// Create a tracker recording `worker_id` on the events it appends
    pub fn new(storage: Arc<dyn Storage>, worker_id: impl Into<String>) -> Self {
        Self {
            storage,
            worker_id: worker_id.into(),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, monitor_id: MonitorId) -> Arc<Mutex<()>> {
        self.locks
            .entry(monitor_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Apply a completed probe result to the monitor's incident state
    pub async fn track(
        &self,
        monitor: &Monitor,
        result: &ProbeResult,
        outcome: &Outcome,
    ) -> Result<Transition> {
        let (Some(success), Some(monitored_at)) = (result.status, result.monitored_at) else {
            return Err(Error::other(format!(
                "result {} of monitor {} is still in flight",
                result.id, monitor.id
            )));
        };

        let lock = self.lock_for(monitor.id);
        let _guard = lock.lock().await;

        let open = self.storage.get_open_incident(monitor.id).await?;

        match (success, open) {
            (true, Some(incident)) => {
                let closed = self.storage.close_incident(incident.id, monitored_at).await?;
                self.storage
                    .append_incident_event(
                        closed.id,
                        EventType::ProbeSuccess,
                        Some("true".to_string()),
                        Some(self.worker_id.clone()),
                    )
                    .await?;
                info!(
                    monitor_id = monitor.id,
                    incident_id = closed.id,
                    "Monitor recovered, incident closed"
                );
                Ok(Transition::Closed(closed))
            }
            (true, None) => Ok(Transition::Unchanged),
            (false, Some(incident)) => {
                debug!(
                    monitor_id = monitor.id,
                    incident_id = incident.id,
                    cause = outcome.cause(),
                    "Failure already tracked"
                );
                Ok(Transition::Unchanged)
            }
            (false, None) => {
                let new = NewIncident {
                    monitor_id: monitor.id,
                    started_at: monitored_at,
                    cause: outcome.cause().to_string(),
                    request: monitor.request_description(),
                    response: outcome.response_preview.clone(),
                };
                let opened = match self.storage.create_incident(new).await {
                    Ok(incident) => incident,
                    Err(Error::Conflict(reason)) => {
                        warn!(monitor_id = monitor.id, %reason, "Incident opened elsewhere");
                        return Ok(Transition::Unchanged);
                    }
                    Err(e) => return Err(e),
                };
                self.storage
                    .append_incident_event(
                        opened.id,
                        EventType::ProbeFailure,
                        Some(opened.cause.clone()),
                        Some(self.worker_id.clone()),
                    )
                    .await?;
                info!(
                    monitor_id = monitor.id,
                    incident_id = opened.id,
                    cause = %opened.cause,
                    "Monitor down, incident opened"
                );
                Ok(Transition::Opened(opened))
            }
        }
    }
}
