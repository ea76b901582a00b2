//! Current up/down status, derived on read.

use crate::storage::Storage;
use crate::types::MonitorId;
use chrono::{DateTime, Utc};
use common::Result;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    /// `None` until the monitor has a completed result
    pub up: Option<bool>,
    pub since: Option<DateTime<Utc>>,
}

/// Compute a monitor's status from its incidents and results
pub async fn monitor_status(storage: &dyn Storage, monitor_id: MonitorId) -> Result<MonitorStatus> {
    let incidents = storage.list_incidents(monitor_id).await?;
    let results = storage.list_results(monitor_id, DateTime::<Utc>::MIN_UTC).await?;

    let up = match (incidents.last(), results.as_slice()) {
        (Some(latest), _) => Some(!latest.is_open()),
        (None, []) => None,
        (None, [only]) => only.status,
        (None, _) => Some(true),
    };

    let since = match (results.first(), incidents.last()) {
        (None, _) => None,
        (Some(first), None) => first.monitored_at,
        (Some(_), Some(latest)) => Some(latest.ended_at.unwrap_or(latest.started_at)),
    };

    Ok(MonitorStatus { up, since })
}
