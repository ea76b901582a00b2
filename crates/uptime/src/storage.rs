//! Storage collaborator used by the monitoring core.
//!
//! The core never talks to a database directly. Everything it needs goes
//! through [`Storage`]; [`MemoryStorage`] is the bundled implementation used
//! by the server and the tests.

use crate::types::{
    Channel, EventType, Incident, IncidentEvent, IncidentId, Monitor, MonitorId, NewIncident,
    Owner, OwnerId, ProbeResult, ResultHandle, ResultId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

/// Storage operations consumed by the scheduler, tracker and dispatcher
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_monitor(&self, id: MonitorId) -> Result<Monitor>;

    /// Monitors eligible for scheduling
    async fn list_monitors(&self) -> Result<Vec<Monitor>>;

    /// Write an in-flight placeholder result (status unknown)
    async fn create_result(
        &self,
        monitor_id: MonitorId,
        created_at: DateTime<Utc>,
    ) -> Result<ResultHandle>;

    /// Complete a placeholder result in place
    async fn update_result(
        &self,
        handle: &ResultHandle,
        monitored_at: DateTime<Utc>,
        response_time: f64,
        status: bool,
    ) -> Result<ProbeResult>;

    /// Most recent result by creation time, in-flight placeholders included
    async fn get_last_result(&self, monitor_id: MonitorId) -> Result<Option<ProbeResult>>;

    /// Results created at or after `since`, ordered by creation time
    async fn list_results(
        &self,
        monitor_id: MonitorId,
        since: DateTime<Utc>,
    ) -> Result<Vec<ProbeResult>>;

    async fn get_open_incident(&self, monitor_id: MonitorId) -> Result<Option<Incident>>;

    async fn create_incident(&self, incident: NewIncident) -> Result<Incident>;

    async fn close_incident(
        &self,
        incident_id: IncidentId,
        ended_at: DateTime<Utc>,
    ) -> Result<Incident>;

    /// Incidents of a monitor ordered by start time
    async fn list_incidents(&self, monitor_id: MonitorId) -> Result<Vec<Incident>>;

    async fn acknowledge_incident(
        &self,
        incident_id: IncidentId,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<Incident>;

    async fn append_incident_event(
        &self,
        incident_id: IncidentId,
        event_type: EventType,
        field: Option<String>,
        extra_field: Option<String>,
    ) -> Result<IncidentEvent>;

    async fn list_incident_events(&self, incident_id: IncidentId) -> Result<Vec<IncidentEvent>>;

    async fn get_owner(&self, owner_id: OwnerId) -> Result<Owner>;

    async fn list_owner_channels(&self, owner_id: OwnerId) -> Result<Vec<Channel>>;

    async fn get_owner_email_preference(&self, monitor: &Monitor) -> Result<bool>;

    /// Delete a monitor with its results, incidents and events
    async fn delete_monitor(&self, id: MonitorId) -> Result<()>;
}

/// Results of one monitor keyed by creation time, then id
type ResultLog = BTreeMap<(DateTime<Utc>, ResultId), ProbeResult>;

#[derive(Default)]
struct Tables {
    owners: BTreeMap<OwnerId, Owner>,
    channels: Vec<Channel>,
    monitors: BTreeMap<MonitorId, Monitor>,
    results: HashMap<MonitorId, ResultLog>,
    incidents: BTreeMap<IncidentId, Incident>,
    /// Incident ids per monitor, in creation order
    monitor_incidents: HashMap<MonitorId, Vec<IncidentId>>,
    /// The open incident of each monitor that has one
    open_incidents: HashMap<MonitorId, IncidentId>,
    events: HashMap<IncidentId, Vec<IncidentEvent>>,
    next_id: u64,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn incident_mut(&mut self, id: IncidentId) -> Result<&mut Incident> {
        self.incidents
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("incident", id))
    }
}

/// In-memory storage
///
/// Refuses to open a second incident for a monitor that already has one
/// open, so the single-open-incident invariant also holds at this level.
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_owner(&self, owner: Owner) {
        self.tables.write().await.owners.insert(owner.id, owner);
    }

    pub async fn insert_channel(&self, channel: Channel) {
        self.tables.write().await.channels.push(channel);
    }

    /// Insert or replace a monitor configuration
    pub async fn upsert_monitor(&self, monitor: Monitor) {
        self.tables.write().await.monitors.insert(monitor.id, monitor);
    }

    /// Number of incidents currently open for a monitor
    pub async fn open_incident_count(&self, monitor_id: MonitorId) -> usize {
        let tables = self.tables.read().await;
        tables
            .monitor_incidents
            .get(&monitor_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.incidents.get(id))
            .filter(|i| i.is_open())
            .count()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_monitor(&self, id: MonitorId) -> Result<Monitor> {
        self.tables
            .read()
            .await
            .monitors
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("monitor", id))
    }

    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        Ok(self.tables.read().await.monitors.values().cloned().collect())
    }

    async fn create_result(
        &self,
        monitor_id: MonitorId,
        created_at: DateTime<Utc>,
    ) -> Result<ResultHandle> {
        let mut tables = self.tables.write().await;
        if !tables.monitors.contains_key(&monitor_id) {
            return Err(Error::not_found("monitor", monitor_id));
        }

        let id = tables.next_id();
        let result = ProbeResult {
            id,
            monitor_id,
            created_at,
            monitored_at: None,
            response_time: None,
            status: None,
        };
        let handle = result.handle();
        tables
            .results
            .entry(monitor_id)
            .or_default()
            .insert((created_at, id), result);
        Ok(handle)
    }

    async fn update_result(
        &self,
        handle: &ResultHandle,
        monitored_at: DateTime<Utc>,
        response_time: f64,
        status: bool,
    ) -> Result<ProbeResult> {
        let mut tables = self.tables.write().await;
        let result = tables
            .results
            .get_mut(&handle.monitor_id)
            .and_then(|log| log.get_mut(&(handle.created_at, handle.id)))
            .ok_or_else(|| Error::not_found("result", handle.id))?;

        result.monitored_at = Some(monitored_at);
        result.response_time = Some(response_time);
        result.status = Some(status);
        Ok(result.clone())
    }

    async fn get_last_result(&self, monitor_id: MonitorId) -> Result<Option<ProbeResult>> {
        let tables = self.tables.read().await;
        Ok(tables
            .results
            .get(&monitor_id)
            .and_then(|log| log.last_key_value())
            .map(|(_, r)| r.clone()))
    }

    async fn list_results(
        &self,
        monitor_id: MonitorId,
        since: DateTime<Utc>,
    ) -> Result<Vec<ProbeResult>> {
        let tables = self.tables.read().await;
        Ok(tables
            .results
            .get(&monitor_id)
            .map(|log| log.range((since, 0)..).map(|(_, r)| r.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_open_incident(&self, monitor_id: MonitorId) -> Result<Option<Incident>> {
        let tables = self.tables.read().await;
        Ok(tables
            .open_incidents
            .get(&monitor_id)
            .and_then(|id| tables.incidents.get(id))
            .cloned())
    }

    async fn create_incident(&self, new: NewIncident) -> Result<Incident> {
        let mut tables = self.tables.write().await;
        if tables.open_incidents.contains_key(&new.monitor_id) {
            return Err(Error::conflict(format!(
                "monitor {} already has an open incident",
                new.monitor_id
            )));
        }

        let id = tables.next_id();
        let incident = Incident {
            id,
            monitor_id: new.monitor_id,
            started_at: new.started_at,
            ended_at: None,
            cause: new.cause,
            request: new.request,
            response: new.response,
            acknowledged_at: None,
            acknowledged_by: None,
        };
        tables.incidents.insert(id, incident.clone());
        tables
            .monitor_incidents
            .entry(new.monitor_id)
            .or_default()
            .push(id);
        tables.open_incidents.insert(new.monitor_id, id);
        debug!(incident_id = id, monitor_id = new.monitor_id, "Incident stored");
        Ok(incident)
    }

    async fn close_incident(
        &self,
        incident_id: IncidentId,
        ended_at: DateTime<Utc>,
    ) -> Result<Incident> {
        let mut tables = self.tables.write().await;
        let incident = tables.incident_mut(incident_id)?;
        incident.ended_at = Some(ended_at);
        let incident = incident.clone();
        if tables.open_incidents.get(&incident.monitor_id) == Some(&incident_id) {
            tables.open_incidents.remove(&incident.monitor_id);
        }
        Ok(incident)
    }

    async fn list_incidents(&self, monitor_id: MonitorId) -> Result<Vec<Incident>> {
        let tables = self.tables.read().await;
        let mut incidents: Vec<Incident> = tables
            .monitor_incidents
            .get(&monitor_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.incidents.get(id))
            .cloned()
            .collect();
        incidents.sort_by_key(|i| (i.started_at, i.id));
        Ok(incidents)
    }

    async fn acknowledge_incident(
        &self,
        incident_id: IncidentId,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<Incident> {
        let mut tables = self.tables.write().await;
        let incident = tables.incident_mut(incident_id)?;
        incident.acknowledged_at = Some(at);
        incident.acknowledged_by = Some(by.to_string());
        let incident = incident.clone();

        let id = tables.next_id();
        tables.events.entry(incident_id).or_default().push(IncidentEvent {
            id,
            incident_id,
            created_at: at,
            event_type: EventType::Acknowledged,
            field: Some(by.to_string()),
            extra_field: None,
        });
        Ok(incident)
    }

    async fn append_incident_event(
        &self,
        incident_id: IncidentId,
        event_type: EventType,
        field: Option<String>,
        extra_field: Option<String>,
    ) -> Result<IncidentEvent> {
        let mut tables = self.tables.write().await;
        if !tables.incidents.contains_key(&incident_id) {
            return Err(Error::not_found("incident", incident_id));
        }

        let event = IncidentEvent {
            id: tables.next_id(),
            incident_id,
            created_at: Utc::now(),
            event_type,
            field,
            extra_field,
        };
        tables
            .events
            .entry(incident_id)
            .or_default()
            .push(event.clone());
        Ok(event)
    }

    async fn list_incident_events(&self, incident_id: IncidentId) -> Result<Vec<IncidentEvent>> {
        let tables = self.tables.read().await;
        Ok(tables.events.get(&incident_id).cloned().unwrap_or_default())
    }

    async fn get_owner(&self, owner_id: OwnerId) -> Result<Owner> {
        self.tables
            .read()
            .await
            .owners
            .get(&owner_id)
            .cloned()
            .ok_or_else(|| Error::not_found("owner", owner_id))
    }

    async fn list_owner_channels(&self, owner_id: OwnerId) -> Result<Vec<Channel>> {
        let tables = self.tables.read().await;
        Ok(tables
            .channels
            .iter()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn get_owner_email_preference(&self, monitor: &Monitor) -> Result<bool> {
        Ok(monitor.send_email)
    }

    async fn delete_monitor(&self, id: MonitorId) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.monitors.remove(&id).is_none() {
            return Err(Error::not_found("monitor", id));
        }

        tables.results.remove(&id);
        tables.open_incidents.remove(&id);
        let removed = tables.monitor_incidents.remove(&id).unwrap_or_default();
        for incident_id in removed {
            tables.incidents.remove(&incident_id);
            tables.events.remove(&incident_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Target;
    use chrono::TimeZone;
    use std::time::Duration;

    fn monitor(id: MonitorId) -> Monitor {
        Monitor {
            id,
            owner_id: 1,
            name: format!("monitor-{}", id),
            endpoint: "127.0.0.1".to_string(),
            target: Target::Tcp { port: 80, data: None },
            alert_type: Default::default(),
            keyword: None,
            periodicity: Duration::from_secs(60),
            timeout: Duration::from_secs(1),
            recovery_period: Duration::ZERO,
            confirmation_period: Duration::ZERO,
            send_email: true,
        }
    }

    fn new_incident(monitor_id: MonitorId) -> NewIncident {
        NewIncident {
            monitor_id,
            started_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            cause: "Timeout".to_string(),
            request: "tcp 127.0.0.1:80".to_string(),
            response: String::new(),
        }
    }

    #[tokio::test]
    async fn test_placeholder_is_last_result() {
        let storage = MemoryStorage::new();
        storage.upsert_monitor(monitor(1)).await;

        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let handle = storage.create_result(1, at).await.unwrap();

        let last = storage.get_last_result(1).await.unwrap().unwrap();
        assert_eq!(last.id, handle.id);
        assert!(!last.is_completed());

        let updated = storage.update_result(&handle, at, 0.25, true).await.unwrap();
        assert_eq!(updated.status, Some(true));
        assert_eq!(updated.response_time, Some(0.25));
    }

    #[tokio::test]
    async fn test_second_open_incident_is_rejected() {
        let storage = MemoryStorage::new();
        storage.upsert_monitor(monitor(1)).await;

        storage.create_incident(new_incident(1)).await.unwrap();
        let err = storage.create_incident(new_incident(1)).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(storage.open_incident_count(1).await, 1);
    }

    #[tokio::test]
    async fn test_acknowledge_appends_event() {
        let storage = MemoryStorage::new();
        storage.upsert_monitor(monitor(1)).await;
        let incident = storage.create_incident(new_incident(1)).await.unwrap();

        let acked = storage
            .acknowledge_incident(incident.id, "alice@example.com", Utc::now())
            .await
            .unwrap();
        assert!(acked.acknowledged_at.is_some());
        assert!(acked.is_open());

        let events = storage.list_incident_events(incident.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Acknowledged);
    }

    #[tokio::test]
    async fn test_delete_monitor_cascades() {
        let storage = MemoryStorage::new();
        storage.upsert_monitor(monitor(1)).await;
        storage.upsert_monitor(monitor(2)).await;

        storage.create_result(1, Utc::now()).await.unwrap();
        storage.create_result(2, Utc::now()).await.unwrap();
        let incident = storage.create_incident(new_incident(1)).await.unwrap();
        storage
            .append_incident_event(incident.id, EventType::ProbeFailure, None, None)
            .await
            .unwrap();

        storage.delete_monitor(1).await.unwrap();

        assert!(storage.get_monitor(1).await.is_err());
        assert!(storage.get_last_result(1).await.unwrap().is_none());
        assert!(storage.list_incidents(1).await.unwrap().is_empty());
        assert!(storage.list_incident_events(incident.id).await.unwrap().is_empty());
        assert!(storage.get_last_result(2).await.unwrap().is_some());
        assert!(storage.get_open_incident(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_results_are_kept_per_monitor() {
        let storage = MemoryStorage::new();
        storage.upsert_monitor(monitor(1)).await;
        storage.upsert_monitor(monitor(2)).await;

        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for minute in 0..5 {
            let at = t0 + chrono::Duration::minutes(minute);
            storage.create_result(1, at).await.unwrap();
            storage.create_result(2, at + chrono::Duration::seconds(30)).await.unwrap();
        }

        let last = storage.get_last_result(1).await.unwrap().unwrap();
        assert_eq!(last.monitor_id, 1);
        assert_eq!(last.created_at, t0 + chrono::Duration::minutes(4));

        let since = t0 + chrono::Duration::minutes(2);
        let results = storage.list_results(1, since).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.monitor_id == 1 && r.created_at >= since));
        assert!(results.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn test_closed_incident_frees_the_monitor() {
        let storage = MemoryStorage::new();
        storage.upsert_monitor(monitor(1)).await;

        let first = storage.create_incident(new_incident(1)).await.unwrap();
        assert_eq!(storage.get_open_incident(1).await.unwrap().map(|i| i.id), Some(first.id));

        storage.close_incident(first.id, Utc::now()).await.unwrap();
        assert!(storage.get_open_incident(1).await.unwrap().is_none());

        let second = storage.create_incident(new_incident(1)).await.unwrap();
        assert_eq!(storage.get_open_incident(1).await.unwrap().map(|i| i.id), Some(second.id));
        assert_eq!(storage.list_incidents(1).await.unwrap().len(), 2);
        assert_eq!(storage.open_incident_count(1).await, 1);
    }
}
