//! Tick-driven scheduler.
//!
//! Every tick lists the monitors, writes an in-flight placeholder result for
//! each one that is due and hands the cycle to the worker pool. The tick
//! itself never waits on a probe.

use crate::metrics::MetricsRegistry;
use crate::types::Job;
use chrono::{DateTime, Utc};
use common::Result;
use dashmap::DashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uptime::types::{MonitorId, ProbeResult};
use uptime::{Monitor, Storage};

/// Whether a monitor is due for a new cycle
///
/// `last` is the most recent result by creation time, in-flight placeholders
/// included, so a slow probe pushes the next cycle out by a full period.
pub fn is_due(last: Option<&ProbeResult>, periodicity: Duration, now: DateTime<Utc>) -> bool {
    let Some(last) = last else {
        return true;
    };
    match chrono::Duration::from_std(periodicity) {
        Ok(period) => last.created_at + period <= now,
        Err(_) => false,
    }
}

/// Monitors whose cycle has been handed out but not finished
pub type InFlight = Arc<DashSet<MonitorId>>;

pub struct Scheduler {
    storage: Arc<dyn Storage>,
    jobs: mpsc::UnboundedSender<Job>,
    in_flight: InFlight,
    metrics: Option<Arc<MetricsRegistry>>,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        storage: Arc<dyn Storage>,
        jobs: mpsc::UnboundedSender<Job>,
        in_flight: InFlight,
        metrics: Option<Arc<MetricsRegistry>>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            storage,
            jobs,
            in_flight,
            metrics,
            tick_interval,
        }
    }

    /// Run one scheduling pass and return the number of dispatched cycles
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let monitors = self.storage.list_monitors().await?;
        if let Some(ref m) = self.metrics {
            m.update_monitor_count(monitors.len());
        }

        let mut dispatched = 0;
        for monitor in monitors {
            if self.in_flight.contains(&monitor.id) {
                continue;
            }

            match self.schedule(monitor, now).await {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to schedule monitor");
                    if let Some(ref m) = self.metrics {
                        m.record_error(e.kind());
                    }
                }
            }
        }

        Ok(dispatched)
    }

    async fn schedule(&self, monitor: Monitor, now: DateTime<Utc>) -> Result<bool> {
        let last = self.storage.get_last_result(monitor.id).await?;
        if !is_due(last.as_ref(), monitor.periodicity, now) {
            return Ok(false);
        }

        let monitor_id = monitor.id;
        self.in_flight.insert(monitor_id);
        let handle = match self.storage.create_result(monitor_id, now).await {
            Ok(handle) => handle,
            Err(e) => {
                self.in_flight.remove(&monitor_id);
                return Err(e);
            }
        };

        debug!(monitor_id, result_id = handle.id, "Dispatching monitoring cycle");
        if self.jobs.send(Job { monitor, handle }).is_err() {
            self.in_flight.remove(&monitor_id);
            return Err(common::Error::other("worker pool is gone"));
        }

        if let Some(ref m) = self.metrics {
            m.record_cycle_dispatched();
        }
        Ok(true)
    }

    /// Tick until shutdown is signalled
    ///
    /// Dropping the scheduler on return closes the job channel, which lets
    /// the worker pool drain.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_interval = ?self.tick_interval, "Scheduler started");

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    match self.tick(Utc::now()).await {
                        Ok(dispatched) if dispatched > 0 => {
                            debug!(dispatched, "Scheduler tick complete");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "Scheduler tick failed");
                            if let Some(ref m) = self.metrics {
                                m.record_error(e.kind());
                            }
                        }
                    }
                    if let Some(ref m) = self.metrics {
                        m.record_tick_duration(start.elapsed());
                    }
                }
                _ = shutdown.changed() => {
                    info!("Scheduler stopping");
                    break;
                }
            }
        }
    }
}
