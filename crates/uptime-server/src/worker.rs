//! Worker pool running monitoring cycles.

use crate::metrics::MetricsRegistry;
use crate::scheduler::InFlight;
use crate::types::Job;
use chrono::Utc;
use common::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};
use uptime::{
    AlertDispatcher, IncidentTracker, Outcome, ProbeSettings, Prober, Storage, Transition,
};

/// One probe, track and dispatch cycle
pub struct CycleRunner {
    prober: Arc<dyn Prober>,
    storage: Arc<dyn Storage>,
    tracker: Arc<IncidentTracker>,
    dispatcher: Arc<AlertDispatcher>,
    metrics: Option<Arc<MetricsRegistry>>,
    settings: ProbeSettings,
    grace: Duration,
}

impl CycleRunner {
    pub fn new(
        prober: Arc<dyn Prober>,
        storage: Arc<dyn Storage>,
        tracker: Arc<IncidentTracker>,
        dispatcher: Arc<AlertDispatcher>,
        metrics: Option<Arc<MetricsRegistry>>,
        settings: ProbeSettings,
        grace: Duration,
    ) -> Self {
        Self {
            prober,
            storage,
            tracker,
            dispatcher,
            metrics,
            settings,
            grace,
        }
    }

    /// Run a cycle, logging and counting any error
    pub async fn run_cycle(&self, job: Job) -> Result<Transition> {
        let monitor_id = job.monitor.id;
        if let Some(ref m) = self.metrics {
            m.cycle_started();
        }

        let result = self.cycle(job).await;

        if let Some(ref m) = self.metrics {
            m.cycle_finished();
        }
        if let Err(ref e) = result {
            match e {
                common::Error::Config(_) => {
                    error!(monitor_id, error = %e, "Monitor configuration error")
                }
                _ => warn!(monitor_id, error = %e, "Monitoring cycle failed"),
            }
            if let Some(ref m) = self.metrics {
                m.record_error(e.kind());
            }
        }
        result
    }

    async fn cycle(&self, job: Job) -> Result<Transition> {
        let Job { monitor, handle } = job;
        let budget = self.settings.effective_timeout(&monitor) + self.grace;

        let monitored_at = Utc::now();
        let outcome = match tokio::time::timeout(budget, self.prober.probe(&monitor)).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                warn!(monitor_id = monitor.id, budget = ?budget, "Probe overran its budget");
                Outcome::timeout()
            }
        };

        let result = self
            .storage
            .update_result(&handle, monitored_at, outcome.response_time_secs(), outcome.success)
            .await?;
        if let Some(ref m) = self.metrics {
            m.record_probe(monitor.kind().as_str(), outcome.success, outcome.response_time);
        }
        debug!(
            monitor_id = monitor.id,
            success = outcome.success,
            cause = outcome.cause(),
            "Probe completed"
        );

        let transition = self.tracker.track(&monitor, &result, &outcome).await?;
        if let Some(incident) = transition.incident() {
            if let Some(ref m) = self.metrics {
                match transition {
                    Transition::Opened(_) => m.record_incident_opened(),
                    _ => m.record_incident_closed(),
                }
            }

            let report = self.dispatcher.dispatch(&monitor, incident).await?;
            if let Some(ref m) = self.metrics {
                for delivery in &report.deliveries {
                    m.record_alert(delivery.channel, delivery.status);
                }
            }
        }

        Ok(transition)
    }
}

/// Runs cycles received from the scheduler with bounded concurrency
pub struct WorkerPool {
    runner: Arc<CycleRunner>,
    in_flight: InFlight,
    workers: usize,
}

impl WorkerPool {
    pub fn new(runner: Arc<CycleRunner>, in_flight: InFlight, workers: usize) -> Self {
        Self {
            runner,
            in_flight,
            workers: workers.max(1),
        }
    }

    /// Consume jobs until the channel closes, then wait for running cycles
    pub async fn run(self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        info!(workers = self.workers, "Worker pool started");
        let semaphore = Arc::new(Semaphore::new(self.workers));

        while let Some(job) = jobs.recv().await {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            let runner = self.runner.clone();
            let in_flight = self.in_flight.clone();
            tokio::spawn(async move {
                let monitor_id = job.monitor.id;
                let _ = runner.run_cycle(job).await;
                in_flight.remove(&monitor_id);
                drop(permit);
            });
        }

        // every permit back means every cycle finished
        if semaphore.acquire_many(self.workers as u32).await.is_ok() {
            info!("Worker pool drained");
        }
    }
}
