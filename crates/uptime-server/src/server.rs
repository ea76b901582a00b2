//! Main uptime server implementation.

use crate::config::Config;
use crate::http_server::HttpServer;
use crate::metrics::MetricsRegistry;
use crate::scheduler::{InFlight, Scheduler};
use crate::senders::{SendGridSender, SlackWebhookSender, TelegramBotSender, http_client};
use crate::types::{Job, ServerConfig};
use crate::worker::{CycleRunner, WorkerPool};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uptime::{AlertDispatcher, IncidentTracker, MemoryStorage, NetworkProber, Storage};

/// Uptime server
pub struct UptimeServer {
    config: ServerConfig,
    storage: Arc<MemoryStorage>,
}

impl UptimeServer {
    /// Create a server over an existing storage
    pub fn new(config: ServerConfig, storage: Arc<MemoryStorage>) -> Self {
        Self { config, storage }
    }

    /// Create a server whose storage is seeded from the configuration
    pub async fn from_config(config: &Config) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        for owner in &config.owners {
            storage.insert_owner(owner.clone()).await;
        }
        for channel in &config.channels {
            storage.insert_channel(channel.clone()).await;
        }
        for monitor in &config.monitors {
            storage.upsert_monitor(monitor.clone()).await;
        }
        info!(
            owners = config.owners.len(),
            channels = config.channels.len(),
            monitors = config.monitors.len(),
            "Storage seeded"
        );

        Self::new(config.to_server_config(), storage)
    }

    pub fn storage(&self) -> Arc<MemoryStorage> {
        self.storage.clone()
    }

    /// Run the server until Ctrl-C
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("Ctrl-C received, shutting down");
        })
        .await
    }

    /// Run the server until `shutdown` completes
    ///
    /// The tick loop stops first; cycles already handed to the pool finish
    /// before this returns.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        info!("Starting uptime server");

        let storage: Arc<dyn Storage> = self.storage.clone();
        let metrics = if self.config.metrics_enabled {
            info!("Metrics enabled on {}", self.config.listen_addr);
            Some(Arc::new(MetricsRegistry::new()))
        } else {
            info!("Metrics disabled");
            None
        };

        let client = http_client(self.config.alert_request_timeout)?;
        let email = Arc::new(SendGridSender::new(
            client.clone(),
            self.config.sendgrid_api_key.clone(),
            self.config.sender_address.clone(),
            self.config.opened_template.clone(),
            self.config.resolved_template.clone(),
        ));
        let webhook = Arc::new(SlackWebhookSender::new(client.clone()));
        let bot = Arc::new(TelegramBotSender::new(
            client,
            self.config.telegram_bot_token.clone(),
        ));

        let tracker = Arc::new(IncidentTracker::new(
            storage.clone(),
            self.config.worker_id.clone(),
        ));
        let dispatcher = Arc::new(AlertDispatcher::new(
            storage.clone(),
            email,
            webhook,
            bot,
            self.config.front_base_url.clone(),
        ));
        let runner = Arc::new(CycleRunner::new(
            Arc::new(NetworkProber::new(self.config.probe.clone())),
            storage.clone(),
            tracker,
            dispatcher,
            metrics.clone(),
            self.config.probe.clone(),
            self.config.cycle_grace,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel::<Job>();
        let in_flight: InFlight = Default::default();

        let scheduler = Scheduler::new(
            storage.clone(),
            jobs_tx,
            in_flight.clone(),
            metrics.clone(),
            self.config.tick_interval,
        );
        let pool = WorkerPool::new(runner, in_flight, self.config.workers);
        let http = HttpServer::new(storage, metrics, self.config.listen_addr.clone());

        let pool_handle = tokio::spawn(pool.run(jobs_rx));
        let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx.clone()));
        let mut http_handle = tokio::spawn(http.run(shutdown_rx));

        info!("All tasks spawned, server running");

        let mut http_done = false;
        tokio::select! {
            _ = shutdown => {}
            result = &mut http_handle => {
                http_done = true;
                match result {
                    Ok(Ok(())) => info!("HTTP server completed"),
                    Ok(Err(e)) => warn!(error = %e, "HTTP server error"),
                    Err(e) => warn!(error = %e, "HTTP server task failed"),
                }
            }
        }

        let _ = shutdown_tx.send(true);
        if let Err(e) = scheduler_handle.await {
            warn!(error = %e, "Scheduler task failed");
        }
        if let Err(e) = pool_handle.await {
            warn!(error = %e, "Worker pool task failed");
        }
        if !http_done {
            match http_handle.await {
                Ok(Err(e)) => warn!(error = %e, "HTTP server error"),
                Err(e) => warn!(error = %e, "HTTP server task failed"),
                Ok(Ok(())) => {}
            }
        }

        info!("Uptime server stopped");
        Ok(())
    }
}
