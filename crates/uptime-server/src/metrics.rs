//! Prometheus metrics for the uptime server.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::time::Duration;
use uptime::DeliveryStatus;

/// Labels for probe result metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProbeLabels {
    /// Monitor kind (http, ping, tcp, udp)
    pub kind: String,
    /// Result (up, down)
    pub result: String,
}

/// Labels for per-kind metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    pub kind: String,
}

/// Labels for alert delivery metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AlertLabels {
    /// Channel (email, slack, telegram)
    pub channel: String,
    /// Result (sent, failed, skipped)
    pub result: String,
}

/// Labels for error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Error type (storage, config, probe, etc.)
    pub error_type: String,
}

/// Metrics registry with all uptime server metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    probes_total: Family<ProbeLabels, Counter>,
    probe_response_time_seconds: Family<KindLabels, Histogram>,
    incidents_opened_total: Counter,
    incidents_closed_total: Counter,
    alerts_total: Family<AlertLabels, Counter>,
    cycles_dispatched_total: Counter,
    cycles_in_flight: Gauge,
    monitors_active: Gauge,
    tick_duration_seconds: Histogram,
    errors_total: Family<ErrorLabels, Counter>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // Counters are exported with a `_total` suffix

        let probes_total = Family::<ProbeLabels, Counter>::default();
        registry.register(
            "uptime_probes",
            "Total probes executed",
            probes_total.clone(),
        );

        let probe_response_time_seconds =
            Family::<KindLabels, Histogram>::new_with_constructor(|| {
                // 1ms to ~32s
                Histogram::new(exponential_buckets(0.001, 2.0, 16))
            });
        registry.register(
            "uptime_probe_response_time_seconds",
            "Probe response time in seconds",
            probe_response_time_seconds.clone(),
        );

        let incidents_opened_total = Counter::default();
        registry.register(
            "uptime_incidents_opened",
            "Total incidents opened",
            incidents_opened_total.clone(),
        );

        let incidents_closed_total = Counter::default();
        registry.register(
            "uptime_incidents_closed",
            "Total incidents closed",
            incidents_closed_total.clone(),
        );

        let alerts_total = Family::<AlertLabels, Counter>::default();
        registry.register(
            "uptime_alerts",
            "Alert deliveries by channel and result",
            alerts_total.clone(),
        );

        let cycles_dispatched_total = Counter::default();
        registry.register(
            "uptime_cycles_dispatched",
            "Total monitoring cycles handed to the worker pool",
            cycles_dispatched_total.clone(),
        );

        let cycles_in_flight = Gauge::default();
        registry.register(
            "uptime_cycles_in_flight",
            "Monitoring cycles currently running",
            cycles_in_flight.clone(),
        );

        let monitors_active = Gauge::default();
        registry.register(
            "uptime_monitors_active",
            "Number of scheduled monitors",
            monitors_active.clone(),
        );

        let tick_duration_seconds = Histogram::new(exponential_buckets(0.0001, 2.0, 14));
        registry.register(
            "uptime_tick_duration_seconds",
            "Scheduler tick duration",
            tick_duration_seconds.clone(),
        );

        let errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "uptime_errors",
            "Total errors by type",
            errors_total.clone(),
        );

        Self {
            registry,
            probes_total,
            probe_response_time_seconds,
            incidents_opened_total,
            incidents_closed_total,
            alerts_total,
            cycles_dispatched_total,
            cycles_in_flight,
            monitors_active,
            tick_duration_seconds,
            errors_total,
        }
    }

    /// Record a completed probe
    pub fn record_probe(&self, kind: &str, success: bool, response_time: Duration) {
        self.probes_total
            .get_or_create(&ProbeLabels {
                kind: kind.to_string(),
                result: if success { "up" } else { "down" }.to_string(),
            })
            .inc();

        self.probe_response_time_seconds
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .observe(response_time.as_secs_f64());
    }

    pub fn record_incident_opened(&self) {
        self.incidents_opened_total.inc();
    }

    pub fn record_incident_closed(&self) {
        self.incidents_closed_total.inc();
    }

    /// Record one alert delivery attempt
    pub fn record_alert(&self, channel: &str, status: DeliveryStatus) {
        self.alerts_total
            .get_or_create(&AlertLabels {
                channel: channel.to_string(),
                result: status.as_str().to_string(),
            })
            .inc();
    }

    pub fn record_cycle_dispatched(&self) {
        self.cycles_dispatched_total.inc();
    }

    pub fn cycle_started(&self) {
        self.cycles_in_flight.inc();
    }

    pub fn cycle_finished(&self) {
        self.cycles_in_flight.dec();
    }

    /// Update active monitor count
    pub fn update_monitor_count(&self, count: usize) {
        self.monitors_active.set(count as i64);
    }

    pub fn record_tick_duration(&self, duration: Duration) {
        self.tick_duration_seconds.observe(duration.as_secs_f64());
    }

    /// Record error by type
    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .get_or_create(&ErrorLabels {
                error_type: error_type.to_string(),
            })
            .inc();
    }
}
