//! Prometheus metrics for the server registry.

use crate::reconciler::Transition;
use crate::types::StatusCounts;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Labels for probe attempt metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProbeLabels {
    /// Result (hit, timeout, refused, malformed)
    pub result: String,
}

/// Labels for state transition metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransitionLabels {
    /// From state (unknown, online, offline)
    pub from: String,
    /// To state (unknown, online, offline)
    pub to: String,
}

/// Labels for discovery cycle metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CycleLabels {
    /// Result (success, failure)
    pub result: String,
}

/// Labels for periodic job metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct JobLabels {
    /// Job name (discovery, reaper)
    pub job: String,
}

/// Labels for status-based metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StatusLabels {
    /// Status (online, offline)
    pub status: String,
}

/// Labels for error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Error type (directory_unavailable, reconcile_store, ...)
    pub error_type: String,
}

/// Metrics registry with all registry pipeline metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    // Probe metrics
    /// Probe attempts by result
    probes_total: Family<ProbeLabels, Counter>,
    /// Probe attempt duration
    probe_duration_seconds: Histogram,
    /// Tasks handed to the queue
    tasks_dispatched_total: Counter,

    // State metrics
    /// State transitions
    state_transitions_total: Family<TransitionLabels, Counter>,
    /// Records by status
    records_by_status: Family<StatusLabels, Gauge>,
    /// Records deleted by the reaper
    records_reaped_total: Counter,

    // Discovery metrics
    /// Discovery cycles by result
    discovery_cycles_total: Family<CycleLabels, Counter>,
    /// Addresses returned by the last successful discovery
    discovered_addresses: Gauge,
    /// Unix time of the last successful discovery
    last_discovery_timestamp_seconds: Gauge,
    /// Ticks skipped because the previous run was still going
    ticks_skipped_total: Family<JobLabels, Counter>,

    // Resource metrics
    /// Tasks pending in the queue
    queue_pending: Gauge,
    /// Errors by type
    errors_total: Family<ErrorLabels, Counter>,
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let probes_total = Family::<ProbeLabels, Counter>::default();
        registry.register(
            "registry_probes",
            "Total probe attempts by result",
            probes_total.clone(),
        );

        // Exponential buckets from 5ms to ~10s
        let probe_duration_seconds = Histogram::new(exponential_buckets(0.005, 2.0, 12));
        registry.register(
            "registry_probe_duration_seconds",
            "Probe attempt duration in seconds",
            probe_duration_seconds.clone(),
        );

        let tasks_dispatched_total = Counter::default();
        registry.register(
            "registry_tasks_dispatched",
            "Total probe tasks enqueued by the dispatcher",
            tasks_dispatched_total.clone(),
        );

        let state_transitions_total = Family::<TransitionLabels, Counter>::default();
        registry.register(
            "registry_state_transitions",
            "Total server status transitions",
            state_transitions_total.clone(),
        );

        let records_by_status = Family::<StatusLabels, Gauge>::default();
        registry.register(
            "registry_records_by_status",
            "Stored server records by status",
            records_by_status.clone(),
        );

        let records_reaped_total = Counter::default();
        registry.register(
            "registry_records_reaped",
            "Total offline records deleted by the reaper",
            records_reaped_total.clone(),
        );

        let discovery_cycles_total = Family::<CycleLabels, Counter>::default();
        registry.register(
            "registry_discovery_cycles",
            "Total discovery cycles by result",
            discovery_cycles_total.clone(),
        );

        let discovered_addresses = Gauge::default();
        registry.register(
            "registry_discovered_addresses",
            "Addresses returned by the last successful discovery",
            discovered_addresses.clone(),
        );

        let last_discovery_timestamp_seconds = Gauge::default();
        registry.register(
            "registry_last_discovery_timestamp_seconds",
            "Unix time of the last successful discovery",
            last_discovery_timestamp_seconds.clone(),
        );

        let ticks_skipped_total = Family::<JobLabels, Counter>::default();
        registry.register(
            "registry_ticks_skipped",
            "Periodic ticks skipped while the previous run was in flight",
            ticks_skipped_total.clone(),
        );

        let queue_pending = Gauge::default();
        registry.register(
            "registry_queue_pending",
            "Probe tasks enqueued and not yet acknowledged",
            queue_pending.clone(),
        );

        let errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "registry_errors",
            "Total errors by type",
            errors_total.clone(),
        );

        Self {
            registry,
            probes_total,
            probe_duration_seconds,
            tasks_dispatched_total,
            state_transitions_total,
            records_by_status,
            records_reaped_total,
            discovery_cycles_total,
            discovered_addresses,
            last_discovery_timestamp_seconds,
            ticks_skipped_total,
            queue_pending,
            errors_total,
        }
    }

    /// Record a probe attempt
    pub fn record_probe(&self, result: &str, duration: Duration) {
        self.probes_total
            .get_or_create(&ProbeLabels {
                result: result.to_string(),
            })
            .inc();
        self.probe_duration_seconds.observe(duration.as_secs_f64());
    }

    /// Record tasks handed to the queue
    pub fn record_dispatched(&self, count: usize) {
        self.tasks_dispatched_total.inc_by(count as u64);
    }

    /// Record a reconciliation if it changed the status
    pub fn record_transition(&self, transition: Transition) {
        let (from, to) = transition.states();
        if from == to {
            return;
        }
        self.state_transitions_total
            .get_or_create(&TransitionLabels {
                from: from.to_string(),
                to: to.to_string(),
            })
            .inc();
    }

    /// Update record counts per status
    pub fn update_records_by_status(&self, counts: StatusCounts) {
        self.records_by_status
            .get_or_create(&StatusLabels {
                status: "online".to_string(),
            })
            .set(counts.online as i64);
        self.records_by_status
            .get_or_create(&StatusLabels {
                status: "offline".to_string(),
            })
            .set(counts.offline as i64);
    }

    /// Record records deleted by one sweep
    pub fn record_reaped(&self, count: u64) {
        self.records_reaped_total.inc_by(count);
    }

    /// Record a successful discovery cycle
    pub fn record_discovery_success(&self, addresses: usize, unix_seconds: i64) {
        self.discovery_cycles_total
            .get_or_create(&CycleLabels {
                result: "success".to_string(),
            })
            .inc();
        self.discovered_addresses.set(addresses as i64);
        self.last_discovery_timestamp_seconds.set(unix_seconds);
    }

    /// Record a failed discovery cycle
    pub fn record_discovery_failure(&self) {
        self.discovery_cycles_total
            .get_or_create(&CycleLabels {
                result: "failure".to_string(),
            })
            .inc();
    }

    /// Record a skipped tick
    pub fn record_tick_skipped(&self, job: &str) {
        self.ticks_skipped_total
            .get_or_create(&JobLabels {
                job: job.to_string(),
            })
            .inc();
    }

    /// Update queue pending gauge
    pub fn update_queue_pending(&self, pending: usize) {
        self.queue_pending.set(pending as i64);
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

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
