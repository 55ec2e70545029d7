//! Prometheus instrumentation for CDP traffic.
//!
//! Collectors live in one process-wide set; [`snapshot`] reads totals back out
//! of them so logs and tests see the same numbers an exporter would.

use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::core::Collector;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use tracing::error;

/// Process-wide totals across every method.
#[derive(Default, Clone, Copy, Debug, PartialEq)]
pub struct AdapterMetricsSnapshot {
    pub commands: u64,
    pub command_failures: u64,
    pub command_latency_seconds: f64,
    pub events: u64,
    pub orphan_replies: u64,
    pub connection_losses: u64,
}

struct CdpMetrics {
    commands: IntCounterVec,
    failures: IntCounterVec,
    latency: HistogramVec,
    events: IntCounter,
    orphans: IntCounter,
    losses: IntCounter,
}

impl CdpMetrics {
    fn new() -> prometheus::Result<Self> {
        Ok(Self {
            commands: IntCounterVec::new(
                opts!("tabwright_cdp_commands_total", "CDP commands written to the transport"),
                &["method"],
            )?,
            failures: IntCounterVec::new(
                opts!("tabwright_cdp_command_failures_total", "CDP commands that ended in an error"),
                &["method"],
            )?,
            latency: HistogramVec::new(
                histogram_opts!(
                    "tabwright_cdp_command_duration_seconds",
                    "Round trip from write to reply",
                    vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]
                ),
                &["method"],
            )?,
            events: IntCounter::new("tabwright_cdp_events_total", "Events routed to the bus")?,
            orphans: IntCounter::new(
                "tabwright_cdp_orphan_replies_total",
                "Replies whose id matched no pending command",
            )?,
            losses: IntCounter::new(
                "tabwright_cdp_connection_losses_total",
                "Transport streams that ended",
            )?,
        })
    }

    fn collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![
            Box::new(self.commands.clone()),
            Box::new(self.failures.clone()),
            Box::new(self.latency.clone()),
            Box::new(self.events.clone()),
            Box::new(self.orphans.clone()),
            Box::new(self.losses.clone()),
        ]
    }
}

lazy_static! {
    static ref METRICS: CdpMetrics = CdpMetrics::new().unwrap();
}

/// Add the CDP collectors to `registry`. Registering twice is harmless.
pub fn register_metrics(registry: &Registry) {
    for collector in METRICS.collectors() {
        match registry.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(err) => error!(?err, "failed to register cdp metric"),
        }
    }
}

pub fn record_command(method: &str) {
    METRICS.commands.with_label_values(&[method]).inc();
}

pub fn record_command_success(method: &str, duration: Duration) {
    METRICS
        .latency
        .with_label_values(&[method])
        .observe(duration.as_secs_f64());
}

pub fn record_command_failure(method: &str) {
    METRICS.failures.with_label_values(&[method]).inc();
}

pub fn record_event() {
    METRICS.events.inc();
}

pub fn record_orphan_reply() {
    METRICS.orphans.inc();
}

pub fn record_connection_lost() {
    METRICS.losses.inc();
}

fn counter_total(counters: &IntCounterVec) -> u64 {
    counters
        .collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .map(|metric| metric.get_counter().get_value() as u64)
        .sum()
}

fn latency_total(histograms: &HistogramVec) -> f64 {
    histograms
        .collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .map(|metric| metric.get_histogram().get_sample_sum())
        .sum()
}

pub fn snapshot() -> AdapterMetricsSnapshot {
    AdapterMetricsSnapshot {
        commands: counter_total(&METRICS.commands),
        command_failures: counter_total(&METRICS.failures),
        command_latency_seconds: latency_total(&METRICS.latency),
        events: METRICS.events.get(),
        orphan_replies: METRICS.orphans.get(),
        connection_losses: METRICS.losses.get(),
    }
}
