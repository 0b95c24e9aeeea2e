//! Metrics are injected, not globally referenced, so the coordination core
//! stays testable in isolation. Built on the `prometheus` crate: every
//! request observes an HTTP-duration histogram, every lease transition and
//! every gossip callback increments a labeled counter.

use prometheus::{HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Instant;

pub struct Metrics {
    registry: Registry,
    http_duration: HistogramVec,
    lease_transitions: IntCounterVec,
    gossip_callbacks: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "ingestd_http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "path", "status"],
        )
        .expect("static histogram config is valid");

        let lease_transitions = IntCounterVec::new(
            Opts::new(
                "ingestd_lease_transitions_total",
                "Lease state transitions, by new state and cause",
            ),
            &["state", "cause"],
        )
        .expect("static counter config is valid");

        let gossip_callbacks = IntCounterVec::new(
            Opts::new(
                "ingestd_gossip_callbacks_total",
                "Gossip delegate callback invocations, by callback name",
            ),
            &["callback"],
        )
        .expect("static counter config is valid");

        registry
            .register(Box::new(http_duration.clone()))
            .expect("metric registered exactly once");
        registry
            .register(Box::new(lease_transitions.clone()))
            .expect("metric registered exactly once");
        registry
            .register(Box::new(gossip_callbacks.clone()))
            .expect("metric registered exactly once");

        Self {
            registry,
            http_duration,
            lease_transitions,
            gossip_callbacks,
        }
    }

    pub fn lease_transition(&self, state: &str, cause: &str) {
        self.lease_transitions.with_label_values(&[state, cause]).inc();
    }

    pub fn gossip_callback(&self, callback: &str) {
        self.gossip_callbacks.with_label_values(&[callback]).inc();
    }

    pub fn observe_http(&self, method: &str, path: &str, status: u16, started: Instant) {
        self.http_duration
            .with_label_values(&[method, path, &status.to_string()])
            .observe(started.elapsed().as_secs_f64());
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .expect("in-memory encode never fails");
        String::from_utf8(buf).expect("prometheus output is always valid utf-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_labeled_independently() {
        let metrics = Metrics::new();
        metrics.lease_transition("Pending", "request");
        metrics.lease_transition("Failed", "timeout");
        let rendered = metrics.render();
        assert!(rendered.contains("ingestd_lease_transitions_total"));
    }
}
