//! # Prometheus Metrics
//!
//! Znode list metrics, scraped at `/metrics` on the metrics port. Everything
//! is registered in a dedicated [`prometheus::Registry`] under the `znode`
//! namespace.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use znode_protocol::network::{Acceptance, ZnodeList};
use znode_protocol::znode::ZnodeError;

/// Metric handles for the daemon. Cloning shares the underlying metrics.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Records per lifecycle state.
    pub znodes: IntGaugeVec,
    /// Accepted messages by kind and outcome.
    pub messages_accepted_total: IntCounterVec,
    /// Rejected messages by kind and error class.
    pub messages_rejected_total: IntCounterVec,
    /// Misbehavior points charged to senders.
    pub dos_points_total: IntCounter,
    pub relay_pending: IntGauge,
    pub relayed_total: IntCounter,
    pub check_rounds_total: IntCounter,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("znode".into()), None)?;

        let znodes = IntGaugeVec::new(Opts::new("records", "Znode records by state"), &["state"])?;
        registry.register(Box::new(znodes.clone()))?;

        let messages_accepted_total = IntCounterVec::new(
            Opts::new("messages_accepted_total", "Accepted pings and announcements"),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(messages_accepted_total.clone()))?;

        let messages_rejected_total = IntCounterVec::new(
            Opts::new("messages_rejected_total", "Rejected pings and announcements"),
            &["kind", "class"],
        )?;
        registry.register(Box::new(messages_rejected_total.clone()))?;

        let dos_points_total = IntCounter::new(
            "dos_points_total",
            "Misbehavior points charged for rejected messages",
        )?;
        registry.register(Box::new(dos_points_total.clone()))?;

        let relay_pending = IntGauge::new("relay_pending", "Messages waiting to be relayed")?;
        registry.register(Box::new(relay_pending.clone()))?;

        let relayed_total = IntCounter::new("relayed_total", "Messages handed to peers")?;
        registry.register(Box::new(relayed_total.clone()))?;

        let check_rounds_total =
            IntCounter::new("check_rounds_total", "Completed maintenance rounds")?;
        registry.register(Box::new(check_rounds_total.clone()))?;

        Ok(Self {
            registry,
            znodes,
            messages_accepted_total,
            messages_rejected_total,
            dos_points_total,
            relay_pending,
            relayed_total,
            check_rounds_total,
        })
    }

    /// Counts the outcome of one inbound message.
    pub fn record(&self, kind: &str, result: &Result<Acceptance, ZnodeError>) {
        match result {
            Ok(acceptance) => self
                .messages_accepted_total
                .with_label_values(&[kind, acceptance.as_str()])
                .inc(),
            Err(e) => {
                self.messages_rejected_total
                    .with_label_values(&[kind, e.class().as_str()])
                    .inc();
                self.dos_points_total.inc_by(u64::from(e.dos_weight()));
            }
        }
    }

    /// Refreshes the per-state gauges from the list.
    pub fn observe(&self, list: &ZnodeList) {
        for (state, count) in list.count_by_state() {
            self.znodes
                .with_label_values(&[state.as_str()])
                .set(count as i64);
        }
    }

    /// Encodes all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Renders `/metrics`. HTTP 500 if encoding fails.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
