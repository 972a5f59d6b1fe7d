//! Prometheus metrics for the approval workflow.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.

use once_cell::sync::Lazy;
use prometheus::{opts, register_counter_vec, CounterVec, Encoder, TextEncoder};

/// Workflow counters, registered once in the global default registry.
pub struct WorkflowMetrics {
    requests_total: CounterVec,
    decisions_total: CounterVec,
    errors_total: CounterVec,
}

static METRICS: Lazy<Option<WorkflowMetrics>> = Lazy::new(|| match WorkflowMetrics::register() {
    Ok(m) => Some(m),
    Err(e) => {
        tracing::error!("failed to register workflow metrics: {}", e);
        None
    }
});

impl WorkflowMetrics {
    fn register() -> prometheus::Result<Self> {
        let requests_total = register_counter_vec!(
            opts!("alupass_approval_requests_total", "Approval requests created"),
            &["type"]
        )?;
        let decisions_total = register_counter_vec!(
            opts!("alupass_approval_decisions_total", "Approval requests decided"),
            &["type", "action"]
        )?;
        let errors_total = register_counter_vec!(
            opts!("alupass_workflow_errors_total", "Workflow operations that failed"),
            &["kind"]
        )?;
        Ok(Self {
            requests_total,
            decisions_total,
            errors_total,
        })
    }
}

pub fn record_created(request_type: &str) {
    if let Some(m) = METRICS.as_ref() {
        m.requests_total.with_label_values(&[request_type]).inc();
    }
}

pub fn record_decision(request_type: &str, action: &str) {
    if let Some(m) = METRICS.as_ref() {
        m.decisions_total
            .with_label_values(&[request_type, action])
            .inc();
    }
}

pub fn record_error(kind: &str) {
    if let Some(m) = METRICS.as_ref() {
        m.errors_total.with_label_values(&[kind]).inc();
    }
}

/// Encode all registered metrics as Prometheus text format.
/// Called by the `/metrics` HTTP handler.
pub fn encode_metrics() -> String {
    Lazy::force(&METRICS);
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────
