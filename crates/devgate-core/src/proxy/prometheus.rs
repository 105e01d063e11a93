//! Prometheus metrics for proxy observability.
//!
//! Exposed metrics:
//! - `llm_requests_total{user,model,endpoint,status}` - Counter of requests
//! - `llm_request_duration_seconds{user,model,endpoint}` - Latency histogram
//! - `llm_tokens_total{user,model,type}` - Tokens as seen by clients
//! - `inference_tokens_total{user,model,type}` - Tokens as billed upstream

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Histogram buckets matched to LLM latency: fast cache hits at one end,
/// long generations at the other.
const LLM_LATENCY_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0];

/// Initialize the Prometheus recorder. Call once at server construction,
/// before any metrics are recorded.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PROMETHEUS_HANDLE.get_or_init(|| {
        let builder = PrometheusBuilder::new()
            .set_buckets(LLM_LATENCY_BUCKETS)
            .expect("Failed to set histogram buckets");
        let handle =
            builder.install_recorder().expect("Failed to install Prometheus recorder");

        describe_counter!("llm_requests_total", "Total number of proxy requests processed");
        describe_histogram!(
            "llm_request_duration_seconds",
            "Request duration in seconds"
        );
        describe_counter!("llm_tokens_total", "Total tokens processed, client view");
        describe_counter!(
            "inference_tokens_total",
            "Total tokens processed, upstream view"
        );

        handle
    });

    handle.clone()
}

pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Record a completed request with its duration.
pub fn record_request(user: &str, model: &str, endpoint: &str, status: &str, duration_ms: u64) {
    let labels = [
        ("user", user.to_string()),
        ("model", model.to_string()),
        ("endpoint", endpoint.to_string()),
        ("status", status.to_string()),
    ];
    counter!("llm_requests_total", &labels).increment(1);

    let duration_labels = [
        ("user", user.to_string()),
        ("model", model.to_string()),
        ("endpoint", endpoint.to_string()),
    ];
    histogram!("llm_request_duration_seconds", &duration_labels)
        .record(duration_ms as f64 / 1000.0);
}

/// Record token usage under both counter families.
pub fn record_tokens(user: &str, model: &str, input_tokens: u64, output_tokens: u64) {
    for (type_, count) in [("input", input_tokens), ("output", output_tokens)] {
        if count == 0 {
            continue;
        }
        let labels = [
            ("user", user.to_string()),
            ("model", model.to_string()),
            ("type", type_.to_string()),
        ];
        counter!("llm_tokens_total", &labels).increment(count);
        counter!("inference_tokens_total", &labels).increment(count);
    }
}

/// Render all metrics in Prometheus text format.
pub fn render_metrics() -> String {
    if let Some(handle) = get_prometheus_handle() {
        handle.render()
    } else {
        String::from("# Metrics not initialized\n")
    }
}
