use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`,
/// `histogram!`) can be used anywhere in the codebase. The `PrometheusHandle`
/// is retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    ///
    /// Must be called **once** at startup before any `counter!` / `gauge!` /
    /// `histogram!` calls.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        // --- Describe all metrics (adds HELP / TYPE lines) ---

        // admission pipeline outcomes
        describe_counter!(
            "relay_admission_total",
            Unit::Count,
            "Total requests entering the admission pipeline"
        );
        describe_counter!(
            "relay_admission_rejected_total",
            Unit::Count,
            "Total requests rejected by the admission pipeline, by code"
        );
        describe_histogram!(
            "relay_admission_duration_seconds",
            Unit::Seconds,
            "Time spent in the admission pipeline before forwarding or rejecting"
        );
        describe_histogram!(
            "relay_authentication_duration_seconds",
            Unit::Seconds,
            "Time spent resolving and validating the API key"
        );

        // rate limiting
        describe_counter!(
            "relay_rate_limit_allowed_total",
            Unit::Count,
            "Total requests allowed by the rate limiter"
        );
        describe_counter!(
            "relay_rate_limit_rejected_total",
            Unit::Count,
            "Total requests rejected by the rate limiter"
        );

        // concurrency / leases
        describe_gauge!(
            "relay_concurrency_leases_active",
            Unit::Count,
            "Live concurrency leases observed on the last acquire/release"
        );
        describe_counter!(
            "relay_concurrency_acquired_total",
            Unit::Count,
            "Total concurrency leases acquired without queueing"
        );
        describe_counter!(
            "relay_concurrency_rejected_total",
            Unit::Count,
            "Total requests rejected for lacking a free concurrency slot (no queue)"
        );

        // queueing
        describe_counter!(
            "relay_queue_entered_total",
            Unit::Count,
            "Total requests that entered the admission queue"
        );
        describe_counter!(
            "relay_queue_admitted_total",
            Unit::Count,
            "Total queued requests eventually admitted"
        );
        describe_counter!(
            "relay_queue_overloaded_total",
            Unit::Count,
            "Total requests rejected immediately by the queue overload probe"
        );
        describe_counter!(
            "relay_queue_timed_out_total",
            Unit::Count,
            "Total queued requests that timed out, by timeout kind"
        );
        describe_histogram!(
            "relay_queue_wait_duration_seconds",
            Unit::Seconds,
            "Observed wait duration for admitted queued requests"
        );
        describe_gauge!(
            "relay_queue_depth",
            Unit::Count,
            "Current queue length observed per key on the last probe"
        );

        // cost gate
        describe_counter!(
            "relay_cost_gate_rejected_total",
            Unit::Count,
            "Total requests rejected by the cost gate, by dimension"
        );

        // upstream forwarding
        describe_histogram!(
            "relay_upstream_request_duration_seconds",
            Unit::Seconds,
            "Upstream request duration (time spent waiting for the provider)"
        );
        describe_counter!(
            "relay_upstream_forward_total",
            Unit::Count,
            "Total requests forwarded upstream, by outcome"
        );

        // connections
        describe_gauge!(
            "relay_connections_active",
            Unit::Count,
            "Number of active downstream connections"
        );
        describe_counter!(
            "relay_connections_total",
            Unit::Count,
            "Total connections accepted"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
