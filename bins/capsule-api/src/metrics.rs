//! Prometheus metrics for the API

use capsule_common::dispatch::Route;
use capsule_common::types::ExecutionResult;
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};
use std::time::Duration;

lazy_static! {
    static ref REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "capsule_requests_total",
        "Execution requests by route",
        &["route"]
    )
    .expect("metric can be registered");

    static ref OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "capsule_outcomes_total",
        "Finished executions by outcome",
        &["route", "outcome"]
    )
    .expect("metric can be registered");

    static ref EXECUTION_DURATION: HistogramVec = register_histogram_vec!(
        "capsule_execution_duration_seconds",
        "Wall time from accepted request to result",
        &["route"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
    )
    .expect("metric can be registered");

    static ref QUEUE_LENGTH: IntGauge =
        register_int_gauge!("capsule_queue_length", "Jobs waiting in the queue")
            .expect("metric can be registered");
}

pub fn record_request(route: Route) {
    REQUESTS_TOTAL.with_label_values(&[&route.to_string()]).inc();
}

pub fn record_outcome(route: Route, result: &ExecutionResult, elapsed: Duration) {
    let outcome = match result.error_kind() {
        Some(kind) => kind.as_str(),
        None => "success",
    };
    let route = route.to_string();
    OUTCOMES_TOTAL.with_label_values(&[&route, outcome]).inc();
    EXECUTION_DURATION
        .with_label_values(&[&route])
        .observe(elapsed.as_secs_f64());
}

pub fn record_pending() {
    OUTCOMES_TOTAL
        .with_label_values(&[&Route::Queued.to_string(), "pending"])
        .inc();
}

pub fn set_queue_length(length: u64) {
    QUEUE_LENGTH.set(length as i64);
}

/// Text exposition of everything registered in the default registry
pub fn render() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_metrics() {
        record_request(Route::CompiledSync);
        let result = ExecutionResult::infrastructure("down");
        record_outcome(Route::CompiledSync, &result, Duration::from_millis(120));
        set_queue_length(4);

        let text = render();
        assert!(text.contains("capsule_requests_total"));
        assert!(text.contains("outcome=\"infrastructure_error\""));
        assert!(text.contains("capsule_queue_length 4"));
    }
}
