use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all worker metrics
const PREFIX: &str = "analysis_worker";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Message Lifecycle Metrics
    pub static ref MESSAGES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_messages_total"), "Processed messages by outcome"),
        &["outcome"]
    ).expect("Failed to create messages_total metric");

    pub static ref LIFECYCLE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_lifecycle_duration_seconds"),
            "Time from receipt to settlement of a message"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["outcome"]
    ).expect("Failed to create lifecycle_duration_seconds metric");

    pub static ref SETTLEMENTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_settlements_total"), "Message settlements by kind"),
        &["settlement"]
    ).expect("Failed to create settlements_total metric");

    pub static ref MESSAGES_IN_FLIGHT: Gauge = Gauge::new(
        format!("{PREFIX}_messages_in_flight"),
        "Number of message lifecycles currently running"
    ).expect("Failed to create messages_in_flight metric");

    // Result Store Metrics
    pub static ref TRANSACTION_CONFLICTS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_transaction_conflicts_total"),
        "Conditional commits rejected because the record changed"
    ).expect("Failed to create transaction_conflicts_total metric");

    pub static ref DUPLICATE_ANALYSES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_duplicate_analyses_total"),
        "Submissions for an analysis already registered on the record"
    ).expect("Failed to create duplicate_analyses_total metric");
}

/// Initialize and register all metrics with the registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LIFECYCLE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(SETTLEMENTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(MESSAGES_IN_FLIGHT.clone()));
    let _ = REGISTRY.register(Box::new(TRANSACTION_CONFLICTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DUPLICATE_ANALYSES_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record a finished message lifecycle
pub fn record_message(outcome: &str, duration: Duration) {
    MESSAGES_TOTAL.with_label_values(&[outcome]).inc();
    LIFECYCLE_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration.as_secs_f64());
}

/// Record how a delivery was settled
pub fn record_settlement(settlement: &str) {
    SETTLEMENTS_TOTAL.with_label_values(&[settlement]).inc();
}

pub fn inc_in_flight() {
    MESSAGES_IN_FLIGHT.inc();
}

pub fn dec_in_flight() {
    MESSAGES_IN_FLIGHT.dec();
}

pub fn record_transaction_conflict() {
    TRANSACTION_CONFLICTS_TOTAL.inc();
}

pub fn record_duplicate_analysis() {
    DUPLICATE_ANALYSES_TOTAL.inc();
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric_exists(name: &str) -> bool {
        REGISTRY.gather().iter().any(|m| m.get_name() == name)
    }

    #[test]
    fn test_metrics_initialization() {
        init_metrics();

        let metric_families = REGISTRY.gather();
        assert!(!metric_families.is_empty(), "Metrics should be registered");
    }

    #[test]
    fn test_record_message() {
        init_metrics();

        record_message("success", Duration::from_millis(250));
        record_message("transfer", Duration::from_secs(2));

        assert!(metric_exists("analysis_worker_messages_total"));
        assert!(metric_exists("analysis_worker_lifecycle_duration_seconds"));
        assert!(MESSAGES_TOTAL.with_label_values(&["success"]).get() >= 1.0);
    }

    #[test]
    fn test_transaction_counters() {
        init_metrics();
        let conflicts_before = TRANSACTION_CONFLICTS_TOTAL.get();
        let duplicates_before = DUPLICATE_ANALYSES_TOTAL.get();

        record_transaction_conflict();
        record_duplicate_analysis();

        assert!(TRANSACTION_CONFLICTS_TOTAL.get() >= conflicts_before + 1.0);
        assert!(DUPLICATE_ANALYSES_TOTAL.get() >= duplicates_before + 1.0);
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_text() {
        init_metrics();
        record_settlement("acknowledged");

        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
