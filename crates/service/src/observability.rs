use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

// Prometheus metrics (default registry)
pub static ROUTER_CALLS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "campus_router_calls_total",
        "Service calls dispatched by the call router",
        &["service", "transport", "outcome"]
    )
    .expect("register router_calls_total")
});

pub static NOTIFICATIONS_RAISED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "campus_notifications_raised_total",
        "Change notifications raised by producing services",
        &["service", "kind"]
    )
    .expect("register notifications_raised_total")
});

pub static NOTIFICATIONS_APPLIED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "campus_notifications_applied_total",
        "Inbound notification entries applied to denormalized copies",
        &["service", "source", "kind"]
    )
    .expect("register notifications_applied_total")
});

pub static QUEUE_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "campus_queue_events_total",
        "Durable queue publishes and deliveries",
        &["topic", "event"]
    )
    .expect("register queue_events_total")
});

pub fn encode_metrics() -> (axum::http::StatusCode, String) {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encode error: {e}"),
        );
    }
    (
        axum::http::StatusCode::OK,
        String::from_utf8(buffer).unwrap_or_default(),
    )
}
