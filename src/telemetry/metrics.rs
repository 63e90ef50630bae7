//! Metric instrument factories for tickersync.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without one registered, these are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("tickersync")
}

/// Counter: requests dispatched.
/// Labels: `key`.
pub fn requests_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("tickersync.request.dispatched")
        .with_description("Number of requests dispatched")
        .build()
}

/// Counter: requests that reached a terminal state when their work finished.
/// Labels: `key`, `result` ("delivered" | "superseded" | "cancelled").
pub fn requests_settled() -> Counter<u64> {
    meter()
        .u64_counter("tickersync.request.settled")
        .with_description("Number of requests settled, by terminal state")
        .build()
}

/// Histogram: transport round-trip in milliseconds.
/// Labels: `http.request.method`, `http.response.status_code`, `action`.
pub fn transport_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("tickersync.transport.duration_ms")
        .with_description("Transport round-trip duration in milliseconds")
        .with_unit("ms")
        .build()
}
