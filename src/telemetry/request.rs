//! Request span helpers.
//!
//! One span per dispatched request, covering the work and the delivery
//! decision that follows it.

use tracing::Span;

/// Start a span for a dispatched request.
///
/// The `request.state` field is declared empty and filled in by
/// [`record_state_transition`].
pub fn start_request_span(key: &str, seq: u64) -> Span {
    tracing::info_span!(
        "request.dispatch",
        "request.key" = key,
        "request.seq" = seq,
        "request.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the span and emit it as an event.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("request.state", to);
    span.in_scope(|| {
        tracing::debug!(from = from, to = to, "state_transition");
    });
}
