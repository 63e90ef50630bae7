//! Smoke test for OTLP export.
//!
//! Requires an OTLP collector listening on localhost:4317.
//!
//! Run with:
//! ```sh
//! cargo test --test telemetry_smoke_test -- --ignored --nocapture
//! ```

use std::time::Duration;

use serde_json::json;
use tickersync::coordinator::Coordinator;
use tickersync::model::Outcome;
use tickersync::telemetry::{TelemetryConfig, init_telemetry};

#[test]
#[ignore]
fn smoke_request_spans_and_metrics() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = init_telemetry(TelemetryConfig {
            endpoint: Some("http://localhost:4317".to_string()),
            service_name: "tickersync-smoke-test".to_string(),
            log_level: "debug".to_string(),
        })
        .expect("failed to init telemetry");

        let coordinator = Coordinator::new();
        let stale = coordinator
            .dispatch("price", async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Outcome::success(json!({"price": "10.00"}))
            })
            .unwrap()
            .spawn();
        coordinator
            .dispatch("price", async { Outcome::success(json!({"price": "12.00"})) })
            .unwrap()
            .settle()
            .await;
        stale.await.unwrap();

        guard.force_flush();
        // Give batch exporters time to ship.
        tokio::time::sleep(Duration::from_secs(2)).await;
    });
}
