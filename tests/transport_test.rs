//! HTTP transport against a local stand-in for the trading backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::SecretString;
use serde_json::{Value, json};

use tickersync::coordinator::{Coordinator, Disposition};
use tickersync::model::{FailureKind, Outcome};
use tickersync::trading::{self, Balance, Payload, Quote, SearchResults, TradeReceipt};
use tickersync::transport::{HttpTransport, Transport};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn is_xhr(headers: &HeaderMap) -> bool {
    header(headers, "x-requested-with") == Some("XMLHttpRequest")
}

async fn get_price(
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    if !is_xhr(&headers) {
        return (StatusCode::BAD_REQUEST, Json(json!({})));
    }
    match q.get("symbol").map(String::as_str) {
        Some("FAIL") => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Error fetching price"})),
        ),
        Some(symbol) => (
            StatusCode::OK,
            Json(json!({
                "symbol": symbol,
                "price": "187.4300",
                "open": "185.0000",
                "previous_close": "184.5000",
            })),
        ),
        None => (StatusCode::BAD_REQUEST, Json(json!({}))),
    }
}

async fn search_stocks(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
    let query = q.get("q").cloned().unwrap_or_default();
    // The shortest query is the slowest, so a stale keystroke finishes last.
    if query.len() == 1 {
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    Json(json!({"stocks": [{"symbol": query.to_uppercase(), "name": format!("{query} Inc")}]}))
}

async fn get_balance(headers: HeaderMap) -> Json<Value> {
    let cookie = header(&headers, "cookie").unwrap_or_default();
    let balance = if cookie.contains("sessionid=sess-1") {
        "1000.50"
    } else {
        "0.00"
    };
    Json(json!({ "balance": balance }))
}

#[derive(Clone, Default)]
struct Seen(Arc<Mutex<Vec<Value>>>);

async fn bad_gateway() -> (StatusCode, &'static str) {
    (StatusCode::BAD_GATEWAY, "<html>bad gateway</html>")
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(json!({}))
}

fn app(seen: Seen) -> Router {
    let buys = seen.clone();
    Router::new()
        .route("/trading/get_price", get(get_price))
        .route("/trading/search_stocks", get(search_stocks))
        .route("/trading/get_balance", get(get_balance))
        .route(
            "/trading/buy",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let buys = buys.clone();
                async move {
                    buys.0.lock().unwrap().push(body.clone());
                    if header(&headers, "x-csrftoken") != Some("tok-1") {
                        return (StatusCode::FORBIDDEN, Json(json!({})));
                    }
                    if body["quantity"] == "500" {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"error": "Insufficient balance"})),
                        );
                    }
                    (
                        StatusCode::CREATED,
                        Json(json!({"message": "Stock purchased successfully"})),
                    )
                }
            }),
        )
        .route("/trading/broken", get(bad_gateway))
        .route("/trading/slow", get(slow))
}

async fn serve(seen: Seen) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(seen)).await.unwrap();
    });
    format!("http://{addr}/trading")
}

fn transport(base: &str) -> HttpTransport {
    HttpTransport::builder(base)
        .unwrap()
        .session(Some(SecretString::from("sess-1")))
        .csrf_token(Some(SecretString::from("tok-1")))
        .timeout(Duration::from_millis(500))
        .build()
        .unwrap()
}

fn payload(outcome: Outcome) -> Value {
    match outcome {
        Outcome::Success { payload } => payload,
        Outcome::Failure(f) => panic!("expected success, got {f}"),
    }
}

// ---------------------------------------------------------------------------
// Success paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_sends_xhr_header_and_query() {
    let base = serve(Seen::default()).await;
    let t = transport(&base);

    let outcome = t.perform(&trading::price("IBM").unwrap().descriptor()).await;
    let quote = Quote::decode(&payload(outcome)).unwrap();

    assert_eq!(quote.symbol, "IBM");
    assert_eq!(quote.price, 187.43);
    assert_eq!(quote.previous_close, Some(184.5));
}

#[tokio::test]
async fn session_cookie_is_attached() {
    let base = serve(Seen::default()).await;
    let outcome = transport(&base).perform(&trading::balance().descriptor()).await;
    assert_eq!(Balance::decode(&payload(outcome)).unwrap().balance, 1000.5);
}

#[tokio::test]
async fn post_sends_json_body_and_csrf_token() {
    let seen = Seen::default();
    let base = serve(seen.clone()).await;

    let outcome = transport(&base)
        .perform(&trading::buy("AAPL", 3).unwrap().descriptor())
        .await;
    let receipt = TradeReceipt::decode(&payload(outcome)).unwrap();
    assert_eq!(receipt.message, "Stock purchased successfully");

    let bodies = seen.0.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0], json!({"symbol": "AAPL", "quantity": "3"}));
}

// ---------------------------------------------------------------------------
// Failure paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn error_body_message_is_carried_by_transport_failure() {
    let base = serve(Seen::default()).await;
    let outcome = transport(&base)
        .perform(&trading::buy("AAPL", 500).unwrap().descriptor())
        .await;

    let failure = outcome.failure().cloned().expect("failure");
    assert_eq!(failure.kind, FailureKind::TransportFailure);
    assert_eq!(failure.message, "Insufficient balance");
    assert_eq!(failure.status, Some(400));
}

#[tokio::test]
async fn missing_csrf_token_is_a_bare_failure() {
    let base = serve(Seen::default()).await;
    let t = HttpTransport::builder(&base).unwrap().build().unwrap();
    let outcome = t.perform(&trading::buy("AAPL", 1).unwrap().descriptor()).await;

    let failure = outcome.failure().cloned().expect("failure");
    assert_eq!(failure.kind, FailureKind::TransportFailure);
    assert_eq!(failure.status, Some(403));
}

#[tokio::test]
async fn non_json_error_page_is_transport_failure() {
    let base = serve(Seen::default()).await;
    let mut action = trading::balance();
    action.path = "broken".to_string();

    let outcome = transport(&base).perform(&action.descriptor()).await;
    let failure = outcome.failure().cloned().expect("failure");
    assert_eq!(failure.kind, FailureKind::TransportFailure);
    assert_eq!(failure.message, "HTTP error! Status: 502");
}

#[tokio::test]
async fn server_error_with_reason_keeps_reason() {
    let base = serve(Seen::default()).await;
    let outcome = transport(&base)
        .perform(&trading::price("FAIL").unwrap().descriptor())
        .await;
    let failure = outcome.failure().cloned().expect("failure");
    assert_eq!(failure.kind, FailureKind::TransportFailure);
    assert_eq!(failure.message, "Error fetching price");
    assert_eq!(failure.status, Some(500));
}

#[tokio::test]
async fn timeout_is_transport_failure() {
    let base = serve(Seen::default()).await;
    let mut action = trading::balance();
    action.path = "slow".to_string();

    let outcome = transport(&base).perform(&action.descriptor()).await;
    let failure = outcome.failure().cloned().expect("failure");
    assert_eq!(failure.kind, FailureKind::TransportFailure);
    assert_eq!(failure.status, None);
}

#[tokio::test]
async fn unreachable_server_is_transport_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let outcome = transport(&format!("http://{addr}/trading"))
        .perform(&trading::balance().descriptor())
        .await;
    let failure = outcome.failure().cloned().expect("failure");
    assert_eq!(failure.kind, FailureKind::TransportFailure);
    assert_eq!(failure.status, None);
}

// ---------------------------------------------------------------------------
// Through the coordinator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn live_search_shows_only_latest_query() {
    let base = serve(Seen::default()).await;
    let t: Arc<dyn Transport> = Arc::new(transport(&base));
    let coordinator = Coordinator::new();

    let shown = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&shown);
    coordinator
        .on_outcome(trading::keys::SEARCH, move |d| {
            if let Outcome::Success { payload } = d.outcome {
                sink.lock().unwrap().push(SearchResults::decode(&payload).unwrap());
            }
        })
        .unwrap();

    let stale = coordinator
        .dispatch_action(Arc::clone(&t), &trading::search("a").unwrap())
        .unwrap()
        .spawn();
    let latest = coordinator
        .dispatch_action(Arc::clone(&t), &trading::search("ap").unwrap())
        .unwrap()
        .spawn();

    let latest = latest.await.unwrap();
    let stale = stale.await.unwrap();

    assert!(matches!(latest.disposition, Disposition::Delivered(_)));
    assert_eq!(stale.disposition, Disposition::Superseded { by: 2 });

    let shown = shown.lock().unwrap();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].stocks[0].symbol, "AP");
}
