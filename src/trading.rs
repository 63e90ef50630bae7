//! Trading backend actions and payloads.
//!
//! Builders for each AJAX endpoint the backend exposes, typed views of the
//! JSON they return, and portfolio valuation over concurrent quote fetches.

use std::str::FromStr;
use std::sync::Arc;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::coordinator::{Coordinator, Disposition};
use crate::error::{Error, Result};
use crate::model::{Action, Method, Outcome};
use crate::transport::Transport;

/// Idempotency keys, one class per action type.
pub mod keys {
    pub const PRICE: &str = "price";
    pub const SEARCH: &str = "search";
    pub const OWNED: &str = "owned";
    pub const BALANCE: &str = "balance";
    pub const BUY: &str = "buy";
    pub const SELL: &str = "sell";
}

// ---------------------------------------------------------------------------
// Action builders
// ---------------------------------------------------------------------------

/// Fetch the current quote for a symbol.
pub fn price(symbol: &str) -> Result<Action> {
    let symbol = non_empty("symbol", symbol)?;
    Ok(Action::new("get_price", keys::PRICE, Method::Get, "get_price").param("symbol", symbol))
}

/// Search listed stocks by symbol or name.
pub fn search(query: &str) -> Result<Action> {
    let query = non_empty("search query", query)?;
    Ok(Action::new("search_stocks", keys::SEARCH, Method::Get, "search_stocks").param("q", query))
}

/// Search the stocks the user holds.
pub fn owned(query: &str) -> Result<Action> {
    let query = non_empty("search query", query)?;
    Ok(Action::new("sell_search", keys::OWNED, Method::Get, "sell_search").param("q", query))
}

pub fn balance() -> Action {
    Action::new("get_balance", keys::BALANCE, Method::Get, "get_balance")
}

pub fn buy(symbol: &str, quantity: i64) -> Result<Action> {
    trade("buy", keys::BUY, symbol, quantity)
}

pub fn sell(symbol: &str, quantity: i64) -> Result<Action> {
    trade("sell", keys::SELL, symbol, quantity)
}

fn trade(name: &str, key: &str, symbol: &str, quantity: i64) -> Result<Action> {
    let symbol = non_empty("symbol", symbol)?;
    if quantity <= 0 {
        return Err(Error::InvalidQuantity(quantity));
    }
    Ok(Action::new(name, key, Method::Post, name)
        .param("symbol", symbol)
        .param("quantity", quantity.to_string()))
}

fn non_empty<'a>(what: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument(format!("{what} must not be empty")));
    }
    Ok(trimmed)
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A typed view of a success payload.
pub trait Payload: DeserializeOwned {
    const NAME: &'static str;

    fn decode(payload: &serde_json::Value) -> Result<Self> {
        Self::deserialize(payload).map_err(|source| Error::Decode {
            expected: Self::NAME,
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    #[serde(deserialize_with = "de_price")]
    pub price: f64,
    #[serde(default, deserialize_with = "de_opt_price")]
    pub open: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_price")]
    pub previous_close: Option<f64>,
}

impl Payload for Quote {
    const NAME: &'static str = "quote";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMatch {
    pub symbol: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub stocks: Vec<StockMatch>,
    /// Set by the backend when nothing matched.
    pub message: Option<String>,
}

impl Payload for SearchResults {
    const NAME: &'static str = "search results";
}

/// A holding as returned by owned-stock search: `[symbol, quantity]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, u64)")]
pub struct OwnedStock {
    pub symbol: String,
    pub quantity: u64,
}

impl From<(String, u64)> for OwnedStock {
    fn from((symbol, quantity): (String, u64)) -> Self {
        Self { symbol, quantity }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedResults {
    #[serde(default)]
    pub stocks: Vec<OwnedStock>,
}

impl Payload for OwnedResults {
    const NAME: &'static str = "owned stocks";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    #[serde(deserialize_with = "de_price")]
    pub balance: f64,
}

impl Payload for Balance {
    const NAME: &'static str = "balance";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeReceipt {
    pub message: String,
}

impl Payload for TradeReceipt {
    const NAME: &'static str = "trade receipt";
}

/// Prices arrive as decimal strings from the quote provider, sometimes as
/// plain numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPrice {
    Number(f64),
    Text(String),
}

impl RawPrice {
    fn into_f64<E: serde::de::Error>(self) -> std::result::Result<f64, E> {
        match self {
            RawPrice::Number(n) => Ok(n),
            RawPrice::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid price {s:?}"))),
        }
    }
}

fn de_price<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
    RawPrice::deserialize(d)?.into_f64()
}

fn de_opt_price<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<f64>, D::Error> {
    Option::<RawPrice>::deserialize(d)?
        .map(RawPrice::into_f64)
        .transpose()
}

/// Round to exactly two decimal places for display.
pub fn format_price(price: f64) -> String {
    format!("{:.2}", (price * 100.0).round() / 100.0)
}

// ---------------------------------------------------------------------------
// Valuation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holding {
    pub symbol: String,
    pub quantity: u64,
}

impl FromStr for Holding {
    type Err = Error;

    /// Parse `SYMBOL=QUANTITY`.
    fn from_str(s: &str) -> Result<Self> {
        let (symbol, quantity) = s
            .split_once('=')
            .ok_or_else(|| Error::InvalidArgument(format!("expected SYMBOL=QUANTITY, got {s:?}")))?;
        let symbol = non_empty("symbol", symbol)?.to_string();
        let quantity = quantity
            .trim()
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("invalid quantity in {s:?}")))?;
        Ok(Self { symbol, quantity })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValuedHolding {
    pub symbol: String,
    pub quantity: u64,
    /// None when the quote could not be fetched.
    pub quote: Option<Quote>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Valuation {
    pub rows: Vec<ValuedHolding>,
    /// None when any row is missing a price, or there are no rows.
    pub total: Option<f64>,
}

/// Fetch quotes for every holding concurrently and total them.
///
/// Each row gets its own key (`valuation/<index>`) so rows never suppress
/// one another, while a second valuation started before the first finishes
/// supersedes it row by row.
pub async fn value_holdings(
    coordinator: &Coordinator,
    transport: Arc<dyn Transport>,
    holdings: &[Holding],
) -> Result<Valuation> {
    // Nothing is dispatched until every row is valid.
    let actions = holdings
        .iter()
        .enumerate()
        .map(|(index, holding)| {
            let mut action = price(&holding.symbol)?;
            action.key = format!("valuation/{index}");
            Ok(action)
        })
        .collect::<Result<Vec<Action>>>()?;

    let pending = actions
        .iter()
        .map(|action| coordinator.dispatch_action(Arc::clone(&transport), action))
        .collect::<Result<Vec<_>>>()?;

    let settled = join_all(pending.into_iter().map(|dispatch| dispatch.settle())).await;

    let rows: Vec<ValuedHolding> = holdings
        .iter()
        .zip(settled)
        .map(|(holding, settled)| {
            let quote = match settled.disposition {
                Disposition::Delivered(Outcome::Success { payload }) => Quote::decode(&payload).ok(),
                _ => None,
            };
            let value = quote.as_ref().map(|q| q.price * holding.quantity as f64);
            ValuedHolding {
                symbol: holding.symbol.clone(),
                quantity: holding.quantity,
                quote,
                value,
            }
        })
        .collect();

    let total = if rows.is_empty() {
        None
    } else {
        rows.iter()
            .map(|r| r.value)
            .sum::<Option<f64>>()
    };

    Ok(Valuation { rows, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quote_accepts_string_prices() {
        let quote = Quote::decode(&json!({
            "symbol": "IBM",
            "price": "187.4300",
            "open": "185.0000",
            "previous_close": 184.5
        }))
        .unwrap();
        assert_eq!(quote.price, 187.43);
        assert_eq!(quote.open, Some(185.0));
        assert_eq!(quote.previous_close, Some(184.5));
    }

    #[test]
    fn quote_rejects_missing_price() {
        let err = Quote::decode(&json!({"symbol": "IBM"})).unwrap_err();
        assert!(matches!(err, Error::Decode { expected: "quote", .. }));
    }

    #[test]
    fn owned_results_decode_tuples() {
        let owned = OwnedResults::decode(&json!({"stocks": [["AAPL", 3], ["AMZN", 1]]})).unwrap();
        assert_eq!(
            owned.stocks,
            vec![
                OwnedStock { symbol: "AAPL".into(), quantity: 3 },
                OwnedStock { symbol: "AMZN".into(), quantity: 1 },
            ]
        );
    }

    #[test]
    fn empty_search_has_message() {
        let results =
            SearchResults::decode(&json!({"message": "No stocks found for 'zz'", "stocks": []}))
                .unwrap();
        assert!(results.stocks.is_empty());
        assert!(results.message.is_some());
    }

    #[test]
    fn trade_rejects_non_positive_quantity() {
        assert!(matches!(buy("AAPL", 0), Err(Error::InvalidQuantity(0))));
        assert!(matches!(sell("AAPL", -2), Err(Error::InvalidQuantity(-2))));
        let action = buy(" AAPL ", 5).unwrap();
        assert_eq!(action.method, Method::Post);
        assert_eq!(action.params.get("symbol").map(String::as_str), Some("AAPL"));
        assert_eq!(action.params.get("quantity").map(String::as_str), Some("5"));
    }

    #[test]
    fn blank_inputs_are_rejected() {
        assert!(price("  ").is_err());
        assert!(search("").is_err());
        assert!(owned(" ").is_err());
    }

    #[test]
    fn format_price_two_decimals() {
        assert_eq!(format_price(12.0), "12.00");
        assert_eq!(format_price(187.4349), "187.43");
        assert_eq!(format_price(0.125), "0.13");
    }

    #[test]
    fn holding_parses() {
        let h: Holding = "MSFT=4".parse().unwrap();
        assert_eq!(h, Holding { symbol: "MSFT".into(), quantity: 4 });
        assert!("MSFT".parse::<Holding>().is_err());
        assert!("MSFT=x".parse::<Holding>().is_err());
    }
}
