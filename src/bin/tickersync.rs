//! tickersync CLI: operator interface to the trading backend.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tickersync::config::Config;
use tickersync::coordinator::{Coordinator, Delivery, Disposition, Settled};
use tickersync::model::{Action, Outcome};
use tickersync::telemetry::{TelemetryConfig, init_telemetry};
use tickersync::trading::{
    self, Balance, Holding, OwnedResults, Payload, Quote, SearchResults, TradeReceipt,
    format_price,
};
use tickersync::transport::{HttpTransport, Transport};

#[derive(Parser)]
#[command(name = "tickersync", about = "Talk to the trading backend")]
struct Cli {
    /// Print raw JSON payloads instead of formatted output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the current price of a symbol
    Quote { symbol: String },
    /// Search listed stocks. Several queries simulate typing: each one
    /// supersedes the last and only the final results are shown.
    Search {
        #[arg(required = true)]
        queries: Vec<String>,
    },
    /// Search stocks you hold
    Owned { query: String },
    /// Show your cash balance
    Balance,
    /// Buy shares
    Buy { symbol: String, quantity: i64 },
    /// Sell shares
    Sell { symbol: String, quantity: i64 },
    /// Value holdings given as SYMBOL=QUANTITY
    Portfolio {
        #[arg(required = true)]
        holdings: Vec<Holding>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "tickersync".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::from_config(&config)?);
    let coordinator = Coordinator::new();
    let json = cli.json;

    match cli.command {
        Command::Quote { symbol } => {
            let outcome = run(&coordinator, &transport, &trading::price(&symbol)?).await?;
            render::<Quote>(&outcome, json, |quote| {
                println!("{}  ${}", quote.symbol, format_price(quote.price));
                if let Some(open) = quote.open {
                    println!("  open            ${}", format_price(open));
                }
                if let Some(close) = quote.previous_close {
                    println!("  previous close  ${}", format_price(close));
                }
            })
        }
        Command::Search { queries } => cmd_search(&coordinator, &transport, queries, json).await,
        Command::Owned { query } => {
            let outcome = run(&coordinator, &transport, &trading::owned(&query)?).await?;
            render::<OwnedResults>(&outcome, json, |owned| {
                if owned.stocks.is_empty() {
                    println!("No holdings match '{query}'.");
                }
                for stock in &owned.stocks {
                    println!("{:<8}  {}", stock.symbol, stock.quantity);
                }
            })
        }
        Command::Balance => {
            let outcome = run(&coordinator, &transport, &trading::balance()).await?;
            render::<Balance>(&outcome, json, |b| {
                println!("My Balance: ${}", format_price(b.balance));
            })
        }
        Command::Buy { symbol, quantity } => {
            let action = trading::buy(&symbol, quantity)?;
            cmd_trade(&coordinator, &transport, &action, json).await
        }
        Command::Sell { symbol, quantity } => {
            let action = trading::sell(&symbol, quantity)?;
            cmd_trade(&coordinator, &transport, &action, json).await
        }
        Command::Portfolio { holdings } => {
            cmd_portfolio(&coordinator, Arc::clone(&transport), &holdings, json).await
        }
    }
}

/// Dispatch one action and wait for it. A lone dispatch cannot be
/// superseded, so anything but a delivery is a bug.
async fn run(
    coordinator: &Coordinator,
    transport: &Arc<dyn Transport>,
    action: &Action,
) -> anyhow::Result<Outcome> {
    let settled = coordinator
        .dispatch_action(Arc::clone(transport), action)?
        .settle()
        .await;
    match settled.disposition {
        Disposition::Delivered(outcome) => Ok(outcome),
        other => anyhow::bail!("{} request {} was {}", action.name, settled.seq, other.state()),
    }
}

fn render<T: Payload>(
    outcome: &Outcome,
    json: bool,
    pretty: impl FnOnce(&T),
) -> anyhow::Result<()> {
    match outcome {
        Outcome::Success { payload } => {
            if json {
                println!("{}", serde_json::to_string_pretty(payload)?);
            } else {
                pretty(&T::decode(payload)?);
            }
            Ok(())
        }
        Outcome::Failure(failure) => anyhow::bail!("{failure}"),
    }
}

async fn cmd_search(
    coordinator: &Coordinator,
    transport: &Arc<dyn Transport>,
    queries: Vec<String>,
    json: bool,
) -> anyhow::Result<()> {
    coordinator.on_outcome(trading::keys::SEARCH, move |delivery: Delivery| {
        if let Err(e) = render::<SearchResults>(&delivery.outcome, json, |results| {
            if results.stocks.is_empty() {
                println!("No results found.");
            }
            for stock in &results.stocks {
                println!("{} - {}", stock.symbol, stock.name);
            }
        }) {
            eprintln!("Error fetching results: {e}");
        }
    })?;

    // Dispatch every query before any of them completes, like keystrokes.
    let mut handles = Vec::with_capacity(queries.len());
    for query in &queries {
        let action = trading::search(query)?;
        handles.push(coordinator.dispatch_action(Arc::clone(transport), &action)?.spawn());
    }

    let mut delivered = 0;
    for handle in handles {
        let settled: Settled = handle.await?;
        if let Disposition::Delivered(_) = settled.disposition {
            delivered += 1;
        }
    }
    tracing::debug!(dispatched = queries.len(), delivered, "search finished");
    Ok(())
}

async fn cmd_trade(
    coordinator: &Coordinator,
    transport: &Arc<dyn Transport>,
    action: &Action,
    json: bool,
) -> anyhow::Result<()> {
    let outcome = run(coordinator, transport, action).await?;
    render::<TradeReceipt>(&outcome, json, |receipt| println!("{}", receipt.message))?;

    // The balance changed; show the fresh one.
    let outcome = run(coordinator, transport, &trading::balance()).await?;
    render::<Balance>(&outcome, json, |b| {
        println!("My Balance: ${}", format_price(b.balance));
    })
}

async fn cmd_portfolio(
    coordinator: &Coordinator,
    transport: Arc<dyn Transport>,
    holdings: &[Holding],
    json: bool,
) -> anyhow::Result<()> {
    let valuation = trading::value_holdings(coordinator, transport, holdings).await?;

    if json {
        let rows: Vec<_> = valuation
            .rows
            .iter()
            .map(|r| {
                serde_json::json!({
                    "symbol": r.symbol,
                    "quantity": r.quantity,
                    "quote": r.quote,
                    "value": r.value,
                })
            })
            .collect();
        let doc = serde_json::json!({ "rows": rows, "total": valuation.total });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let na = || "N/A".to_string();
    println!(
        "{:<8}  {:>8}  {:>10}  {:>10}  {:>10}  {:>12}",
        "SYMBOL", "QTY", "OPEN", "PREV", "PRICE", "TOTAL"
    );
    println!("{}", "-".repeat(66));
    for row in &valuation.rows {
        let quote = row.quote.as_ref();
        println!(
            "{:<8}  {:>8}  {:>10}  {:>10}  {:>10}  {:>12}",
            row.symbol,
            row.quantity,
            quote.and_then(|q| q.open).map(format_price).unwrap_or_else(na),
            quote.and_then(|q| q.previous_close).map(format_price).unwrap_or_else(na),
            quote.map(|q| format_price(q.price)).unwrap_or_else(na),
            row.value.map(format_price).unwrap_or_else(na),
        );
    }
    match valuation.total {
        Some(total) => println!("\nTotal stock value: ${}", format_price(total)),
        None => {
            println!("\nTotal stock value: N/A");
            if !valuation.rows.is_empty() {
                eprintln!("Error fetching prices for one or more stock. Please try again later.");
            }
        }
    }
    Ok(())
}
