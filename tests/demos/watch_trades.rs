//! Live streaming demo
//!
//! Streams trades, the order book and the ticker for one market from the
//! configured endpoint. Private streams are added when
//! `SRIQUANT_API_KEY` / `SRIQUANT_API_SECRET` are set (a `.env` file works).
//!
//! ```text
//! cargo run -p sriquant-tests --example watch_trades
//! ```

use sriquant_streaming::prelude::*;
use tracing::{error, info, warn};

const SYMBOL: &str = "BTC/USDT";
const ROUNDS: usize = 20;

#[monoio::main(enable_timer = true)]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    info!("🚀 Testing SriQuant.ai streaming client");

    let base = ExchangeConfig::default()
        .with_markets(vec![Market::new("BTC-USDT", "BTC", "USDT", MarketType::Swap)]);
    let (config, has_credentials) = match base.clone().with_env_credentials() {
        Ok(config) => {
            info!("🔑 API credentials loaded from environment");
            (config, true)
        }
        Err(_) => {
            info!("🌐 No API credentials in environment - public streams only");
            (base, false)
        }
    };

    let exchange = ProExchange::new(config)?;

    for round in 1..=ROUNDS {
        match exchange.watch_trades(SYMBOL, None, Some(5)).await {
            Ok(trades) => {
                for trade in trades {
                    let side_emoji = match trade.side {
                        Some(Side::Buy) => "🟢",
                        Some(Side::Sell) => "🔴",
                        None => "⚪",
                    };
                    info!(
                        "{} TRADE #{}: {} {} @ ${} | ID: {}",
                        side_emoji,
                        round,
                        trade.symbol,
                        trade.amount,
                        trade.price,
                        trade.id.as_deref().unwrap_or("-")
                    );
                }
            }
            Err(e) => {
                error!("❌ Trade stream error: {}", e);
                break;
            }
        }
    }

    match exchange.watch_order_book(SYMBOL, Some(5)).await {
        Ok(book) => {
            let show = |level: Option<(Fixed, Fixed)>| {
                level.map(|(price, _)| price.to_string()).unwrap_or_else(|| "N/A".to_string())
            };
            info!(
                "📊 DEPTH: {} - Bid: ${} | Ask: ${} | Spread: {}",
                book.symbol,
                show(book.best_bid()),
                show(book.best_ask()),
                book.spread().map(|s| s.to_string()).unwrap_or_else(|| "N/A".to_string())
            );
        }
        Err(e) => error!("❌ Order book stream error: {}", e),
    }

    match exchange.watch_ticker(SYMBOL).await {
        Ok(ticker) => {
            let change = ticker.change.unwrap_or(Fixed::ZERO);
            let change_emoji = if change >= Fixed::ZERO { "📈" } else { "📉" };
            info!(
                "{} TICKER: {} = ${} (24h: {})",
                change_emoji,
                ticker.symbol,
                ticker.last.map(|p| p.to_string()).unwrap_or_default(),
                change
            );
        }
        Err(e) => error!("❌ Ticker stream error: {}", e),
    }

    if has_credentials {
        match exchange.watch_balance(None).await {
            Ok(balances) => {
                for (currency, balance) in &balances.currencies {
                    info!(
                        "💰 {} {}: free {:?} used {:?} total {:?}",
                        balances.account, currency, balance.free, balance.used, balance.total
                    );
                }
            }
            Err(e) => warn!("⚠️  Balance stream unavailable: {}", e),
        }
    }

    exchange.close().await;
    info!("👋 Streaming demo finished");
    Ok(())
}
