//! Raw push payload → normalized record
//!
//! `RecordParser` is the seam between the streaming engine and the
//! field-by-field mapping of one exchange's JSON. `DefaultParser` maps the
//! reference envelope, accepting the short and long field spellings seen in
//! practice (`p` / `price`, `q` / `v` / `volume`, ...).

use crate::errors::{ExchangeError, Result};
use crate::orderbook::BookUpdate;
use crate::types::{Balance, Market, Ohlcv, Order, OrderStatus, Side, TakerOrMaker, Ticker, Trade};
use serde_json::Value;
use sriquant_core::{iso8601, Fixed};

/// Pure functions from raw records to normalized ones
pub trait RecordParser {
    /// Book levels of a depth push (snapshot or delta)
    fn parse_order_book(&self, message: &Value, market: &Market) -> Result<BookUpdate>;

    fn parse_trade(&self, raw: &Value, market: &Market) -> Result<Trade>;

    /// `now` stamps tickers that carry no timestamp of their own
    fn parse_ticker(&self, raw: &Value, market: &Market, now: i64) -> Result<Ticker>;

    fn parse_ohlcv(&self, raw: &Value, market: &Market) -> Result<Ohlcv>;

    fn parse_order(&self, raw: &Value, market: &Market) -> Result<Order>;

    /// Currency code and balance of one wallet entry
    fn parse_balance(&self, raw: &Value) -> Result<(String, Balance)>;
}

/// First present key rendered as a string; numbers are kept verbatim
pub fn safe_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

pub fn safe_integer(value: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

pub fn safe_fixed(value: &Value, keys: &[&str]) -> Option<Fixed> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(|v| Fixed::from_json(v).ok()))
}

fn required_fixed(value: &Value, keys: &[&str], what: &str) -> Result<Fixed> {
    safe_fixed(value, keys)
        .ok_or_else(|| ExchangeError::InvalidResponse(format!("{what} missing in {value}")))
}

/// `[price, size]` arrays or `{price, volume}` objects
fn parse_levels(levels: Option<&Value>) -> Result<Vec<(Fixed, Fixed)>> {
    let Some(Value::Array(levels)) = levels else {
        return Ok(Vec::new());
    };
    levels
        .iter()
        .map(|level| match level {
            Value::Array(pair) if pair.len() >= 2 => {
                Ok((Fixed::from_json(&pair[0])?, Fixed::from_json(&pair[1])?))
            }
            Value::Object(_) => Ok((
                required_fixed(level, &["price", "p"], "level price")?,
                required_fixed(level, &["volume", "size", "amount", "q"], "level size")?,
            )),
            other => Err(ExchangeError::InvalidResponse(format!("bad book level {other}"))),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParser;

impl RecordParser for DefaultParser {
    fn parse_order_book(&self, message: &Value, market: &Market) -> Result<BookUpdate> {
        let data = message.get("data").unwrap_or(message);
        let timestamp = safe_integer(message, &["ts"]).or_else(|| safe_integer(data, &["ts", "T", "timestamp"]));
        Ok(BookUpdate {
            symbol: market.symbol.clone(),
            bids: parse_levels(data.get("bids").or_else(|| data.get("b")))?,
            asks: parse_levels(data.get("asks").or_else(|| data.get("a")))?,
            timestamp,
            nonce: safe_integer(data, &["u", "lastUpdateId"]).and_then(|n| u64::try_from(n).ok()),
        })
    }

    fn parse_trade(&self, raw: &Value, market: &Market) -> Result<Trade> {
        let timestamp = safe_integer(raw, &["t", "T", "E"]);
        let side = match safe_string(raw, &["S", "side"]) {
            Some(side) => Side::parse(&side),
            // Buyer is maker ⇒ the aggressor sold
            None => raw
                .get("m")
                .and_then(Value::as_bool)
                .map(|maker| if maker { Side::Sell } else { Side::Buy }),
        };
        let price = required_fixed(raw, &["p", "price"], "trade price")?;
        let amount = required_fixed(raw, &["q", "v", "volume", "amount"], "trade amount")?;
        let taker_or_maker = raw.get("isMaker").and_then(Value::as_bool).map(|maker| {
            if maker {
                TakerOrMaker::Maker
            } else {
                TakerOrMaker::Taker
            }
        });

        Ok(Trade {
            id: safe_string(raw, &["i", "id", "tradeId"]).or_else(|| timestamp.map(|ts| ts.to_string())),
            order: safe_string(raw, &["o", "orderId"]),
            symbol: market.symbol.clone(),
            timestamp,
            datetime: timestamp.and_then(iso8601),
            side,
            price,
            amount,
            cost: price.checked_mul(amount).ok(),
            taker_or_maker,
            fee: safe_fixed(raw, &["n", "fee"]).map(|cost| crate::types::Fee {
                cost,
                currency: safe_string(raw, &["N", "feeAsset"]),
            }),
        })
    }

    fn parse_ticker(&self, raw: &Value, market: &Market, now: i64) -> Result<Ticker> {
        let timestamp = safe_integer(raw, &["E", "ts", "time"]).unwrap_or(now);
        let last = safe_fixed(raw, &["c", "lastPrice", "indexPrice"]);
        let open = safe_fixed(raw, &["o", "open"]);
        Ok(Ticker {
            symbol: market.symbol.clone(),
            timestamp: Some(timestamp),
            datetime: iso8601(timestamp),
            high: safe_fixed(raw, &["h", "high"]),
            low: safe_fixed(raw, &["l", "low"]),
            bid: safe_fixed(raw, &["b", "bid1Price", "bidPrice"]),
            bid_volume: safe_fixed(raw, &["B", "bidSize", "bid1Size"]),
            ask: safe_fixed(raw, &["a", "ask1Price", "askPrice"]),
            ask_volume: safe_fixed(raw, &["A", "askSize", "ask1Size"]),
            open,
            close: last,
            last,
            change: safe_fixed(raw, &["p", "priceChange"]).or(match (last, open) {
                (Some(last), Some(open)) => last.checked_sub(open).ok(),
                _ => None,
            }),
            percentage: safe_fixed(raw, &["P", "changePercentage", "priceChangePercent"]),
            base_volume: safe_fixed(raw, &["v", "volume"]),
            quote_volume: safe_fixed(raw, &["q", "turnover", "quoteVolume"]),
        })
    }

    fn parse_ohlcv(&self, raw: &Value, market: &Market) -> Result<Ohlcv> {
        let field = |index: usize, keys: &[&str], what: &str| -> Result<Fixed> {
            match raw {
                Value::Array(values) => values
                    .get(index)
                    .ok_or_else(|| ExchangeError::InvalidResponse(format!("{what} missing in {raw}")))
                    .and_then(|v| Ok(Fixed::from_json(v)?)),
                _ => required_fixed(raw, keys, what),
            }
        };
        let timestamp = match raw {
            Value::Array(values) => values.first().and_then(|v| v.as_i64()),
            _ => safe_integer(raw, &["t", "T", "time", "start"]),
        }
        .ok_or_else(|| ExchangeError::InvalidResponse(format!("candle time missing in {raw}")))?;

        Ok(Ohlcv {
            symbol: market.symbol.clone(),
            timestamp,
            open: field(1, &["o", "open"], "open")?,
            high: field(2, &["h", "high"], "high")?,
            low: field(3, &["l", "low"], "low")?,
            close: field(4, &["c", "close"], "close")?,
            volume: field(5, &["v", "volume"], "volume")?,
        })
    }

    fn parse_order(&self, raw: &Value, market: &Market) -> Result<Order> {
        let id = safe_string(raw, &["i", "orderId"])
            .ok_or_else(|| ExchangeError::InvalidResponse(format!("order id missing in {raw}")))?;
        let timestamp = safe_integer(raw, &["O", "T", "E"]);
        let order_type = safe_string(raw, &["o", "type"]).map(|t| t.to_ascii_lowercase());
        let price = safe_fixed(raw, &["p", "price"]).filter(|p| !p.is_zero());
        let filled = safe_fixed(raw, &["z", "executedQty"]);
        let cost = safe_fixed(raw, &["Z", "cummulativeQuoteQty"]);
        // Quote-sized market orders report no base amount up front
        let amount = match order_type.as_deref() {
            Some("quote") => filled,
            _ => safe_fixed(raw, &["q", "origQty"]),
        };
        let order_type = order_type.map(|t| if t == "quote" { "market".to_string() } else { t });
        let remaining = match (amount, filled) {
            (Some(amount), Some(filled)) => amount.checked_sub(filled).ok(),
            _ => None,
        };
        let average = match (cost, filled) {
            (Some(cost), Some(filled)) if filled.is_positive() => cost.checked_div(filled).ok(),
            _ => None,
        };

        Ok(Order {
            id,
            client_order_id: safe_string(raw, &["c", "clientOrderId"]),
            symbol: market.symbol.clone(),
            timestamp,
            datetime: timestamp.and_then(iso8601),
            side: safe_string(raw, &["S", "side"]).and_then(|s| Side::parse(&s)),
            order_type,
            price,
            amount,
            filled,
            remaining,
            average,
            status: safe_string(raw, &["X", "status"]).and_then(|s| OrderStatus::parse(&s)),
        })
    }

    fn parse_balance(&self, raw: &Value) -> Result<(String, Balance)> {
        let currency = safe_string(raw, &["coin", "a", "asset"])
            .ok_or_else(|| ExchangeError::InvalidResponse(format!("currency missing in {raw}")))?;
        let balance = Balance {
            free: safe_fixed(raw, &["availableToWithdraw", "f", "free"]),
            used: safe_fixed(raw, &["l", "locked"]),
            total: safe_fixed(raw, &["walletBalance", "total"]),
        };
        Ok((currency.to_ascii_uppercase(), balance.complete()))
    }
}
