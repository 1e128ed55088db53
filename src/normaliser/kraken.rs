//! Kraken websocket v1 `book` and `trade` channels
//!
//! Channel data arrives as `[channelID, payload.., channelName, pair]`. Book
//! payloads are aggregated price levels `[price, volume, timestamp]`; a zero
//! volume removes the level. Snapshots use the `as`/`bs` keys, updates `a`/`b`.

use ahash::AHashSet;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::{decimal_from_value, seconds_to_millis, LobRecord, NormalisedMessage, Normaliser, TradeRecord};
use crate::error::{MarketDataError, Result};
use crate::orderbook::{LobAction, Side};

/// Control message (`{"event": ...}`)
#[derive(Debug, Deserialize)]
struct EventMessage {
    event: String,
    status: Option<String>,
    pair: Option<String>,
    #[serde(rename = "channelName")]
    channel_name: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Default)]
pub struct KrakenNormaliser {
    /// Pairs whose book snapshot has been seen on this connection
    synced: AHashSet<String>,
}

impl KrakenNormaliser {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_event(&self, event: EventMessage) -> Result<Vec<NormalisedMessage>> {
        match (event.event.as_str(), event.status.as_deref()) {
            ("subscriptionStatus", Some("error")) => Err(MarketDataError::SubscriptionError(format!(
                "{} ({})",
                event.error_message.unwrap_or_default(),
                event.pair.unwrap_or_default()
            ))),
            ("subscriptionStatus", status) => {
                debug!(pair = ?event.pair, channel = ?event.channel_name, status = ?status, "Subscription status");
                Ok(Vec::new())
            }
            // heartbeat, systemStatus
            (other, _) => {
                trace!(event = %other, "Control message");
                Ok(Vec::new())
            }
        }
    }

    fn handle_book(&mut self, pair: &str, payloads: &[Value]) -> Result<Vec<NormalisedMessage>> {
        let mut messages = Vec::new();

        for payload in payloads {
            let sides = payload
                .as_object()
                .ok_or_else(|| MarketDataError::ParseError(format!("unexpected book payload {payload}")))?;

            if sides.contains_key("as") || sides.contains_key("bs") {
                self.synced.insert(pair.to_string());
                messages.push(NormalisedMessage::BookReset {
                    symbol: pair.to_string(),
                });
                for (key, side) in [("bs", Side::Buy), ("as", Side::Sell)] {
                    for level in levels(sides, key)? {
                        if !level.volume.is_zero() {
                            messages.push(level.record(pair, side, LobAction::Insert));
                        }
                    }
                }
                continue;
            }

            if !self.synced.contains(pair) {
                trace!(pair = %pair, "Book update before snapshot, skipping");
                continue;
            }
            for (key, side) in [("b", Side::Buy), ("a", Side::Sell)] {
                for level in levels(sides, key)? {
                    let action = if level.volume.is_zero() {
                        LobAction::Delete
                    } else {
                        LobAction::Update
                    };
                    messages.push(level.record(pair, side, action));
                }
            }
        }
        Ok(messages)
    }

    fn handle_trades(&self, pair: &str, payloads: &[Value]) -> Result<Vec<NormalisedMessage>> {
        let mut messages = Vec::new();
        for trades in payloads {
            let trades = trades
                .as_array()
                .ok_or_else(|| MarketDataError::ParseError(format!("unexpected trade payload {trades}")))?;

            // [price, volume, time, side, orderType, misc]
            for trade in trades {
                let fields = trade
                    .as_array()
                    .filter(|f| f.len() >= 4)
                    .ok_or_else(|| MarketDataError::ParseError(format!("malformed trade {trade}")))?;
                let side = match fields[3].as_str() {
                    Some("b") => Side::Buy,
                    Some("s") => Side::Sell,
                    _ => {
                        return Err(MarketDataError::ParseError(format!(
                            "unknown trade side {}",
                            fields[3]
                        )))
                    }
                };
                messages.push(NormalisedMessage::Trade(TradeRecord {
                    symbol: pair.to_string(),
                    timestamp: seconds_to_millis(&fields[2])?,
                    trade_id: None,
                    side,
                    price: decimal_from_value(&fields[0])?,
                    size: decimal_from_value(&fields[1])?,
                }));
            }
        }
        Ok(messages)
    }
}

impl Normaliser for KrakenNormaliser {
    fn normalise(&mut self, raw: &str, _received_at: u64) -> Result<Vec<NormalisedMessage>> {
        let value: Value = serde_json::from_str(raw)?;

        let items = match value {
            Value::Object(_) => return self.handle_event(serde_json::from_value(value)?),
            Value::Array(items) if items.len() >= 4 => items,
            other => {
                return Err(MarketDataError::ParseError(format!(
                    "unexpected message {other}"
                )))
            }
        };

        let count = items.len();
        let (Some(channel), Some(pair)) = (items[count - 2].as_str(), items[count - 1].as_str()) else {
            return Err(MarketDataError::ParseError(
                "channel data without channel name and pair".to_string(),
            ));
        };
        let payloads = &items[1..count - 2];

        // book-1000, trade
        if channel.starts_with("book") {
            self.handle_book(pair, payloads)
        } else if channel == "trade" {
            self.handle_trades(pair, payloads)
        } else {
            trace!(channel = %channel, "Unhandled channel");
            Ok(Vec::new())
        }
    }
}

struct BookLevel {
    price: Decimal,
    volume: Decimal,
    timestamp: u64,
}

impl BookLevel {
    fn record(&self, pair: &str, side: Side, action: LobAction) -> NormalisedMessage {
        NormalisedMessage::Lob(LobRecord {
            symbol: pair.to_string(),
            timestamp: self.timestamp,
            order_id: None,
            side,
            price: self.price,
            size: self.volume,
            action,
        })
    }
}

/// Levels under `key`; republished entries carry a trailing `"r"` flag
fn levels(sides: &Map<String, Value>, key: &str) -> Result<Vec<BookLevel>> {
    let Some(entries) = sides.get(key) else {
        return Ok(Vec::new());
    };
    let entries = entries
        .as_array()
        .ok_or_else(|| MarketDataError::ParseError(format!("expected a level list under {key}")))?;

    entries
        .iter()
        .map(|entry| match entry.as_array().map(Vec::as_slice) {
            Some([price, volume, timestamp, ..]) => Ok(BookLevel {
                price: decimal_from_value(price)?,
                volume: decimal_from_value(volume)?,
                timestamp: seconds_to_millis(timestamp)?,
            }),
            _ => Err(MarketDataError::ParseError(format!("invalid book level {entry}"))),
        })
        .collect()
}
