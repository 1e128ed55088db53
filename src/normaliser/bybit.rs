//! Bybit realtime `orderBook_200` and `trade` topics
//!
//! Book entries are aggregated per price. A snapshot replaces the book, then
//! deltas arrive grouped into delete, update and insert lists.

use ahash::AHashSet;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use super::{deserialize_number, LobRecord, NormalisedMessage, Normaliser, TradeRecord};
use crate::error::{MarketDataError, Result};
use crate::orderbook::{LobAction, Side};

/// Every frame Bybit sends: topic data or a request acknowledgement
#[derive(Debug, Deserialize)]
struct Frame {
    topic: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
    /// Microseconds, sent as a string on inverse contracts
    timestamp_e6: Option<Value>,
    success: Option<bool>,
    ret_msg: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
enum WireSide {
    Buy,
    Sell,
}

impl From<WireSide> for Side {
    fn from(side: WireSide) -> Self {
        match side {
            WireSide::Buy => Side::Buy,
            WireSide::Sell => Side::Sell,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BookEntry {
    #[serde(deserialize_with = "deserialize_number")]
    price: Decimal,
    side: WireSide,
    /// Missing on deletes
    #[serde(default, deserialize_with = "deserialize_number")]
    size: Decimal,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    delete: Vec<BookEntry>,
    #[serde(default)]
    update: Vec<BookEntry>,
    #[serde(default)]
    insert: Vec<BookEntry>,
}

/// Linear contracts wrap the snapshot entries in an object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Snapshot {
    Entries(Vec<BookEntry>),
    Wrapped { order_book: Vec<BookEntry> },
}

#[derive(Debug, Deserialize)]
struct Trade {
    trade_time_ms: u64,
    side: WireSide,
    #[serde(deserialize_with = "deserialize_number")]
    size: Decimal,
    #[serde(deserialize_with = "deserialize_number")]
    price: Decimal,
    trade_id: String,
}

#[derive(Debug, Default)]
pub struct BybitNormaliser {
    /// Symbols whose snapshot has been seen on this connection
    synced: AHashSet<String>,
}

impl BybitNormaliser {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_book(
        &mut self,
        symbol: &str,
        frame: Frame,
        received_at: u64,
    ) -> Result<Vec<NormalisedMessage>> {
        let timestamp = match &frame.timestamp_e6 {
            Some(micros) => micros_to_millis(micros)?,
            None => received_at,
        };

        match frame.kind.as_deref() {
            Some("snapshot") => {
                let entries = match serde_json::from_value::<Snapshot>(frame.data)? {
                    Snapshot::Entries(entries) => entries,
                    Snapshot::Wrapped { order_book } => order_book,
                };
                self.synced.insert(symbol.to_string());

                let mut messages = Vec::with_capacity(entries.len() + 1);
                messages.push(NormalisedMessage::BookReset {
                    symbol: symbol.to_string(),
                });
                messages.extend(
                    entries
                        .iter()
                        .filter(|entry| entry.size > Decimal::ZERO)
                        .map(|entry| level_record(symbol, timestamp, entry, LobAction::Insert)),
                );
                debug!(symbol = %symbol, levels = messages.len() - 1, "Snapshot normalised");
                Ok(messages)
            }
            Some("delta") => {
                if !self.synced.contains(symbol) {
                    trace!(symbol = %symbol, "Delta before snapshot, skipping");
                    return Ok(Vec::new());
                }
                let delta: Delta = serde_json::from_value(frame.data)?;

                let mut messages =
                    Vec::with_capacity(delta.delete.len() + delta.update.len() + delta.insert.len());
                for (entries, action) in [
                    (&delta.delete, LobAction::Delete),
                    (&delta.update, LobAction::Update),
                    (&delta.insert, LobAction::Insert),
                ] {
                    messages.extend(
                        entries
                            .iter()
                            .map(|entry| level_record(symbol, timestamp, entry, action)),
                    );
                }
                Ok(messages)
            }
            other => Err(MarketDataError::ParseError(format!(
                "unknown book frame type {other:?}"
            ))),
        }
    }
}

impl Normaliser for BybitNormaliser {
    fn normalise(&mut self, raw: &str, received_at: u64) -> Result<Vec<NormalisedMessage>> {
        let frame: Frame = serde_json::from_str(raw)?;

        let Some(topic) = frame.topic.clone() else {
            // {"success":false,"ret_msg":"error:handler not found",...}
            if frame.success == Some(false) {
                return Err(MarketDataError::SubscriptionError(
                    frame.ret_msg.unwrap_or_default(),
                ));
            }
            trace!(ret_msg = ?frame.ret_msg, "Request acknowledged");
            return Ok(Vec::new());
        };

        // orderBook_200.100ms.BTCUSD, trade.BTCUSD
        let (channel, symbol) = topic
            .rsplit_once('.')
            .ok_or_else(|| MarketDataError::ParseError(format!("unexpected topic {topic}")))?;

        if channel.starts_with("orderBook") {
            return self.handle_book(symbol, frame, received_at);
        }
        if channel == "trade" {
            let trades: Vec<Trade> = serde_json::from_value(frame.data)?;
            return Ok(trades
                .into_iter()
                .map(|trade| {
                    NormalisedMessage::Trade(TradeRecord {
                        symbol: symbol.to_string(),
                        timestamp: trade.trade_time_ms,
                        trade_id: Some(trade.trade_id),
                        side: trade.side.into(),
                        price: trade.price,
                        size: trade.size,
                    })
                })
                .collect());
        }

        trace!(topic = %topic, "Unhandled topic");
        Ok(Vec::new())
    }
}

fn level_record(symbol: &str, timestamp: u64, entry: &BookEntry, action: LobAction) -> NormalisedMessage {
    NormalisedMessage::Lob(LobRecord {
        symbol: symbol.to_string(),
        timestamp,
        order_id: None,
        side: entry.side.into(),
        price: entry.price,
        size: entry.size,
        action,
    })
}

fn micros_to_millis(value: &Value) -> Result<u64> {
    let micros = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    };
    micros
        .map(|m: u64| m / 1000)
        .ok_or_else(|| MarketDataError::ParseError(format!("invalid timestamp_e6 {value}")))
}
