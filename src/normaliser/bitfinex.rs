//! Bitfinex raw ("R0") order book and trade channels
//!
//! Raw book entries are `[order_id, price, amount]`. A zero price removes the
//! order, the sign of the amount gives the side. Bitfinex does not say whether
//! an entry is new or an amendment, so live order ids are tracked per symbol.

use ahash::{AHashMap, AHashSet};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use super::{decimal_from_value, LobRecord, NormalisedMessage, Normaliser, TradeRecord};
use crate::error::{MarketDataError, Result};
use crate::orderbook::{LobAction, OrderId, Side};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Channel {
    Book { symbol: String },
    Trades { symbol: String },
}

/// Control message (`{"event": ...}`)
#[derive(Debug, Deserialize)]
struct EventMessage {
    event: String,
    #[serde(rename = "chanId")]
    chan_id: Option<u64>,
    channel: Option<String>,
    symbol: Option<String>,
    msg: Option<String>,
    code: Option<i64>,
}

#[derive(Debug, Default)]
pub struct BitfinexNormaliser {
    channels: AHashMap<u64, Channel>,
    live_orders: AHashMap<String, AHashSet<OrderId>>,
}

impl BitfinexNormaliser {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_event(&mut self, event: EventMessage) -> Result<Vec<NormalisedMessage>> {
        match event.event.as_str() {
            "subscribed" => {
                let (Some(chan_id), Some(channel), Some(symbol)) =
                    (event.chan_id, event.channel, event.symbol)
                else {
                    return Err(MarketDataError::ParseError(
                        "subscribed event without chanId/channel/symbol".to_string(),
                    ));
                };
                let channel = match channel.as_str() {
                    "book" => Channel::Book { symbol },
                    "trades" => Channel::Trades { symbol },
                    other => {
                        debug!(channel = %other, "Ignoring unsupported channel");
                        return Ok(Vec::new());
                    }
                };
                debug!(chan_id, channel = ?channel, "Channel subscribed");
                self.channels.insert(chan_id, channel);
                Ok(Vec::new())
            }
            "error" => Err(MarketDataError::SubscriptionError(format!(
                "{} (code {})",
                event.msg.unwrap_or_default(),
                event.code.unwrap_or_default()
            ))),
            other => {
                trace!(event = %other, "Control message");
                Ok(Vec::new())
            }
        }
    }

    fn handle_book(&mut self, symbol: &str, payload: &Value, received_at: u64) -> Result<Vec<NormalisedMessage>> {
        let entries = payload
            .as_array()
            .ok_or_else(|| MarketDataError::ParseError(format!("unexpected book payload {payload}")))?;

        // a snapshot is an array of entries, an update is a single entry
        if entries.first().map_or(true, Value::is_array) {
            let live = self.live_orders.entry(symbol.to_string()).or_default();
            live.clear();

            let mut messages = Vec::with_capacity(entries.len() + 1);
            messages.push(NormalisedMessage::BookReset {
                symbol: symbol.to_string(),
            });
            for entry in entries {
                let raw = RawEntry::parse(entry)?;
                if raw.price.is_zero() {
                    continue;
                }
                live.insert(raw.order_id);
                messages.push(NormalisedMessage::Lob(raw.record(symbol, received_at, LobAction::Insert)));
            }
            return Ok(messages);
        }

        let raw = RawEntry::parse(payload)?;
        let live = self.live_orders.entry(symbol.to_string()).or_default();
        let action = if raw.price.is_zero() {
            live.remove(&raw.order_id);
            LobAction::Delete
        } else if live.insert(raw.order_id) {
            LobAction::Insert
        } else {
            LobAction::Update
        };
        Ok(vec![NormalisedMessage::Lob(raw.record(symbol, received_at, action))])
    }

    fn handle_trades(&self, symbol: &str, items: &[Value]) -> Result<Vec<NormalisedMessage>> {
        // [chan, "te", [id, mts, amount, price]]; snapshots and "tu" repeats are skipped
        if items.get(1).and_then(Value::as_str) != Some("te") {
            return Ok(Vec::new());
        }
        let fields = items
            .get(2)
            .and_then(Value::as_array)
            .filter(|f| f.len() >= 4)
            .ok_or_else(|| MarketDataError::ParseError("malformed trade execution".to_string()))?;

        let amount = decimal_from_value(&fields[2])?;
        Ok(vec![NormalisedMessage::Trade(TradeRecord {
            symbol: symbol.to_string(),
            timestamp: as_u64(&fields[1])?,
            trade_id: Some(as_u64(&fields[0])?.to_string()),
            side: if amount.is_sign_negative() { Side::Sell } else { Side::Buy },
            price: decimal_from_value(&fields[3])?,
            size: amount.abs(),
        })])
    }
}

impl Normaliser for BitfinexNormaliser {
    fn normalise(&mut self, raw: &str, received_at: u64) -> Result<Vec<NormalisedMessage>> {
        let value: Value = serde_json::from_str(raw)?;

        let items = match value {
            Value::Object(_) => return self.handle_event(serde_json::from_value(value)?),
            Value::Array(items) => items,
            other => {
                return Err(MarketDataError::ParseError(format!(
                    "unexpected message {other}"
                )))
            }
        };

        let Some(chan_id) = items.first().and_then(Value::as_u64) else {
            return Err(MarketDataError::ParseError("missing channel id".to_string()));
        };
        // heartbeat
        if items.get(1).and_then(Value::as_str) == Some("hb") {
            return Ok(Vec::new());
        }

        match self.channels.get(&chan_id).cloned() {
            Some(Channel::Book { symbol }) => match items.get(1) {
                Some(payload) => self.handle_book(&symbol, payload, received_at),
                None => Ok(Vec::new()),
            },
            Some(Channel::Trades { symbol }) => self.handle_trades(&symbol, &items),
            None => {
                trace!(chan_id, "Message for unknown channel");
                Ok(Vec::new())
            }
        }
    }
}

struct RawEntry {
    order_id: OrderId,
    price: Decimal,
    amount: Decimal,
}

impl RawEntry {
    fn parse(value: &Value) -> Result<Self> {
        match value.as_array().map(Vec::as_slice) {
            Some([id, price, amount]) => Ok(Self {
                order_id: OrderId(as_u64(id)?),
                price: decimal_from_value(price)?,
                amount: decimal_from_value(amount)?,
            }),
            _ => Err(MarketDataError::ParseError(format!(
                "invalid raw book entry {value}"
            ))),
        }
    }

    fn record(&self, symbol: &str, timestamp: u64, action: LobAction) -> LobRecord {
        LobRecord {
            symbol: symbol.to_string(),
            timestamp,
            order_id: Some(self.order_id),
            side: if self.amount.is_sign_negative() { Side::Sell } else { Side::Buy },
            price: self.price,
            size: self.amount.abs(),
            action,
        }
    }
}

fn as_u64(value: &Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| MarketDataError::ParseError(format!("expected an unsigned integer, got {value}")))
}
