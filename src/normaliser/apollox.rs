//! ApolloX futures streams (Binance futures wire format)
//!
//! Depth diffs are aggregated per price, so they are published as L2 records
//! and never reach the L3 engine.

use ahash::AHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, trace};

use super::{LobRecord, NormalisedMessage, Normaliser, TradeRecord};
use crate::error::{MarketDataError, Result};
use crate::orderbook::{LobAction, Side};

/// Depth diff event
#[derive(Debug, Clone, Deserialize)]
pub struct DepthUpdate {
    /// Event time (milliseconds)
    #[serde(rename = "E")]
    pub event_time: u64,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// First update ID in event
    #[serde(rename = "U")]
    pub first_update_id: u64,

    /// Final update ID in event
    #[serde(rename = "u")]
    pub final_update_id: u64,

    /// Final update ID of the previous event
    #[serde(rename = "pu", default)]
    pub previous_update_id: Option<u64>,

    /// Bids to update
    #[serde(rename = "b", deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    /// Asks to update
    #[serde(rename = "a", deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

/// Aggregated trade event
#[derive(Debug, Clone, Deserialize)]
pub struct AggTrade {
    /// Event time
    #[serde(rename = "E")]
    pub event_time: u64,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Aggregate trade ID
    #[serde(rename = "a")]
    pub trade_id: u64,

    /// Price
    #[serde(rename = "p", deserialize_with = "deserialize_decimal")]
    pub price: Decimal,

    /// Quantity
    #[serde(rename = "q", deserialize_with = "deserialize_decimal")]
    pub quantity: Decimal,

    /// Trade time
    #[serde(rename = "T")]
    pub trade_time: u64,

    /// Is buyer maker
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

/// Price level (price, quantity pair)
#[derive(Debug, Clone)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Order book snapshot from REST API
#[derive(Debug, Clone, Deserialize)]
pub struct DepthSnapshot {
    /// Last update ID
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,

    /// Message output time
    #[serde(rename = "E", default)]
    pub event_time: Option<u64>,

    /// Bids
    #[serde(deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    /// Asks
    #[serde(deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

#[derive(Debug, Default)]
pub struct ApolloXNormaliser {
    /// Final update id of the last applied diff (or the snapshot), per symbol
    last_update_ids: AHashMap<String, u64>,
}

impl ApolloXNormaliser {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_depth(&mut self, update: DepthUpdate) -> Result<Vec<NormalisedMessage>> {
        let Some(last) = self.last_update_ids.get(&update.symbol).copied() else {
            trace!(symbol = %update.symbol, "Depth update before snapshot, skipping");
            return Ok(Vec::new());
        };

        if update.final_update_id < last {
            trace!(symbol = %update.symbol, u = update.final_update_id, "Stale depth update");
            return Ok(Vec::new());
        }
        // the first diff after a snapshot straddles it; later ones must chain on `pu`
        let straddles_snapshot = update.first_update_id <= last;
        if !straddles_snapshot {
            if let Some(previous) = update.previous_update_id {
                if previous != last {
                    return Err(MarketDataError::SequenceMismatch {
                        symbol: update.symbol,
                        expected: last,
                        got: previous,
                    });
                }
            }
        }
        self.last_update_ids
            .insert(update.symbol.clone(), update.final_update_id);

        let mut messages = Vec::with_capacity(update.bids.len() + update.asks.len());
        for (side, levels) in [(Side::Buy, &update.bids), (Side::Sell, &update.asks)] {
            for level in levels {
                let action = if level.quantity.is_zero() {
                    LobAction::Delete
                } else {
                    LobAction::Update
                };
                messages.push(NormalisedMessage::Lob(level_record(
                    &update.symbol,
                    update.event_time,
                    side,
                    level,
                    action,
                )));
            }
        }
        Ok(messages)
    }
}

impl Normaliser for ApolloXNormaliser {
    fn normalise(&mut self, raw: &str, _received_at: u64) -> Result<Vec<NormalisedMessage>> {
        let value: Value = serde_json::from_str(raw)?;

        let event_type = value.get("e").and_then(Value::as_str).map(str::to_owned);

        match event_type.as_deref() {
            Some("depthUpdate") => self.handle_depth(serde_json::from_value(value)?),
            Some("aggTrade") => {
                let trade: AggTrade = serde_json::from_value(value)?;
                Ok(vec![NormalisedMessage::Trade(TradeRecord {
                    symbol: trade.symbol,
                    timestamp: trade.trade_time,
                    trade_id: Some(trade.trade_id.to_string()),
                    side: if trade.is_buyer_maker { Side::Sell } else { Side::Buy },
                    price: trade.price,
                    size: trade.quantity,
                })])
            }
            Some(other) => {
                trace!(event = %other, "Unhandled event type");
                Ok(Vec::new())
            }
            // subscription acks: {"result":null,"id":1}
            None => Ok(Vec::new()),
        }
    }

    fn normalise_snapshot(
        &mut self,
        symbol: &str,
        raw: &str,
        received_at: u64,
    ) -> Result<Vec<NormalisedMessage>> {
        let snapshot: DepthSnapshot = serde_json::from_str(raw)?;
        let timestamp = snapshot.event_time.unwrap_or(received_at);

        let mut messages = Vec::with_capacity(snapshot.bids.len() + snapshot.asks.len() + 1);
        messages.push(NormalisedMessage::BookReset {
            symbol: symbol.to_string(),
        });
        for (side, levels) in [(Side::Buy, &snapshot.bids), (Side::Sell, &snapshot.asks)] {
            messages.extend(
                levels
                    .iter()
                    .filter(|level| level.quantity > Decimal::ZERO)
                    .map(|level| {
                        NormalisedMessage::Lob(level_record(symbol, timestamp, side, level, LobAction::Insert))
                    }),
            );
        }

        debug!(symbol = %symbol, last_update_id = snapshot.last_update_id, "Snapshot normalised");
        self.last_update_ids
            .insert(symbol.to_string(), snapshot.last_update_id);
        Ok(messages)
    }
}

fn level_record(symbol: &str, timestamp: u64, side: Side, level: &PriceLevel, action: LobAction) -> LobRecord {
    LobRecord {
        symbol: symbol.to_string(),
        timestamp,
        order_id: None,
        side,
        price: level.price,
        size: level.quantity,
        action,
    }
}

/// Custom deserializer for Decimal from string
fn deserialize_decimal<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Decimal::from_str(&s).map_err(serde::de::Error::custom)
}

/// Custom deserializer for price levels from array of string pairs
fn deserialize_price_levels<'de, D>(deserializer: D) -> std::result::Result<Vec<PriceLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<String>> = Deserialize::deserialize(deserializer)?;
    raw.into_iter()
        .map(|pair| {
            if pair.len() != 2 {
                return Err(serde::de::Error::custom("Invalid price level format"));
            }
            Ok(PriceLevel {
                price: Decimal::from_str(&pair[0]).map_err(serde::de::Error::custom)?,
                quantity: Decimal::from_str(&pair[1]).map_err(serde::de::Error::custom)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SNAPSHOT: &str = r#"{
        "lastUpdateId": 100,
        "E": 1672531200000,
        "T": 1672531200000,
        "bids": [["50000.00", "1.5"], ["49999.00", "0"]],
        "asks": [["50001.00", "1.0"]]
    }"#;

    fn depth(first: u64, last: u64, previous: u64) -> String {
        format!(
            r#"{{
                "e": "depthUpdate",
                "E": 1672531200100,
                "T": 1672531200099,
                "s": "BTCUSDT",
                "U": {first},
                "u": {last},
                "pu": {previous},
                "b": [["50000.00", "0"]],
                "a": [["50002.00", "0.5"]]
            }}"#
        )
    }

    fn synced() -> ApolloXNormaliser {
        let mut normaliser = ApolloXNormaliser::new();
        normaliser.normalise_snapshot("BTCUSDT", SNAPSHOT, 0).unwrap();
        normaliser
    }

    #[test]
    fn test_snapshot_skips_empty_levels() {
        let mut normaliser = ApolloXNormaliser::new();
        let messages = normaliser.normalise_snapshot("BTCUSDT", SNAPSHOT, 0).unwrap();

        assert_eq!(messages.len(), 3);
        assert!(matches!(messages[0], NormalisedMessage::BookReset { .. }));
        match &messages[1] {
            NormalisedMessage::Lob(record) => {
                assert_eq!(record.price, dec!(50000.00));
                assert_eq!(record.action, LobAction::Insert);
                assert_eq!(record.order_id, None);
                assert_eq!(record.timestamp, 1672531200000);
            }
            other => panic!("Expected Lob, got {other:?}"),
        }
    }

    #[test]
    fn test_depth_update_maps_zero_quantity_to_delete() {
        let mut normaliser = synced();
        let messages = normaliser.normalise(&depth(95, 105, 94), 0).unwrap();

        let actions: Vec<(Side, LobAction)> = messages
            .iter()
            .map(|m| match m {
                NormalisedMessage::Lob(r) => (r.side, r.action),
                other => panic!("Expected Lob, got {other:?}"),
            })
            .collect();
        assert_eq!(
            actions,
            vec![(Side::Buy, LobAction::Delete), (Side::Sell, LobAction::Update)]
        );
    }

    #[test]
    fn test_updates_before_snapshot_and_stale_updates_are_dropped() {
        let mut normaliser = ApolloXNormaliser::new();
        assert!(normaliser.normalise(&depth(95, 105, 94), 0).unwrap().is_empty());

        let mut normaliser = synced();
        assert!(normaliser.normalise(&depth(90, 99, 89), 0).unwrap().is_empty());
    }

    #[test]
    fn test_sequence_gap_is_reported() {
        let mut normaliser = synced();
        normaliser.normalise(&depth(95, 105, 94), 0).unwrap();
        normaliser.normalise(&depth(106, 110, 105), 0).unwrap();

        let err = normaliser.normalise(&depth(115, 120, 114), 0).unwrap_err();
        assert!(err.requires_resync());
        match err {
            MarketDataError::SequenceMismatch { expected, got, .. } => {
                assert_eq!(expected, 110);
                assert_eq!(got, 114);
            }
            other => panic!("Expected SequenceMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_agg_trade() {
        let raw = r#"{
            "e": "aggTrade",
            "E": 123456789,
            "s": "BTCUSDT",
            "a": 5933014,
            "p": "0.001",
            "q": "100",
            "f": 100,
            "l": 105,
            "T": 123456785,
            "m": true
        }"#;
        let messages = ApolloXNormaliser::new().normalise(raw, 0).unwrap();
        match &messages[0] {
            NormalisedMessage::Trade(trade) => {
                assert_eq!(trade.side, Side::Sell);
                assert_eq!(trade.price, dec!(0.001));
                assert_eq!(trade.timestamp, 123456785);
            }
            other => panic!("Expected Trade, got {other:?}"),
        }
    }

    #[test]
    fn test_subscription_ack_is_ignored() {
        let messages = ApolloXNormaliser::new()
            .normalise(r#"{"result":null,"id":1}"#, 0)
            .unwrap();
        assert!(messages.is_empty());
    }
}
