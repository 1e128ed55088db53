//! Normaliser module
//!
//! Turns exchange wire messages into canonical book and trade records.

mod apollox;
mod bitfinex;
mod bybit;
mod kraken;

pub use apollox::ApolloXNormaliser;
pub use bitfinex::BitfinexNormaliser;
pub use bybit::BybitNormaliser;
pub use kraken::KrakenNormaliser;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::error::{MarketDataError, Result};
use crate::orderbook::{LobAction, LobEvent, OrderId, Side};

/// Canonical book record published downstream
///
/// L3 feeds carry the exchange order id; L2 feeds leave it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobRecord {
    pub symbol: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub order_id: Option<OrderId>,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub action: LobAction,
}

impl LobRecord {
    /// Book event for the L3 engine, `None` for aggregated (L2) records
    pub fn to_event(&self) -> Option<LobEvent> {
        let order_id = self.order_id?;
        Some(match self.action {
            LobAction::Insert => LobEvent::Insert {
                order_id,
                price: self.price,
                size: self.size,
                side: self.side,
            },
            LobAction::Delete => LobEvent::Delete { order_id },
            LobAction::Update => LobEvent::Update {
                order_id,
                price: self.price,
                size: self.size,
                side: self.side,
            },
        })
    }
}

/// Canonical trade record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub timestamp: u64,
    /// Absent on feeds that do not number their trades (Kraken)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub trade_id: Option<String>,
    /// Aggressor side
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// Output of a normaliser
#[derive(Debug, Clone, PartialEq)]
pub enum NormalisedMessage {
    /// A full snapshot follows; the symbol's book starts over
    BookReset { symbol: String },
    Lob(LobRecord),
    Trade(TradeRecord),
}

/// Exchange-specific wire format translation
///
/// Implementations may keep per-connection state (channel ids, live orders,
/// sequence numbers) and are recreated on every reconnect.
pub trait Normaliser: Send {
    /// Translate one websocket message
    fn normalise(&mut self, raw: &str, received_at: u64) -> Result<Vec<NormalisedMessage>>;

    /// Translate a REST snapshot body for `symbol`
    fn normalise_snapshot(
        &mut self,
        _symbol: &str,
        _raw: &str,
        _received_at: u64,
    ) -> Result<Vec<NormalisedMessage>> {
        Ok(Vec::new())
    }
}

/// Decimal from a JSON number or numeric string
pub(crate) fn decimal_from_value(value: &Value) -> Result<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => {
            return Err(MarketDataError::ParseError(format!(
                "expected a number, got {other}"
            )))
        }
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| MarketDataError::ParseError(format!("invalid decimal {text}: {e}")))
}

/// Serde adapter for fields sent either as a JSON number or a numeric string
pub(crate) fn deserialize_number<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    decimal_from_value(&value).map_err(serde::de::Error::custom)
}

/// Fractional epoch seconds (`"1534614248.123678"`) to whole milliseconds
pub(crate) fn seconds_to_millis(value: &Value) -> Result<u64> {
    let seconds = decimal_from_value(value)?;
    (seconds * Decimal::from(1000))
        .trunc()
        .to_u64()
        .ok_or_else(|| MarketDataError::ParseError(format!("timestamp out of range: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn record(order_id: Option<u64>, action: LobAction) -> LobRecord {
        LobRecord {
            symbol: "tBTCUSD".to_string(),
            timestamp: 1,
            order_id: order_id.map(OrderId),
            side: Side::Sell,
            price: dec!(10),
            size: dec!(2),
            action,
        }
    }

    #[test]
    fn test_l3_record_to_event() {
        assert_eq!(
            record(Some(4), LobAction::Delete).to_event(),
            Some(LobEvent::Delete { order_id: OrderId(4) })
        );
        assert_eq!(
            record(Some(4), LobAction::Update).to_event(),
            Some(LobEvent::Update {
                order_id: OrderId(4),
                price: dec!(10),
                size: dec!(2),
                side: Side::Sell,
            })
        );
    }

    #[test]
    fn test_l2_record_has_no_event() {
        assert_eq!(record(None, LobAction::Update).to_event(), None);
    }

    #[test]
    fn test_decimal_from_value() {
        assert_eq!(decimal_from_value(&json!(0.1)).unwrap(), dec!(0.1));
        assert_eq!(decimal_from_value(&json!("50000.50")).unwrap(), dec!(50000.50));
        assert_eq!(decimal_from_value(&json!(1e-8)).unwrap(), dec!(0.00000001));
        assert!(decimal_from_value(&json!(null)).is_err());
    }

    #[test]
    fn test_seconds_to_millis() {
        assert_eq!(seconds_to_millis(&json!("1534614248.123678")).unwrap(), 1534614248123);
        assert_eq!(seconds_to_millis(&json!(12)).unwrap(), 12000);
        assert!(seconds_to_millis(&json!("-1")).is_err());
    }
}
