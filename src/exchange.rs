//! Supported exchanges and their connection details

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

use crate::error::MarketDataError;
use crate::normaliser::{
    ApolloXNormaliser, BitfinexNormaliser, BybitNormaliser, KrakenNormaliser, Normaliser,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    /// Raw per-order books, feeds the L3 engine
    Bitfinex,
    /// Aggregated depth diffs with a REST bootstrap
    ApolloX,
    /// Aggregated 200-level book, snapshot then deltas
    Bybit,
    /// Aggregated book up to 1000 levels, snapshot then updates
    Kraken,
}

/// Message-bus stream a record is published on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Raw,
    Normalised,
    Trades,
    Book,
}

impl Exchange {
    pub fn name(&self) -> &'static str {
        match self {
            Exchange::Bitfinex => "bitfinex",
            Exchange::ApolloX => "apollox",
            Exchange::Bybit => "bybit",
            Exchange::Kraken => "kraken",
        }
    }

    /// Whether the feed identifies individual orders and so drives the L3 engine
    pub fn is_l3(&self) -> bool {
        matches!(self, Exchange::Bitfinex)
    }

    pub fn default_ws_endpoint(&self) -> &'static str {
        match self {
            Exchange::Bitfinex => "wss://api-pub.bitfinex.com/ws/2",
            Exchange::ApolloX => "wss://fstream.apollox.finance/ws/",
            Exchange::Bybit => "wss://stream.bybit.com/realtime",
            Exchange::Kraken => "wss://ws.kraken.com",
        }
    }

    pub fn default_rest_endpoint(&self) -> &'static str {
        match self {
            Exchange::Bitfinex => "https://api-pub.bitfinex.com/v2",
            Exchange::ApolloX => "https://fapi.apollox.finance/fapi/v1",
            Exchange::Bybit => "https://api.bybit.com",
            Exchange::Kraken => "https://api.kraken.com/0/public",
        }
    }

    pub fn default_symbols(&self) -> Vec<String> {
        match self {
            Exchange::Bitfinex => vec!["tBTCUSD".to_string()],
            Exchange::ApolloX => vec!["BTCUSDT".to_string()],
            Exchange::Bybit => vec!["BTCUSD".to_string()],
            Exchange::Kraken => vec!["XBT/USD".to_string()],
        }
    }

    /// Bitfinex symbols are case sensitive (`tBTCUSD`), the others upper case
    pub fn canonical_symbol(&self, symbol: &str) -> String {
        match self {
            Exchange::Bitfinex => symbol.to_string(),
            Exchange::ApolloX | Exchange::Bybit | Exchange::Kraken => symbol.to_uppercase(),
        }
    }

    /// Payloads to send once the socket is open
    pub fn subscriptions(&self, symbols: &[String]) -> Vec<String> {
        match self {
            Exchange::Bitfinex => symbols
                .iter()
                .flat_map(|symbol| {
                    [
                        json!({
                            "event": "subscribe",
                            "channel": "book",
                            "symbol": symbol,
                            "prec": "R0",
                            "len": "250"
                        }),
                        json!({
                            "event": "subscribe",
                            "channel": "trades",
                            "symbol": symbol
                        }),
                    ]
                })
                .map(|payload| payload.to_string())
                .collect(),
            Exchange::ApolloX => symbols
                .iter()
                .enumerate()
                .map(|(i, symbol)| {
                    let s_lower = symbol.to_lowercase();
                    json!({
                        "method": "SUBSCRIBE",
                        "params": [
                            format!("{}@aggTrade", s_lower),
                            format!("{}@depth@100ms", s_lower)
                        ],
                        "id": i + 1
                    })
                    .to_string()
                })
                .collect(),
            Exchange::Bybit => symbols
                .iter()
                .map(|symbol| {
                    json!({
                        "op": "subscribe",
                        "args": [
                            format!("orderBook_200.100ms.{symbol}"),
                            format!("trade.{symbol}")
                        ]
                    })
                    .to_string()
                })
                .collect(),
            Exchange::Kraken => symbols
                .iter()
                .flat_map(|symbol| {
                    [
                        json!({
                            "event": "subscribe",
                            "pair": [symbol],
                            "subscription": { "name": "book", "depth": 1000 }
                        }),
                        json!({
                            "event": "subscribe",
                            "pair": [symbol],
                            "subscription": { "name": "trade" }
                        }),
                    ]
                })
                .map(|payload| payload.to_string())
                .collect(),
        }
    }

    /// REST bootstrap location; only ApolloX needs one, the others snapshot over the socket
    pub fn snapshot_url(&self, rest_endpoint: &str, symbol: &str, depth: usize) -> Option<String> {
        match self {
            Exchange::Bitfinex | Exchange::Bybit | Exchange::Kraken => None,
            Exchange::ApolloX => Some(format!(
                "{}/depth?symbol={}&limit={}",
                rest_endpoint.trim_end_matches('/'),
                symbol.to_uppercase(),
                snapshot_limit(depth)
            )),
        }
    }

    pub fn normaliser(&self) -> Box<dyn Normaliser> {
        match self {
            Exchange::Bitfinex => Box::new(BitfinexNormaliser::new()),
            Exchange::ApolloX => Box::new(ApolloXNormaliser::new()),
            Exchange::Bybit => Box::new(BybitNormaliser::new()),
            Exchange::Kraken => Box::new(KrakenNormaliser::new()),
        }
    }

    pub fn topic(&self, topic: Topic) -> String {
        let suffix = match topic {
            Topic::Raw => "raw",
            Topic::Normalised => "normalised",
            Topic::Trades => "trades",
            Topic::Book => "book",
        };
        format!("{}-{}", self.name(), suffix)
    }
}

/// Smallest depth limit the futures REST API accepts that covers `depth`
fn snapshot_limit(depth: usize) -> usize {
    const LIMITS: [usize; 7] = [5, 10, 20, 50, 100, 500, 1000];
    LIMITS
        .iter()
        .copied()
        .find(|&limit| limit >= depth)
        .unwrap_or(1000)
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Exchange {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bitfinex" => Ok(Exchange::Bitfinex),
            "apollox" => Ok(Exchange::ApolloX),
            "bybit" => Ok(Exchange::Bybit),
            "kraken" => Ok(Exchange::Kraken),
            other => Err(MarketDataError::ConfigError(format!(
                "unsupported exchange: {other}"
            ))),
        }
    }
}
