//! Configuration module for the market data handler

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;

use crate::exchange::Exchange;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Exchange to connect to
    pub exchange: Exchange,

    /// Trading symbols to subscribe to (e.g., ["tBTCUSD", "tETHUSD"])
    pub symbols: Vec<String>,

    /// WebSocket endpoint
    pub ws_endpoint: String,

    /// REST API endpoint for snapshots
    pub rest_endpoint: String,

    /// IPC socket path for publishing data
    pub ipc_socket_path: String,

    /// Order book depth levels to publish and bootstrap
    pub depth_levels: usize,

    /// Reconnection settings
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,

    /// Health check interval in seconds
    pub health_check_interval_secs: u64,

    /// Port of the health and metrics server
    pub health_port: u16,

    /// Recent events kept per book for error diagnostics
    pub journal_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let exchange: Exchange = lookup("EXCHANGE")
            .unwrap_or_else(|| "bitfinex".to_string())
            .parse()?;

        let symbols = match lookup("SYMBOLS_FILE") {
            Some(path) => symbols_from_file(&path, exchange)?,
            None => lookup("SYMBOLS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(|s| exchange.canonical_symbol(s))
                        .collect()
                })
                .unwrap_or_else(|| exchange.default_symbols()),
        };
        if symbols.is_empty() {
            anyhow::bail!("no symbols configured for {exchange}");
        }

        let defaults = Self::default();
        Ok(Self {
            exchange,
            symbols,
            ws_endpoint: lookup("WS_ENDPOINT")
                .unwrap_or_else(|| exchange.default_ws_endpoint().to_string()),
            rest_endpoint: lookup("REST_ENDPOINT")
                .unwrap_or_else(|| exchange.default_rest_endpoint().to_string()),
            ipc_socket_path: lookup("IPC_SOCKET_PATH").unwrap_or(defaults.ipc_socket_path),
            depth_levels: parse_or(&lookup, "DEPTH_LEVELS", defaults.depth_levels),
            reconnect_delay_ms: parse_or(&lookup, "RECONNECT_DELAY_MS", defaults.reconnect_delay_ms),
            max_reconnect_attempts: parse_or(
                &lookup,
                "MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            health_check_interval_secs: parse_or(
                &lookup,
                "HEALTH_CHECK_INTERVAL_SECS",
                defaults.health_check_interval_secs,
            ),
            health_port: parse_or(&lookup, "HEALTH_PORT", defaults.health_port),
            journal_capacity: parse_or(&lookup, "JOURNAL_CAPACITY", defaults.journal_capacity),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// Symbol file maps exchange names to symbol lists:
/// `{"bitfinex": ["tBTCUSD"], "apollox": ["BTCUSDT"]}`
fn symbols_from_file(path: &str, exchange: Exchange) -> anyhow::Result<Vec<String>> {
    let contents = fs::read_to_string(path).with_context(|| format!("reading symbols file {path}"))?;
    let mut by_exchange: HashMap<String, Vec<String>> =
        serde_json::from_str(&contents).with_context(|| format!("parsing symbols file {path}"))?;

    let symbols = by_exchange
        .remove(exchange.name())
        .with_context(|| format!("symbols file {path} has no entry for {exchange}"))?;
    Ok(symbols
        .iter()
        .map(|s| exchange.canonical_symbol(s.trim()))
        .collect())
}

impl Default for Config {
    fn default() -> Self {
        let exchange = Exchange::Bitfinex;
        Self {
            exchange,
            symbols: exchange.default_symbols(),
            ws_endpoint: exchange.default_ws_endpoint().to_string(),
            rest_endpoint: exchange.default_rest_endpoint().to_string(),
            ipc_socket_path: "/tmp/l3-market-data.sock".to_string(),
            depth_levels: 20,
            reconnect_delay_ms: 1000,
            max_reconnect_attempts: 10,
            health_check_interval_secs: 30,
            health_port: 9090,
            journal_capacity: 64,
        }
    }
}
