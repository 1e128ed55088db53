//! Routes normalised messages into the books and onto the bus

use tracing::{debug, trace};

use crate::error::{MarketDataError, Result};
use crate::exchange::Topic;
use crate::normaliser::{LobRecord, NormalisedMessage, Normaliser};
use crate::AppState;

/// Normalise one raw websocket message and dispatch the result
pub async fn process_message(
    state: &AppState,
    normaliser: &mut dyn Normaliser,
    raw: &str,
    received_at: u64,
) -> Result<()> {
    let exchange = state.config.exchange;
    state.stats.message_received(exchange.name());
    state.publisher.publish(&exchange.topic(Topic::Raw), &raw).await?;

    let messages = normaliser.normalise(raw, received_at)?;
    dispatch(state, messages).await
}

/// Apply book records, then publish every record on its topic
///
/// Stops at the first book error: the book has been discarded and the
/// session needs a fresh snapshot.
pub async fn dispatch(state: &AppState, messages: Vec<NormalisedMessage>) -> Result<()> {
    let exchange = state.config.exchange;

    for message in messages {
        match message {
            NormalisedMessage::BookReset { symbol } if exchange.is_l3() => {
                debug!(symbol = %symbol, "Snapshot starting, resetting book");
                state.orderbook_manager.write().await.reset(&symbol);
            }
            NormalisedMessage::BookReset { symbol } => {
                trace!(symbol = %symbol, "Aggregated snapshot starting");
            }
            NormalisedMessage::Lob(record) => {
                let top_changed = apply_record(state, &record).await?;
                state
                    .publisher
                    .publish(&exchange.topic(Topic::Normalised), &record)
                    .await?;

                if top_changed {
                    let book_state = state
                        .orderbook_manager
                        .read()
                        .await
                        .get_state(&record.symbol)
                        .map_err(|source| MarketDataError::Book {
                            symbol: record.symbol.clone(),
                            source,
                        })?;
                    if let Some(book_state) = book_state {
                        state
                            .publisher
                            .publish(&exchange.topic(Topic::Book), &book_state)
                            .await?;
                    }
                }
            }
            NormalisedMessage::Trade(trade) => {
                trace!(
                    symbol = %trade.symbol,
                    price = %trade.price,
                    qty = %trade.size,
                    "Trade received"
                );
                state
                    .publisher
                    .publish(&exchange.topic(Topic::Trades), &trade)
                    .await?;
            }
        }
    }
    Ok(())
}

/// Feed an L3 record to its book; aggregated records pass straight through
async fn apply_record(state: &AppState, record: &LobRecord) -> Result<bool> {
    let Some(event) = record.to_event() else {
        return Ok(false);
    };

    let mut manager = state.orderbook_manager.write().await;
    match manager.apply(&record.symbol, &event, record.timestamp) {
        Ok(top_changed) => {
            let resting = manager
                .book(&record.symbol)
                .map(|book| book.order_count())
                .unwrap_or_default();
            state.stats.event_applied(&record.symbol, event.action(), resting);
            Ok(top_changed)
        }
        Err(source) => {
            state.stats.book_error(&record.symbol, &source);
            Err(MarketDataError::Book {
                symbol: record.symbol.clone(),
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exchange::Exchange;
    use crate::error::BookError;
    use crate::normaliser::{BitfinexNormaliser, KrakenNormaliser};
    use crate::orderbook::{Level, OrderBookManager, Side};
    use crate::publisher::Publisher;
    use crate::stats::FeedStats;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    async fn test_state(exchange: Exchange) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("absent.sock");
        let state = AppState {
            orderbook_manager: Arc::new(RwLock::new(OrderBookManager::new())),
            publisher: Arc::new(Publisher::new(socket.to_str().unwrap()).await.unwrap()),
            config: Arc::new(Config {
                exchange,
                ..Config::default()
            }),
            stats: FeedStats::new().unwrap(),
        };
        (state, dir)
    }

    async fn feed(state: &AppState, normaliser: &mut dyn Normaliser, raw: &str) -> Result<()> {
        process_message(state, normaliser, raw, 1_700_000_000_000).await
    }

    #[tokio::test]
    async fn test_raw_book_stream_builds_l3_book() {
        let (state, _dir) = test_state(Exchange::Bitfinex).await;
        let mut normaliser = BitfinexNormaliser::new();

        feed(&state, &mut normaliser, r#"{"event":"subscribed","channel":"book","chanId":5,"symbol":"tBTCUSD","prec":"R0"}"#)
            .await
            .unwrap();
        feed(&state, &mut normaliser, r#"[5,[[1,100,2],[2,100,3],[3,101,-1]]]"#)
            .await
            .unwrap();
        feed(&state, &mut normaliser, r#"[5,[4,100.5,1]]"#).await.unwrap();
        feed(&state, &mut normaliser, r#"[5,[4,0,1]]"#).await.unwrap();

        let manager = state.orderbook_manager.read().await;
        let book = manager.book("tBTCUSD").unwrap();
        assert_eq!(
            book.top_of_book(Side::Buy),
            Some(Level { price: dec!(100), size: dec!(5) })
        );
        assert_eq!(
            book.top_of_book(Side::Sell),
            Some(Level { price: dec!(101), size: dec!(1) })
        );
        book.verify_integrity().unwrap();
    }

    #[tokio::test]
    async fn test_book_error_requests_resync() {
        let (state, _dir) = test_state(Exchange::Bitfinex).await;
        let mut normaliser = BitfinexNormaliser::new();

        feed(&state, &mut normaliser, r#"{"event":"subscribed","channel":"book","chanId":5,"symbol":"tBTCUSD","prec":"R0"}"#)
            .await
            .unwrap();
        feed(&state, &mut normaliser, r#"[5,[[1,100,2]]]"#).await.unwrap();

        // the bid flips to the ask side
        let err = feed(&state, &mut normaliser, r#"[5,[1,100,-2]]"#)
            .await
            .unwrap_err();
        assert!(err.requires_resync());
        assert!(matches!(
            err,
            MarketDataError::Book {
                source: BookError::UnsupportedSideChange { .. },
                ..
            }
        ));
        assert!(state.orderbook_manager.read().await.book("tBTCUSD").is_none());
    }

    #[tokio::test]
    async fn test_aggregated_feed_keeps_no_book() {
        let (state, _dir) = test_state(Exchange::Kraken).await;
        let mut normaliser = KrakenNormaliser::new();

        feed(
            &state,
            &mut normaliser,
            r#"[0,{"as":[["5541.3","2.5","1534614248.1"]],"bs":[["5541.2","1.5","1534614248.7"]]},"book-1000","XBT/USD"]"#,
        )
        .await
        .unwrap();
        feed(
            &state,
            &mut normaliser,
            r#"[0,{"a":[["5541.3","0","1534614249.0"]]},"book-1000","XBT/USD"]"#,
        )
        .await
        .unwrap();

        assert!(state.orderbook_manager.read().await.symbols().is_empty());
    }
}
