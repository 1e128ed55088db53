//! Order book manager
//!
//! Manages L3 order books for multiple symbols.

use std::collections::HashMap;
use tracing::{debug, warn};

use super::{BookState, EventJournal, L3OrderBook, LobEvent};
use crate::error::BookError;

/// Manages order books for multiple symbols
#[derive(Debug)]
pub struct OrderBookManager {
    books: HashMap<String, L3OrderBook>,
    max_depth: usize,
    journal_capacity: usize,
}

impl Default for OrderBookManager {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBookManager {
    /// Create a new order book manager
    pub fn new() -> Self {
        Self {
            books: HashMap::new(),
            max_depth: 20,
            journal_capacity: 64,
        }
    }

    /// Create with custom depth
    pub fn with_depth(max_depth: usize) -> Self {
        Self {
            max_depth,
            ..Self::new()
        }
    }

    pub fn with_journal_capacity(mut self, capacity: usize) -> Self {
        self.journal_capacity = capacity;
        self
    }

    /// Start a symbol over from an empty book, ahead of a snapshot replay
    pub fn reset(&mut self, symbol: &str) {
        let book = L3OrderBook::with_journal(symbol, EventJournal::new(self.journal_capacity));
        if self.books.insert(symbol.to_string(), book).is_some() {
            debug!(symbol = %symbol, "Order book reset");
        }
    }

    /// Apply an event to the symbol's book
    ///
    /// Returns whether the top of book changed on either side. A failed event
    /// discards the book: it no longer matches the exchange and has to be
    /// rebuilt from a snapshot.
    pub fn apply(&mut self, symbol: &str, event: &LobEvent, timestamp: u64) -> Result<bool, BookError> {
        let journal_capacity = self.journal_capacity;
        let book = self
            .books
            .entry(symbol.to_string())
            .or_insert_with(|| L3OrderBook::with_journal(symbol, EventJournal::new(journal_capacity)));

        let before = (book.best_bid(), book.best_ask());
        match book.apply(event) {
            Ok(()) => {
                book.mark_updated(timestamp);
                Ok(before != (book.best_bid(), book.best_ask()))
            }
            Err(err) => {
                let order_id = event.order_id();
                warn!(
                    symbol = %symbol,
                    order_id = %order_id,
                    action = event.action().as_str(),
                    error = %err,
                    corruption = err.is_corruption(),
                    resting = book.order_count(),
                    history = ?book.journal().history_of(order_id),
                    "Order book rejected event, discarding book"
                );
                self.books.remove(symbol);
                Err(err)
            }
        }
    }

    /// Get the state of a specific book
    pub fn get_state(&self, symbol: &str) -> Result<Option<BookState>, BookError> {
        self.books
            .get(symbol)
            .map(|book| book.state(self.max_depth))
            .transpose()
    }

    pub fn book(&self, symbol: &str) -> Option<&L3OrderBook> {
        self.books.get(symbol)
    }

    /// Get list of symbols being tracked
    pub fn symbols(&self) -> Vec<String> {
        self.books.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::{Level, OrderId, Side};
    use rust_decimal_macros::dec;

    fn bid(id: u64, price: rust_decimal::Decimal) -> LobEvent {
        LobEvent::Insert {
            order_id: OrderId(id),
            price,
            size: dec!(1),
            side: Side::Buy,
        }
    }

    #[test]
    fn test_apply_reports_top_of_book_changes() {
        let mut manager = OrderBookManager::new();
        assert!(manager.apply("tETHUSD", &bid(1, dec!(100)), 10).unwrap());
        assert!(!manager.apply("tETHUSD", &bid(2, dec!(99)), 11).unwrap());
        assert!(manager.apply("tETHUSD", &bid(3, dec!(100)), 12).unwrap());

        let state = manager.get_state("tETHUSD").unwrap().unwrap();
        assert_eq!(state.timestamp, 12);
        assert_eq!(state.best_bid, Some(Level { price: dec!(100), size: dec!(2) }));
    }

    #[test]
    fn test_failed_event_discards_book() {
        let mut manager = OrderBookManager::new();
        manager.apply("tETHUSD", &bid(1, dec!(100)), 1).unwrap();

        let delete = LobEvent::Delete { order_id: OrderId(2) };
        assert!(manager.apply("tETHUSD", &delete, 2).is_err());
        assert!(manager.book("tETHUSD").is_none());
        assert_eq!(manager.get_state("tETHUSD").unwrap().map(|s| s.symbol), None);
    }

    #[test]
    fn test_reset_clears_book() {
        let mut manager = OrderBookManager::with_depth(5);
        manager.apply("tETHUSD", &bid(1, dec!(100)), 1).unwrap();
        manager.reset("tETHUSD");

        assert_eq!(manager.symbols(), vec!["tETHUSD".to_string()]);
        assert_eq!(manager.book("tETHUSD").and_then(|b| b.top_of_book(Side::Buy)), None);
        assert_eq!(manager.book("tETHUSD").map(|b| b.order_count()), Some(0));
    }
}
