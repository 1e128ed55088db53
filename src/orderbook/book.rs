//! Per-order (L3) book reconstruction
//!
//! Each event is validated against the order index, and every level it
//! touches is checked to keep a positive aggregate, before anything is
//! mutated. Only then is it applied to the index, the side's ledger and its
//! best-level tracker in a fixed order.

use rust_decimal::Decimal;
use std::collections::HashSet;

use super::{
    BestLevelTracker, BookState, EventJournal, Level, LobEvent, Order, OrderBookMetrics, OrderId,
    OrderIndex, OrderKey, PriceLedger, Side,
};
use crate::error::BookError;

/// Order book for a single symbol
#[derive(Debug)]
pub struct L3OrderBook {
    symbol: String,
    index: OrderIndex,
    bids: PriceLedger,
    asks: PriceLedger,
    best_bid: BestLevelTracker,
    best_ask: BestLevelTracker,
    journal: EventJournal,
    /// Number of events applied successfully
    events_applied: u64,
    /// Timestamp of last update
    last_update_time: u64,
}

impl L3OrderBook {
    /// Create a new empty order book
    pub fn new(symbol: &str) -> Self {
        Self::with_journal(symbol, EventJournal::default())
    }

    pub fn with_journal(symbol: &str, journal: EventJournal) -> Self {
        Self {
            symbol: symbol.to_string(),
            index: OrderIndex::new(),
            bids: PriceLedger::new(Side::Buy),
            asks: PriceLedger::new(Side::Sell),
            best_bid: BestLevelTracker::new(),
            best_ask: BestLevelTracker::new(),
            journal,
            events_applied: 0,
            last_update_time: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Apply one book event
    pub fn apply(&mut self, event: &LobEvent) -> Result<(), BookError> {
        match *event {
            LobEvent::Insert {
                order_id,
                price,
                size,
                side,
            } => self.insert(order_id, price, size, side)?,
            LobEvent::Delete { order_id } => self.delete(order_id)?,
            LobEvent::Update {
                order_id,
                price,
                size,
                side,
            } => self.update(order_id, price, size, side)?,
        }

        self.events_applied += 1;
        self.journal.record(self.events_applied, *event);
        Ok(())
    }

    fn insert(
        &mut self,
        order_id: OrderId,
        price: Decimal,
        size: Decimal,
        side: Side,
    ) -> Result<(), BookError> {
        if self.index.contains(order_id) {
            return Err(BookError::DuplicateOrder { order_id });
        }
        self.ensure_positive(side, price, None, Some(size))?;

        let (index, ledger, tracker) = self.side_parts(side);
        let key = index.insert(Order {
            id: order_id,
            price,
            size,
            side,
        })?;
        ledger.add(price, key);
        tracker.on_insert(price, ledger, index)
    }

    fn delete(&mut self, order_id: OrderId) -> Result<(), BookError> {
        let (key, order) = self
            .index
            .entry(order_id)
            .map(|(key, order)| (key, *order))
            .ok_or_else(|| BookError::not_resting(order_id))?;
        self.ensure_positive(order.side, order.price, Some(key), None)?;

        let (index, ledger, tracker) = self.side_parts(order.side);
        ledger.remove(order.price, order_id, key)?;
        index.remove(order_id)?;
        tracker.on_delete(order.price, ledger, index)
    }

    fn update(
        &mut self,
        order_id: OrderId,
        price: Decimal,
        size: Decimal,
        side: Side,
    ) -> Result<(), BookError> {
        let (key, current) = self
            .index
            .entry(order_id)
            .map(|(key, order)| (key, *order))
            .ok_or_else(|| BookError::not_resting(order_id))?;

        if current.side != side {
            return Err(BookError::UnsupportedSideChange {
                order_id,
                from: current.side,
                to: side,
            });
        }
        if price == current.price {
            self.ensure_positive(side, price, Some(key), Some(size))?;
        } else {
            self.ensure_positive(side, current.price, Some(key), None)?;
            self.ensure_positive(side, price, None, Some(size))?;
        }

        let (index, ledger, tracker) = self.side_parts(side);
        ledger.remove(current.price, order_id, key)?;
        if let Some(order) = index.get_mut(key) {
            order.price = price;
            order.size = size;
        }
        ledger.add(price, key);
        tracker.on_update(current.price, price, ledger, index)
    }

    /// Reject a mutation that would leave a stored level summing to zero
    fn ensure_positive(
        &self,
        side: Side,
        price: Decimal,
        leaving: Option<OrderKey>,
        joining: Option<Decimal>,
    ) -> Result<(), BookError> {
        match self.ledger(side).projected_size(price, leaving, joining, &self.index)? {
            Some(total) if total.is_zero() => Err(BookError::EmptyLevel { side, price }),
            _ => Ok(()),
        }
    }

    fn side_parts(&mut self, side: Side) -> (&mut OrderIndex, &mut PriceLedger, &mut BestLevelTracker) {
        match side {
            Side::Buy => (&mut self.index, &mut self.bids, &mut self.best_bid),
            Side::Sell => (&mut self.index, &mut self.asks, &mut self.best_ask),
        }
    }

    fn ledger(&self, side: Side) -> &PriceLedger {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn tracker(&self, side: Side) -> &BestLevelTracker {
        match side {
            Side::Buy => &self.best_bid,
            Side::Sell => &self.best_ask,
        }
    }

    /// Stamp the exchange time of the last applied event
    pub fn mark_updated(&mut self, timestamp: u64) {
        self.last_update_time = timestamp;
    }

    /// Best price and aggregate size on `side`
    pub fn top_of_book(&self, side: Side) -> Option<Level> {
        self.tracker(side).best()
    }

    pub fn best_bid(&self) -> Option<Level> {
        self.top_of_book(Side::Buy)
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.top_of_book(Side::Sell)
    }

    /// Aggregated levels on `side`, best first, at most `n` of them
    pub fn depth(&self, side: Side, n: usize) -> Result<Vec<Level>, BookError> {
        self.ledger(side).depth(n, &self.index)
    }

    pub fn level_size(&self, side: Side, price: Decimal) -> Result<Option<Decimal>, BookError> {
        self.ledger(side).level_size(price, &self.index)
    }

    /// Orders resting at `price` in time priority
    pub fn orders_at(&self, side: Side, price: Decimal) -> Vec<&Order> {
        self.ledger(side)
            .queue(price)
            .map(|queue| queue.iter().filter_map(|&key| self.index.get(key)).collect())
            .unwrap_or_default()
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.index.lookup(id)
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    pub fn level_count(&self, side: Side) -> usize {
        self.ledger(side).len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn events_applied(&self) -> u64 {
        self.events_applied
    }

    pub fn last_update_time(&self) -> u64 {
        self.last_update_time
    }

    pub fn journal(&self) -> &EventJournal {
        &self.journal
    }

    /// Get mid price
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::from(2)),
            _ => None,
        }
    }

    /// Ask minus bid, absent while either side is empty
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    /// Get current state for publishing
    pub fn state(&self, depth: usize) -> Result<BookState, BookError> {
        let bids = self.depth(Side::Buy, depth)?;
        let asks = self.depth(Side::Sell, depth)?;

        let mut metrics = OrderBookMetrics::compute(self.best_bid(), self.best_ask(), &bids, &asks);
        metrics.bid_levels = self.level_count(Side::Buy);
        metrics.ask_levels = self.level_count(Side::Sell);
        metrics.resting_orders = self.index.len();

        Ok(BookState {
            symbol: self.symbol.clone(),
            timestamp: self.last_update_time,
            events_applied: self.events_applied,
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            bids,
            asks,
            metrics,
        })
    }

    /// Full scan of every structure against the others
    ///
    /// Returns the first violation found. Cost is linear in the number of
    /// resting orders, so this is for tests and operator diagnostics.
    pub fn verify_integrity(&self) -> Result<(), BookError> {
        let mut seen = HashSet::with_capacity(self.index.len());

        for side in [Side::Buy, Side::Sell] {
            let ledger = self.ledger(side);

            for (&price, queue) in ledger.levels() {
                if queue.is_empty() {
                    return Err(BookError::Inconsistent(format!(
                        "{side} level {price} is stored empty"
                    )));
                }
                for &key in queue {
                    let order = self.index.get(key).ok_or_else(|| {
                        BookError::Inconsistent(format!("{side} level {price} holds dangling key {key}"))
                    })?;
                    if order.price != price || order.side != side {
                        return Err(BookError::Inconsistent(format!(
                            "order {} recorded at {} {} but queued at {side} {price}",
                            order.id, order.side, order.price
                        )));
                    }
                    if self.index.lookup(order.id) != Some(order) {
                        return Err(BookError::Inconsistent(format!(
                            "order {} is queued but not indexed",
                            order.id
                        )));
                    }
                    if !seen.insert(key) {
                        return Err(BookError::Inconsistent(format!(
                            "order {} is queued more than once",
                            order.id
                        )));
                    }
                }
                ledger.level_size(price, &self.index)?;
            }

            let expected = match ledger.best_price() {
                Some(price) => ledger
                    .level_size(price, &self.index)?
                    .map(|size| Level { price, size }),
                None => None,
            };
            let cached = self.tracker(side).best();
            if cached != expected {
                return Err(BookError::Inconsistent(format!(
                    "{side} best level cached as {cached:?}, ledger says {expected:?}"
                )));
            }
        }

        if seen.len() != self.index.len() {
            return Err(BookError::Inconsistent(format!(
                "{} orders indexed but {} queued",
                self.index.len(),
                seen.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotFoundReason;
    use rust_decimal_macros::dec;

    fn insert(id: u64, price: Decimal, size: Decimal, side: Side) -> LobEvent {
        LobEvent::Insert {
            order_id: OrderId(id),
            price,
            size,
            side,
        }
    }

    fn update(id: u64, price: Decimal, size: Decimal, side: Side) -> LobEvent {
        LobEvent::Update {
            order_id: OrderId(id),
            price,
            size,
            side,
        }
    }

    fn delete(id: u64) -> LobEvent {
        LobEvent::Delete {
            order_id: OrderId(id),
        }
    }

    fn create_test_book() -> L3OrderBook {
        let mut book = L3OrderBook::new("tBTCUSD");
        let events = [
            insert(1, dec!(50000), dec!(1.0), Side::Buy),
            insert(2, dec!(49999), dec!(2.0), Side::Buy),
            insert(3, dec!(50001), dec!(1.5), Side::Sell),
            insert(4, dec!(50002), dec!(2.5), Side::Sell),
        ];
        for event in &events {
            book.apply(event).unwrap();
        }
        book
    }

    #[test]
    fn test_best_bid_ask() {
        let book = create_test_book();
        assert_eq!(book.best_bid(), Some(Level { price: dec!(50000), size: dec!(1.0) }));
        assert_eq!(book.best_ask(), Some(Level { price: dec!(50001), size: dec!(1.5) }));
        assert_eq!(book.mid_price(), Some(dec!(50000.5)));
        assert_eq!(book.spread(), Some(dec!(1)));
        book.verify_integrity().unwrap();
    }

    #[test]
    fn test_time_priority_within_level() {
        let mut book = L3OrderBook::new("tBTCUSD");
        for id in [7, 3, 5] {
            book.apply(&insert(id, dec!(10), dec!(1), Side::Sell)).unwrap();
        }
        let ids: Vec<u64> = book
            .orders_at(Side::Sell, dec!(10))
            .iter()
            .map(|o| o.id.0)
            .collect();
        assert_eq!(ids, vec![7, 3, 5]);

        // an amendment re-queues the order at the tail
        book.apply(&update(7, dec!(10), dec!(2), Side::Sell)).unwrap();
        let ids: Vec<u64> = book
            .orders_at(Side::Sell, dec!(10))
            .iter()
            .map(|o| o.id.0)
            .collect();
        assert_eq!(ids, vec![3, 5, 7]);
    }

    #[test]
    fn test_duplicate_insert_leaves_book_untouched() {
        let mut book = create_test_book();
        let err = book
            .apply(&insert(1, dec!(60000), dec!(9), Side::Buy))
            .unwrap_err();

        assert_eq!(err, BookError::DuplicateOrder { order_id: OrderId(1) });
        assert_eq!(book.level_size(Side::Buy, dec!(60000)).unwrap(), None);
        assert_eq!(book.best_bid().map(|l| l.price), Some(dec!(50000)));
        assert_eq!(book.events_applied(), 4);
        book.verify_integrity().unwrap();
    }

    #[test]
    fn test_side_change_rejected_before_mutation() {
        let mut book = create_test_book();
        let err = book
            .apply(&update(1, dec!(50005), dec!(1.0), Side::Sell))
            .unwrap_err();

        assert_eq!(
            err,
            BookError::UnsupportedSideChange {
                order_id: OrderId(1),
                from: Side::Buy,
                to: Side::Sell,
            }
        );
        assert_eq!(book.order(OrderId(1)).map(|o| o.side), Some(Side::Buy));
        book.verify_integrity().unwrap();
    }

    #[test]
    fn test_update_moves_level_and_refreshes_both_sides_of_move() {
        let mut book = create_test_book();

        // non-best bid jumps above the best
        book.apply(&update(2, dec!(50000.5), dec!(3), Side::Buy)).unwrap();
        assert_eq!(book.best_bid(), Some(Level { price: dec!(50000.5), size: dec!(3) }));
        assert_eq!(book.level_size(Side::Buy, dec!(49999)).unwrap(), None);

        // best ask retreats behind the other ask
        book.apply(&update(3, dec!(50003), dec!(1.5), Side::Sell)).unwrap();
        assert_eq!(book.best_ask(), Some(Level { price: dec!(50002), size: dec!(2.5) }));
        book.verify_integrity().unwrap();
    }

    #[test]
    fn test_delete_unknown_order() {
        let mut book = create_test_book();
        assert_eq!(
            book.apply(&delete(99)),
            Err(BookError::OrderNotFound {
                order_id: OrderId(99),
                reason: NotFoundReason::NotResting,
            })
        );
    }

    #[test]
    fn test_zero_size_insert_on_empty_level_is_rejected() {
        let mut book = L3OrderBook::new("tBTCUSD");
        let err = book
            .apply(&insert(1, dec!(100), dec!(0), Side::Buy))
            .unwrap_err();
        assert_eq!(err, BookError::EmptyLevel { side: Side::Buy, price: dec!(100) });
        assert!(err.is_corruption());

        assert!(book.order(OrderId(1)).is_none());
        assert_eq!(book.level_count(Side::Buy), 0);
        assert_eq!(book.events_applied(), 0);
        book.verify_integrity().unwrap();
    }

    #[test]
    fn test_zero_level_away_from_best_is_rejected() {
        let mut book = L3OrderBook::new("tBTCUSD");
        book.apply(&insert(1, dec!(100), dec!(5), Side::Buy)).unwrap();

        assert_eq!(
            book.apply(&insert(2, dec!(99), dec!(0), Side::Buy)),
            Err(BookError::EmptyLevel { side: Side::Buy, price: dec!(99) })
        );
        assert_eq!(book.depth(Side::Buy, 5).unwrap().len(), 1);

        // the book keeps serving valid events afterwards
        book.apply(&delete(1)).unwrap();
        assert!(book.is_empty());
        book.verify_integrity().unwrap();
    }

    #[test]
    fn test_zero_size_order_may_share_a_positive_level() {
        let mut book = L3OrderBook::new("tBTCUSD");
        book.apply(&insert(1, dec!(100), dec!(5), Side::Sell)).unwrap();
        book.apply(&insert(2, dec!(100), dec!(0), Side::Sell)).unwrap();
        assert_eq!(book.level_size(Side::Sell, dec!(100)).unwrap(), Some(dec!(5)));

        // removing the only sized order would strand a zero level
        assert_eq!(
            book.apply(&delete(1)),
            Err(BookError::EmptyLevel { side: Side::Sell, price: dec!(100) })
        );
        assert_eq!(
            book.apply(&update(1, dec!(101), dec!(5), Side::Sell)),
            Err(BookError::EmptyLevel { side: Side::Sell, price: dec!(100) })
        );
        assert_eq!(
            book.apply(&update(1, dec!(100), dec!(0), Side::Sell)),
            Err(BookError::EmptyLevel { side: Side::Sell, price: dec!(100) })
        );
        assert_eq!(book.order(OrderId(1)).map(|o| o.size), Some(dec!(5)));
        book.verify_integrity().unwrap();

        // the zero-size order itself can always leave
        book.apply(&delete(2)).unwrap();
        book.apply(&delete(1)).unwrap();
        book.verify_integrity().unwrap();
    }

    #[test]
    fn test_state_reports_depth_and_metrics() {
        let book = create_test_book();
        let state = book.state(1).unwrap();

        assert_eq!(state.bids.len(), 1);
        assert_eq!(state.asks.len(), 1);
        assert_eq!(state.metrics.bid_levels, 2);
        assert_eq!(state.metrics.ask_levels, 2);
        assert_eq!(state.metrics.resting_orders, 4);
        assert!(state.metrics.is_healthy());
        assert_eq!(state.events_applied, 4);
    }

    #[test]
    fn test_journal_keeps_history_for_diagnostics() {
        let mut book = create_test_book();
        book.apply(&update(1, dec!(50000), dec!(4), Side::Buy)).unwrap();
        book.apply(&delete(1)).unwrap();

        let history: Vec<u64> = book
            .journal()
            .history_of(OrderId(1))
            .iter()
            .map(|e| e.seq)
            .collect();
        assert_eq!(history, vec![1, 5, 6]);
    }
}
