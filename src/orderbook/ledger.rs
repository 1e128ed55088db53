//! Price-level ledger for one side of the book
//!
//! Uses BTreeMap so the best price is the first or last key. A price key
//! exists only while at least one order rests there.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};

use super::{Level, OrderId, OrderIndex, OrderKey, Side};
use crate::error::{BookError, NotFoundReason};

/// FIFO order queues keyed by price
#[derive(Debug)]
pub struct PriceLedger {
    side: Side,
    levels: BTreeMap<Decimal, VecDeque<OrderKey>>,
}

impl PriceLedger {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Queue an order at the tail of its price level
    pub fn add(&mut self, price: Decimal, key: OrderKey) {
        self.levels.entry(price).or_default().push_back(key);
    }

    /// Take an order out of its level, dropping the level once it empties
    pub fn remove(&mut self, price: Decimal, id: OrderId, key: OrderKey) -> Result<(), BookError> {
        let queue = self.levels.get_mut(&price).ok_or(BookError::OrderNotFound {
            order_id: id,
            reason: NotFoundReason::LevelMissing {
                side: self.side,
                price,
            },
        })?;

        let position = queue
            .iter()
            .position(|&queued| queued == key)
            .ok_or(BookError::OrderNotFound {
                order_id: id,
                reason: NotFoundReason::NotAtLevel {
                    side: self.side,
                    price,
                },
            })?;

        queue.remove(position);
        if queue.is_empty() {
            self.levels.remove(&price);
        }
        Ok(())
    }

    /// Aggregate size at `price`, `None` when no level exists there
    pub fn level_size(&self, price: Decimal, index: &OrderIndex) -> Result<Option<Decimal>, BookError> {
        match self.levels.get(&price) {
            Some(queue) => self.sum_queue(price, queue, index).map(Some),
            None => Ok(None),
        }
    }

    /// Aggregate at `price` once `leaving` is dequeued and an order of size
    /// `joining` is queued, `None` when no level would remain
    pub fn projected_size(
        &self,
        price: Decimal,
        leaving: Option<OrderKey>,
        joining: Option<Decimal>,
        index: &OrderIndex,
    ) -> Result<Option<Decimal>, BookError> {
        let mut total = joining.unwrap_or_default();
        let mut remaining = 0usize;

        for &key in self.levels.get(&price).into_iter().flatten() {
            if Some(key) == leaving {
                continue;
            }
            let order = index.get(key).ok_or_else(|| {
                BookError::Inconsistent(format!(
                    "{} level {price} references missing key {key}",
                    self.side
                ))
            })?;
            total += order.size;
            remaining += 1;
        }

        Ok((remaining > 0 || joining.is_some()).then_some(total))
    }

    fn sum_queue(
        &self,
        price: Decimal,
        queue: &VecDeque<OrderKey>,
        index: &OrderIndex,
    ) -> Result<Decimal, BookError> {
        let mut total = Decimal::ZERO;
        for &key in queue {
            let order = index.get(key).ok_or_else(|| {
                BookError::Inconsistent(format!(
                    "{} level {price} references missing key {key}",
                    self.side
                ))
            })?;
            total += order.size;
        }

        if total.is_zero() {
            return Err(BookError::EmptyLevel {
                side: self.side,
                price,
            });
        }
        Ok(total)
    }

    /// Highest bid or lowest ask
    pub fn best_price(&self) -> Option<Decimal> {
        match self.side {
            Side::Buy => self.levels.last_key_value().map(|(p, _)| *p),
            Side::Sell => self.levels.first_key_value().map(|(p, _)| *p),
        }
    }

    /// Up to `n` aggregated levels, best first
    pub fn depth(&self, n: usize, index: &OrderIndex) -> Result<Vec<Level>, BookError> {
        match self.side {
            Side::Buy => self.collect_levels(self.levels.iter().rev(), n, index),
            Side::Sell => self.collect_levels(self.levels.iter(), n, index),
        }
    }

    fn collect_levels<'a>(
        &self,
        levels: impl Iterator<Item = (&'a Decimal, &'a VecDeque<OrderKey>)>,
        n: usize,
        index: &OrderIndex,
    ) -> Result<Vec<Level>, BookError> {
        levels
            .take(n)
            .map(|(&price, queue)| -> Result<Level, BookError> {
                Ok(Level {
                    price,
                    size: self.sum_queue(price, queue, index)?,
                })
            })
            .collect()
    }

    /// Keys queued at `price` in arrival order
    pub fn queue(&self, price: Decimal) -> Option<&VecDeque<OrderKey>> {
        self.levels.get(&price)
    }

    /// Every level in ascending price order
    pub fn levels(&self) -> impl Iterator<Item = (&Decimal, &VecDeque<OrderKey>)> {
        self.levels.iter()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::Order;
    use rust_decimal_macros::dec;

    fn seed(index: &mut OrderIndex, ledger: &mut PriceLedger, id: u64, price: Decimal, size: Decimal) -> OrderKey {
        let key = index
            .insert(Order {
                id: OrderId(id),
                price,
                size,
                side: ledger.side(),
            })
            .unwrap();
        ledger.add(price, key);
        key
    }

    #[test]
    fn test_level_size_sums_queue() {
        let mut index = OrderIndex::new();
        let mut ledger = PriceLedger::new(Side::Buy);
        seed(&mut index, &mut ledger, 1, dec!(100), dec!(10));
        seed(&mut index, &mut ledger, 2, dec!(100), dec!(20));

        assert_eq!(ledger.level_size(dec!(100), &index).unwrap(), Some(dec!(30)));
        assert_eq!(ledger.level_size(dec!(99), &index).unwrap(), None);
    }

    #[test]
    fn test_remove_drops_empty_level() {
        let mut index = OrderIndex::new();
        let mut ledger = PriceLedger::new(Side::Sell);
        let key = seed(&mut index, &mut ledger, 1, dec!(101), dec!(1));

        ledger.remove(dec!(101), OrderId(1), key).unwrap();
        assert!(ledger.is_empty());
        assert!(ledger.queue(dec!(101)).is_none());
    }

    #[test]
    fn test_remove_reports_where_lookup_failed() {
        let mut index = OrderIndex::new();
        let mut ledger = PriceLedger::new(Side::Buy);
        let key = seed(&mut index, &mut ledger, 1, dec!(100), dec!(1));

        let err = ledger.remove(dec!(99), OrderId(1), key).unwrap_err();
        assert_eq!(
            err,
            BookError::OrderNotFound {
                order_id: OrderId(1),
                reason: NotFoundReason::LevelMissing {
                    side: Side::Buy,
                    price: dec!(99),
                },
            }
        );

        let err = ledger.remove(dec!(100), OrderId(2), key + 1).unwrap_err();
        assert!(matches!(
            err,
            BookError::OrderNotFound {
                reason: NotFoundReason::NotAtLevel { .. },
                ..
            }
        ));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_zero_sum_level_is_flagged() {
        let mut index = OrderIndex::new();
        let mut ledger = PriceLedger::new(Side::Sell);
        seed(&mut index, &mut ledger, 1, dec!(100), dec!(0));

        assert_eq!(
            ledger.level_size(dec!(100), &index),
            Err(BookError::EmptyLevel {
                side: Side::Sell,
                price: dec!(100),
            })
        );
    }

    #[test]
    fn test_projected_size_accounts_for_moves() {
        let mut index = OrderIndex::new();
        let mut ledger = PriceLedger::new(Side::Buy);
        let first = seed(&mut index, &mut ledger, 1, dec!(100), dec!(4));
        seed(&mut index, &mut ledger, 2, dec!(100), dec!(0));

        // new level
        assert_eq!(
            ledger.projected_size(dec!(99), None, Some(dec!(2)), &index).unwrap(),
            Some(dec!(2))
        );
        // last sized order leaves, the zero-size one stays behind
        assert_eq!(
            ledger.projected_size(dec!(100), Some(first), None, &index).unwrap(),
            Some(dec!(0))
        );
        // in-place amendment
        assert_eq!(
            ledger.projected_size(dec!(100), Some(first), Some(dec!(7)), &index).unwrap(),
            Some(dec!(7))
        );
        // level disappears entirely
        assert_eq!(ledger.projected_size(dec!(98), None, None, &index).unwrap(), None);
    }

    #[test]
    fn test_best_price_and_depth_order() {
        let mut index = OrderIndex::new();
        let mut bids = PriceLedger::new(Side::Buy);
        let mut asks = PriceLedger::new(Side::Sell);
        for (id, price) in [(1, dec!(99)), (2, dec!(101)), (3, dec!(100))] {
            seed(&mut index, &mut bids, id, price, dec!(1));
            seed(&mut index, &mut asks, id + 10, price + dec!(10), dec!(2));
        }

        assert_eq!(bids.best_price(), Some(dec!(101)));
        assert_eq!(asks.best_price(), Some(dec!(109)));

        let prices: Vec<_> = bids.depth(2, &index).unwrap().iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![dec!(101), dec!(100)]);

        let levels = asks.depth(10, &index).unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], Level { price: dec!(109), size: dec!(2) });
    }
}
