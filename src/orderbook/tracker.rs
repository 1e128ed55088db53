//! Cached best level for one side of the book

use rust_decimal::Decimal;

use super::{Level, OrderIndex, PriceLedger};
use crate::error::BookError;

/// Best price and its aggregate size, refreshed only when a mutation
/// could have moved or resized the top level
#[derive(Debug, Clone, Default)]
pub struct BestLevelTracker {
    cached: Option<Level>,
}

impl BestLevelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn best(&self) -> Option<Level> {
        self.cached
    }

    /// An order was queued at `price`
    pub fn on_insert(
        &mut self,
        price: Decimal,
        ledger: &PriceLedger,
        index: &OrderIndex,
    ) -> Result<(), BookError> {
        if self.could_supplant(price, ledger) {
            self.refresh(ledger, index)?;
        }
        Ok(())
    }

    /// An order left the level at `price`
    pub fn on_delete(
        &mut self,
        price: Decimal,
        ledger: &PriceLedger,
        index: &OrderIndex,
    ) -> Result<(), BookError> {
        let touches_best = self.cached.map_or(true, |best| best.price == price);
        if touches_best {
            self.refresh(ledger, index)?;
        }
        Ok(())
    }

    /// An order moved from `old_price` to `new_price` (possibly the same)
    pub fn on_update(
        &mut self,
        old_price: Decimal,
        new_price: Decimal,
        ledger: &PriceLedger,
        index: &OrderIndex,
    ) -> Result<(), BookError> {
        let vacated_best = self.cached.map_or(true, |best| best.price == old_price);
        if vacated_best || self.could_supplant(new_price, ledger) {
            self.refresh(ledger, index)?;
        }
        Ok(())
    }

    /// Recompute from the ledger's current extreme key
    pub fn refresh(&mut self, ledger: &PriceLedger, index: &OrderIndex) -> Result<(), BookError> {
        self.cached = match ledger.best_price() {
            Some(price) => {
                let size = ledger.level_size(price, index)?.ok_or_else(|| {
                    BookError::Inconsistent(format!(
                        "{} best price {price} has no level",
                        ledger.side()
                    ))
                })?;
                Some(Level { price, size })
            }
            None => None,
        };
        Ok(())
    }

    /// Equal prices count: the level's aggregate changed even if the price did not
    fn could_supplant(&self, price: Decimal, ledger: &PriceLedger) -> bool {
        match self.cached {
            Some(best) => !ledger.side().is_better(best.price, price),
            None => true,
        }
    }
}
