//! Order index
//!
//! Orders live in a slab arena. The identity map and the price ledgers only
//! hold the arena key, so a record is never aliased by two owners.

use ahash::AHashMap;
use slab::Slab;

use super::{Order, OrderId};
use crate::error::BookError;

/// Stable handle of an order record inside the arena
pub type OrderKey = usize;

/// Identity lookup for every resting order
#[derive(Debug, Default)]
pub struct OrderIndex {
    arena: Slab<Order>,
    keys: AHashMap<OrderId, OrderKey>,
}

impl OrderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            arena: Slab::with_capacity(capacity),
            keys: AHashMap::with_capacity(capacity),
        }
    }

    pub fn lookup(&self, id: OrderId) -> Option<&Order> {
        self.keys.get(&id).and_then(|&key| self.arena.get(key))
    }

    /// Arena key and record of a resting order
    pub fn entry(&self, id: OrderId) -> Option<(OrderKey, &Order)> {
        let key = *self.keys.get(&id)?;
        self.arena.get(key).map(|order| (key, order))
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.keys.contains_key(&id)
    }

    /// Register a new order, returning its arena key
    pub fn insert(&mut self, order: Order) -> Result<OrderKey, BookError> {
        if self.keys.contains_key(&order.id) {
            return Err(BookError::DuplicateOrder { order_id: order.id });
        }
        let key = self.arena.insert(order);
        self.keys.insert(order.id, key);
        Ok(key)
    }

    pub fn remove(&mut self, id: OrderId) -> Result<Order, BookError> {
        let key = self
            .keys
            .remove(&id)
            .ok_or_else(|| BookError::not_resting(id))?;
        self.arena
            .try_remove(key)
            .ok_or_else(|| BookError::Inconsistent(format!("order {id} has a dangling key {key}")))
    }

    pub fn get(&self, key: OrderKey) -> Option<&Order> {
        self.arena.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: OrderKey) -> Option<&mut Order> {
        self.arena.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// All resting orders with their keys, in arena order
    pub fn iter(&self) -> impl Iterator<Item = (OrderKey, &Order)> {
        self.arena.iter()
    }
}
