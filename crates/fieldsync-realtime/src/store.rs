// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory authoritative cache of current orders.
//!
//! Changes are applied strictly in the order they are called. Snapshots are
//! published through a `watch` channel only when the list actually changed;
//! inserts are additionally forwarded as raw deltas, duplicates included.

use fieldsync_core::{Order, OrderChange};
use tokio::sync::{broadcast, watch};
use tracing::debug;

const DELTA_CAPACITY: usize = 256;

/// Newest-first list of orders keyed by id.
#[derive(Debug)]
pub struct OrderStore {
    snapshot: watch::Sender<Vec<Order>>,
    deltas: broadcast::Sender<Order>,
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderStore {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Vec::new());
        let (deltas, _) = broadcast::channel(DELTA_CAPACITY);
        Self { snapshot, deltas }
    }

    /// Insert at the front unless the id is already present. The order is
    /// forwarded to delta subscribers either way.
    pub fn add(&self, order: Order) -> bool {
        let inserted = self.snapshot.send_if_modified(|orders| {
            if orders.iter().any(|o| o.id == order.id) {
                false
            } else {
                orders.insert(0, order.clone());
                true
            }
        });
        debug!(id = %order.id, inserted, "order add");
        let _ = self.deltas.send(order);
        inserted
    }

    /// Replace the entry with the same id in place. Unknown ids are ignored.
    pub fn update(&self, order: Order) -> bool {
        let replaced = self.snapshot.send_if_modified(|orders| {
            match orders.iter_mut().find(|o| o.id == order.id) {
                Some(slot) => {
                    *slot = order.clone();
                    true
                }
                None => false,
            }
        });
        debug!(id = %order.id, replaced, "order update");
        replaced
    }

    /// Drop every entry with `id`. Returns whether anything was removed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.snapshot.send_if_modified(|orders| {
            let before = orders.len();
            orders.retain(|o| o.id != id);
            orders.len() != before
        });
        debug!(id, removed, "order remove");
        removed
    }

    pub fn apply(&self, change: OrderChange) -> bool {
        match change {
            OrderChange::Insert(order) => self.add(order),
            OrderChange::Update(order) => self.update(order),
            OrderChange::Delete { id } => self.remove(&id),
        }
    }

    /// Current orders, newest first.
    pub fn snapshot(&self) -> Vec<Order> {
        self.snapshot.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Order>> {
        self.snapshot.subscribe()
    }

    /// Raw orders as they arrive through `add`, duplicates included.
    pub fn subscribe_deltas(&self) -> broadcast::Receiver<Order> {
        self.deltas.subscribe()
    }
}
