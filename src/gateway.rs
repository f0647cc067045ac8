use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::errors::OrderRejected;
use crate::orderbook::{BookSnapshot, OrderBook};
use crate::orders::{Order, OrderId, OrderType, Price, Quantity, Side};
use crate::trade::Trade;

/// Serializes access to the matching engine across sessions.
///
/// The engine itself is single-threaded; mutations take the write lock,
/// snapshots take the read lock and can run concurrently. Each request's
/// book mutations and trade list happen under one write acquisition, and
/// callers get owned data back so no lock is ever held across socket I/O.
///
/// The gateway also owns order identity: every accepted wire order gets the
/// next server-assigned id, which is the engine's key. Client-supplied ids
/// are only ever echoed back.
pub struct EngineGateway {
    book: RwLock<OrderBook>,
    next_order_id: AtomicU64,
}

impl EngineGateway {
    pub fn new() -> Self {
        Self {
            book: RwLock::new(OrderBook::new()),
            next_order_id: AtomicU64::new(1),
        }
    }

    /// Allocates a server order id and submits the order. Returns the id
    /// alongside the engine's verdict; on rejection no order with that id
    /// exists.
    pub fn add_order(
        &self,
        order_type: OrderType,
        side: Side,
        price: Price,
        quantity: Quantity,
    ) -> (OrderId, Result<Vec<Trade>, OrderRejected>) {
        let order_id = self.next_order_id.fetch_add(1, Ordering::Relaxed);
        let order = Order::new(order_type, order_id, side, price, quantity);
        let result = self.book.write().add_order(order);
        (order_id, result)
    }

    pub fn cancel_order(&self, order_id: OrderId) {
        self.book.write().cancel_order(order_id);
    }

    pub fn modify_order(
        &self,
        order_id: OrderId,
        side: Side,
        price: Price,
        quantity: Quantity,
    ) -> Result<Vec<Trade>, OrderRejected> {
        self.book.write().modify_order(order_id, side, price, quantity)
    }

    pub fn snapshot(&self) -> BookSnapshot {
        self.book.read().snapshot()
    }

    /// Number of orders currently resting in the book.
    pub fn open_orders(&self) -> usize {
        self.book.read().len()
    }
}

impl Default for EngineGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_ids_are_monotonic() {
        let gateway = EngineGateway::new();
        let (first, result) = gateway.add_order(OrderType::GoodTillCancel, Side::Buy, 100, 5);
        assert!(result.unwrap().is_empty());
        let (second, result) = gateway.add_order(OrderType::GoodTillCancel, Side::Buy, 99, 5);
        assert!(result.unwrap().is_empty());
        assert!(second > first);
        assert_eq!(gateway.open_orders(), 2);
    }

    #[test]
    fn test_rejection_consumes_an_id_but_not_the_book() {
        let gateway = EngineGateway::new();
        let (_, result) = gateway.add_order(OrderType::GoodTillCancel, Side::Buy, 0, 5);
        assert_eq!(result, Err(OrderRejected::InvalidPrice));
        assert_eq!(gateway.open_orders(), 0);
    }

    #[test]
    fn test_concurrent_adds_all_land() {
        let gateway = std::sync::Arc::new(EngineGateway::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let gateway = gateway.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    // spread prices so no two orders cross
                    let price = 1000 + t * 100 + i;
                    let (_, result) =
                        gateway.add_order(OrderType::GoodTillCancel, Side::Sell, price, 1);
                    result.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(gateway.open_orders(), 200);
    }
}
