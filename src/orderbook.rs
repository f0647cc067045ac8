use std::collections::{BTreeMap, HashMap};

use slab::Slab;
use tracing::{debug, info};

use crate::errors::OrderRejected;
use crate::orders::{Order, OrderId, OrderType, Price, Quantity, Side};
use crate::trade::{Trade, TradeInfo};

/// An [`OrderBook`] stores **active** buy and sell orders in two separate
/// [`BTreeMap`]s:
/// - `bids` (buy orders), iterated **in reverse** so the highest price comes
///   first
/// - `asks` (sell orders), iterated **forwards** so the lowest price comes
///   first
///
/// Each price level is a FIFO list of orders to maintain **price-time**
/// priority. Orders themselves live in a slab arena; levels and the id index
/// only hold arena keys, so cancelling by id is O(1): look up the key, unlink
/// the entry from its level list, done.
pub struct OrderBook {
    bids: BTreeMap<Price, Level>,
    asks: BTreeMap<Price, Level>,
    arena: Slab<Entry>,
    index: HashMap<OrderId, usize>,
}

/// A live order threaded into its level's doubly-linked FIFO.
struct Entry {
    order: Order,
    prev: Option<usize>,
    next: Option<usize>,
}

/// One price level. Never present while empty; `head`/`tail` are always
/// valid arena keys.
struct Level {
    head: usize,
    tail: usize,
    len: usize,
    /// Sum of remaining quantities over the level, kept current on every
    /// insert, fill and removal so snapshots don't walk the lists.
    total: Quantity,
}

/// Aggregated `(price, total remaining quantity)` for one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelInfo {
    pub price: Price,
    pub quantity: Quantity,
}

/// Point-in-time view of the book, bids best-first (descending price), asks
/// best-first (ascending price).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSnapshot {
    pub bids: Vec<LevelInfo>,
    pub asks: Vec<LevelInfo>,
}

impl OrderBook {
    /// Creates a new, empty [`OrderBook`] with no active bids or asks.
    pub fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            arena: Slab::new(),
            index: HashMap::new(),
        }
    }

    /// Number of live orders resting in the book.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.keys().next().copied()
    }

    /// Submits an order and runs the matching loop.
    ///
    /// On success, returns the trades generated by the order, possibly empty
    /// (the order rested without crossing). On rejection the book is
    /// unchanged:
    /// - duplicate order id
    /// - non-positive price (except market orders, which ignore price)
    /// - zero quantity
    /// - `FillAndKill`/`Market` that cannot match anything immediately
    /// - `FillOrKill` that cannot execute in full
    pub fn add_order(&mut self, mut order: Order) -> Result<Vec<Trade>, OrderRejected> {
        if self.index.contains_key(&order.id) {
            return Err(OrderRejected::DuplicateId(order.id));
        }
        if order.remaining_quantity() == 0 {
            return Err(OrderRejected::InvalidQuantity);
        }
        if order.order_type == OrderType::Market {
            // A market order sweeps whatever is on the opposite side: give it
            // the worst opposite quote as its limit so the matching loop
            // crosses every level, then let the leftover cancellation below
            // clear any residue.
            order.price = self
                .sweep_price(order.side)
                .ok_or(OrderRejected::NoImmediateMatch)?;
        } else if order.price <= 0 {
            return Err(OrderRejected::InvalidPrice);
        }
        match order.order_type {
            OrderType::FillAndKill if !self.can_match(order.side, order.price) => {
                return Err(OrderRejected::NoImmediateMatch);
            }
            OrderType::FillOrKill
                if !self.can_fill_completely(order.side, order.price, order.remaining_quantity()) =>
            {
                return Err(OrderRejected::NoCompleteFill);
            }
            _ => {}
        }

        let order_id = order.id;
        self.insert(order);
        let trades = self.match_orders();
        if trades.is_empty() {
            debug!("order {} rested without crossing", order_id);
        } else {
            info!("order {} generated {} trade(s)", order_id, trades.len());
        }
        Ok(trades)
    }

    /// Cancels a resting order by id. Unknown ids are a no-op, so cancelling
    /// twice is the same as cancelling once.
    pub fn cancel_order(&mut self, order_id: OrderId) {
        let Some(&key) = self.index.get(&order_id) else {
            return;
        };
        let order = self.remove(key);
        debug!(
            "cancelled order {} with {} remaining",
            order.id,
            order.remaining_quantity()
        );
    }

    /// Cancel-then-add: the replacement inherits the original's order type
    /// but re-enters at the tail of its target level, losing time priority,
    /// and may match immediately.
    ///
    /// Unknown ids return an empty trade list with no state change. If the
    /// replacement itself is rejected the cancellation stands.
    pub fn modify_order(
        &mut self,
        order_id: OrderId,
        side: Side,
        price: Price,
        quantity: Quantity,
    ) -> Result<Vec<Trade>, OrderRejected> {
        let Some(&key) = self.index.get(&order_id) else {
            return Ok(Vec::new());
        };
        let order_type = self.arena[key].order.order_type;
        self.cancel_order(order_id);
        self.add_order(Order::new(order_type, order_id, side, price, quantity))
    }

    /// Aggregated per-level view of both sides. Read-only.
    pub fn snapshot(&self) -> BookSnapshot {
        BookSnapshot {
            bids: self
                .bids
                .iter()
                .rev()
                .map(|(&price, level)| LevelInfo {
                    price,
                    quantity: level.total,
                })
                .collect(),
            asks: self
                .asks
                .iter()
                .map(|(&price, level)| LevelInfo {
                    price,
                    quantity: level.total,
                })
                .collect(),
        }
    }

    /// Whether an order at `price` could execute at least partially right now.
    fn can_match(&self, side: Side, price: Price) -> bool {
        match side {
            Side::Buy => self.best_ask().is_some_and(|ask| price >= ask),
            Side::Sell => self.best_bid().is_some_and(|bid| price <= bid),
        }
    }

    /// Whether `quantity` could execute in full at `price`, walking opposite
    /// levels in priority order while they still cross.
    fn can_fill_completely(&self, side: Side, price: Price, quantity: Quantity) -> bool {
        let needed = u64::from(quantity);
        let mut available = 0u64;
        match side {
            Side::Buy => {
                for (&level_price, level) in self.asks.iter() {
                    if level_price > price {
                        break;
                    }
                    available += u64::from(level.total);
                    if available >= needed {
                        return true;
                    }
                }
            }
            Side::Sell => {
                for (&level_price, level) in self.bids.iter().rev() {
                    if level_price < price {
                        break;
                    }
                    available += u64::from(level.total);
                    if available >= needed {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// The worst quote on the side opposite to `side`, i.e. the limit that
    /// makes an order cross every opposite level.
    fn sweep_price(&self, side: Side) -> Option<Price> {
        match side {
            Side::Buy => self.asks.keys().next_back().copied(),
            Side::Sell => self.bids.keys().next().copied(),
        }
    }

    /// Links a new order into the tail of its `(side, price)` level and
    /// indexes it.
    fn insert(&mut self, order: Order) {
        let side = order.side;
        let price = order.price;
        let quantity = order.remaining_quantity();
        let order_id = order.id;

        let key = self.arena.insert(Entry {
            order,
            prev: None,
            next: None,
        });
        self.index.insert(order_id, key);

        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        match levels.get_mut(&price) {
            Some(level) => {
                let old_tail = level.tail;
                self.arena[old_tail].next = Some(key);
                self.arena[key].prev = Some(old_tail);
                level.tail = key;
                level.len += 1;
                level.total += quantity;
            }
            None => {
                levels.insert(
                    price,
                    Level {
                        head: key,
                        tail: key,
                        len: 1,
                        total: quantity,
                    },
                );
            }
        }
    }

    /// Unlinks an order from its level, dropping the level if it empties,
    /// and erases it from the arena and index. Returns the removed order.
    fn remove(&mut self, key: usize) -> Order {
        let entry = self.arena.remove(key);
        self.index.remove(&entry.order.id);

        if let Some(prev) = entry.prev {
            self.arena[prev].next = entry.next;
        }
        if let Some(next) = entry.next {
            self.arena[next].prev = entry.prev;
        }

        let levels = match entry.order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let level = levels
            .get_mut(&entry.order.price)
            .expect("resting order has no price level");
        level.len -= 1;
        level.total -= entry.order.remaining_quantity();
        if level.len == 0 {
            levels.remove(&entry.order.price);
        } else {
            if level.head == key {
                level.head = entry.next.expect("non-empty level lost its head");
            }
            if level.tail == key {
                level.tail = entry.prev.expect("non-empty level lost its tail");
            }
        }
        entry.order
    }

    /// Fills `quantity` of a resting order, keeping its level total current.
    fn fill(&mut self, key: usize, quantity: Quantity) {
        let entry = &mut self.arena[key];
        entry.order.fill(quantity);
        let (side, price) = (entry.order.side, entry.order.price);
        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let level = levels
            .get_mut(&price)
            .expect("resting order has no price level");
        level.total -= quantity;
    }

    /// The matching loop: while the best bid meets the best ask, fill the
    /// head orders of both levels against each other and emit a trade
    /// carrying each side's own quoted price. Fully consumed orders leave
    /// the book; a partial fill keeps its place at the head of the level.
    ///
    /// Afterwards, an order that must not rest (`FillAndKill`, `Market`)
    /// and survived at the top of its side is cancelled in place.
    fn match_orders(&mut self) -> Vec<Trade> {
        let mut trades = Vec::new();
        loop {
            let Some(bid_price) = self.best_bid() else {
                break;
            };
            let Some(ask_price) = self.best_ask() else {
                break;
            };
            if bid_price < ask_price {
                // book is uncrossed
                break;
            }

            let bid_key = self.bids[&bid_price].head;
            let ask_key = self.asks[&ask_price].head;
            let quantity = self.arena[bid_key]
                .order
                .remaining_quantity()
                .min(self.arena[ask_key].order.remaining_quantity());

            self.fill(bid_key, quantity);
            self.fill(ask_key, quantity);

            let bid = &self.arena[bid_key].order;
            let ask = &self.arena[ask_key].order;
            trades.push(Trade {
                bid: TradeInfo {
                    order_id: bid.id,
                    price: bid.price,
                    quantity,
                },
                ask: TradeInfo {
                    order_id: ask.id,
                    price: ask.price,
                    quantity,
                },
            });

            if self.arena[bid_key].order.is_filled() {
                self.remove(bid_key);
            }
            if self.arena[ask_key].order.is_filled() {
                self.remove(ask_key);
            }
        }

        if let Some(price) = self.best_bid() {
            let key = self.bids[&price].head;
            if self.arena[key].order.order_type.is_immediate() {
                let order_id = self.arena[key].order.id;
                self.cancel_order(order_id);
            }
        }
        if let Some(price) = self.best_ask() {
            let key = self.asks[&price].head;
            if self.arena[key].order.order_type.is_immediate() {
                let order_id = self.arena[key].order.id;
                self.cancel_order(order_id);
            }
        }

        trades
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}
