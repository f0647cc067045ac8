use crate::orders::{OrderId, Price, Quantity};

/// One side's view of an execution.
///
/// `price` is the **resting quote of that side's own order**, not a single
/// crossing price. When a marketable order crosses the spread, the two sides
/// of the same trade can carry different prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeInfo {
    pub order_id: OrderId,
    pub price: Price,
    pub quantity: Quantity,
}

/// A single execution crossing one bid order against one ask order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trade {
    pub bid: TradeInfo,
    pub ask: TradeInfo,
}
