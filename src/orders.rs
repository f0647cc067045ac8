/// Which side of the market an order is on.
///
/// Bids are ranked from **highest to lowest price** and asks from **lowest
/// to highest**, so the matching engine always sees the best price first:
/// incoming buys meet the lowest ask, incoming sells meet the highest bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,  // Bid
    Sell, // Ask
}

impl Side {
    /// Wire code for this side (Buy=0, Sell=1).
    pub fn to_wire(self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }

    /// Parses a wire code; `None` for anything but 0 or 1.
    pub fn from_wire(code: u8) -> Option<Side> {
        match code {
            0 => Some(Side::Buy),
            1 => Some(Side::Sell),
            _ => None,
        }
    }

}

/// Time-in-force / execution style of an order.
///
/// - `GoodTillCancel`: rests in the book until filled or cancelled
/// - `FillAndKill`: matches what it can immediately, the rest is cancelled
/// - `FillOrKill`: executes in full immediately or not at all
/// - `GoodForDay`: rests like `GoodTillCancel` (there is no trading-day
///   clock in this service, so expiry never triggers)
/// - `Market`: sweeps the opposite side at any price, never rests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderType {
    GoodTillCancel,
    FillAndKill,
    FillOrKill,
    GoodForDay,
    Market,
}

impl OrderType {
    /// Wire code for this order type.
    pub fn to_wire(self) -> u8 {
        match self {
            OrderType::GoodTillCancel => 0,
            OrderType::FillAndKill => 1,
            OrderType::FillOrKill => 2,
            OrderType::GoodForDay => 3,
            OrderType::Market => 4,
        }
    }

    /// Parses a wire code; `None` for codes outside the enum.
    pub fn from_wire(code: u8) -> Option<OrderType> {
        match code {
            0 => Some(OrderType::GoodTillCancel),
            1 => Some(OrderType::FillAndKill),
            2 => Some(OrderType::FillOrKill),
            3 => Some(OrderType::GoodForDay),
            4 => Some(OrderType::Market),
            _ => None,
        }
    }

    /// True for order types that must never rest in the book.
    pub fn is_immediate(self) -> bool {
        matches!(self, OrderType::FillAndKill | OrderType::Market)
    }
}

/// Instrument tick price. Signed so arithmetic around zero stays honest;
/// the engine rejects non-positive prices on entry.
pub type Price = i32;

/// Order size in units. Strictly positive for any live order.
pub type Quantity = u32;

/// Server-assigned order identity, unique for the lifetime of the book.
pub type OrderId = u64;

/// A single order as the engine sees it.
///
/// `remaining_quantity` is private: the only way to reduce it is
/// [`Order::fill`], which checks the fill against the remainder. Overfilling
/// is a bug in the matching loop, not a runtime condition, so it panics.
#[derive(Debug, Clone)]
pub struct Order {
    pub order_type: OrderType,
    pub id: OrderId,
    pub side: Side,
    pub price: Price,
    pub initial_quantity: Quantity,
    remaining_quantity: Quantity,
}

impl Order {
    pub fn new(
        order_type: OrderType,
        id: OrderId,
        side: Side,
        price: Price,
        quantity: Quantity,
    ) -> Self {
        Self {
            order_type,
            id,
            side,
            price,
            initial_quantity: quantity,
            remaining_quantity: quantity,
        }
    }

    pub fn remaining_quantity(&self) -> Quantity {
        self.remaining_quantity
    }

    pub fn filled_quantity(&self) -> Quantity {
        self.initial_quantity - self.remaining_quantity
    }

    pub fn is_filled(&self) -> bool {
        self.remaining_quantity == 0
    }

    /// Consumes `quantity` units of the remainder.
    ///
    /// # Panics
    /// If `quantity` exceeds the remaining quantity.
    pub fn fill(&mut self, quantity: Quantity) {
        assert!(
            quantity <= self.remaining_quantity,
            "order {} cannot be filled for more than its remaining quantity ({} > {})",
            self.id,
            quantity,
            self.remaining_quantity,
        );
        self.remaining_quantity -= quantity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_accounting() {
        let mut order = Order::new(OrderType::GoodTillCancel, 7, Side::Buy, 100, 10);
        order.fill(4);
        assert_eq!(order.remaining_quantity(), 6);
        assert_eq!(order.filled_quantity(), 4);
        assert!(!order.is_filled());

        order.fill(6);
        assert!(order.is_filled());
        assert_eq!(order.filled_quantity(), order.initial_quantity);
    }

    #[test]
    #[should_panic(expected = "cannot be filled")]
    fn test_overfill_panics() {
        let mut order = Order::new(OrderType::GoodTillCancel, 1, Side::Sell, 100, 5);
        order.fill(6);
    }

    #[test]
    fn test_wire_codes_round_trip() {
        for side in [Side::Buy, Side::Sell] {
            assert_eq!(Side::from_wire(side.to_wire()), Some(side));
        }
        for ty in [
            OrderType::GoodTillCancel,
            OrderType::FillAndKill,
            OrderType::FillOrKill,
            OrderType::GoodForDay,
            OrderType::Market,
        ] {
            assert_eq!(OrderType::from_wire(ty.to_wire()), Some(ty));
        }
        assert_eq!(Side::from_wire(2), None);
        assert_eq!(OrderType::from_wire(5), None);
    }
}
