use std::io;

use thiserror::Error;

use crate::orders::OrderId;

/// Why the engine refused an order. A rejection leaves the book untouched.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum OrderRejected {
    #[error("order id {0} already exists")]
    DuplicateId(OrderId),
    #[error("price must be positive")]
    InvalidPrice,
    #[error("quantity must be positive")]
    InvalidQuantity,
    #[error("order cannot match at its limit price")]
    NoImmediateMatch,
    #[error("order cannot be filled completely")]
    NoCompleteFill,
}

impl OrderRejected {
    /// Non-zero status code reported in wire responses.
    pub fn status_code(self) -> u8 {
        match self {
            OrderRejected::InvalidPrice => 1,
            OrderRejected::InvalidQuantity => 2,
            OrderRejected::NoImmediateMatch | OrderRejected::NoCompleteFill => 3,
            OrderRejected::DuplicateId(_) => 4,
        }
    }
}

/// Fatal server-level failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error(transparent)]
    Io(#[from] io::Error),
}
