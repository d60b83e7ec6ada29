//! Wire and domain types.
//!
//! - [`messages`] - WebSocket frame codec (incoming control/data, outgoing commands)
//!
//! Prices and sizes are [`Decimal`] so cumulative totals never accumulate
//! floating-point error.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod messages;

pub use messages::{ControlKind, ControlMessage, DataMessage, FeedMessage, WsCommand};

/// Price of a level, exact decimal
pub type Price = Decimal;

/// Size resting at a level, exact decimal
pub type Size = Decimal;

/// Side of the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Buy side, best = highest price
    Bids,
    /// Sell side, best = lowest price
    Asks,
}

impl Side {
    /// Canonical ordering of two prices on this side: `Less` means `a` is
    /// closer to the best price than `b`.
    #[inline]
    pub fn cmp_prices(self, a: &Price, b: &Price) -> std::cmp::Ordering {
        match self {
            Side::Bids => b.cmp(a),
            Side::Asks => a.cmp(b),
        }
    }

    /// Wire name of the side
    pub const fn as_str(self) -> &'static str {
        match self {
            Side::Bids => "bids",
            Side::Asks => "asks",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded `(price, size)` pair that has not been validated yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLevel {
    /// Level price
    pub price: Price,
    /// Level size; zero means "remove" inside an update
    pub size: Size,
}

impl RawLevel {
    /// Create a raw level
    pub const fn new(price: Price, size: Size) -> Self {
        Self { price, size }
    }
}

impl From<(Price, Size)> for RawLevel {
    fn from((price, size): (Price, Size)) -> Self {
        Self { price, size }
    }
}
