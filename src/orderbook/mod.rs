//! Order book synchronization state.
//!
//! - [`book`] - depth-limited, cumulative-total price ladder
//! - [`throttle`] - coalescing of downstream book notifications
//!
//! # Example
//!
//! ```rust
//! use book_sync::orderbook::Book;
//! use book_sync::types::{RawLevel, Side};
//! use rust_decimal::Decimal;
//!
//! let mut book = Book::new();
//!
//! book.apply_snapshot(
//!     Side::Bids,
//!     &[
//!         RawLevel::new(Decimal::from(100), Decimal::from(5)),
//!         RawLevel::new(Decimal::from(99), Decimal::from(3)),
//!     ],
//! );
//! book.apply_delta(Side::Bids, Decimal::from(101), Decimal::from(4))?;
//!
//! let totals: Vec<_> = book.bids().iter().map(|l| l.total).collect();
//! assert_eq!(totals, vec![Decimal::from(4), Decimal::from(9), Decimal::from(12)]);
//! # Ok::<(), book_sync::Error>(())
//! ```

pub mod book;
pub mod throttle;

pub use book::{ApplyReport, Book, DeltaOutcome, PriceLevel, DEFAULT_DEPTH};
pub use throttle::UpdateThrottle;

/// Whether the local book can be shown to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookState {
    /// Connected or switched, but no snapshot received yet; deltas are dropped
    WaitingForSnapshot,
    /// Snapshot applied and deltas are flowing
    Synchronized,
}
