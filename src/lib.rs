//! # book-sync
//!
//! Keeps a local, depth-limited order book in sync with a streaming
//! WebSocket feed (snapshot + incremental deltas) and publishes it to
//! consumers.
//!
//! ## Features
//!
//! - **Exact book** - `rust_decimal` prices and sizes, cumulative totals per level
//! - **Self-healing connection** - reconnect with backoff, subscription restored
//! - **Instrument switching** - unsubscribe/subscribe with a clean resync
//! - **Throttled notifications** - leading + trailing edge, latest state always wins
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use book_sync::{Config, OrderbookFeed};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), book_sync::Error> {
//!     let config = Config::new()
//!         .with_instruments(["PI_XBTUSD", "PI_ETHUSD"])
//!         .with_throttle_interval(Duration::from_millis(100));
//!
//!     let feed = OrderbookFeed::new(config)?;
//!     let handle = feed.handle();
//!     tokio::spawn(feed.run());
//!
//!     let mut books = handle.subscribe();
//!     while books.changed().await.is_ok() {
//!         let book = books.borrow_and_update().clone();
//!         println!("spread: {:?}", book.spread());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! This crate is organized into several modules:
//!
//! - [`types`] - wire codec and shared price/side types
//! - [`orderbook`] - the book store and the notification throttle
//! - [`client`] - transport, session state machine, subscription tracking
//! - [`feed`] - the engine tying everything together in one task
//! - [`config`] - configuration
//! - [`error`] - error types for the crate

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod feed;
pub mod orderbook;
pub mod types;

// Re-export main types at crate root for convenience
pub use config::Config;
pub use error::Error;
pub use feed::{FeedCommand, FeedHandle, OrderbookFeed};
pub use orderbook::{Book, PriceLevel};

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;
