//! Configuration for the order book feed.
//!
//! This module provides the [`Config`] struct: endpoint, feed name, the
//! instruments a consumer can toggle between, book depth, notification
//! throttling and reconnect policy.

use std::time::Duration;

use url::Url;

use crate::client::session::ReconnectConfig;
use crate::error::Error;
use crate::orderbook::DEFAULT_DEPTH;

/// Production WebSocket endpoint
pub const DEFAULT_URL: &str = "wss://www.cryptofacilities.com/ws/v1";

/// Grouped price-level book feed
pub const DEFAULT_FEED: &str = "book_ui_1";

/// Instruments offered by default, the first one is subscribed on startup
pub const DEFAULT_INSTRUMENTS: [&str; 2] = ["PI_XBTUSD", "PI_ETHUSD"];

/// Configuration for [`OrderbookFeed`](crate::OrderbookFeed)
///
/// # Example
///
/// ```rust
/// use book_sync::Config;
/// use std::time::Duration;
///
/// let config = Config::new()
///     .with_instruments(["PI_ETHUSD", "PI_XBTUSD"])
///     .with_throttle_interval(Duration::from_millis(100));
///
/// assert_eq!(config.initial_instrument(), Some("PI_ETHUSD"));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket endpoint
    url: String,

    /// Feed name, without the snapshot suffix
    feed: String,

    /// Instruments available for switching; the first is active on startup
    instruments: Vec<String>,

    /// Levels retained per side
    depth: usize,

    /// Minimum spacing between consumer notifications (zero = every change)
    throttle_interval: Duration,

    /// Reconnect policy
    reconnect: ReconnectConfig,
}

impl Config {
    /// Create a configuration with the default endpoint, feed and instruments
    pub fn new() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            feed: DEFAULT_FEED.to_string(),
            instruments: DEFAULT_INSTRUMENTS.iter().map(|s| s.to_string()).collect(),
            depth: DEFAULT_DEPTH,
            throttle_interval: Duration::ZERO,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Set the WebSocket endpoint
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the feed name
    #[must_use]
    pub fn with_feed(mut self, feed: impl Into<String>) -> Self {
        self.feed = feed.into();
        self
    }

    /// Set the instrument list; the first entry is subscribed on startup
    #[must_use]
    pub fn with_instruments<I, S>(mut self, instruments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instruments = instruments.into_iter().map(Into::into).collect();
        self
    }

    /// Set the number of levels retained per side
    #[must_use]
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Set the minimum spacing between consumer notifications
    #[must_use]
    pub fn with_throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval = interval;
        self
    }

    /// Set the reconnect policy
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Get the WebSocket endpoint
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the feed name
    pub fn feed(&self) -> &str {
        &self.feed
    }

    /// Get the instrument list
    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    /// Instrument subscribed on startup
    pub fn initial_instrument(&self) -> Option<&str> {
        self.instruments.first().map(String::as_str)
    }

    /// Get the book depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Get the notification throttle interval
    pub fn throttle_interval(&self) -> Duration {
        self.throttle_interval
    }

    /// Get the reconnect policy
    pub fn reconnect(&self) -> &ReconnectConfig {
        &self.reconnect
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for a non-WebSocket url, an empty feed name, an empty
    /// instrument list or a zero depth.
    pub fn validate(&self) -> Result<(), Error> {
        let url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "url scheme must be ws or wss, got `{}`",
                url.scheme()
            )));
        }
        if self.feed.is_empty() {
            return Err(Error::Config("feed name is empty".to_string()));
        }
        if self.instruments.is_empty() {
            return Err(Error::Config("instrument list is empty".to_string()));
        }
        if self.depth == 0 {
            return Err(Error::Config("depth must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
