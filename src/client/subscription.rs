//! Tracking of the single active feed subscription.
//!
//! The server forgets every subscription when a connection drops, so the
//! [`SubscriptionManager`] remembers the active `(feed, instrument)` pair
//! and re-issues it whenever the session opens again. Sending goes through
//! the [`CommandSink`] seam so the manager can be driven without a network.

use std::future::Future;

use tracing::{debug, info, warn};

use super::session::Session;
use super::websocket::Connector;
use crate::error::Error;
use crate::types::messages::WsCommand;

/// A `(feed, instrument)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    /// Feed name, without the snapshot suffix
    pub feed: String,
    /// Instrument identifier
    pub instrument: String,
}

impl Subscription {
    /// Create a subscription
    pub fn new(feed: impl Into<String>, instrument: impl Into<String>) -> Self {
        Self {
            feed: feed.into(),
            instrument: instrument.into(),
        }
    }

    fn subscribe_command(&self) -> WsCommand {
        WsCommand::subscribe(self.feed.as_str(), self.instrument.as_str())
    }

    fn unsubscribe_command(&self) -> WsCommand {
        WsCommand::unsubscribe(self.feed.as_str(), self.instrument.as_str())
    }
}

/// Something commands can be sent through
pub trait CommandSink {
    /// Send one command
    fn send_command(&mut self, cmd: &WsCommand) -> impl Future<Output = Result<(), Error>> + Send;
}

impl<C: Connector> CommandSink for Session<C> {
    fn send_command(&mut self, cmd: &WsCommand) -> impl Future<Output = Result<(), Error>> + Send {
        Session::send_command(self, cmd)
    }
}

/// Owner of the active subscription.
///
/// `live` means the subscribe command for the active pair went out on the
/// current connection and no unsubscribe followed. Data frames are only
/// meaningful while live.
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    feed: String,
    instruments: Vec<String>,
    active: Option<Subscription>,
    live: bool,
    foreground: bool,
}

impl SubscriptionManager {
    /// Create a manager; the first instrument becomes the active pair and
    /// is subscribed on the first [`on_session_opened`](Self::on_session_opened)
    pub fn new(feed: impl Into<String>, instruments: Vec<String>) -> Self {
        let feed = feed.into();
        let active = instruments
            .first()
            .map(|instrument| Subscription::new(feed.as_str(), instrument.as_str()));
        Self {
            feed,
            instruments,
            active,
            live: false,
            foreground: true,
        }
    }

    /// Active subscription, live or pending
    pub fn active(&self) -> Option<&Subscription> {
        self.active.as_ref()
    }

    /// Instrument of the active subscription
    pub fn active_instrument(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.instrument.as_str())
    }

    /// Default feed name
    pub fn feed(&self) -> &str {
        &self.feed
    }

    /// Configured instrument list
    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    /// Whether the active pair is subscribed on the current connection
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Whether the consumer is in the foreground
    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    /// Instrument after the active one in the configured list, wrapping
    pub fn next_instrument(&self) -> Option<&str> {
        if self.instruments.is_empty() {
            return None;
        }
        let next = match self.active_instrument() {
            Some(current) => self
                .instruments
                .iter()
                .position(|i| i == current)
                .map_or(0, |index| (index + 1) % self.instruments.len()),
            None => 0,
        };
        Some(self.instruments[next].as_str())
    }

    /// Make `(feed, instrument)` the active pair and subscribe to it.
    ///
    /// In the background the pair is only recorded. On failure the pair stays
    /// active and is re-issued on the next open.
    pub async fn subscribe<S: CommandSink>(
        &mut self,
        sink: &mut S,
        feed: &str,
        instrument: &str,
    ) -> Result<(), Error> {
        let subscription = Subscription::new(feed, instrument);
        let cmd = subscription.subscribe_command();
        self.active = Some(subscription);
        self.live = false;

        if !self.foreground {
            debug!(feed, instrument, "in background, deferring subscribe");
            return Ok(());
        }

        sink.send_command(&cmd).await?;
        self.live = true;
        info!(feed, instrument, "subscribed");
        Ok(())
    }

    /// Unsubscribe `(feed, instrument)`; the active pair is torn down if it
    /// matches, even when the command could not be sent
    pub async fn unsubscribe<S: CommandSink>(
        &mut self,
        sink: &mut S,
        feed: &str,
        instrument: &str,
    ) -> Result<(), Error> {
        let subscription = Subscription::new(feed, instrument);
        if self.active.as_ref() == Some(&subscription) {
            self.active = None;
            self.live = false;
        }
        sink.send_command(&subscription.unsubscribe_command()).await?;
        info!(feed, instrument, "unsubscribed");
        Ok(())
    }

    /// Move the active subscription to `instrument` on the same feed.
    ///
    /// The old pair is unsubscribed first when it is live; a failure there is
    /// logged and the new pair is still made active.
    pub async fn switch_instrument<S: CommandSink>(
        &mut self,
        sink: &mut S,
        instrument: &str,
    ) -> Result<(), Error> {
        let feed = match self.active.take() {
            Some(old) => {
                if self.live {
                    if let Err(e) = sink.send_command(&old.unsubscribe_command()).await {
                        warn!(instrument = %old.instrument, error = %e, "unsubscribe failed");
                    }
                    self.live = false;
                }
                old.feed
            }
            None => self.feed.clone(),
        };
        self.subscribe(sink, &feed, instrument).await
    }

    /// Switch to the next configured instrument, wrapping around
    pub async fn toggle_instrument<S: CommandSink>(&mut self, sink: &mut S) -> Result<(), Error> {
        let Some(next) = self.next_instrument().map(str::to_owned) else {
            return Err(Error::Config("instrument list is empty".to_string()));
        };
        self.switch_instrument(sink, &next).await
    }

    /// The connection (re)opened without upstream state; re-subscribe the
    /// active pair when in the foreground
    pub async fn on_session_opened<S: CommandSink>(&mut self, sink: &mut S) -> Result<(), Error> {
        self.live = false;
        match self.active.clone() {
            Some(active) if self.foreground => {
                self.subscribe(sink, &active.feed, &active.instrument).await
            }
            _ => Ok(()),
        }
    }

    /// The connection is gone; nothing is live any more
    pub fn on_session_closed(&mut self) {
        self.live = false;
    }

    /// Consumer went to the background: stop the stream, keep the pair
    pub async fn on_app_background<S: CommandSink>(&mut self, sink: &mut S) -> Result<(), Error> {
        self.foreground = false;
        if !self.live {
            return Ok(());
        }
        self.live = false;
        match &self.active {
            Some(active) => {
                sink.send_command(&active.unsubscribe_command()).await?;
                info!(instrument = %active.instrument, "paused subscription");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Consumer is back: re-subscribe the active pair
    pub async fn on_app_foreground<S: CommandSink>(&mut self, sink: &mut S) -> Result<(), Error> {
        self.foreground = true;
        if self.live {
            return Ok(());
        }
        match self.active.clone() {
            Some(active) => self.subscribe(sink, &active.feed, &active.instrument).await,
            None => Ok(()),
        }
    }
}
