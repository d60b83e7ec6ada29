//! The feed engine.
//!
//! [`OrderbookFeed`] owns the session, the subscription, the book and the
//! notification throttle, and drives them from a single task. Everything
//! outside that task talks to it through a [`FeedHandle`]: commands go in
//! over a channel, books come out over a `watch` channel.
//!
//! # Example
//!
//! ```rust,no_run
//! use book_sync::{Config, OrderbookFeed};
//!
//! # async fn example() -> book_sync::Result<()> {
//! let feed = OrderbookFeed::new(Config::new())?;
//! let handle = feed.handle();
//! let task = tokio::spawn(feed.run());
//!
//! let mut books = handle.subscribe();
//! books.changed().await.ok();
//! println!("best bid: {:?}", books.borrow().best_bid());
//!
//! handle.toggle_instrument()?;
//! handle.close();
//! task.await.ok();
//! # Ok(())
//! # }
//! ```

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::session::{CloseReason, Session, SessionEvent, SessionState, ShutdownHandle};
use crate::client::subscription::SubscriptionManager;
use crate::client::websocket::{Connector, WsConnector};
use crate::config::Config;
use crate::error::Error;
use crate::orderbook::{Book, BookState, UpdateThrottle};
use crate::types::messages::{decode, ControlKind, ControlMessage, DataKind, DataMessage, FeedMessage};

/// Commands accepted by a running feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    /// Move the subscription to another instrument
    SwitchInstrument(String),
    /// Move to the next configured instrument
    ToggleInstrument,
    /// Pause the stream, keeping the connection
    Background,
    /// Resume the stream
    Foreground,
    /// Shut down
    Close,
}

/// Clonable control handle for a running [`OrderbookFeed`]
#[derive(Debug, Clone)]
pub struct FeedHandle {
    commands: mpsc::UnboundedSender<FeedCommand>,
    shutdown: ShutdownHandle,
    book: watch::Receiver<Book>,
    connection: watch::Receiver<SessionState>,
}

impl FeedHandle {
    fn send(&self, cmd: FeedCommand) -> Result<(), Error> {
        self.commands.send(cmd).map_err(|_| Error::Closed)
    }

    /// Switch to `instrument`; the published book is empty until its
    /// snapshot arrives
    pub fn switch_instrument(&self, instrument: impl Into<String>) -> Result<(), Error> {
        self.send(FeedCommand::SwitchInstrument(instrument.into()))
    }

    /// Switch to the next configured instrument
    pub fn toggle_instrument(&self) -> Result<(), Error> {
        self.send(FeedCommand::ToggleInstrument)
    }

    /// Consumer is no longer visible; unsubscribe but stay connected
    pub fn app_background(&self) -> Result<(), Error> {
        self.send(FeedCommand::Background)
    }

    /// Consumer is visible again; re-subscribe
    pub fn app_foreground(&self) -> Result<(), Error> {
        self.send(FeedCommand::Foreground)
    }

    /// Shut the feed down. Never reconnects afterwards, even if a reconnect
    /// is in flight.
    pub fn close(&self) {
        self.shutdown.request();
        let _ = self.commands.send(FeedCommand::Close);
    }

    /// Check if the feed was closed or has stopped
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_requested() || self.commands.is_closed()
    }

    /// Receiver of published books
    pub fn subscribe(&self) -> watch::Receiver<Book> {
        self.book.clone()
    }

    /// Latest published book
    pub fn book(&self) -> Book {
        self.book.borrow().clone()
    }

    /// Receiver of connection state changes.
    ///
    /// The state is `Reconnecting` from the moment the connection drops; the
    /// published book is emptied at the same time.
    pub fn connection(&self) -> watch::Receiver<SessionState> {
        self.connection.clone()
    }

    /// Check if the feed is connected upstream
    pub fn is_connected(&self) -> bool {
        *self.connection.borrow() == SessionState::Open
    }
}

/// Order book feed engine
pub struct OrderbookFeed<C: Connector = WsConnector> {
    config: Config,
    session: Session<C>,
    subscriptions: SubscriptionManager,
    book: Book,
    state: BookState,
    throttle: UpdateThrottle,
    publisher: watch::Sender<Book>,
    connection: watch::Sender<SessionState>,
    commands: mpsc::UnboundedReceiver<FeedCommand>,
    handle: FeedHandle,
}

impl<C: Connector> std::fmt::Debug for OrderbookFeed<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderbookFeed")
            .field("session", &self.session)
            .field("subscription", &self.subscriptions.active())
            .field("state", &self.state)
            .finish()
    }
}

impl OrderbookFeed<WsConnector> {
    /// Create a feed that connects over `tokio-tungstenite`
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the configuration does not validate.
    pub fn new(config: Config) -> Result<Self, Error> {
        Self::with_connector(config, WsConnector)
    }
}

impl<C: Connector> OrderbookFeed<C> {
    /// Create a feed on top of a custom connector
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the configuration does not validate.
    pub fn with_connector(config: Config, connector: C) -> Result<Self, Error> {
        config.validate()?;

        let session = Session::new(connector, config.url(), config.reconnect().clone());
        let subscriptions =
            SubscriptionManager::new(config.feed(), config.instruments().to_vec());
        let book = Book::with_depth(config.depth());
        let (publisher, book_rx) = watch::channel(book.clone());
        let (connection, connection_rx) = watch::channel(SessionState::Disconnected);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let handle = FeedHandle {
            commands: commands_tx,
            shutdown: session.shutdown_handle(),
            book: book_rx,
            connection: connection_rx,
        };

        Ok(Self {
            throttle: UpdateThrottle::new(config.throttle_interval()),
            config,
            session,
            subscriptions,
            book,
            state: BookState::WaitingForSnapshot,
            publisher,
            connection,
            commands,
            handle,
        })
    }

    /// Control handle; clone freely
    pub fn handle(&self) -> FeedHandle {
        self.handle.clone()
    }

    /// Configuration the feed was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connect and process frames and commands until closed.
    ///
    /// # Errors
    ///
    /// The connect error if the first connection fails, or
    /// [`Error::ConnectionLost`] when the connection dropped and reconnecting
    /// is disabled or gave up.
    pub async fn run(mut self) -> Result<(), Error> {
        self.connection.send_replace(SessionState::Connecting);
        match self.session.connect().await {
            Ok(()) => {}
            Err(e) => {
                self.connection.send_replace(SessionState::Disconnected);
                return match e {
                    Error::Closed => Ok(()),
                    e => Err(e),
                };
            }
        }
        self.on_opened().await;

        // Commands and throttle deadlines interrupt `next_event`; the session
        // keeps its backoff deadline across that, so a busy consumer neither
        // stretches the backoff nor burns retries.

        loop {
            let deadline = self.throttle.deadline();
            tokio::select! {
                biased;
                Some(cmd) = self.commands.recv() => {
                    if cmd == FeedCommand::Close {
                        break;
                    }
                    self.handle_command(cmd).await;
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if self.throttle.poll_due(Instant::now()) {
                        self.publish();
                    }
                }
                event = self.session.next_event() => match event {
                    SessionEvent::Lost => self.on_lost(),
                    SessionEvent::Opened => self.on_opened().await,
                    SessionEvent::Frame(text) => self.handle_frame(&text),
                    SessionEvent::Closed(reason) => {
                        self.subscriptions.on_session_closed();
                        self.connection.send_replace(SessionState::Disconnected);
                        info!(?reason, "feed stopped");
                        return match reason {
                            CloseReason::Requested => Ok(()),
                            CloseReason::ReconnectDisabled | CloseReason::RetriesExhausted => {
                                Err(Error::ConnectionLost)
                            }
                        };
                    }
                },
            }
        }

        self.subscriptions.on_session_closed();
        self.session.close().await?;
        self.connection.send_replace(SessionState::Disconnected);
        info!("feed closed");
        Ok(())
    }

    /// The book stops being live the moment the connection drops
    fn on_lost(&mut self) {
        warn!("connection lost, book cleared until resync");
        self.subscriptions.on_session_closed();
        self.connection.send_replace(SessionState::Reconnecting);
        self.begin_resync();
    }

    async fn on_opened(&mut self) {
        self.connection.send_replace(SessionState::Open);
        self.begin_resync();
        if let Err(e) = self.subscriptions.on_session_opened(&mut self.session).await {
            warn!(error = %e, "failed to restore subscription");
        }
    }

    async fn handle_command(&mut self, cmd: FeedCommand) {
        let result = match cmd {
            FeedCommand::SwitchInstrument(instrument) => self.switch_to(instrument).await,
            FeedCommand::ToggleInstrument => {
                match self.subscriptions.next_instrument().map(str::to_owned) {
                    Some(next) => self.switch_to(next).await,
                    None => Ok(()),
                }
            }
            FeedCommand::Background => self.subscriptions.on_app_background(&mut self.session).await,
            FeedCommand::Foreground => {
                if self.subscriptions.is_live() {
                    Ok(())
                } else {
                    self.begin_resync();
                    self.subscriptions.on_app_foreground(&mut self.session).await
                }
            }
            FeedCommand::Close => Ok(()),
        };
        if let Err(e) = result {
            warn!(error = %e, "feed command failed");
        }
    }

    async fn switch_to(&mut self, instrument: String) -> Result<(), Error> {
        if self.subscriptions.active_instrument() == Some(instrument.as_str()) {
            debug!(%instrument, "already on instrument");
            return Ok(());
        }
        info!(%instrument, "switching instrument");
        self.begin_resync();
        self.subscriptions
            .switch_instrument(&mut self.session, &instrument)
            .await
    }

    /// Drop the local book and wait for a fresh snapshot
    fn begin_resync(&mut self) {
        self.book.clear();
        self.state = BookState::WaitingForSnapshot;
        self.throttle.reset();
        self.publish();
    }

    fn handle_frame(&mut self, text: &str) {
        match decode(text) {
            Ok(FeedMessage::Control(msg)) => log_control(&msg),
            Ok(FeedMessage::Data(msg)) => self.apply_data(&msg),
            Err(e) => warn!(error = %e, "dropping frame"),
        }
    }

    fn apply_data(&mut self, msg: &DataMessage) {
        let Some(active) = self.subscriptions.active() else {
            return;
        };
        let wrong_product = msg
            .product_id
            .as_deref()
            .is_some_and(|product| product != active.instrument);
        if !self.subscriptions.is_live() || msg.feed != active.feed || wrong_product {
            debug!(feed = %msg.feed, product = ?msg.product_id, "dropping stale data frame");
            return;
        }

        match (self.state, msg.kind) {
            (BookState::WaitingForSnapshot, DataKind::Update) => {
                debug!("dropping update received before snapshot");
                return;
            }
            (_, DataKind::Snapshot) => self.state = BookState::Synchronized,
            (BookState::Synchronized, DataKind::Update) => {}
        }

        let report = self.book.apply_message(msg);
        if report.changed && self.throttle.record(Instant::now()) {
            self.publish();
        }
    }

    fn publish(&self) {
        self.publisher.send_replace(self.book.clone());
    }
}

fn log_control(msg: &ControlMessage) {
    match msg.kind {
        ControlKind::Info => info!(detail = ?msg.detail, "server info"),
        ControlKind::Subscribed => {
            info!(feed = ?msg.feed, products = ?msg.product_ids, "subscription confirmed")
        }
        ControlKind::Unsubscribed => {
            info!(feed = ?msg.feed, products = ?msg.product_ids, "unsubscription confirmed")
        }
        ControlKind::Error => warn!(feed = ?msg.feed, detail = ?msg.detail, "server error"),
    }
}
