//! Connection session state machine with automatic reconnection.
//!
//! ```text
//! Disconnected -> Connecting -> Open -> Closing -> Disconnected
//!                     |          |  ^
//!                     v          v  |
//!               Disconnected  Reconnecting -> Disconnected
//! ```
//!
//! A [`Session`] hands out [`SessionEvent`]s one at a time: text frames in
//! arrival order, a `Lost` event when the connection drops, an `Opened`
//! event after every successful reconnect (the remote keeps no subscription
//! state across connections), and a final `Closed` event. An intentional close through a [`ShutdownHandle`] wins
//! over any in-flight reconnect or backoff.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::websocket::{Connector, Transport};
use crate::error::Error;
use crate::types::messages::WsCommand;

/// Lifecycle state of a [`Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection
    Disconnected,
    /// Initial handshake in progress
    Connecting,
    /// Connected; frames flow and sends are accepted
    Open,
    /// Connection lost, re-establishing
    Reconnecting,
    /// Intentional shutdown in progress
    Closing,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition
    pub const fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Open)
                | (Connecting, Disconnected)
                | (Connecting, Closing)
                | (Open, Closing)
                | (Open, Reconnecting)
                | (Open, Disconnected)
                | (Reconnecting, Open)
                | (Reconnecting, Closing)
                | (Reconnecting, Disconnected)
                | (Closing, Disconnected)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called or a [`ShutdownHandle`] fired
    Requested,
    /// Connection lost and reconnect is disabled
    ReconnectDisabled,
    /// Connection lost and `max_retries` attempts failed
    RetriesExhausted,
}

/// Something the session owner must react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection dropped and a reconnect is under way; anything derived
    /// from the old connection is stale
    Lost,
    /// Connection re-established; subscriptions must be re-issued
    Opened,
    /// A text frame, in arrival order
    Frame(String),
    /// Session is disconnected for good
    Closed(CloseReason),
}

/// Configuration for reconnection behavior
///
/// The first retry after a drop is immediate; later retries back off
/// exponentially up to `max_delay_ms`, with +/- `jitter_factor` noise.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Whether to reconnect at all after an abnormal closure
    pub enabled: bool,
    /// Maximum number of consecutive reconnection attempts (0 = infinite)
    pub max_retries: u32,
    /// Delay before the second attempt
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnection attempts
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Jitter as a fraction of the delay (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 0,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl ReconnectConfig {
    /// Create a new reconnect config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconnect config that never reconnects
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set maximum retries (0 = infinite)
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay in milliseconds
    pub fn initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Set maximum delay in milliseconds
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Set backoff multiplier
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor; clamped to `0.0..=1.0`
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Backoff delay for the given attempt, before jitter.
    ///
    /// Attempt 0 is the immediate retry.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let delay_ms = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay_ms)
    }

    /// Backoff delay with jitter applied
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt).as_secs_f64();
        let range = base * self.jitter_factor;
        let jitter = if range > 0.0 {
            rand::thread_rng().gen_range(-range..=range)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + jitter).max(0.0))
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_retries > 0 && attempt >= self.max_retries
    }
}

#[derive(Debug, Default)]
struct ShutdownInner {
    requested: AtomicBool,
    notify: Notify,
}

/// Clonable, synchronous close request for a [`Session`].
///
/// Safe to call from any task or teardown path, including while a
/// reconnect is in flight; once requested the session never reconnects.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    inner: Arc<ShutdownInner>,
}

impl ShutdownHandle {
    /// Request shutdown
    pub fn request(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether shutdown was requested
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown is requested
    pub async fn requested(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}

/// Duplex connection with an explicit lifecycle and reconnect policy.
///
/// Not thread-safe; a single task owns it and drives it with
/// [`next_event`](Self::next_event).
pub struct Session<C: Connector> {
    connector: C,
    url: String,
    reconnect: ReconnectConfig,
    state: SessionState,
    transport: Option<C::Transport>,
    attempt: u32,
    retry_at: Option<Instant>,
    lost_unreported: bool,
    close_reason: Option<CloseReason>,
    shutdown: ShutdownHandle,
}

impl<C: Connector> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("reconnect_attempt", &self.attempt)
            .field("shutdown", &self.shutdown.is_requested())
            .finish()
    }
}

impl<C: Connector> Session<C> {
    /// Create a disconnected session
    pub fn new(connector: C, url: impl Into<String>, reconnect: ReconnectConfig) -> Self {
        Self {
            connector,
            url: url.into(),
            reconnect,
            state: SessionState::Disconnected,
            transport: None,
            attempt: 0,
            retry_at: None,
            lost_unreported: false,
            close_reason: None,
            shutdown: ShutdownHandle::default(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if frames can be sent
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Number of consecutive failed reconnect attempts
    pub fn reconnect_attempt(&self) -> u32 {
        self.attempt
    }

    /// Handle for requesting shutdown from elsewhere
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Endpoint this session connects to
    pub fn url(&self) -> &str {
        &self.url
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "session transition");
        self.state = next;
    }

    /// Open the connection.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] if shutdown was requested, `InvalidTransition` if the
    /// session is not disconnected, or the connector's error (the session is
    /// back to `Disconnected`).
    pub async fn connect(&mut self) -> Result<(), Error> {
        if self.shutdown.is_requested() {
            return Err(Error::Closed);
        }
        if self.state != SessionState::Disconnected {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: SessionState::Connecting,
            });
        }
        self.transition(SessionState::Connecting);

        let shutdown = self.shutdown.clone();
        let result = tokio::select! {
            biased;
            _ = shutdown.requested() => None,
            result = self.connector.connect(&self.url) => Some(result),
        };

        match result {
            Some(Ok(transport)) => {
                self.transport = Some(transport);
                self.attempt = 0;
                self.close_reason = None;
                self.transition(SessionState::Open);
                info!(url = %self.url, "session open");
                Ok(())
            }
            Some(Err(e)) => {
                warn!(url = %self.url, error = %e, "connect failed");
                self.transition(SessionState::Disconnected);
                Err(e)
            }
            None => {
                self.finish_close().await;
                Err(Error::Closed)
            }
        }
    }

    /// Send a text frame.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] unless the session is open. A transport
    /// failure is returned as-is and starts the reconnect path.
    pub async fn send(&mut self, text: String) -> Result<(), Error> {
        if self.state != SessionState::Open {
            return Err(Error::NotConnected);
        }
        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::NotConnected);
        };
        match transport.send_text(text).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.is_connection_error() {
                    self.on_connection_lost();
                }
                Err(e)
            }
        }
    }

    /// Serialize and send a command
    pub async fn send_command(&mut self, cmd: &WsCommand) -> Result<(), Error> {
        let json = cmd.to_json()?;
        self.send(json).await
    }

    /// Wait for the next event, reconnecting as the policy allows.
    ///
    /// A drop is reported as [`SessionEvent::Lost`] before any reconnect is
    /// attempted. Cancel-safe: dropping the future while waiting for a frame
    /// loses nothing, and dropping it during backoff keeps the retry deadline,
    /// so the next call sleeps only for what is left. A connect attempt that
    /// is cancelled midway is not counted against `max_retries`.
    pub async fn next_event(&mut self) -> SessionEvent {
        loop {
            if self.shutdown.is_requested() && self.state != SessionState::Disconnected {
                self.finish_close().await;
                return SessionEvent::Closed(CloseReason::Requested);
            }

            match self.state {
                SessionState::Open => {
                    let Some(transport) = self.transport.as_mut() else {
                        self.on_connection_lost();
                        continue;
                    };
                    let shutdown = self.shutdown.clone();
                    let frame = tokio::select! {
                        biased;
                        _ = shutdown.requested() => continue,
                        frame = transport.next_text() => frame,
                    };
                    match frame {
                        Some(Ok(text)) => return SessionEvent::Frame(text),
                        Some(Err(e)) => {
                            warn!(error = %e, "connection lost");
                            self.on_connection_lost();
                        }
                        None => {
                            warn!("connection stream ended");
                            self.on_connection_lost();
                        }
                    }
                }
                SessionState::Reconnecting if self.lost_unreported => {
                    self.lost_unreported = false;
                    return SessionEvent::Lost;
                }
                SessionState::Reconnecting => match self.reconnect().await {
                    Ok(()) => return SessionEvent::Opened,
                    Err(reason) => return SessionEvent::Closed(reason),
                },
                SessionState::Closing | SessionState::Connecting => {
                    // A previous close or connect was cancelled midway
                    self.transport = None;
                    self.state = SessionState::Disconnected;
                }
                SessionState::Disconnected => {
                    return SessionEvent::Closed(
                        self.close_reason.unwrap_or(CloseReason::Requested),
                    );
                }
            }
        }
    }

    /// Close the connection intentionally; never reconnects afterwards
    pub async fn close(&mut self) -> Result<(), Error> {
        self.shutdown.request();
        if self.state == SessionState::Disconnected {
            return Ok(());
        }
        self.finish_close().await;
        Ok(())
    }

    async fn finish_close(&mut self) {
        if self.state != SessionState::Closing {
            self.transition(SessionState::Closing);
        }
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!(error = %e, "error closing transport");
            }
        }
        self.close_reason = Some(CloseReason::Requested);
        self.retry_at = None;
        self.lost_unreported = false;
        self.transition(SessionState::Disconnected);
        info!(url = %self.url, "session closed");
    }

    fn on_connection_lost(&mut self) {
        self.transport = None;
        if self.reconnect.enabled && !self.shutdown.is_requested() {
            self.lost_unreported = true;
            self.retry_at = None;
            self.transition(SessionState::Reconnecting);
        } else {
            self.close_reason = Some(CloseReason::ReconnectDisabled);
            self.transition(SessionState::Disconnected);
        }
    }

    async fn reconnect(&mut self) -> Result<(), CloseReason> {
        let shutdown = self.shutdown.clone();
        loop {
            if self.reconnect.exhausted(self.attempt) {
                warn!(attempts = self.attempt, "giving up reconnecting");
                self.close_reason = Some(CloseReason::RetriesExhausted);
                self.retry_at = None;
                self.transition(SessionState::Disconnected);
                return Err(CloseReason::RetriesExhausted);
            }

            // Survives cancellation of this future
            let attempt = self.attempt;
            let reconnect = &self.reconnect;
            let retry_at = *self
                .retry_at
                .get_or_insert_with(|| Instant::now() + reconnect.jittered_delay(attempt));
            if retry_at > Instant::now() {
                let cancelled = tokio::select! {
                    biased;
                    _ = shutdown.requested() => true,
                    _ = tokio::time::sleep_until(retry_at) => false,
                };
                if cancelled {
                    self.finish_close().await;
                    return Err(CloseReason::Requested);
                }
            }

            info!(attempt = self.attempt + 1, url = %self.url, "reconnecting");

            let result = tokio::select! {
                biased;
                _ = shutdown.requested() => None,
                result = self.connector.connect(&self.url) => Some(result),
            };

            match result {
                Some(Ok(transport)) => {
                    self.transport = Some(transport);
                    self.attempt = 0;
                    self.retry_at = None;
                    self.transition(SessionState::Open);
                    info!(url = %self.url, "session re-opened");
                    return Ok(());
                }
                Some(Err(e)) => {
                    self.attempt += 1;
                    self.retry_at = None;
                    warn!(attempt = self.attempt, error = %e, "reconnect attempt failed");
                }
                None => {
                    self.finish_close().await;
                    return Err(CloseReason::Requested);
                }
            }
        }
    }
}
