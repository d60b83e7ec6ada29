//! Connection to the upstream book feed.
//!
//! This module contains:
//!
//! - [`websocket`] - transport seam and the `tokio-tungstenite` connector
//! - [`session`] - connection state machine with reconnect/backoff
//! - [`subscription`] - the single active subscription and its restoration

pub mod session;
pub mod subscription;
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use session::{CloseReason, ReconnectConfig, Session, SessionEvent, SessionState, ShutdownHandle};
pub use subscription::{CommandSink, Subscription, SubscriptionManager};
pub use websocket::{Connector, Transport, WsConnector, WsTransport};
