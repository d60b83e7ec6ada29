//! WebSocket transport.
//!
//! [`Connector`] and [`Transport`] are the seam between the connection
//! [`Session`](super::session::Session) and the network. [`WsConnector`] is
//! the production implementation on top of `tokio-tungstenite`.

use std::future::Future;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An established duplex text connection
pub trait Transport: Send {
    /// Send one text frame
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), Error>> + Send;

    /// Next text frame, in arrival order.
    ///
    /// `Some(Err(_))` when the connection failed or the remote closed it,
    /// `None` when the stream ended.
    fn next_text(&mut self) -> impl Future<Output = Option<Result<String, Error>>> + Send;

    /// Close the connection gracefully
    fn close(&mut self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Opens [`Transport`]s; called again on every reconnect
pub trait Connector: Send + Sync {
    /// Transport produced by this connector
    type Transport: Transport;

    /// Open a connection to `url`
    fn connect(&self, url: &str) -> impl Future<Output = Result<Self::Transport, Error>> + Send;
}

/// `tokio-tungstenite` connector
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, url: &str) -> Result<WsTransport, Error> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        debug!(url, "WebSocket handshake complete");
        Ok(WsTransport { write, read })
    }
}

/// One `tokio-tungstenite` connection
#[derive(Debug)]
pub struct WsTransport {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), Error> {
        self.write.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String, Error>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Ping(data)) => {
                    // Respond to pings automatically
                    if let Err(e) = self.write.send(Message::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "remote closed connection");
                    return Some(Err(Error::ConnectionLost));
                }
                Ok(_) => {
                    // Ignore other message types (Binary, Pong, Frame)
                    continue;
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.write.close().await?;
        Ok(())
    }
}
