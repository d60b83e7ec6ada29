//! In-memory [`Connector`] for unit tests.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use super::websocket::{Connector, Transport};
use crate::error::Error;

#[derive(Debug)]
enum MockFrame {
    Text(String),
    Drop,
}

#[derive(Debug, Default)]
struct MockState {
    fail_next: usize,
    connects: usize,
    current: Option<mpsc::UnboundedSender<MockFrame>>,
    backlog: Vec<MockFrame>,
    sent: Vec<String>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MockState>,
    changed: Notify,
}

/// Connector whose connections are driven by the test.
///
/// Frames pushed while no connection is up are delivered to the next one.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnector {
    shared: Arc<Shared>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` connect attempts
    pub(crate) fn fail_next(&self, n: usize) {
        self.shared.state.lock().fail_next = n;
    }

    /// Deliver a text frame on the current connection
    pub(crate) fn push(&self, text: impl Into<String>) {
        self.deliver(MockFrame::Text(text.into()));
    }

    /// Drop the current connection as if the network failed
    pub(crate) fn drop_connection(&self) {
        let mut state = self.shared.state.lock();
        if let Some(tx) = state.current.take() {
            let _ = tx.send(MockFrame::Drop);
        }
    }

    /// Frames sent by the client, across all connections
    pub(crate) fn sent(&self) -> Vec<String> {
        self.shared.state.lock().sent.clone()
    }

    /// Connect attempts made so far, failed ones included
    pub(crate) fn connects(&self) -> usize {
        self.shared.state.lock().connects
    }

    /// Whether the client closed a connection gracefully
    pub(crate) fn closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Wait until at least `n` frames were sent
    pub(crate) async fn wait_for_sent(&self, n: usize) -> Vec<String> {
        loop {
            let changed = self.shared.changed.notified();
            {
                let state = self.shared.state.lock();
                if state.sent.len() >= n {
                    return state.sent.clone();
                }
            }
            changed.await;
        }
    }

    fn deliver(&self, frame: MockFrame) {
        let mut state = self.shared.state.lock();
        let frame = match state.current.as_ref() {
            Some(tx) => match tx.send(frame) {
                Ok(()) => return,
                Err(mpsc::error::SendError(frame)) => frame,
            },
            None => frame,
        };
        state.backlog.push(frame);
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, _url: &str) -> Result<MockTransport, Error> {
        let rx = {
            let mut state = self.shared.state.lock();
            state.connects += 1;
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(Error::ConnectionLost);
            }
            let (tx, rx) = mpsc::unbounded_channel();
            for frame in state.backlog.drain(..) {
                let _ = tx.send(frame);
            }
            state.current = Some(tx);
            rx
        };
        self.shared.changed.notify_waiters();
        Ok(MockTransport {
            rx,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// One mock connection
#[derive(Debug)]
pub(crate) struct MockTransport {
    rx: mpsc::UnboundedReceiver<MockFrame>,
    shared: Arc<Shared>,
}

impl Transport for MockTransport {
    async fn send_text(&mut self, text: String) -> Result<(), Error> {
        self.shared.state.lock().sent.push(text);
        self.shared.changed.notify_waiters();
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String, Error>> {
        match self.rx.recv().await? {
            MockFrame::Text(text) => Some(Ok(text)),
            MockFrame::Drop => Some(Err(Error::ConnectionLost)),
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        let mut state = self.shared.state.lock();
        state.closed = true;
        state.current = None;
        Ok(())
    }
}
