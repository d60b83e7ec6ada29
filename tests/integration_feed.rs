//! Integration tests for the feed engine against a local WebSocket server.
//!
//! The server side is driven by the test itself: every accepted connection is
//! handed over through a channel so the test can read the client's commands
//! and script the frames it sends back.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=book_sync=debug cargo test --test integration_feed -- --nocapture
//! ```

use std::time::Duration;

use book_sync::client::ReconnectConfig;
use book_sync::{Book, Config, Error, OrderbookFeed};
use futures_util::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(5);

type ServerConn = WebSocketStream<TcpStream>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start a server on an ephemeral port; accepted connections arrive on the
/// returned channel
async fn start_server() -> (String, mpsc::UnboundedReceiver<ServerConn>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                if tx.send(ws).is_err() {
                    break;
                }
            }
        }
    });

    (url, rx)
}

async fn next_conn(conns: &mut mpsc::UnboundedReceiver<ServerConn>) -> ServerConn {
    timeout(WAIT, conns.recv())
        .await
        .expect("timed out waiting for connection")
        .expect("server stopped")
}

async fn next_json(ws: &mut ServerConn) -> Value {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for client frame")
            .expect("client went away")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_json(ws: &mut ServerConn, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

async fn wait_for_book(
    books: &mut watch::Receiver<Book>,
    f: impl FnMut(&Book) -> bool,
) -> Book {
    timeout(WAIT, books.wait_for(f))
        .await
        .expect("timed out waiting for book")
        .unwrap()
        .clone()
}

fn subscribe(instrument: &str) -> Value {
    json!({"event": "subscribe", "feed": "book_ui_1", "product_ids": [instrument]})
}

fn snapshot(instrument: &str, bids: Value, asks: Value) -> Value {
    json!({
        "numLevels": 25,
        "feed": "book_ui_1_snapshot",
        "product_id": instrument,
        "bids": bids,
        "asks": asks,
    })
}

#[tokio::test]
async fn test_snapshot_update_and_reconnect() {
    init_tracing();
    let (url, mut conns) = start_server().await;

    let config = Config::new()
        .with_url(url)
        .with_reconnect(ReconnectConfig::new().initial_delay_ms(10));
    let feed = OrderbookFeed::new(config).unwrap();
    let handle = feed.handle();
    let mut books = handle.subscribe();
    let task = tokio::spawn(feed.run());

    // First connection: subscribe, snapshot, update
    let mut ws = next_conn(&mut conns).await;
    assert_eq!(next_json(&mut ws).await, subscribe("PI_XBTUSD"));

    send_json(&mut ws, json!({"event": "info", "version": 1})).await;
    send_json(
        &mut ws,
        json!({"event": "subscribed", "feed": "book_ui_1", "product_ids": ["PI_XBTUSD"]}),
    )
    .await;
    send_json(
        &mut ws,
        snapshot(
            "PI_XBTUSD",
            json!([[37500.5, 1000], [37500.0, 2500], [37499.0, 500]]),
            json!([[37501.0, 1500], [37502.5, 3000]]),
        ),
    )
    .await;

    let book = wait_for_book(&mut books, |b| !b.is_empty()).await;
    let bid_totals: Vec<_> = book.bids().iter().map(|l| l.total).collect();
    assert_eq!(bid_totals, vec![dec!(1000), dec!(3500), dec!(4000)]);
    assert_eq!(book.spread(), Some(dec!(0.5)));
    assert_eq!(book.max_total(), dec!(4500));

    send_json(
        &mut ws,
        json!({
            "feed": "book_ui_1",
            "product_id": "PI_XBTUSD",
            "bids": [[37500.5, 0]],
            "asks": [[37501.0, 100]],
        }),
    )
    .await;

    let book = wait_for_book(&mut books, |b| b.bids().len() == 2).await;
    assert_eq!(book.best_bid().unwrap().price, dec!(37500.0));
    assert_eq!(book.best_ask().unwrap().size, dec!(100));

    // Server drops the connection; the client reconnects and re-subscribes
    ws.close(None).await.unwrap();
    drop(ws);

    let mut ws = next_conn(&mut conns).await;
    assert_eq!(next_json(&mut ws).await, subscribe("PI_XBTUSD"));
    wait_for_book(&mut books, Book::is_empty).await;

    send_json(
        &mut ws,
        snapshot("PI_XBTUSD", json!([[37600, 10]]), json!([[37601, 20]])),
    )
    .await;
    let book = wait_for_book(&mut books, |b| !b.is_empty()).await;
    assert_eq!(book.best_bid().unwrap().price, dec!(37600));

    handle.close();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_switch_instrument_over_the_wire() {
    init_tracing();
    let (url, mut conns) = start_server().await;

    let feed = OrderbookFeed::new(Config::new().with_url(url)).unwrap();
    let handle = feed.handle();
    let mut books = handle.subscribe();
    let task = tokio::spawn(feed.run());

    let mut ws = next_conn(&mut conns).await;
    assert_eq!(next_json(&mut ws).await, subscribe("PI_XBTUSD"));
    send_json(&mut ws, snapshot("PI_XBTUSD", json!([[100, 1]]), json!([[101, 1]]))).await;
    wait_for_book(&mut books, |b| !b.is_empty()).await;

    handle.toggle_instrument().unwrap();
    assert_eq!(
        next_json(&mut ws).await,
        json!({"event": "unsubscribe", "feed": "book_ui_1", "product_ids": ["PI_XBTUSD"]})
    );
    assert_eq!(next_json(&mut ws).await, subscribe("PI_ETHUSD"));

    send_json(&mut ws, snapshot("PI_ETHUSD", json!([[2000, 3]]), json!([[2001, 4]]))).await;
    let book = wait_for_book(&mut books, |b| {
        b.best_bid().is_some_and(|l| l.price == dec!(2000))
    })
    .await;
    assert_eq!(book.asks()[0].total, dec!(4));

    handle.close();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_initial_connect_failure() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let feed = OrderbookFeed::new(Config::new().with_url(url)).unwrap();
    let result = timeout(WAIT, feed.run()).await.unwrap();
    assert!(matches!(result, Err(Error::WebSocket(_))));
}

#[test]
fn test_rejects_non_websocket_url() {
    let result = OrderbookFeed::new(Config::new().with_url("http://127.0.0.1:1"));
    assert!(matches!(result, Err(Error::Config(_))));
}
