//! Live order book - streams the book and prints the top levels
//!
//! Usage:
//!   cargo run --example live_book
//!
//! Optional:
//!   BOOK_URL=wss://...          # Endpoint (default: production feed)
//!   BOOK_INSTRUMENTS=A,B        # Instruments to toggle between
//!   BOOK_TOGGLE_SECS=10         # Toggle instrument every N seconds (0 = never)

use std::time::Duration;

use book_sync::{Book, Config, OrderbookFeed};

const ROWS: usize = 5;

fn print_book(instrument: &str, book: &Book) {
    println!("--- {} ---", instrument);
    if book.is_empty() {
        println!("  (waiting for snapshot)");
        return;
    }
    println!("  {:>14} {:>12} {:>12}", "PRICE", "SIZE", "TOTAL");
    for level in book.asks().iter().take(ROWS).rev() {
        println!("  {:>14} {:>12} {:>12}  ask", level.price, level.size, level.total);
    }
    match (book.spread(), book.spread_ratio()) {
        (Some(spread), Some(ratio)) => {
            println!("  spread {} ({:.4}%)", spread, ratio * rust_decimal::Decimal::ONE_HUNDRED)
        }
        _ => println!("  spread -"),
    }
    for level in book.bids().iter().take(ROWS) {
        println!("  {:>14} {:>12} {:>12}  bid", level.price, level.size, level.total);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("book_sync=info".parse()?),
        )
        .init();

    let mut config = Config::new().with_throttle_interval(Duration::from_millis(250));
    if let Ok(url) = std::env::var("BOOK_URL") {
        config = config.with_url(url);
    }
    if let Ok(list) = std::env::var("BOOK_INSTRUMENTS") {
        config = config.with_instruments(list.split(',').map(str::trim).filter(|s| !s.is_empty()));
    }
    let toggle_every: u64 = std::env::var("BOOK_TOGGLE_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    println!("=== Live Order Book ===\n");
    println!("Endpoint:    {}", config.url());
    println!("Instruments: {}\n", config.instruments().join(", "));

    let instruments = config.instruments().to_vec();
    let feed = OrderbookFeed::new(config)?;
    let handle = feed.handle();
    let mut task = tokio::spawn(feed.run());

    let mut books = handle.subscribe();
    let mut current = 0usize;
    let mut toggle = tokio::time::interval(Duration::from_secs(toggle_every.max(1)));
    toggle.tick().await;

    println!("Streaming... (Ctrl+C to stop)\n");

    loop {
        tokio::select! {
            changed = books.changed() => {
                if changed.is_err() {
                    break;
                }
                let book = books.borrow_and_update().clone();
                print_book(&instruments[current], &book);
            }
            _ = toggle.tick(), if toggle_every > 0 => {
                current = (current + 1) % instruments.len();
                println!("\n>>> switching to {}\n", instruments[current]);
                handle.toggle_instrument()?;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                handle.close();
                break;
            }
            result = &mut task => {
                println!("Feed stopped: {:?}", result?);
                return Ok(());
            }
        }
    }

    let result = task.await?;
    println!("Feed stopped: {:?}", result);
    Ok(())
}
