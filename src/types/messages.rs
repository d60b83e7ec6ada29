//! WebSocket message codec.
//!
//! Outgoing commands are [`WsCommand`]s. Incoming text frames are decoded by
//! [`decode`] into either a [`ControlMessage`] (informational, never touches
//! the book) or a [`DataMessage`] (snapshot or update for one instrument).
//!
//! Frames look like:
//!
//! ```text
//! {"event": "subscribed", "feed": "book_ui_1", "product_ids": ["PI_XBTUSD"]}
//! {"feed": "book_ui_1_snapshot", "product_id": "PI_XBTUSD", "bids": [[100.5, 20]], "asks": [...]}
//! {"feed": "book_ui_1", "product_id": "PI_XBTUSD", "bids": [[100.5, 0]], "asks": []}
//! ```

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tracing::warn;

use super::{RawLevel, Side};
use crate::error::Error;

/// Suffix the upstream appends to a feed name for its full-book frames
pub const SNAPSHOT_SUFFIX: &str = "_snapshot";

/// Command sent to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WsCommand {
    /// Start streaming `feed` for the listed products
    Subscribe {
        /// Feed name, without the snapshot suffix
        feed: String,
        /// Instruments to subscribe
        product_ids: Vec<String>,
    },
    /// Stop streaming `feed` for the listed products
    Unsubscribe {
        /// Feed name, without the snapshot suffix
        feed: String,
        /// Instruments to unsubscribe
        product_ids: Vec<String>,
    },
}

impl WsCommand {
    /// Subscribe command for a single instrument
    pub fn subscribe(feed: impl Into<String>, instrument: impl Into<String>) -> Self {
        WsCommand::Subscribe {
            feed: feed.into(),
            product_ids: vec![instrument.into()],
        }
    }

    /// Unsubscribe command for a single instrument
    pub fn unsubscribe(feed: impl Into<String>, instrument: impl Into<String>) -> Self {
        WsCommand::Unsubscribe {
            feed: feed.into(),
            product_ids: vec![instrument.into()],
        }
    }

    /// Serialize to the JSON text frame sent on the wire
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Informational event kinds echoed by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Server greeting / version banner
    Info,
    /// Server-side error, or a frame this codec does not recognize
    Error,
    /// Subscription acknowledged
    Subscribed,
    /// Unsubscription acknowledged
    Unsubscribed,
}

/// A control frame; logged by the feed engine and otherwise ignored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    /// Event kind
    pub kind: ControlKind,
    /// Echoed feed name, when the server sends one
    pub feed: Option<String>,
    /// Echoed instruments (subscribed / unsubscribed)
    pub product_ids: Vec<String>,
    /// Server message or decoder diagnostics
    pub detail: Option<String>,
}

/// Whether a data frame replaces the book or patches it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// Full replacement of both sides
    Snapshot,
    /// Per-level changes; size zero removes the level
    Update,
}

/// A book data frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    /// Snapshot or update
    pub kind: DataKind,
    /// Feed name with any snapshot suffix stripped
    pub feed: String,
    /// Instrument, when the server sends one
    pub product_id: Option<String>,
    /// Bid levels in wire order
    pub bids: Vec<RawLevel>,
    /// Ask levels in wire order
    pub asks: Vec<RawLevel>,
    /// Levels skipped because a number does not fit a [`Decimal`]
    pub rejected: usize,
}

/// A decoded incoming frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// Informational frame
    Control(ControlMessage),
    /// Book data frame
    Data(DataMessage),
}

impl FeedMessage {
    /// Decode a raw text frame, see [`decode`]
    pub fn decode(raw: &str) -> Result<Self, Error> {
        decode(raw)
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: Option<String>,
    feed: Option<String>,
    product_id: Option<String>,
    #[serde(default)]
    product_ids: Vec<String>,
    message: Option<String>,
    bids: Option<Vec<Vec<serde_json::Number>>>,
    asks: Option<Vec<Vec<serde_json::Number>>>,
}

/// Decode a raw text frame.
///
/// # Errors
///
/// [`Error::MalformedMessage`] if the frame is not JSON, has neither `event`
/// nor `feed`, or contains a level that is not a pair of numbers. Unknown
/// events and empty feed names decode to a [`ControlKind::Error`] message.
/// A level whose number does not fit a [`Decimal`] is skipped and counted in
/// [`DataMessage::rejected`].
pub fn decode(raw: &str) -> Result<FeedMessage, Error> {
    let frame: RawFrame =
        serde_json::from_str(raw).map_err(|e| Error::MalformedMessage(e.to_string()))?;

    if let Some(event) = frame.event {
        let kind = match event.as_str() {
            "info" => Some(ControlKind::Info),
            "error" => Some(ControlKind::Error),
            "subscribed" => Some(ControlKind::Subscribed),
            "unsubscribed" => Some(ControlKind::Unsubscribed),
            _ => None,
        };
        let msg = match kind {
            Some(kind) => ControlMessage {
                kind,
                feed: frame.feed,
                product_ids: frame.product_ids,
                detail: frame.message,
            },
            None => unrecognized(frame.feed, format!("unrecognized event `{}`", event)),
        };
        return Ok(FeedMessage::Control(msg));
    }

    let Some(feed) = frame.feed else {
        return Err(Error::MalformedMessage(
            "frame has neither `event` nor `feed`".to_string(),
        ));
    };

    let (kind, base) = match feed.strip_suffix(SNAPSHOT_SUFFIX) {
        Some(base) => (DataKind::Snapshot, base),
        None => (DataKind::Update, feed.as_str()),
    };
    if base.is_empty() {
        return Ok(FeedMessage::Control(unrecognized(
            Some(feed.clone()),
            format!("unrecognized feed `{}`", feed),
        )));
    }

    let (bids, rejected_bids) = decode_levels(Side::Bids, frame.bids.unwrap_or_default())?;
    let (asks, rejected_asks) = decode_levels(Side::Asks, frame.asks.unwrap_or_default())?;

    Ok(FeedMessage::Data(DataMessage {
        kind,
        feed: base.to_string(),
        product_id: frame.product_id,
        bids,
        asks,
        rejected: rejected_bids + rejected_asks,
    }))
}

fn unrecognized(feed: Option<String>, detail: String) -> ControlMessage {
    ControlMessage {
        kind: ControlKind::Error,
        feed,
        product_ids: Vec::new(),
        detail: Some(detail),
    }
}

/// Decode one side's levels.
///
/// A level that is not a pair of numbers makes the whole frame malformed; a
/// number `Decimal` cannot hold only drops its own level.
fn decode_levels(
    side: Side,
    levels: Vec<Vec<serde_json::Number>>,
) -> Result<(Vec<RawLevel>, usize), Error> {
    let mut decoded = Vec::with_capacity(levels.len());
    let mut rejected = 0;

    for pair in &levels {
        let [price, size, ..] = pair.as_slice() else {
            return Err(Error::MalformedMessage(format!(
                "level must be [price, size], got {} element(s)",
                pair.len()
            )));
        };
        match (decode_number(price), decode_number(size)) {
            (Some(price), Some(size)) => decoded.push(RawLevel::new(price, size)),
            _ => {
                warn!(%side, %price, %size, "dropping level with unrepresentable number");
                rejected += 1;
            }
        }
    }

    Ok((decoded, rejected))
}

/// Parse from the number's JSON text; `serde_json` keeps that text verbatim
/// (`arbitrary_precision`), so no `f64` rounding is introduced
fn decode_number(n: &serde_json::Number) -> Option<Decimal> {
    let text = n.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_subscribe_command_serialization() {
        let cmd = WsCommand::subscribe("book_ui_1", "PI_XBTUSD");
        let json = cmd.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["event"], "subscribe");
        assert_eq!(value["feed"], "book_ui_1");
        assert_eq!(value["product_ids"], serde_json::json!(["PI_XBTUSD"]));
    }

    #[test]
    fn test_unsubscribe_command_serialization() {
        let json = WsCommand::unsubscribe("book_ui_1", "PI_ETHUSD")
            .to_json()
            .unwrap();
        assert!(json.contains(r#""event":"unsubscribe""#));
        assert!(json.contains("PI_ETHUSD"));
    }

    #[test]
    fn test_decode_control_frames() {
        let msg = decode(r#"{"event":"info","version":1}"#).unwrap();
        match msg {
            FeedMessage::Control(c) => {
                assert_eq!(c.kind, ControlKind::Info);
                assert_eq!(c.feed, None);
            }
            _ => panic!("Expected Control"),
        }

        let msg = decode(
            r#"{"event":"subscribed","feed":"book_ui_1","product_ids":["PI_XBTUSD"]}"#,
        )
        .unwrap();
        match msg {
            FeedMessage::Control(c) => {
                assert_eq!(c.kind, ControlKind::Subscribed);
                assert_eq!(c.feed.as_deref(), Some("book_ui_1"));
                assert_eq!(c.product_ids, vec!["PI_XBTUSD".to_string()]);
            }
            _ => panic!("Expected Control"),
        }

        let msg = decode(r#"{"event":"error","message":"Invalid product id"}"#).unwrap();
        match msg {
            FeedMessage::Control(c) => {
                assert_eq!(c.kind, ControlKind::Error);
                assert_eq!(c.detail.as_deref(), Some("Invalid product id"));
            }
            _ => panic!("Expected Control"),
        }
    }

    #[test]
    fn test_unknown_event_is_error_control() {
        let msg = decode(r#"{"event":"alert","feed":"book_ui_1"}"#).unwrap();
        match msg {
            FeedMessage::Control(c) => {
                assert_eq!(c.kind, ControlKind::Error);
                assert!(c.detail.unwrap().contains("alert"));
            }
            _ => panic!("Expected Control"),
        }
    }

    #[test]
    fn test_decode_snapshot() {
        let json = r#"{
            "feed": "book_ui_1_snapshot",
            "product_id": "PI_XBTUSD",
            "numLevels": 25,
            "bids": [[34123.5, 1200], [34123.0, 5000]],
            "asks": [[34124.0, 800]]
        }"#;

        match decode(json).unwrap() {
            FeedMessage::Data(data) => {
                assert_eq!(data.kind, DataKind::Snapshot);
                assert_eq!(data.feed, "book_ui_1");
                assert_eq!(data.product_id.as_deref(), Some("PI_XBTUSD"));
                assert_eq!(data.bids.len(), 2);
                assert_eq!(data.bids[0], RawLevel::new(dec!(34123.5), dec!(1200)));
                assert_eq!(data.asks[0], RawLevel::new(dec!(34124), dec!(800)));
            }
            _ => panic!("Expected Data"),
        }
    }

    #[test]
    fn test_decode_update_with_missing_side() {
        let json = r#"{"feed":"book_ui_1","product_id":"PI_XBTUSD","bids":[[100.5,0]]}"#;

        match decode(json).unwrap() {
            FeedMessage::Data(data) => {
                assert_eq!(data.kind, DataKind::Update);
                assert_eq!(data.bids, vec![RawLevel::new(dec!(100.5), dec!(0))]);
                assert!(data.asks.is_empty());
            }
            _ => panic!("Expected Data"),
        }
    }

    #[test]
    fn test_decimal_precision_survives_decoding() {
        let json = r#"{"feed":"book_ui_1","bids":[[0.1,0.2],[1e-3,3]],"asks":[]}"#;
        match decode(json).unwrap() {
            FeedMessage::Data(data) => {
                assert_eq!(data.bids[0].price + data.bids[0].size, dec!(0.3));
                assert_eq!(data.bids[1].price, dec!(0.001));
            }
            _ => panic!("Expected Data"),
        }
    }

    #[test]
    fn test_long_decimals_are_exact() {
        let json = r#"{"feed":"book_ui_1","bids":[[1.00000000000000001,1],[34123.123456789012345,2]],"asks":[]}"#;
        match decode(json).unwrap() {
            FeedMessage::Data(data) => {
                assert_eq!(data.bids[0].price, dec!(1.00000000000000001));
                assert_eq!(data.bids[1].price, dec!(34123.123456789012345));
                assert_eq!(data.rejected, 0);
            }
            _ => panic!("Expected Data"),
        }
    }

    #[test]
    fn test_unrepresentable_number_drops_only_its_level() {
        let json = r#"{"feed":"book_ui_1","bids":[[1e30,1],[100,5]],"asks":[[101,1e29]]}"#;
        match decode(json).unwrap() {
            FeedMessage::Data(data) => {
                assert_eq!(data.bids, vec![RawLevel::new(dec!(100), dec!(5))]);
                assert!(data.asks.is_empty());
                assert_eq!(data.rejected, 2);
            }
            _ => panic!("Expected Data"),
        }
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(decode("not json"), Err(Error::MalformedMessage(_))));
        assert!(matches!(
            decode(r#"{"bids":[[1,2]]}"#),
            Err(Error::MalformedMessage(_))
        ));
        assert!(matches!(
            decode(r#"{"feed":"book_ui_1","bids":[[100]]}"#),
            Err(Error::MalformedMessage(_))
        ));
        assert!(matches!(
            decode(r#"{"feed":"book_ui_1","bids":[["100","2"]]}"#),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_bare_snapshot_suffix_is_error_control() {
        match decode(r#"{"feed":"_snapshot","bids":[],"asks":[]}"#).unwrap() {
            FeedMessage::Control(c) => assert_eq!(c.kind, ControlKind::Error),
            _ => panic!("Expected Control"),
        }
    }
}
