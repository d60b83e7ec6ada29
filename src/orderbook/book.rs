//! Depth-limited price ladder with cumulative totals.
//!
//! Each side is a `Vec<PriceLevel>` kept in canonical order (bids descending,
//! asks ascending) and capped at the book depth. With a depth of a dozen
//! levels a sorted vector beats a tree: lookups are a binary search, inserts
//! shift a handful of elements, and consumers get a contiguous best-first
//! slice with no extra allocation.
//!
//! After every mutation the `total` column of the touched side is recomputed
//! from the best price outward.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

use crate::error::Error;
use crate::types::messages::{DataKind, DataMessage};
use crate::types::{Price, RawLevel, Side, Size};

/// Default number of levels retained per side
pub const DEFAULT_DEPTH: usize = 12;

/// One aggregated price level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceLevel {
    /// Level price, unique within a side
    pub price: Price,
    /// Size resting at this price, always > 0
    pub size: Size,
    /// Sum of sizes from the best price down to and including this level
    pub total: Size,
}

/// What a single delta did to the book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// New level inserted within the depth cap
    Inserted,
    /// Existing level's size replaced
    Updated,
    /// Existing level removed
    Removed,
    /// Removal for a price that is not in the book
    Ignored,
    /// New level fell beyond the depth cap and was truncated away
    Dropped,
}

impl DeltaOutcome {
    /// Whether the visible book changed
    #[must_use]
    pub const fn changed(self) -> bool {
        matches!(
            self,
            DeltaOutcome::Inserted | DeltaOutcome::Updated | DeltaOutcome::Removed
        )
    }
}

/// Result of applying a whole data message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Whether any visible level changed
    pub changed: bool,
    /// Number of levels rejected as invalid
    pub rejected: usize,
}

/// Two-sided, depth-limited order book.
///
/// # Invariants
///
/// For each side: prices unique, strictly ordered best-first, at most
/// [`depth`](Self::depth) levels, every size positive, and `total[i]` equal
/// to the sum of `size[0..=i]`.
///
/// Operations are plain `&mut self` transitions with no I/O; the book is not
/// internally synchronized and is meant to have a single owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Book {
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    #[serde(skip)]
    depth: usize,
}

impl Book {
    /// Create an empty book with the default depth
    #[must_use]
    pub fn new() -> Self {
        Self::with_depth(DEFAULT_DEPTH)
    }

    /// Create an empty book retaining at most `depth` levels per side
    #[must_use]
    pub fn with_depth(depth: usize) -> Self {
        Self {
            bids: Vec::with_capacity(depth + 1),
            asks: Vec::with_capacity(depth + 1),
            depth,
        }
    }

    /// Maximum levels per side
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Bid levels, best (highest) first
    #[must_use]
    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    /// Ask levels, best (lowest) first
    #[must_use]
    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    /// Levels of one side, best first
    #[must_use]
    pub fn levels(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Bids => &self.bids,
            Side::Asks => &self.asks,
        }
    }

    fn levels_mut(&mut self, side: Side) -> &mut Vec<PriceLevel> {
        match side {
            Side::Bids => &mut self.bids,
            Side::Asks => &mut self.asks,
        }
    }

    /// Replace one side wholesale.
    ///
    /// Invalid levels (non-positive price or size) are logged and skipped;
    /// duplicate prices collapse to the last occurrence. Returns the number
    /// of rejected levels.
    pub fn apply_snapshot(&mut self, side: Side, levels: &[RawLevel]) -> usize {
        let mut rejected = 0;
        let mut fresh: Vec<PriceLevel> = Vec::with_capacity(levels.len());

        for level in levels {
            if let Err(e) = validate(side, level.price, level.size, false) {
                warn!(error = %e, "dropping snapshot level");
                rejected += 1;
                continue;
            }
            fresh.push(PriceLevel {
                price: level.price,
                size: level.size,
                total: Decimal::ZERO,
            });
        }

        // Stable sort keeps wire order among equal prices; reversing first
        // makes dedup keep the last occurrence.
        fresh.reverse();
        fresh.sort_by(|a, b| side.cmp_prices(&a.price, &b.price));
        fresh.dedup_by(|later, kept| later.price == kept.price);
        fresh.truncate(self.depth);
        recompute_totals(&mut fresh);

        *self.levels_mut(side) = fresh;
        rejected
    }

    /// Apply a single price/size change.
    ///
    /// Size zero removes the level (no-op when absent); a positive size
    /// replaces an existing level in place or inserts a new one at its
    /// sorted position and truncates to the depth cap.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidLevel`] for a negative size or non-positive price; the
    /// book is left untouched.
    pub fn apply_delta(
        &mut self,
        side: Side,
        price: Price,
        size: Size,
    ) -> Result<DeltaOutcome, Error> {
        validate(side, price, size, true)?;

        let depth = self.depth;
        let levels = self.levels_mut(side);

        let outcome = match levels.binary_search_by(|l| side.cmp_prices(&l.price, &price)) {
            Ok(index) if size.is_zero() => {
                levels.remove(index);
                DeltaOutcome::Removed
            }
            Ok(index) => {
                levels[index].size = size;
                DeltaOutcome::Updated
            }
            Err(_) if size.is_zero() => return Ok(DeltaOutcome::Ignored),
            Err(index) => {
                levels.insert(
                    index,
                    PriceLevel {
                        price,
                        size,
                        total: Decimal::ZERO,
                    },
                );
                levels.truncate(depth);
                if index < depth {
                    DeltaOutcome::Inserted
                } else {
                    DeltaOutcome::Dropped
                }
            }
        };

        if outcome.changed() {
            recompute_totals(levels);
        }
        Ok(outcome)
    }

    /// Apply a decoded data message.
    ///
    /// A snapshot replaces both sides. An update applies its deltas one at
    /// a time in wire order, asks before bids; an invalid delta is logged
    /// and skipped while the rest of the batch still applies.
    pub fn apply_message(&mut self, msg: &DataMessage) -> ApplyReport {
        match msg.kind {
            DataKind::Snapshot => {
                let rejected = self.apply_snapshot(Side::Bids, &msg.bids)
                    + self.apply_snapshot(Side::Asks, &msg.asks);
                ApplyReport {
                    changed: true,
                    rejected: rejected + msg.rejected,
                }
            }
            DataKind::Update => {
                let mut report = ApplyReport {
                    changed: false,
                    rejected: msg.rejected,
                };
                for (side, levels) in [(Side::Asks, &msg.asks), (Side::Bids, &msg.bids)] {
                    for level in levels {
                        match self.apply_delta(side, level.price, level.size) {
                            Ok(outcome) => report.changed |= outcome.changed(),
                            Err(e) => {
                                warn!(error = %e, "dropping delta");
                                report.rejected += 1;
                            }
                        }
                    }
                }
                report
            }
        }
    }

    /// Best (highest) bid
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Best (lowest) ask
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// `best_ask - best_bid`, or `None` if either side is empty
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// Spread as a fraction of the best ask
    #[must_use]
    pub fn spread_ratio(&self) -> Option<Decimal> {
        let spread = self.spread()?;
        let ask = self.best_ask()?.price;
        spread.checked_div(ask)
    }

    /// Check if the book is crossed (best bid >= best ask)
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }

    /// Largest cumulative total on either side; the scale a depth chart
    /// normalises its bars against
    #[must_use]
    pub fn max_total(&self) -> Decimal {
        let last = |levels: &[PriceLevel]| levels.last().map_or(Decimal::ZERO, |l| l.total);
        last(&self.bids).max(last(&self.asks))
    }

    /// Clear both sides
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// Check if the book has no levels at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// `(bid_levels, ask_levels)`
    #[must_use]
    pub fn num_levels(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }
}

impl Default for Book {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(side: Side, price: Price, size: Size, allow_zero: bool) -> Result<(), Error> {
    let reason = if price <= Decimal::ZERO {
        "non-positive price"
    } else if size.is_sign_negative() && !size.is_zero() {
        "negative size"
    } else if size.is_zero() && !allow_zero {
        "zero size"
    } else {
        return Ok(());
    };
    Err(Error::InvalidLevel {
        side,
        price,
        size,
        reason,
    })
}

fn recompute_totals(levels: &mut [PriceLevel]) {
    let mut running = Decimal::ZERO;
    for level in levels {
        running += level.size;
        level.total = running;
    }
}
