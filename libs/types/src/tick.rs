//! Market depth snapshot types
//!
//! `TickRecord` is one snapshot of a symbol's market state, carrying five
//! levels of depth on each side. Records are plain value data: they are
//! never mutated once produced by the feed, and the only identity they
//! carry is `(symbol, timestamp)`.

use serde::{Deserialize, Serialize};

/// Number of price levels kept on each side of the book.
pub const DEPTH_LEVELS: usize = 5;

/// One price level of the order book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthEntry {
    pub price: f32,
    pub quantity: u32,
    pub orders: u32,
}

impl DepthEntry {
    pub const fn new(price: f32, quantity: u32, orders: u32) -> Self {
        Self {
            price,
            quantity,
            orders,
        }
    }
}

/// Fixed-length depth ladder, best level first.
pub type Depth = [DepthEntry; DEPTH_LEVELS];

/// A single market snapshot for one symbol.
///
/// Timestamps are Unix nanoseconds (UTC). Prices and quantities are 32-bit
/// to keep the encoded batches small.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    /// Exchange trading symbol
    pub symbol: String,
    pub is_tradable: bool,

    /// Snapshot time, Unix nanoseconds
    pub timestamp: i64,

    /// Time of the last trade, Unix nanoseconds
    pub last_trade_time: i64,
    pub last_price: f32,
    pub last_traded_quantity: u32,

    /// Volume-weighted average trade price for the session
    pub average_trade_price: f32,

    pub volume_traded: u32,
    pub total_buy_quantity: u32,
    pub total_sell_quantity: u32,

    pub day_open: f32,
    pub day_high: f32,
    pub day_low: f32,
    pub last_day_close: f32,

    /// Open interest and its session range
    pub oi: u32,
    pub oi_day_high: u32,
    pub oi_day_low: u32,

    pub bid: Depth,
    pub ask: Depth,
}

impl TickRecord {
    /// Create a record for `symbol` at `timestamp` with every other field
    /// zeroed and an empty book.
    pub fn new(symbol: impl Into<String>, timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            is_tradable: true,
            timestamp,
            last_trade_time: timestamp,
            last_price: 0.0,
            last_traded_quantity: 0,
            average_trade_price: 0.0,
            volume_traded: 0,
            total_buy_quantity: 0,
            total_sell_quantity: 0,
            day_open: 0.0,
            day_high: 0.0,
            day_low: 0.0,
            last_day_close: 0.0,
            oi: 0,
            oi_day_high: 0,
            oi_day_low: 0,
            bid: [DepthEntry::default(); DEPTH_LEVELS],
            ask: [DepthEntry::default(); DEPTH_LEVELS],
        }
    }

    /// Set the last traded price and quantity.
    pub fn with_last_trade(mut self, price: f32, quantity: u32) -> Self {
        self.last_price = price;
        self.last_traded_quantity = quantity;
        self
    }

    /// Replace both sides of the book.
    pub fn with_depth(mut self, bid: Depth, ask: Depth) -> Self {
        self.bid = bid;
        self.ask = ask;
        self
    }

    /// Best bid level, if the book has any bid quantity.
    pub fn best_bid(&self) -> Option<&DepthEntry> {
        self.bid.first().filter(|level| level.quantity > 0)
    }

    /// Best ask level, if the book has any ask quantity.
    pub fn best_ask(&self) -> Option<&DepthEntry> {
        self.ask.first().filter(|level| level.quantity > 0)
    }
}

/// An ordered sequence of records; the unit of encoding and file I/O.
///
/// Records in a batch may belong to several symbols and are not required to
/// be in timestamp order.
pub type Batch = Vec<TickRecord>;

/// Sort records by `(timestamp, symbol)`.
///
/// Storage gives no ordering guarantee across files, so consumers that need
/// a total order sort after loading. The sort is stable.
pub fn sort_by_time(records: &mut [TickRecord]) {
    records.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_has_empty_book() {
        let tick = TickRecord::new("NIFTY", 1_700_000_000_000_000_000);
        assert_eq!(tick.symbol, "NIFTY");
        assert_eq!(tick.bid.len(), DEPTH_LEVELS);
        assert!(tick.best_bid().is_none());
        assert!(tick.best_ask().is_none());
    }

    #[test]
    fn test_best_levels() {
        let mut bid = [DepthEntry::default(); DEPTH_LEVELS];
        let mut ask = [DepthEntry::default(); DEPTH_LEVELS];
        bid[0] = DepthEntry::new(99.5, 10, 2);
        ask[0] = DepthEntry::new(100.5, 7, 1);

        let tick = TickRecord::new("INFY", 1).with_depth(bid, ask);
        assert_eq!(tick.best_bid().unwrap().price, 99.5);
        assert_eq!(tick.best_ask().unwrap().quantity, 7);
    }

    #[test]
    fn test_sort_by_time_breaks_ties_on_symbol() {
        let mut records = vec![
            TickRecord::new("B", 20),
            TickRecord::new("B", 10),
            TickRecord::new("A", 20),
        ];
        sort_by_time(&mut records);

        let order: Vec<(&str, i64)> = records
            .iter()
            .map(|r| (r.symbol.as_str(), r.timestamp))
            .collect();
        assert_eq!(order, vec![("B", 10), ("A", 20), ("B", 20)]);
    }
}
