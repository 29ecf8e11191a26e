//! Depth-capped L2 order books for the triangle's three instruments.
//!
//! The venue streams incremental level updates for a subscribed depth
//! window, and keeps emitting deletes for levels that have already fallen
//! out of our window. Storage is bounded: any insertion that would grow a
//! side past its depth evicts the farthest-from-top level, and deletes for
//! unknown prices are silently tolerated. Top-of-book reads are O(1).

use std::collections::{BTreeMap, HashMap};

use ordered_float::OrderedFloat;
use tracing::debug;

/// Book side of a single price level update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

/// Action carried by an L2 update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2Action {
    New,
    Update,
    Delete,
}

/// A single decoded level-2 update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct L2Update {
    pub action: L2Action,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub instrument_id: i64,
    /// Venue action time, epoch milliseconds.
    pub timestamp_ms: i64,
}

/// One side of a book: price -> quantity, bounded by `depth`.
#[derive(Debug, Clone)]
pub struct BookSide {
    levels: BTreeMap<OrderedFloat<f64>, f64>,
    depth: usize,
    side: Side,
}

impl BookSide {
    pub fn new(side: Side, depth: usize) -> Self {
        Self {
            levels: BTreeMap::new(),
            depth,
            side,
        }
    }

    /// Assign `quantity` at `price`, evicting the farthest-from-top level if
    /// the side would exceed its depth.
    pub fn set(&mut self, price: f64, quantity: f64) {
        self.levels.insert(OrderedFloat(price), quantity);
        if self.levels.len() > self.depth {
            match self.side {
                Side::Bid => self.levels.pop_first(),
                Side::Ask => self.levels.pop_last(),
            };
        }
    }

    /// Remove `price` if present. Deletes beyond the local window are
    /// expected and ignored.
    pub fn remove(&mut self, price: f64) {
        self.levels.remove(&OrderedFloat(price));
    }

    /// Best level of this side: highest bid, lowest ask.
    pub fn top(&self) -> Option<(f64, f64)> {
        let entry = match self.side {
            Side::Bid => self.levels.last_key_value(),
            Side::Ask => self.levels.first_key_value(),
        };
        entry.map(|(price, qty)| (price.into_inner(), *qty))
    }

    /// Up to `n` best levels, best first.
    pub fn levels(&self, n: usize) -> Vec<(f64, f64)> {
        let iter: Box<dyn Iterator<Item = (&OrderedFloat<f64>, &f64)> + '_> = match self.side {
            Side::Bid => Box::new(self.levels.iter().rev()),
            Side::Ask => Box::new(self.levels.iter()),
        };
        iter.take(n)
            .map(|(price, qty)| (price.into_inner(), *qty))
            .collect()
    }

    pub fn quantity_at(&self, price: f64) -> Option<f64> {
        self.levels.get(&OrderedFloat(price)).copied()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }
}

/// Bid/ask ladder pair for one instrument.
#[derive(Debug, Clone)]
pub struct OrderBook {
    pub bid: BookSide,
    pub ask: BookSide,
}

impl OrderBook {
    pub fn new(depth: usize) -> Self {
        Self {
            bid: BookSide::new(Side::Bid, depth),
            ask: BookSide::new(Side::Ask, depth),
        }
    }

    pub fn apply(&mut self, update: &L2Update) {
        let side = match update.side {
            Side::Bid => &mut self.bid,
            Side::Ask => &mut self.ask,
        };
        match update.action {
            L2Action::New | L2Action::Update => side.set(update.price, update.quantity),
            L2Action::Delete => side.remove(update.price),
        }
    }

    pub fn top_bid(&self) -> Option<(f64, f64)> {
        self.bid.top()
    }

    pub fn top_ask(&self) -> Option<(f64, f64)> {
        self.ask.top()
    }

    pub fn bids(&self, n: usize) -> Vec<(f64, f64)> {
        self.bid.levels(n)
    }

    pub fn asks(&self, n: usize) -> Vec<(f64, f64)> {
        self.ask.levels(n)
    }

    pub fn clear(&mut self) {
        self.bid.clear();
        self.ask.clear();
    }
}

/// Books for the fixed instrument universe, keyed by instrument id.
///
/// Constructed once at startup; only the router mutates it, and `clear`
/// empties every side without dropping the per-instrument entries.
#[derive(Debug)]
pub struct MultiBook {
    books: HashMap<i64, OrderBook>,
}

impl MultiBook {
    pub fn new(instrument_ids: &[i64], depth: usize) -> Self {
        let books = instrument_ids
            .iter()
            .map(|id| (*id, OrderBook::new(depth)))
            .collect();
        Self { books }
    }

    /// Apply one update to the owning instrument's book. Updates for
    /// instruments outside the configured universe are dropped.
    pub fn apply(&mut self, update: &L2Update) {
        match self.books.get_mut(&update.instrument_id) {
            Some(book) => book.apply(update),
            None => debug!(
                instrument_id = update.instrument_id,
                "dropping update for unsubscribed instrument"
            ),
        }
    }

    pub fn book(&self, instrument_id: i64) -> Option<&OrderBook> {
        self.books.get(&instrument_id)
    }

    pub fn top_bid(&self, instrument_id: i64) -> Option<(f64, f64)> {
        self.books.get(&instrument_id)?.top_bid()
    }

    pub fn top_ask(&self, instrument_id: i64) -> Option<(f64, f64)> {
        self.books.get(&instrument_id)?.top_ask()
    }

    pub fn clear(&mut self) {
        for book in self.books.values_mut() {
            book.clear();
        }
    }

    /// Multi-line rendering of the top `levels` of every book, for the
    /// periodic printer.
    pub fn render(&self, levels: usize) -> String {
        let mut ids: Vec<i64> = self.books.keys().copied().collect();
        ids.sort_unstable();

        let mut out = String::new();
        for id in ids {
            let book = &self.books[&id];
            out.push_str(&format!("instrument {id}\n"));
            for (price, qty) in book.asks(levels).into_iter().rev() {
                out.push_str(&format!("    ask {price:>14.8} x {qty:.8}\n"));
            }
            for (price, qty) in book.bids(levels) {
                out.push_str(&format!("    bid {price:>14.8} x {qty:.8}\n"));
            }
        }
        out
    }
}
