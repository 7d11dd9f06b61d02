use crate::config::SpreadConfig;
use crate::types::OrderbookSnapshot;

/// Top-of-book spread above which a book is considered unquotable.
pub const MAX_TOP_SPREAD: f64 = 0.05;

/// Minimum resting levels per side for a book to be quotable.
pub const MIN_LEVELS_PER_SIDE: usize = 2;

/// Output of the depth-imbalance spread model.
#[derive(Clone, Copy, Debug)]
pub struct SpreadReading {
    /// Fractional target spread, clamped to [min, max].
    pub spread: f64,
    /// (B - A) / (B + A) over the top depth levels; 0 on an empty window.
    pub imbalance: f64,
    pub bid_depth: f64,
    pub ask_depth: f64,
}

/// Book health verdict. Anything but `Healthy` suppresses one quote cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BookHealth {
    Healthy,
    TooShallow,
    NoMid,
    TopSpreadTooWide(f64),
}

impl std::fmt::Display for BookHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookHealth::Healthy => write!(f, "healthy"),
            BookHealth::TooShallow => {
                write!(f, "fewer than {} levels on a side", MIN_LEVELS_PER_SIDE)
            }
            BookHealth::NoMid => write!(f, "no mid price (one side empty)"),
            BookHealth::TopSpreadTooWide(s) => {
                write!(f, "top-of-book spread {:.4} > {}", s, MAX_TOP_SPREAD)
            }
        }
    }
}

/// Mid price, defined only when both sides are non-empty.
pub fn mid(book: &OrderbookSnapshot) -> Option<f64> {
    let bid = book.best_bid()?;
    let ask = book.best_ask()?;
    Some((bid + ask) / 2.0)
}

/// Maps book depth imbalance to a target spread.
///
/// Sums the top `depth_levels` of each side (truncated to what the book
/// actually has), then widens linearly from `min` toward `max` with the
/// absolute imbalance. A one-sided flow (|imbalance| → 1) quotes at the
/// widest configured spread.
pub fn dynamic_spread(book: &OrderbookSnapshot, cfg: &SpreadConfig) -> SpreadReading {
    let d = cfg.depth_levels.min(book.bids.len()).min(book.asks.len());
    let bid_depth: f64 = book.bids.iter().take(d).map(|&(_, s)| s).sum();
    let ask_depth: f64 = book.asks.iter().take(d).map(|&(_, s)| s).sum();

    let total = bid_depth + ask_depth;
    let imbalance = if total > 0.0 {
        (bid_depth - ask_depth) / total
    } else {
        0.0
    };

    let raw = cfg.min + imbalance.abs() * (cfg.max - cfg.min);
    SpreadReading {
        spread: raw.clamp(cfg.min, cfg.max),
        imbalance,
        bid_depth,
        ask_depth,
    }
}

/// A book is quotable when both sides carry at least two levels, a mid
/// exists, and the top-of-book spread is at most `MAX_TOP_SPREAD`.
pub fn health(book: &OrderbookSnapshot) -> BookHealth {
    if book.bids.len() < MIN_LEVELS_PER_SIDE || book.asks.len() < MIN_LEVELS_PER_SIDE {
        return BookHealth::TooShallow;
    }
    let m = match mid(book) {
        Some(m) if m > 0.0 => m,
        _ => return BookHealth::NoMid,
    };
    // best_bid/best_ask exist if mid does
    let top_spread = (book.best_ask().unwrap_or(0.0) - book.best_bid().unwrap_or(0.0)) / m;
    if top_spread > MAX_TOP_SPREAD {
        return BookHealth::TopSpreadTooWide(top_spread);
    }
    BookHealth::Healthy
}

pub fn is_healthy(book: &OrderbookSnapshot) -> bool {
    health(book) == BookHealth::Healthy
}
