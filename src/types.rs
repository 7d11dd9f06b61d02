use serde::{Deserialize, Serialize};

// ─── Markets & books ───

/// Static market descriptor, immutable after load.
#[derive(Clone, Debug)]
pub struct Market {
    pub id: u32,
    pub symbol: String,
    pub tick_size: f64,
    pub min_size: f64,
    pub max_leverage: f64,
}

impl Market {
    /// Base symbol for oracle lookups: "SOL-PERP" → "SOL".
    pub fn base_symbol(&self) -> &str {
        self.symbol.strip_suffix("-PERP").unwrap_or(&self.symbol)
    }
}

/// One venue orderbook snapshot. Bids descending, asks ascending by price.
#[derive(Clone, Debug)]
pub struct OrderbookSnapshot {
    pub market_id: u32,
    pub ts_ms: i64,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

impl OrderbookSnapshot {
    #[inline]
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|&(p, _)| p)
    }

    #[inline]
    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|&(p, _)| p)
    }

    pub fn sort_levels(&mut self) {
        // Defensive sort: depth sums and top-of-book reads depend on ordering.
        self.bids
            .sort_unstable_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        self.asks
            .sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    }
}

// ─── Account state ───

/// Signed position in base units; positive = long.
#[derive(Clone, Copy, Debug, Default)]
pub struct Position {
    pub size: f64,
    pub entry_price: f64,
    pub unrealized_pnl: f64,
}

impl Position {
    #[inline]
    pub fn is_flat(&self) -> bool {
        self.size == 0.0
    }

    /// Absolute notional at entry, quote-currency units.
    #[inline]
    pub fn notional(&self) -> f64 {
        (self.size * self.entry_price).abs()
    }
}

/// Collateral balance in quote-currency units. 0 <= available <= total.
#[derive(Clone, Copy, Debug, Default)]
pub struct Balance {
    pub total: f64,
    pub available: f64,
}

/// Account snapshot refreshed from the venue (`fetch_info`).
#[derive(Clone, Debug, Default)]
pub struct AccountInfo {
    pub balance: Balance,
    pub positions: std::collections::HashMap<u32, Position>,
    pub open_orders: Vec<RestingOrder>,
}

impl AccountInfo {
    pub fn position(&self, market_id: u32) -> Position {
        self.positions.get(&market_id).copied().unwrap_or_default()
    }

    /// Sum of |size * entry| across all markets.
    pub fn gross_notional(&self) -> f64 {
        self.positions.values().map(|p| p.notional()).sum()
    }
}

// ─── Orders ───

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Bid => write!(f, "BID"),
            Side::Ask => write!(f, "ASK"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillMode {
    Limit,
    Market,
    Ioc,
    Fok,
}

/// What the engine asks the venue to do. Price is absent for market orders.
#[derive(Clone, Debug)]
pub struct OrderIntent {
    pub market_id: u32,
    pub side: Side,
    pub price: Option<f64>,
    pub size: f64,
    pub fill_mode: FillMode,
    pub reduce_only: bool,
}

/// A venue-acknowledged resting order. The fill fields are only populated by
/// the backtest engine; the live venue owns authoritative fill state.
#[derive(Clone, Debug)]
pub struct RestingOrder {
    pub id: u64,
    pub market_id: u32,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub placed_ts_ms: i64,
    pub filled: bool,
    pub fill_price: f64,
    pub fill_ts_ms: i64,
}

// ─── Quotes ───

#[derive(Clone, Copy, Debug)]
pub struct QuoteLevel {
    pub price: f64,
    pub size: f64,
}

/// The ladder the engine believes is resting at the venue. Best level first.
#[derive(Clone, Debug)]
pub struct QuoteLadder {
    pub market_id: u32,
    pub bids: Vec<QuoteLevel>,
    pub asks: Vec<QuoteLevel>,
    pub ts_ms: i64,
}

/// Last prices that passed the requote gate. Created on the first successful
/// quote, updated on every accepted requote, kept while the market is active.
#[derive(Clone, Copy, Debug)]
pub struct LastQuotePrices {
    pub bid: f64,
    pub ask: f64,
    pub ts_ms: i64,
}

// ─── Reference prices ───

/// External reference price from one source or the median aggregate.
#[derive(Clone, Debug, Serialize)]
pub struct ExchangePrice {
    pub bid: f64,
    pub ask: f64,
    pub mid: f64,
    pub spread: f64,
    pub volume_24h: f64,
    pub ts_ms: i64,
    pub source: String,
}

// ─── Historical bars ───

fn default_depth() -> f64 {
    50.0
}

/// One OHLCV bar with per-side book depth. low <= min(open,close) and
/// max(open,close) <= high.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HistoricalBar {
    #[serde(default)]
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(rename = "bidDepth", default = "default_depth")]
    pub bid_depth: f64,
    #[serde(rename = "askDepth", default = "default_depth")]
    pub ask_depth: f64,
}

// ─── Engine events (produced by feed tasks, consumed by the quote loop) ───

pub enum EngineEvent {
    Orderbook(OrderbookSnapshot),
    /// Periodic safety tick: refresh account state, check feed staleness.
    Tick,
    Shutdown,
}
