pub mod data;
pub mod metrics;
pub mod sim;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::Config;
use crate::engine::risk::RiskGate;
use crate::engine::skew;
use crate::math::spread;
use crate::types::{HistoricalBar, OrderbookSnapshot, Position, RestingOrder, Side};
use metrics::{BacktestResult, EquityPoint};

pub const DEFAULT_START_BALANCE: f64 = 10_000.0;

/// Unfilled orders older than this are cancelled each bar.
pub const ORDER_MAX_AGE_MS: i64 = 60_000;

/// Fill odds for a resting order against one bar. Touched by the bar's
/// extreme → 0.8, close traded through it → 0.3, otherwise a 0.05 tail.
pub fn fill_probability(order: &RestingOrder, bar: &HistoricalBar) -> f64 {
    match order.side {
        Side::Bid => {
            if bar.low <= order.price {
                0.8
            } else if bar.close < order.price {
                0.3
            } else {
                0.05
            }
        }
        Side::Ask => {
            if bar.high >= order.price {
                0.8
            } else if bar.close > order.price {
                0.3
            } else {
                0.05
            }
        }
    }
}

/// Replays bars through the same spread/skew/sizing decisions as the live
/// loop, with probabilistic fills against local orders instead of a venue.
///
/// Bids and asks can both fill inside one bar; realized PnL then depends on
/// the order fills are applied in. That path-dependence is accepted as-is.
pub struct BacktestEngine {
    config: Config,
    risk: RiskGate,
    start_balance: f64,
    balance: f64,
    position: Position,
    open_orders: Vec<RestingOrder>,
    fills: Vec<RestingOrder>,
    equity: Vec<EquityPoint>,
    orders_placed: u32,
    spread_sum: f64,
    spread_samples: u32,
    next_order_id: u64,
    rng: StdRng,
}

impl BacktestEngine {
    pub fn new(config: Config, start_balance: f64, seed: u64) -> Self {
        let risk = RiskGate::new(&config);
        Self {
            config,
            risk,
            start_balance,
            balance: start_balance,
            position: Position::default(),
            open_orders: Vec::new(),
            fills: Vec::new(),
            equity: Vec::new(),
            orders_placed: 0,
            spread_sum: 0.0,
            spread_samples: 0,
            next_order_id: 1,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn fills(&self) -> &[RestingOrder] {
        &self.fills
    }

    pub fn equity(&self) -> &[EquityPoint] {
        &self.equity
    }

    pub fn run(&mut self, bars: &[HistoricalBar]) -> BacktestResult {
        log::info!(
            "[BACKTEST] Running {} bars, start balance {:.2}",
            bars.len(),
            self.start_balance
        );
        for bar in bars {
            self.sweep_fills(bar);
            self.cancel_aged(bar.timestamp);
            self.mark_to_market(bar.close);
            self.place_quotes(bar);
            self.equity.push(EquityPoint {
                timestamp: bar.timestamp,
                equity: self.balance + self.position.unrealized_pnl,
            });
        }

        let avg_spread = if self.spread_samples > 0 {
            self.spread_sum / self.spread_samples as f64
        } else {
            0.0
        };
        let result = metrics::compute(
            &self.fills,
            &self.equity,
            self.orders_placed,
            avg_spread,
            self.start_balance,
            self.balance,
        );
        log::info!(
            "[BACKTEST] Done: pnl {:+.2}, {} trades, fill rate {:.2}",
            result.total_pnl,
            result.num_trades,
            result.fill_rate
        );
        result
    }

    /// Draw a uniform per open order; fills execute at the resting price
    /// with the bar's timestamp.
    fn sweep_fills(&mut self, bar: &HistoricalBar) {
        let mut remaining = Vec::with_capacity(self.open_orders.len());
        for mut order in std::mem::take(&mut self.open_orders) {
            let p = fill_probability(&order, bar);
            if self.rng.gen::<f64>() < p {
                order.filled = true;
                order.fill_price = order.price;
                order.fill_ts_ms = bar.timestamp;
                self.apply_fill(order.side, order.price, order.size);
                self.fills.push(order);
            } else {
                remaining.push(order);
            }
        }
        self.open_orders = remaining;
    }

    /// Position bookkeeping for one fill: realize PnL on any reducing
    /// portion, then move size/entry by the remaining delta.
    fn apply_fill(&mut self, side: Side, price: f64, size: f64) {
        let delta = match side {
            Side::Bid => size,
            Side::Ask => -size,
        };
        let old = self.position.size;
        let new = old + delta;

        if old * delta < 0.0 {
            let closed = old.abs().min(delta.abs());
            let realized = if old > 0.0 {
                closed * (price - self.position.entry_price)
            } else {
                closed * (self.position.entry_price - price)
            };
            self.balance += realized;
        }

        if new == 0.0 {
            self.position.size = 0.0;
            self.position.entry_price = 0.0;
        } else if old * new < 0.0 {
            // Flipped through flat: the surplus opens at the fill price.
            self.position.size = new;
            self.position.entry_price = price;
        } else if old == 0.0 || new.abs() > old.abs() {
            self.position.entry_price =
                (old * self.position.entry_price + delta * price) / new;
            self.position.size = new;
        } else {
            // Same-sign reduction keeps the entry.
            self.position.size = new;
        }
    }

    fn cancel_aged(&mut self, now_ms: i64) {
        self.open_orders
            .retain(|o| now_ms - o.placed_ts_ms <= ORDER_MAX_AGE_MS);
    }

    fn mark_to_market(&mut self, close: f64) {
        self.position.unrealized_pnl = if self.position.size > 0.0 {
            self.position.size * (close - self.position.entry_price)
        } else if self.position.size < 0.0 {
            -self.position.size * (self.position.entry_price - close)
        } else {
            0.0
        };
    }

    /// The live ladder shape against a book synthesized from the bar: one
    /// level per side at +/-0.1% of the close carrying the bar's depths.
    fn place_quotes(&mut self, bar: &HistoricalBar) {
        let mid = bar.close;
        let book = OrderbookSnapshot {
            market_id: 0,
            ts_ms: bar.timestamp,
            bids: vec![(mid * 0.999, bar.bid_depth)],
            asks: vec![(mid * 1.001, bar.ask_depth)],
        };
        let reading = spread::dynamic_spread(&book, &self.config.spread);
        self.spread_sum += reading.spread;
        self.spread_samples += 1;

        let ratio = self
            .risk
            .position_ratio(&self.position, mid, self.balance);
        let shaped = skew::shape(&self.config, 0, mid, reading.spread, ratio);

        for i in 0..self.config.max_levels {
            let spacing = reading.spread * (i + 1) as f64 * 0.5;
            for (side, price) in [
                (Side::Bid, shaped.bid_price * (1.0 - spacing)),
                (Side::Ask, shaped.ask_price * (1.0 + spacing)),
            ] {
                self.open_orders.push(RestingOrder {
                    id: self.next_order_id,
                    market_id: 0,
                    side,
                    price,
                    size: self.config.fixed_size,
                    placed_ts_ms: bar.timestamp,
                    filled: false,
                    fill_price: 0.0,
                    fill_ts_ms: 0,
                });
                self.next_order_id += 1;
                self.orders_placed += 1;
            }
        }
    }
}
