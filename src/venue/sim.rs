use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::types::{
    AccountInfo, Balance, EngineEvent, Market, OrderIntent, OrderbookSnapshot, Position,
    RestingOrder,
};
use crate::venue::{VenueClient, VenueError};

/// Call counters for assertions in tests and for the paper-mode summary log.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimCounters {
    pub orders_placed: u32,
    pub orders_cancelled: u32,
    pub cancel_all_calls: u32,
    pub info_fetches: u32,
}

struct SimState {
    account: AccountInfo,
    leverage: f64,
    subscriptions: Vec<u32>,
    next_order_id: u64,
    counters: SimCounters,
    fail_next_place: bool,
}

/// In-memory venue: keeps balances, positions, and resting orders locally and
/// acknowledges every call. No order ever fills on its own — the paper loop
/// only exercises the quoting path.
pub struct SimVenue {
    markets: Vec<Market>,
    state: Mutex<SimState>,
}

impl SimVenue {
    pub fn new(markets: Vec<Market>, balance: Balance) -> Self {
        Self {
            markets,
            state: Mutex::new(SimState {
                account: AccountInfo {
                    balance,
                    positions: Default::default(),
                    open_orders: Vec::new(),
                },
                leverage: 1.0,
                subscriptions: Vec::new(),
                next_order_id: 1,
                counters: SimCounters::default(),
                fail_next_place: false,
            }),
        }
    }

    /// One liquid default market, enough collateral to quote.
    pub fn with_default_market() -> Self {
        Self::new(
            vec![Market {
                id: 0,
                symbol: "SOL-PERP".into(),
                tick_size: 0.01,
                min_size: 0.01,
                max_leverage: 10.0,
            }],
            Balance {
                total: 10_000.0,
                available: 10_000.0,
            },
        )
    }

    pub fn set_leverage(&self, leverage: f64) {
        self.state.lock().unwrap().leverage = leverage;
    }

    pub fn set_balance(&self, balance: Balance) {
        self.state.lock().unwrap().account.balance = balance;
    }

    pub fn set_position(&self, market_id: u32, position: Position) {
        self.state
            .lock()
            .unwrap()
            .account
            .positions
            .insert(market_id, position);
    }

    /// Make the next `place_order` fail, to exercise per-order error paths.
    pub fn fail_next_place(&self) {
        self.state.lock().unwrap().fail_next_place = true;
    }

    pub fn counters(&self) -> SimCounters {
        self.state.lock().unwrap().counters
    }

    pub fn open_orders(&self) -> Vec<RestingOrder> {
        self.state.lock().unwrap().account.open_orders.clone()
    }

    pub fn subscriptions(&self) -> Vec<u32> {
        self.state.lock().unwrap().subscriptions.clone()
    }
}

#[async_trait]
impl VenueClient for SimVenue {
    async fn get_all_markets(&self) -> Result<Vec<Market>, VenueError> {
        Ok(self.markets.clone())
    }

    async fn subscribe_orderbook(&self, market_id: u32) -> Result<(), VenueError> {
        let mut s = self.state.lock().unwrap();
        if !s.subscriptions.contains(&market_id) {
            s.subscriptions.push(market_id);
        }
        Ok(())
    }

    async fn unsubscribe_orderbook(&self, market_id: u32) -> Result<(), VenueError> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .retain(|&id| id != market_id);
        Ok(())
    }

    async fn fetch_info(&self) -> Result<AccountInfo, VenueError> {
        let mut s = self.state.lock().unwrap();
        s.counters.info_fetches += 1;
        Ok(s.account.clone())
    }

    async fn get_leverage(&self) -> Result<f64, VenueError> {
        Ok(self.state.lock().unwrap().leverage)
    }

    async fn place_order(&self, intent: &OrderIntent) -> Result<u64, VenueError> {
        let mut s = self.state.lock().unwrap();
        if s.fail_next_place {
            s.fail_next_place = false;
            return Err(VenueError::Rejected("simulated placement failure".into()));
        }
        let id = s.next_order_id;
        s.next_order_id += 1;
        s.counters.orders_placed += 1;
        s.account.open_orders.push(RestingOrder {
            id,
            market_id: intent.market_id,
            side: intent.side,
            price: intent.price.unwrap_or(0.0),
            size: intent.size,
            placed_ts_ms: chrono::Utc::now().timestamp_millis(),
            filled: false,
            fill_price: 0.0,
            fill_ts_ms: 0,
        });
        Ok(id)
    }

    async fn cancel_order(&self, order_id: u64) -> Result<(), VenueError> {
        let mut s = self.state.lock().unwrap();
        let before = s.account.open_orders.len();
        s.account.open_orders.retain(|o| o.id != order_id);
        if s.account.open_orders.len() == before {
            return Err(VenueError::Rejected(format!("unknown order {}", order_id)));
        }
        s.counters.orders_cancelled += 1;
        Ok(())
    }

    async fn cancel_all_orders(&self, market_id: Option<u32>) -> Result<(), VenueError> {
        let mut s = self.state.lock().unwrap();
        s.counters.cancel_all_calls += 1;
        let before = s.account.open_orders.len();
        match market_id {
            Some(id) => s.account.open_orders.retain(|o| o.market_id != id),
            None => s.account.open_orders.clear(),
        }
        s.counters.orders_cancelled += (before - s.account.open_orders.len()) as u32;
        Ok(())
    }
}

// ─── Paper-mode feed ───

/// Synthetic orderbook producer for paper mode: a seeded random walk around
/// each market's start price, five levels a side, pushed on a fixed cadence.
/// Pure producer in the feed-task style — owns nothing but the sender.
pub async fn sim_feed(
    feed_tx: mpsc::Sender<EngineEvent>,
    markets: Vec<Market>,
    start_price: f64,
    interval_ms: u64,
    seed: u64,
) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut mids: Vec<f64> = markets.iter().map(|_| start_price).collect();
    let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(interval_ms));

    loop {
        interval.tick().await;
        for (market, mid) in markets.iter().zip(mids.iter_mut()) {
            let step: f64 = rng.gen_range(-0.0008..0.0008);
            *mid *= 1.0 + step;

            let half_gap = *mid * 0.0005;
            let tick = market.tick_size.max(*mid * 0.0002);
            let mut bids = Vec::with_capacity(5);
            let mut asks = Vec::with_capacity(5);
            for level in 0..5 {
                let depth: f64 = rng.gen_range(5.0..50.0);
                bids.push((*mid - half_gap - level as f64 * tick, depth));
                let depth: f64 = rng.gen_range(5.0..50.0);
                asks.push((*mid + half_gap + level as f64 * tick, depth));
            }

            let book = OrderbookSnapshot {
                market_id: market.id,
                ts_ms: chrono::Utc::now().timestamp_millis(),
                bids,
                asks,
            };
            if feed_tx.send(EngineEvent::Orderbook(book)).await.is_err() {
                return;
            }
        }
    }
}
