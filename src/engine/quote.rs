use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::engine::hedge;
use crate::engine::risk::{RiskDenial, RiskGate};
use crate::engine::skew;
use crate::engine::state::{requote_exceeded, MarketState, QuotePhase};
use crate::math::sizing::{self, round_size, DEFAULT_STEP_SIZE};
use crate::math::spread::{self, BookHealth};
use crate::oracle::PriceOracle;
use crate::types::{
    AccountInfo, EngineEvent, FillMode, LastQuotePrices, Market, OrderIntent, OrderbookSnapshot,
    QuoteLadder, QuoteLevel, Side,
};
use crate::venue::{VenueClient, VenueError};

/// Why a quote cycle placed nothing. Every variant is a single-cycle
/// suppression, logged and forgotten.
#[derive(Debug)]
pub enum SkipReason {
    Unhealthy(BookHealth),
    Risk(RiskDenial),
    NoReferencePrice,
    RequoteThreshold,
    NoSizes,
    SizesInvalid,
    UnknownMarket,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Unhealthy(h) => write!(f, "book unhealthy: {}", h),
            SkipReason::Risk(d) => write!(f, "risk denial: {}", d),
            SkipReason::NoReferencePrice => write!(f, "no reference price"),
            SkipReason::RequoteThreshold => write!(f, "below requote threshold"),
            SkipReason::NoSizes => write!(f, "no sizes (no free collateral)"),
            SkipReason::SizesInvalid => write!(f, "ladder notional over per-side budget"),
            SkipReason::UnknownMarket => write!(f, "event for unsubscribed market"),
        }
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    Quoted { bids: usize, asks: usize },
    Skipped(SkipReason),
}

/// `round(p / tick) * tick`, applied to every price before emission.
pub fn round_to_tick(price: f64, tick_size: f64) -> f64 {
    if tick_size <= 0.0 {
        return price;
    }
    (price / tick_size).round() * tick_size
}

/// The live orchestrator: consumes the single engine event channel and runs
/// the full decision pipeline per orderbook event. All per-market handling
/// is serial because this loop is the only consumer.
pub struct QuoteEngine {
    config: Config,
    venue: Arc<dyn VenueClient>,
    oracle: Option<Arc<PriceOracle>>,
    risk: RiskGate,
    markets: HashMap<u32, MarketState>,
    account: AccountInfo,
    margin_fraction: f64,
}

impl QuoteEngine {
    pub fn new(
        config: Config,
        venue: Arc<dyn VenueClient>,
        oracle: Option<Arc<PriceOracle>>,
        markets: Vec<Market>,
    ) -> Self {
        let risk = RiskGate::new(&config);
        Self {
            config,
            venue,
            oracle,
            risk,
            markets: markets
                .into_iter()
                .map(|m| (m.id, MarketState::new(m)))
                .collect(),
            account: AccountInfo::default(),
            margin_fraction: 0.0,
        }
    }

    pub fn market_phase(&self, market_id: u32) -> Option<QuotePhase> {
        self.markets.get(&market_id).map(|s| s.phase)
    }

    pub fn last_quote(&self, market_id: u32) -> Option<LastQuotePrices> {
        self.markets.get(&market_id).and_then(|s| s.last_quote)
    }

    pub fn current_quotes(&self, market_id: u32) -> Option<&QuoteLadder> {
        self.markets.get(&market_id).and_then(|s| s.current_quotes.as_ref())
    }

    /// Subscribe every market, start the oracle refresher, and take the
    /// first account snapshot. Failures here are fatal to startup.
    pub async fn startup(&mut self) -> Result<(), VenueError> {
        if let Some(oracle) = &self.oracle {
            let symbols: Vec<String> = self
                .markets
                .values()
                .map(|s| s.market.base_symbol().to_string())
                .collect();
            oracle.start_updates(symbols);
        }

        self.refresh_account().await?;

        let ids: Vec<u32> = self.markets.keys().copied().collect();
        for id in ids {
            self.venue.subscribe_orderbook(id).await?;
            log::info!(
                "[ENGINE] Subscribed {} ({})",
                id,
                self.markets[&id].market.symbol
            );
        }
        Ok(())
    }

    /// Cooperative shutdown: stop the oracle, pull every resting order, and
    /// unsubscribe. Errors are logged and never block the remaining steps.
    pub async fn shutdown(&mut self) {
        log::info!("[ENGINE] Shutting down");
        if let Some(oracle) = &self.oracle {
            oracle.stop();
        }
        self.risk.emergency_cancel_all(self.venue.as_ref()).await;
        let ids: Vec<u32> = self.markets.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.venue.unsubscribe_orderbook(id).await {
                log::warn!("[ENGINE] Unsubscribe {} failed: {}", id, e);
            }
            if let Some(state) = self.markets.get_mut(&id) {
                state.phase = QuotePhase::NoQuote;
                state.current_quotes = None;
            }
        }
    }

    /// Main loop. Returns after a Shutdown event (or channel close) once the
    /// shutdown sequence completes.
    pub async fn run(&mut self, mut events: mpsc::Receiver<EngineEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::Orderbook(book) => self.on_orderbook(book).await,
                EngineEvent::Tick => self.on_tick().await,
                EngineEvent::Shutdown => break,
            }
        }
        self.shutdown().await;
    }

    pub async fn refresh_account(&mut self) -> Result<(), VenueError> {
        self.account = self.venue.fetch_info().await?;
        self.margin_fraction = self.venue.get_leverage().await?;
        Ok(())
    }

    /// Periodic safety tick: keeps position/balance fresh through event
    /// droughts and flags stale feeds.
    pub async fn on_tick(&mut self) {
        if let Err(e) = self.refresh_account().await {
            log::warn!("[ENGINE] Account refresh failed: {}", e);
        }
        let now = chrono::Utc::now().timestamp_millis();
        let stale_after = 3 * self.config.requote_interval_ms as i64;
        for state in self.markets.values() {
            if state.last_book_ts_ms > 0 && now - state.last_book_ts_ms > stale_after {
                log::warn!(
                    "[ENGINE] {} book stale: last event {}ms ago",
                    state.market.symbol,
                    now - state.last_book_ts_ms
                );
            }
        }
    }

    pub async fn on_orderbook(&mut self, book: OrderbookSnapshot) {
        match self.markets.get_mut(&book.market_id) {
            Some(state) => state.last_book_ts_ms = book.ts_ms,
            None => {
                log::debug!("[ENGINE] Dropping book for unknown market {}", book.market_id);
                return;
            }
        }

        let outcome = self.quote_cycle(&book).await;
        let symbol = &self.markets[&book.market_id].market.symbol;
        match &outcome {
            CycleOutcome::Quoted { bids, asks } => {
                log::info!("[ENGINE] {} quoted {} bids / {} asks", symbol, bids, asks);
            }
            CycleOutcome::Skipped(SkipReason::RequoteThreshold) => {
                log::debug!("[ENGINE] {} skip: {}", symbol, SkipReason::RequoteThreshold);
            }
            CycleOutcome::Skipped(reason) => {
                log::info!("[ENGINE] {} skip: {}", symbol, reason);
            }
        }

        // Threshold skips leave the phase alone: the resting ladder is
        // still the one we want.
        if let CycleOutcome::Skipped(reason) = &outcome {
            if !matches!(reason, SkipReason::RequoteThreshold | SkipReason::UnknownMarket) {
                if let Some(state) = self.markets.get_mut(&book.market_id) {
                    state.on_suppressed();
                }
            }
        }
    }

    /// One pass of the decision pipeline: health check, risk gate, reference
    /// price, spread, inventory shaping, requote gate, cancel + replace, and
    /// the hedge check.
    ///
    /// Cancels are issued before the new placements without waiting for
    /// confirmation, so briefly overlapping orders can exist at the venue.
    pub async fn quote_cycle(&mut self, book: &OrderbookSnapshot) -> CycleOutcome {
        let market_id = book.market_id;
        let market = match self.markets.get(&market_id) {
            Some(state) => state.market.clone(),
            None => return CycleOutcome::Skipped(SkipReason::UnknownMarket),
        };

        // 1. Book health.
        let health = spread::health(book);
        if health != BookHealth::Healthy {
            return CycleOutcome::Skipped(SkipReason::Unhealthy(health));
        }

        // 2. Risk gate.
        if let Err(denial) = self.risk.can_quote(market_id, &self.account, self.margin_fraction) {
            return CycleOutcome::Skipped(SkipReason::Risk(denial));
        }

        // 3. Reference price: fresh oracle mid, else orderbook mid when
        //    allowed, else skip the cycle.
        let oracle_enabled = self.config.oracle.enabled && self.oracle.is_some();
        let reference = if oracle_enabled {
            let fresh = self
                .oracle
                .as_ref()
                .and_then(|o| o.fresh(market.base_symbol()));
            match fresh {
                Some(price) => Some(price.mid),
                None if self.config.oracle.fallback_to_orderbook => spread::mid(book),
                None => None,
            }
        } else {
            spread::mid(book)
        };
        let reference = match reference {
            Some(m) if m > 0.0 => m,
            _ => return CycleOutcome::Skipped(SkipReason::NoReferencePrice),
        };

        // 4. Target spread from depth imbalance.
        let reading = spread::dynamic_spread(book, &self.config.spread);

        // 5. Inventory skew + bias.
        let position = self.account.position(market_id);
        let ratio =
            self.risk
                .position_ratio(&position, reference, self.account.balance.available);
        let shaped = skew::shape(&self.config, market_id, reference, reading.spread, ratio);

        // 6. Requote gate.
        let prior = self.markets.get(&market_id).and_then(|s| s.last_quote);
        if !requote_exceeded(
            prior.as_ref(),
            shaped.bid_price,
            shaped.ask_price,
            self.config.requote_threshold,
        ) {
            return CycleOutcome::Skipped(SkipReason::RequoteThreshold);
        }
        let last = LastQuotePrices {
            bid: shaped.bid_price,
            ask: shaped.ask_price,
            ts_ms: book.ts_ms,
        };
        if let Some(state) = self.markets.get_mut(&market_id) {
            state.last_quote = Some(last);
        }

        // 7. Reconcile with the venue, then pull the old ladder.
        if let Err(e) = self.refresh_account().await {
            log::warn!("[ENGINE] Pre-cancel account refresh failed: {}", e);
        }
        if let Err(e) = self.venue.cancel_all_orders(Some(market_id)).await {
            log::warn!("[ENGINE] Cancel for {} failed: {}", market.symbol, e);
        }

        // 8. Size the ladder against refreshed collateral.
        let available = self.account.balance.available;
        let sizes = sizing::level_sizes(&self.config, available);
        if sizes.is_empty() {
            return CycleOutcome::Skipped(SkipReason::NoSizes);
        }
        if !sizing::validate_sizes(&self.config, &sizes, available, reference) {
            return CycleOutcome::Skipped(SkipReason::SizesInvalid);
        }

        // 9-10. Build and emit the ladder, one level at a time. A failed
        // placement drops that level, not the ladder.
        let mut ladder = QuoteLadder {
            market_id,
            bids: Vec::new(),
            asks: Vec::new(),
            ts_ms: book.ts_ms,
        };
        let levels = self.config.max_levels.min(sizes.len());
        for i in 0..levels {
            let spacing = reading.spread * (i + 1) as f64 * 0.5;
            let size = round_size(sizes[i], market.min_size, DEFAULT_STEP_SIZE);

            let bid_price = round_to_tick(shaped.bid_price * (1.0 - spacing), market.tick_size);
            match self
                .venue
                .place_order(&OrderIntent {
                    market_id,
                    side: Side::Bid,
                    price: Some(bid_price),
                    size,
                    fill_mode: FillMode::Limit,
                    reduce_only: false,
                })
                .await
            {
                Ok(_) => ladder.bids.push(QuoteLevel {
                    price: bid_price,
                    size,
                }),
                Err(e) => log::warn!(
                    "[ENGINE] {} bid L{} @ {:.4} failed: {}",
                    market.symbol,
                    i + 1,
                    bid_price,
                    e
                ),
            }

            let ask_price = round_to_tick(shaped.ask_price * (1.0 + spacing), market.tick_size);
            match self
                .venue
                .place_order(&OrderIntent {
                    market_id,
                    side: Side::Ask,
                    price: Some(ask_price),
                    size,
                    fill_mode: FillMode::Limit,
                    reduce_only: false,
                })
                .await
            {
                Ok(_) => ladder.asks.push(QuoteLevel {
                    price: ask_price,
                    size,
                }),
                Err(e) => log::warn!(
                    "[ENGINE] {} ask L{} @ {:.4} failed: {}",
                    market.symbol,
                    i + 1,
                    ask_price,
                    e
                ),
            }
        }

        // 11. Record what we believe is resting.
        let (bids, asks) = (ladder.bids.len(), ladder.asks.len());
        if let Some(state) = self.markets.get_mut(&market_id) {
            state.on_quoted(ladder, last);
        }

        // 12. Hedge check.
        if skew::needs_hedge(&self.config, ratio) {
            hedge::execute(self.venue.as_ref(), &market, &position).await;
        }

        CycleOutcome::Quoted { bids, asks }
    }
}
