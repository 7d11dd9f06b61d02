pub mod sources;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use thiserror::Error;

use crate::config::OracleConfig;
use crate::types::ExchangePrice;
use sources::SourceTicker;

/// Hard per-request timeout for every source query.
pub const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Per-source failure. Swallowed during aggregation; a full blackout
/// surfaces as a missing price, not an error.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle source {0} http failure: {1}")]
    Http(&'static str, String),
    #[error("oracle source {0} malformed payload: {1}")]
    Malformed(&'static str, String),
    #[error("oracle source {0} timed out")]
    Timeout(&'static str),
}

/// Multi-source reference-price oracle with a TTL cache.
///
/// The cache is owned here and read synchronously by the quote loop
/// (`fresh`); only `get_price` and the refresher task perform HTTP. Locks
/// are never held across an await.
pub struct PriceOracle {
    cfg: OracleConfig,
    http: reqwest::Client,
    cache: Mutex<HashMap<String, ExchangePrice>>,
    refresher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PriceOracle {
    pub fn new(cfg: OracleConfig) -> Self {
        Self {
            cfg,
            http: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
            refresher: Mutex::new(None),
        }
    }

    /// Cache entry regardless of age.
    pub fn cached(&self, symbol: &str) -> Option<ExchangePrice> {
        self.cache.lock().unwrap().get(symbol).cloned()
    }

    /// Cache entry younger than the configured TTL.
    pub fn fresh(&self, symbol: &str) -> Option<ExchangePrice> {
        let now = chrono::Utc::now().timestamp_millis();
        self.cache
            .lock()
            .unwrap()
            .get(symbol)
            .filter(|e| now - e.ts_ms < self.cfg.cache_timeout_ms)
            .cloned()
    }

    pub fn is_fresh(&self, symbol: &str) -> bool {
        self.fresh(symbol).is_some()
    }

    fn put(&self, symbol: &str, price: ExchangePrice) {
        self.cache.lock().unwrap().insert(symbol.to_string(), price);
    }

    /// Resolve a reference price: fresh cache hit, else query every
    /// configured source concurrently (5 s each), else fall back to a stale
    /// cache entry, else nothing.
    pub async fn get_price(&self, symbol: &str) -> Option<ExchangePrice> {
        if let Some(hit) = self.fresh(symbol) {
            return Some(hit);
        }

        let queries = self.cfg.sources.iter().map(|&source| async move {
            match tokio::time::timeout(REQUEST_TIMEOUT, sources::fetch(source, &self.http, symbol))
                .await
            {
                Ok(Ok(ticker)) => Some((source.name(), ticker)),
                Ok(Err(e)) => {
                    log::debug!("[ORACLE] {}", e);
                    None
                }
                Err(_) => {
                    log::debug!("[ORACLE] {}", OracleError::Timeout(source.name()));
                    None
                }
            }
        });
        let results: Vec<(&'static str, SourceTicker)> =
            join_all(queries).await.into_iter().flatten().collect();

        if results.is_empty() {
            log::warn!("[ORACLE] All sources failed for {}", symbol);
            return self.cached(symbol);
        }

        let aggregated = aggregate(&results, chrono::Utc::now().timestamp_millis());
        self.put(symbol, aggregated.clone());
        Some(aggregated)
    }

    /// Schedule a refresher that re-queries every symbol on the configured
    /// interval, with one immediate pass. Idempotent per oracle instance.
    pub fn start_updates(self: &Arc<Self>, symbols: Vec<String>) {
        let oracle = Arc::clone(self);
        let interval_ms = self.cfg.update_interval_ms;
        let handle = tokio::spawn(async move {
            for symbol in &symbols {
                if oracle.get_price(symbol).await.is_none() {
                    log::warn!("[ORACLE] No initial price for {}", symbol);
                }
            }
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_millis(interval_ms.max(1)));
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                for symbol in &symbols {
                    let _ = oracle.get_price(symbol).await;
                }
            }
        });
        if let Some(previous) = self.refresher.lock().unwrap().replace(handle) {
            previous.abort();
        }
        log::info!(
            "[ORACLE] Refresher started ({} sources, every {}ms)",
            self.cfg.sources.len(),
            interval_ms
        );
    }

    /// Cancel the refresher. Safe to call without a prior `start_updates`.
    pub fn stop(&self) {
        if let Some(handle) = self.refresher.lock().unwrap().take() {
            handle.abort();
            log::info!("[ORACLE] Refresher stopped");
        }
    }
}

/// Median aggregation across sources.
///
/// Bid, ask, and mid are each the ⌊n/2⌋-th order statistic of their own
/// sorted series (the lower median — deliberately not a multivariate
/// median), volume is the mean, and the source tag lists every contributor.
pub fn aggregate(results: &[(&'static str, SourceTicker)], now_ms: i64) -> ExchangePrice {
    let lower_median = |mut xs: Vec<f64>| -> f64 {
        xs.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        xs[xs.len() / 2]
    };

    let bid = lower_median(results.iter().map(|(_, t)| t.bid).collect());
    let ask = lower_median(results.iter().map(|(_, t)| t.ask).collect());
    let mid = lower_median(results.iter().map(|(_, t)| (t.bid + t.ask) / 2.0).collect());
    let spread = if mid > 0.0 { (ask - bid) / mid } else { 0.0 };
    let volume_24h =
        results.iter().map(|(_, t)| t.volume_24h).sum::<f64>() / results.len() as f64;

    let names: Vec<&str> = results.iter().map(|(name, _)| *name).collect();
    ExchangePrice {
        bid,
        ask,
        mid,
        spread,
        volume_24h,
        ts_ms: now_ms,
        source: format!("aggregated({})", names.join(",")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OracleSource;

    fn ticker(bid: f64, ask: f64, volume: f64) -> SourceTicker {
        SourceTicker {
            bid,
            ask,
            volume_24h: volume,
        }
    }

    fn cfg() -> OracleConfig {
        OracleConfig {
            enabled: true,
            sources: vec![OracleSource::Binance],
            update_interval_ms: 10_000,
            fallback_to_orderbook: true,
            cache_timeout_ms: 30_000,
        }
    }

    /// Scenario: a single source.
    /// Expected: index ⌊1/2⌋ = 0 — the aggregate equals that source.
    #[test]
    fn test_aggregate_single_source() {
        let p = aggregate(&[("binance", ticker(100.0, 100.2, 500.0))], 1);
        assert_eq!(p.bid, 100.0);
        assert_eq!(p.ask, 100.2);
        assert_eq!(p.mid, 100.1);
        assert_eq!(p.source, "aggregated(binance)");
    }

    /// Scenario: two sources.
    /// Expected: index ⌊2/2⌋ = 1, the UPPER of the two sorted values per
    /// field — the specified lower-median index, not an average.
    #[test]
    fn test_aggregate_two_sources_takes_index_one() {
        let p = aggregate(
            &[
                ("binance", ticker(100.0, 100.2, 100.0)),
                ("bybit", ticker(99.0, 100.4, 300.0)),
            ],
            1,
        );
        assert_eq!(p.bid, 100.0); // sorted [99, 100][1]
        assert_eq!(p.ask, 100.4); // sorted [100.2, 100.4][1]
        assert_eq!(p.volume_24h, 200.0);
    }

    /// Scenario: three sources with fields that sort differently.
    /// Expected: each field takes its own middle element independently; the
    /// result need not match any single source.
    #[test]
    fn test_aggregate_fields_independent() {
        let p = aggregate(
            &[
                ("binance", ticker(100.0, 100.9, 0.0)),
                ("bybit", ticker(101.0, 100.2, 0.0)),
                ("coinbase", ticker(99.0, 100.5, 0.0)),
            ],
            1,
        );
        assert_eq!(p.bid, 100.0); // sorted [99, 100, 101][1]
        assert_eq!(p.ask, 100.5); // sorted [100.2, 100.5, 100.9][1]
        // mids: 100.45, 100.6, 99.75 → sorted [99.75, 100.45, 100.6][1]
        assert!((p.mid - 100.45).abs() < 1e-9);
        assert_eq!(p.source, "aggregated(binance,bybit,coinbase)");
    }

    /// Scenario: spread of the aggregate.
    /// Expected: (ask - bid) / mid of the aggregated fields.
    #[test]
    fn test_aggregate_spread() {
        let p = aggregate(&[("binance", ticker(100.0, 100.2, 0.0))], 1);
        assert!((p.spread - 0.2 / 100.1).abs() < 1e-12);
    }

    /// Scenario: fresh vs stale cache reads.
    /// Expected: an entry younger than the TTL is fresh; older entries are
    /// visible to `cached` but not to `fresh`.
    #[test]
    fn test_cache_freshness() {
        let oracle = PriceOracle::new(cfg());
        let now = chrono::Utc::now().timestamp_millis();

        let mut price = aggregate(&[("binance", ticker(100.0, 100.2, 0.0))], now);
        oracle.put("SOL", price.clone());
        assert!(oracle.is_fresh("SOL"));

        price.ts_ms = now - 60_000; // past the 30s TTL
        oracle.put("SOL", price);
        assert!(!oracle.is_fresh("SOL"));
        assert!(oracle.cached("SOL").is_some());
        assert!(oracle.fresh("SOL").is_none());
    }

    /// Scenario: total source blackout (no sources configured) with a stale
    /// entry in the cache.
    /// Expected: `get_price` falls back to the stale entry rather than none.
    #[tokio::test]
    async fn test_blackout_falls_back_to_stale() {
        let mut c = cfg();
        c.sources.clear();
        let oracle = PriceOracle::new(c);
        let stale = ExchangePrice {
            bid: 100.0,
            ask: 100.2,
            mid: 100.1,
            spread: 0.002,
            volume_24h: 0.0,
            ts_ms: chrono::Utc::now().timestamp_millis() - 120_000,
            source: "aggregated(binance)".into(),
        };
        oracle.put("SOL", stale);

        let got = oracle.get_price("SOL").await.expect("stale fallback");
        assert_eq!(got.mid, 100.1);

        // No cache at all → blackout yields nothing.
        assert!(oracle.get_price("ETH").await.is_none());
    }

    /// Scenario: stop without start.
    /// Expected: a no-op, never a panic.
    #[test]
    fn test_stop_without_start() {
        PriceOracle::new(cfg()).stop();
    }

    /// Scenario: unknown symbol.
    /// Expected: nothing cached, nothing fresh.
    #[test]
    fn test_unknown_symbol_empty() {
        let oracle = PriceOracle::new(cfg());
        assert!(oracle.cached("BTC").is_none());
        assert!(!oracle.is_fresh("BTC"));
    }
}
