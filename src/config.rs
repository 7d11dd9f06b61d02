use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

/// Boot-time configuration failure. Carries the first violated invariant.
#[derive(Debug, Error)]
#[error("invalid config: {0}")]
pub struct ConfigError(pub String);

/// Level sizing strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuantityMode {
    Fixed,
    Percentage,
    Tiered,
}

impl QuantityMode {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "percentage" => QuantityMode::Percentage,
            "tiered" => QuantityMode::Tiered,
            _ => QuantityMode::Fixed,
        }
    }
}

/// External reference-price source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OracleSource {
    Binance,
    Bybit,
    Coinbase,
}

impl OracleSource {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "binance" => Some(OracleSource::Binance),
            "bybit" => Some(OracleSource::Bybit),
            "coinbase" => Some(OracleSource::Coinbase),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OracleSource::Binance => "binance",
            OracleSource::Bybit => "bybit",
            OracleSource::Coinbase => "coinbase",
        }
    }
}

// ─── Sub-sections ───

#[derive(Clone, Debug)]
pub struct SpreadConfig {
    /// Fractions of price.
    pub min: f64,
    pub max: f64,
    pub depth_levels: usize,
}

#[derive(Clone, Debug)]
pub struct RiskConfig {
    pub min_margin_fraction: f64,
    /// Fractions of available collateral.
    pub max_exposure_per_side: f64,
    pub max_exposure_per_market: f64,
    pub max_total_exposure: f64,
    /// Absolute quote-currency floor.
    pub min_free_collateral: f64,
}

#[derive(Clone, Debug)]
pub struct AutoHedgeConfig {
    pub enabled: bool,
    pub imbalance_threshold: f64,
}

#[derive(Clone, Debug)]
pub struct OracleConfig {
    pub enabled: bool,
    pub sources: Vec<OracleSource>,
    pub update_interval_ms: u64,
    pub fallback_to_orderbook: bool,
    pub cache_timeout_ms: i64,
}

#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// Disjoint market-id groups; one worker process per group. Empty = off.
    pub process_groups: Vec<Vec<u32>>,
    pub worker_restart_delay_ms: u64,
    pub max_restarts: u32,
}

impl ClusterConfig {
    pub fn enabled(&self) -> bool {
        !self.process_groups.is_empty()
    }
}

/// Per-market overrides. Extend here rather than adding parallel maps.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct AssetConfig {
    pub bias: f64,
}

// ─── Config ───

/// Full parameter set, read-only after `validate` passes at boot.
#[derive(Clone, Debug)]
pub struct Config {
    pub quantity_mode: QuantityMode,
    /// Absolute base units (fixed mode).
    pub fixed_size: f64,
    /// Fraction of available collateral per level (percentage mode).
    pub percent_per_level: f64,
    /// Per-level fractions (tiered mode); must cover max_levels and sum to 1.
    pub tiered_multipliers: Vec<f64>,
    pub spread: SpreadConfig,
    pub risk: RiskConfig,
    pub max_levels: usize,
    pub auto_hedge: AutoHedgeConfig,
    pub requote_interval_ms: u64,
    pub inventory_skew_enabled: bool,
    pub inventory_skew_factor: f64,
    pub requote_threshold: f64,
    pub assets: HashMap<u32, AssetConfig>,
    pub default_bias: f64,
    pub oracle: OracleConfig,
    pub cluster: ClusterConfig,

    // Credentials & endpoints
    pub private_key: Option<String>,
    pub rpc_endpoint: String,
    pub web_server_url: String,
}

impl Config {
    /// Baseline values; `from_env` overlays environment overrides on these.
    pub fn defaults() -> Self {
        Self {
            quantity_mode: QuantityMode::Fixed,
            fixed_size: 0.1,
            percent_per_level: 0.02,
            tiered_multipliers: vec![0.5, 0.3, 0.2],
            spread: SpreadConfig {
                min: 0.0015,
                max: 0.0125,
                depth_levels: 5,
            },
            risk: RiskConfig {
                min_margin_fraction: 0.1,
                max_exposure_per_side: 0.5,
                max_exposure_per_market: 0.3,
                max_total_exposure: 0.8,
                min_free_collateral: 10.0,
            },
            max_levels: 3,
            auto_hedge: AutoHedgeConfig {
                enabled: false,
                imbalance_threshold: 0.5,
            },
            requote_interval_ms: 5000,
            inventory_skew_enabled: true,
            inventory_skew_factor: 0.005,
            requote_threshold: 0.0002,
            assets: HashMap::new(),
            default_bias: 0.0,
            oracle: OracleConfig {
                enabled: false,
                sources: vec![
                    OracleSource::Binance,
                    OracleSource::Bybit,
                    OracleSource::Coinbase,
                ],
                update_interval_ms: 10_000,
                fallback_to_orderbook: true,
                cache_timeout_ms: 30_000,
            },
            cluster: ClusterConfig {
                process_groups: Vec::new(),
                worker_restart_delay_ms: 3000,
                max_restarts: 5,
            },
            private_key: None,
            rpc_endpoint: "https://api.mainnet-beta.solana.com".into(),
            web_server_url: "wss://quote.venue.exchange/ws".into(),
        }
    }

    pub fn from_env() -> Self {
        let mut c = Self::defaults();

        if let Ok(v) = std::env::var("QUANTITY_MODE") {
            c.quantity_mode = QuantityMode::from_str(&v);
        }
        c.fixed_size = env_f64("FIXED_SIZE", c.fixed_size);
        c.percent_per_level = env_f64("PERCENT_PER_LEVEL", c.percent_per_level);
        if let Some(m) = env_json::<Vec<f64>>("TIERED_MULTIPLIERS") {
            c.tiered_multipliers = m;
        }

        c.spread.min = env_f64("SPREAD_MIN", c.spread.min);
        c.spread.max = env_f64("SPREAD_MAX", c.spread.max);
        c.spread.depth_levels = env_usize("SPREAD_DEPTH_LEVELS", c.spread.depth_levels);

        c.risk.min_margin_fraction = env_f64("RISK_MIN_MARGIN_FRACTION", c.risk.min_margin_fraction);
        c.risk.max_exposure_per_side =
            env_f64("RISK_MAX_EXPOSURE_PER_SIDE", c.risk.max_exposure_per_side);
        c.risk.max_exposure_per_market =
            env_f64("RISK_MAX_EXPOSURE_PER_MARKET", c.risk.max_exposure_per_market);
        c.risk.max_total_exposure = env_f64("RISK_MAX_TOTAL_EXPOSURE", c.risk.max_total_exposure);
        c.risk.min_free_collateral = env_f64("RISK_MIN_FREE_COLLATERAL", c.risk.min_free_collateral);

        c.max_levels = env_usize("MAX_LEVELS", c.max_levels);
        c.auto_hedge.enabled = env_bool("AUTO_HEDGE", c.auto_hedge.enabled);
        c.auto_hedge.imbalance_threshold =
            env_f64("AUTO_HEDGE_THRESHOLD", c.auto_hedge.imbalance_threshold);

        c.requote_interval_ms = env_u64("REQUOTE_INTERVAL_MS", c.requote_interval_ms);
        c.inventory_skew_enabled = env_bool("INVENTORY_SKEW", c.inventory_skew_enabled);
        c.inventory_skew_factor = env_f64("INVENTORY_SKEW_FACTOR", c.inventory_skew_factor);
        c.requote_threshold = env_f64("REQUOTE_THRESHOLD", c.requote_threshold);

        if let Some(assets) = env_json::<HashMap<u32, AssetConfig>>("ASSET_BIAS") {
            c.assets = assets;
        }
        c.default_bias = env_f64("DEFAULT_BIAS", c.default_bias);

        c.oracle.enabled = env_bool("ORACLE_ENABLED", c.oracle.enabled);
        if let Ok(v) = std::env::var("ORACLE_SOURCES") {
            c.oracle.sources = v.split(',').filter_map(OracleSource::parse).collect();
        }
        c.oracle.update_interval_ms =
            env_u64("ORACLE_UPDATE_INTERVAL_MS", c.oracle.update_interval_ms);
        c.oracle.fallback_to_orderbook =
            env_bool("ORACLE_FALLBACK_TO_ORDERBOOK", c.oracle.fallback_to_orderbook);
        c.oracle.cache_timeout_ms =
            env_u64("ORACLE_CACHE_TIMEOUT_MS", c.oracle.cache_timeout_ms as u64) as i64;

        if let Some(groups) = env_json::<Vec<Vec<u32>>>("PROCESS_GROUPS") {
            c.cluster.process_groups = groups;
        }
        c.cluster.worker_restart_delay_ms =
            env_u64("WORKER_RESTART_DELAY_MS", c.cluster.worker_restart_delay_ms);
        c.cluster.max_restarts = env_u64("MAX_RESTARTS", c.cluster.max_restarts as u64) as u32;

        c.private_key = std::env::var("PRIVATE_KEY_BASE58").ok();
        if let Ok(v) = std::env::var("RPC_ENDPOINT") {
            c.rpc_endpoint = v;
        }
        if let Ok(v) = std::env::var("WEB_SERVER_URL") {
            c.web_server_url = v;
        }

        c
    }

    /// Per-market bias, falling back to `default_bias`.
    pub fn bias_for(&self, market_id: u32) -> f64 {
        self.assets
            .get(&market_id)
            .map(|a| a.bias)
            .unwrap_or(self.default_bias)
    }

    /// Checks every boot invariant in declaration order and reports the
    /// first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let err = |m: String| Err(ConfigError(m));

        if self.quantity_mode == QuantityMode::Fixed && self.fixed_size <= 0.0 {
            return err(format!("fixedSize must be > 0, got {}", self.fixed_size));
        }
        if self.quantity_mode == QuantityMode::Percentage
            && !(self.percent_per_level > 0.0 && self.percent_per_level <= 1.0)
        {
            return err(format!(
                "percentPerLevel must be in (0, 1], got {}",
                self.percent_per_level
            ));
        }
        if self.quantity_mode == QuantityMode::Tiered {
            if self.tiered_multipliers.len() < self.max_levels {
                return err(format!(
                    "tieredMultipliers needs at least maxLevels={} entries, got {}",
                    self.max_levels,
                    self.tiered_multipliers.len()
                ));
            }
            let sum: f64 = self.tiered_multipliers.iter().sum();
            if (sum - 1.0).abs() > 0.01 {
                return err(format!(
                    "tieredMultipliers must sum to 1.0 +/- 0.01, got {:.4}",
                    sum
                ));
            }
        }

        if self.spread.min <= 0.0 {
            return err(format!("spread.min must be > 0, got {}", self.spread.min));
        }
        if self.spread.max < self.spread.min {
            return err(format!(
                "spread.max {} must be >= spread.min {}",
                self.spread.max, self.spread.min
            ));
        }
        if self.spread.depth_levels == 0 {
            return err("spread.depthLevels must be a positive integer".into());
        }

        if !(self.risk.min_margin_fraction > 0.0 && self.risk.min_margin_fraction < 1.0) {
            return err(format!(
                "risk.minMarginFraction must be in (0, 1), got {}",
                self.risk.min_margin_fraction
            ));
        }
        if self.risk.max_exposure_per_side <= 0.0
            || self.risk.max_exposure_per_market <= 0.0
            || self.risk.max_total_exposure <= 0.0
        {
            return err("risk exposure limits must be positive fractions".into());
        }
        if self.risk.min_free_collateral < 0.0 {
            return err(format!(
                "risk.minFreeCollateral must be >= 0, got {}",
                self.risk.min_free_collateral
            ));
        }

        if !(1..=10).contains(&self.max_levels) {
            return err(format!("maxLevels must be in [1, 10], got {}", self.max_levels));
        }

        if self.auto_hedge.enabled
            && !(self.auto_hedge.imbalance_threshold > 0.0
                && self.auto_hedge.imbalance_threshold < 1.0)
        {
            return err(format!(
                "autoHedge.imbalanceThreshold must be in (0, 1), got {}",
                self.auto_hedge.imbalance_threshold
            ));
        }

        if !(0.0..=0.01).contains(&self.requote_threshold) {
            return err(format!(
                "requoteThreshold must be in [0, 0.01], got {}",
                self.requote_threshold
            ));
        }

        if !(-0.01..=0.01).contains(&self.default_bias) {
            return err(format!(
                "defaultBias must be in [-0.01, 0.01], got {}",
                self.default_bias
            ));
        }
        for (id, asset) in &self.assets {
            if !(-0.01..=0.01).contains(&asset.bias) {
                return err(format!(
                    "assets[{}].bias must be in [-0.01, 0.01], got {}",
                    id, asset.bias
                ));
            }
        }

        if self.oracle.enabled {
            if self.oracle.sources.is_empty() {
                return err("oracle.sources must be non-empty when oracle is enabled".into());
            }
            if self.oracle.update_interval_ms == 0 {
                return err("oracle.updateInterval must be > 0".into());
            }
            if self.oracle.cache_timeout_ms <= 0 {
                return err(format!(
                    "oracle.cacheTimeout must be > 0, got {}",
                    self.oracle.cache_timeout_ms
                ));
            }
        }

        if self.cluster.enabled() {
            let mut seen = std::collections::HashSet::new();
            for group in &self.cluster.process_groups {
                if group.is_empty() {
                    return err("cluster.processGroups must not contain empty groups".into());
                }
                for &id in group {
                    if !seen.insert(id) {
                        return err(format!(
                            "cluster.processGroups assigns market {} to more than one group",
                            id
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

// ─── Env helpers ───

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(default)
}

fn env_json<T: serde::de::DeserializeOwned>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: untouched defaults.
    /// Expected: validation passes — the baseline must always be runnable.
    #[test]
    fn test_defaults_valid() {
        assert!(Config::defaults().validate().is_ok());
    }

    /// Scenario: tiered mode with multipliers summing to 0.9 (outside 1.0 +/- 0.01).
    /// Expected: validation fails and the message names tieredMultipliers.
    #[test]
    fn test_tiered_sum_violation() {
        let mut c = Config::defaults();
        c.quantity_mode = QuantityMode::Tiered;
        c.tiered_multipliers = vec![0.4, 0.3, 0.2];
        let e = c.validate().unwrap_err();
        assert!(e.to_string().contains("tieredMultipliers"), "{}", e);
    }

    /// Scenario: tiered mode with fewer multipliers than maxLevels.
    /// Expected: validation fails on the length check before the sum check.
    #[test]
    fn test_tiered_too_short() {
        let mut c = Config::defaults();
        c.quantity_mode = QuantityMode::Tiered;
        c.max_levels = 4;
        c.tiered_multipliers = vec![0.5, 0.5];
        let e = c.validate().unwrap_err();
        assert!(e.to_string().contains("maxLevels=4"), "{}", e);
    }

    /// Scenario: maxLevels = 11, one past the allowed ceiling.
    /// Expected: validation fails citing the [1, 10] range.
    #[test]
    fn test_max_levels_range() {
        let mut c = Config::defaults();
        c.max_levels = 11;
        assert!(c.validate().unwrap_err().to_string().contains("[1, 10]"));
    }

    /// Scenario: requoteThreshold = 0.02, above the 1% hard cap.
    /// Expected: validation fails; thresholds above 0.01 would suppress
    /// requotes through meaningful price moves.
    #[test]
    fn test_requote_threshold_cap() {
        let mut c = Config::defaults();
        c.requote_threshold = 0.02;
        assert!(c.validate().is_err());
        c.requote_threshold = 0.01;
        assert!(c.validate().is_ok());
        c.requote_threshold = 0.0;
        assert!(c.validate().is_ok());
    }

    /// Scenario: a per-market bias of 0.05 (5%), far outside [-0.01, 0.01].
    /// Expected: validation fails and names the offending market id.
    #[test]
    fn test_asset_bias_range() {
        let mut c = Config::defaults();
        c.assets.insert(7, AssetConfig { bias: 0.05 });
        let e = c.validate().unwrap_err();
        assert!(e.to_string().contains("assets[7]"), "{}", e);
    }

    /// Scenario: oracle enabled with an empty source list.
    /// Expected: validation fails — an enabled oracle with nothing to query
    /// would silently disable the reference-price path.
    #[test]
    fn test_oracle_sources_required() {
        let mut c = Config::defaults();
        c.oracle.enabled = true;
        c.oracle.sources.clear();
        assert!(c.validate().is_err());
    }

    /// Scenario: market 3 assigned to two process groups.
    /// Expected: validation fails — groups must be disjoint so workers never
    /// quote the same market twice.
    #[test]
    fn test_cluster_groups_disjoint() {
        let mut c = Config::defaults();
        c.cluster.process_groups = vec![vec![1, 2, 3], vec![3, 4]];
        let e = c.validate().unwrap_err();
        assert!(e.to_string().contains("market 3"), "{}", e);
    }

    /// Scenario: bias lookup for a configured and an unconfigured market.
    /// Expected: configured market returns its own bias, everything else the
    /// default.
    #[test]
    fn test_bias_fallback() {
        let mut c = Config::defaults();
        c.default_bias = 0.001;
        c.assets.insert(2, AssetConfig { bias: -0.002 });
        assert_eq!(c.bias_for(2), -0.002);
        assert_eq!(c.bias_for(9), 0.001);
    }

    /// Scenario: unknown strings routed through the mode and source parsers.
    /// Expected: QuantityMode falls back to Fixed; OracleSource::parse
    /// returns None so bad names are dropped rather than guessed.
    #[test]
    fn test_enum_parsing() {
        assert_eq!(QuantityMode::from_str("TIERED"), QuantityMode::Tiered);
        assert_eq!(QuantityMode::from_str("bogus"), QuantityMode::Fixed);
        assert_eq!(OracleSource::parse(" bybit "), Some(OracleSource::Bybit));
        assert_eq!(OracleSource::parse("kraken"), None);
    }
}
