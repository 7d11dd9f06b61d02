use crate::config::Config;

/// Position ratios inside this band contribute no skew; small inventories
/// should not move quotes.
pub const SKEW_DEAD_ZONE: f64 = 0.05;

/// Symmetric price adjustment around a base price.
#[derive(Clone, Copy, Debug)]
pub struct ShapedQuotes {
    pub bid_price: f64,
    pub ask_price: f64,
    pub skew_factor: f64,
    pub bias: f64,
    pub position_ratio: f64,
}

/// Combines inventory skew and the per-market bias into bid/ask targets.
///
/// Sign convention: a long position (positive ratio) raises both quotes to
/// encourage sells; a short lowers both; positive bias acts like a long.
///
/// With skew disabled the bias is additive inside the half-spread terms:
/// `base * (1 - spread/2 + bias)`. With skew enabled the combined adjustment
/// multiplies the base first: `base * (1 + skew + bias)`. The asymmetry is
/// deliberate and load-bearing for metric parity.
pub fn shape(
    config: &Config,
    market_id: u32,
    base_price: f64,
    spread: f64,
    position_ratio: f64,
) -> ShapedQuotes {
    let bias = config.bias_for(market_id);
    let half = spread / 2.0;

    if !config.inventory_skew_enabled {
        return ShapedQuotes {
            bid_price: base_price * (1.0 - half + bias),
            ask_price: base_price * (1.0 + half + bias),
            skew_factor: 0.0,
            bias,
            position_ratio,
        };
    }

    let skew_factor = if position_ratio.abs() > SKEW_DEAD_ZONE {
        position_ratio * config.inventory_skew_factor
    } else {
        0.0
    };
    let adjusted_base = base_price * (1.0 + skew_factor + bias);

    ShapedQuotes {
        bid_price: adjusted_base * (1.0 - half),
        ask_price: adjusted_base * (1.0 + half),
        skew_factor,
        bias,
        position_ratio,
    }
}

/// Hedge trigger: enabled and inventory past the imbalance threshold.
pub fn needs_hedge(config: &Config, position_ratio: f64) -> bool {
    config.auto_hedge.enabled && position_ratio.abs() > config.auto_hedge.imbalance_threshold
}
