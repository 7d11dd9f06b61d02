use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::HistoricalBar;

/// Canned market shapes for synthetic runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    Illiquid,
    TrendingUp,
    TrendingDown,
    Ranging,
}

impl Scenario {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "illiquid" => Some(Scenario::Illiquid),
            "trending" | "trending-up" | "trending_up" => Some(Scenario::TrendingUp),
            "trending-down" | "trending_down" => Some(Scenario::TrendingDown),
            "ranging" => Some(Scenario::Ranging),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SimParams {
    pub steps: usize,
    pub start_price: f64,
    pub volatility: f64,
    pub trend_strength: f64,
    pub depth_min: f64,
    pub depth_max: f64,
    pub scenario: Option<Scenario>,
    pub seed: u64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            steps: 10_000,
            start_price: 100.0,
            volatility: 0.002,
            trend_strength: 0.0,
            depth_min: 20.0,
            depth_max: 100.0,
            scenario: None,
            seed: 42,
        }
    }
}

/// Generates a 1-minute bar stream ending now.
///
/// Each bar draws a standard normal via Box–Muller, walks the close by
/// `trend_strength * (U - 0.5) + volatility * z`, and pads high/low by half
/// the walk magnitude. Scenario overrides reshape the run:
///   illiquid      → depth in [0.5 * depth_min, depth_min], volatility x2
///   trending(+/-) → trend_strength pinned to +/-0.001
///   ranging       → trend_strength 0.0001, volatility 0.01
pub fn generate(params: &SimParams) -> Vec<HistoricalBar> {
    let mut volatility = params.volatility;
    let mut trend_strength = params.trend_strength;
    let (mut depth_lo, mut depth_hi) = (params.depth_min, params.depth_max);

    match params.scenario {
        Some(Scenario::Illiquid) => {
            depth_hi = depth_lo;
            depth_lo *= 0.5;
            volatility *= 2.0;
        }
        Some(Scenario::TrendingUp) => trend_strength = 0.001,
        Some(Scenario::TrendingDown) => trend_strength = -0.001,
        Some(Scenario::Ranging) => {
            trend_strength = 0.0001;
            volatility = 0.01;
        }
        None => {}
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let start_ts = chrono::Utc::now().timestamp_millis() - params.steps as i64 * 60_000;

    let mut bars = Vec::with_capacity(params.steps);
    let mut prev = params.start_price;
    for i in 0..params.steps {
        // Box-Muller from two uniforms; 1-u keeps the log argument positive.
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = rng.gen::<f64>();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();

        let drift = trend_strength * (rng.gen::<f64>() - 0.5);
        let walk = volatility * z;

        let close = prev * (1.0 + drift + walk);
        let open = prev;
        let high = close * (1.0 + walk.abs() * 0.5);
        let low = close * (1.0 - walk.abs() * 0.5);
        let volume = 1000.0 + 9000.0 * rng.gen::<f64>();

        bars.push(HistoricalBar {
            timestamp: start_ts + i as i64 * 60_000,
            open,
            high,
            low,
            close,
            volume,
            bid_depth: rng.gen_range(depth_lo..=depth_hi),
            ask_depth: rng.gen_range(depth_lo..=depth_hi),
        });
        prev = close;
    }
    bars
}
