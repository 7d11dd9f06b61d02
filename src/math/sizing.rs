use crate::config::{Config, QuantityMode};

/// Default size granularity when the venue does not dictate one.
pub const DEFAULT_STEP_SIZE: f64 = 0.01;

/// Produces the per-level size ladder for one quote cycle.
///
/// Returns `max_levels` entries, or an empty ladder when there is no free
/// collateral (the cycle is then suppressed upstream).
pub fn level_sizes(config: &Config, available: f64) -> Vec<f64> {
    if available <= 0.0 {
        return Vec::new();
    }

    match config.quantity_mode {
        QuantityMode::Fixed => vec![config.fixed_size; config.max_levels],
        QuantityMode::Percentage => {
            vec![available * config.percent_per_level; config.max_levels]
        }
        QuantityMode::Tiered => {
            let budget = available * config.risk.max_exposure_per_market;
            (0..config.max_levels)
                .map(|i| {
                    // Multipliers past the configured list contribute nothing.
                    budget * config.tiered_multipliers.get(i).copied().unwrap_or(0.0)
                })
                .collect()
        }
    }
}

/// Venue-safe size: floors to the step grid, never below the market minimum.
pub fn round_size(size: f64, min_size: f64, step_size: f64) -> f64 {
    if size < min_size {
        return min_size;
    }
    (size / step_size).floor() * step_size
}

/// Caps the whole ladder's notional at the per-side exposure budget.
/// An invalid ladder suppresses the quote cycle.
pub fn validate_sizes(config: &Config, levels: &[f64], available: f64, mid: f64) -> bool {
    let notional: f64 = levels.iter().map(|s| s * mid).sum();
    notional <= available * config.risk.max_exposure_per_side
}
