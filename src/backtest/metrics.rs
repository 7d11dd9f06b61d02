use serde::{Deserialize, Serialize};

use crate::types::{RestingOrder, Side};

/// One point of the equity curve (balance + mark-to-market).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub equity: f64,
}

/// Aggregate performance of one backtest run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub total_pnl: f64,
    pub total_volume: f64,
    pub num_trades: u32,
    pub num_wins: u32,
    pub num_losses: u32,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    /// Fraction of peak equity.
    pub max_drawdown: f64,
    pub avg_spread: f64,
    pub fill_rate: f64,
    pub start_balance: f64,
    pub end_balance: f64,
    // Supplementary risk metrics
    pub avg_drawdown: f64,
    pub max_drawdown_duration_bars: u32,
    pub calmar_ratio: f64,
    pub avg_realized_spread: f64,
    // Win/loss statistics
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64,
}

/// Builds the result set from the run's raw series.
///
/// Round trips pair consecutive fills of opposite side: the earlier fill's
/// size is the closed quantity, so a bid at 99.9 followed by an ask at 100.1
/// realizes `size * 0.2`. Sharpe uses per-bar equity returns with the
/// sqrt(252) annualization convention.
pub fn compute(
    fills: &[RestingOrder],
    equity: &[EquityPoint],
    orders_placed: u32,
    avg_spread: f64,
    start_balance: f64,
    end_balance: f64,
) -> BacktestResult {
    // ── Round trips ──
    let mut trade_pnls: Vec<f64> = Vec::new();
    let mut realized_spreads: Vec<f64> = Vec::new();
    for pair in fills.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        if prev.side == curr.side {
            continue;
        }
        let qty = prev.size;
        let pnl = match prev.side {
            Side::Bid => qty * (curr.fill_price - prev.fill_price),
            Side::Ask => qty * (prev.fill_price - curr.fill_price),
        };
        trade_pnls.push(pnl);
        if prev.fill_price > 0.0 {
            realized_spreads.push((curr.fill_price - prev.fill_price).abs() / prev.fill_price);
        }
    }

    let num_trades = trade_pnls.len() as u32;
    let num_wins = trade_pnls.iter().filter(|&&p| p > 0.0).count() as u32;
    let num_losses = num_trades - num_wins;
    let win_rate = if num_trades > 0 {
        num_wins as f64 / num_trades as f64
    } else {
        0.0
    };

    // ── Equity-curve statistics ──
    let mut returns: Vec<f64> = Vec::with_capacity(equity.len().saturating_sub(1));
    for pair in equity.windows(2) {
        if pair[0].equity != 0.0 {
            returns.push((pair[1].equity - pair[0].equity) / pair[0].equity);
        }
    }
    let sharpe_ratio = sharpe(&returns);

    let (max_drawdown, avg_drawdown, max_drawdown_duration_bars) = drawdowns(equity);

    let final_equity = equity.last().map(|p| p.equity).unwrap_or(end_balance);
    let total_pnl = final_equity - start_balance;
    let total_return = if start_balance > 0.0 {
        total_pnl / start_balance
    } else {
        0.0
    };
    let calmar_ratio = if max_drawdown > 0.0 {
        total_return / max_drawdown
    } else {
        0.0
    };

    // ── Win/loss statistics ──
    let wins_sum: f64 = trade_pnls.iter().filter(|&&p| p > 0.0).sum();
    let losses_sum: f64 = trade_pnls.iter().filter(|&&p| p < 0.0).map(|p| p.abs()).sum();
    let avg_win = if num_wins > 0 {
        wins_sum / num_wins as f64
    } else {
        0.0
    };
    let avg_loss = if num_losses > 0 {
        losses_sum / num_losses as f64
    } else {
        0.0
    };
    let largest_win = trade_pnls.iter().cloned().fold(0.0, f64::max);
    let largest_loss = trade_pnls.iter().map(|p| -p).fold(0.0, f64::max);
    let profit_factor = if losses_sum > 0.0 {
        wins_sum / losses_sum
    } else {
        0.0
    };

    BacktestResult {
        total_pnl,
        total_volume: fills.iter().map(|f| f.size * f.fill_price).sum(),
        num_trades,
        num_wins,
        num_losses,
        win_rate,
        sharpe_ratio,
        max_drawdown,
        avg_spread,
        fill_rate: if orders_placed > 0 {
            fills.len() as f64 / orders_placed as f64
        } else {
            0.0
        },
        start_balance,
        end_balance,
        avg_drawdown,
        max_drawdown_duration_bars,
        calmar_ratio,
        avg_realized_spread: if realized_spreads.is_empty() {
            0.0
        } else {
            realized_spreads.iter().sum::<f64>() / realized_spreads.len() as f64
        },
        avg_win,
        avg_loss,
        largest_win,
        largest_loss,
        profit_factor,
    }
}

/// Annualized per-bar Sharpe: mean/stddev * sqrt(252); 0 when flat.
fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    if std_dev > 0.0 {
        mean / std_dev * 252f64.sqrt()
    } else {
        0.0
    }
}

/// (max drawdown, average over completed drawdown intervals, longest
/// drawdown duration in bars). A drawdown interval completes when equity
/// recovers to its prior peak; a trailing unrecovered interval counts toward
/// duration but not toward the average.
fn drawdowns(equity: &[EquityPoint]) -> (f64, f64, u32) {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0f64;
    let mut interval_max = 0.0f64;
    let mut in_drawdown = false;
    let mut completed: Vec<f64> = Vec::new();
    let mut duration = 0u32;
    let mut max_duration = 0u32;

    for point in equity {
        let e = point.equity;
        if e >= peak {
            if in_drawdown {
                completed.push(interval_max);
                interval_max = 0.0;
                in_drawdown = false;
            }
            peak = e;
            duration = 0;
            continue;
        }
        in_drawdown = true;
        duration += 1;
        max_duration = max_duration.max(duration);
        if peak > 0.0 {
            let dd = (peak - e) / peak;
            max_dd = max_dd.max(dd);
            interval_max = interval_max.max(dd);
        }
    }

    let avg_dd = if completed.is_empty() {
        0.0
    } else {
        completed.iter().sum::<f64>() / completed.len() as f64
    };
    (max_dd, avg_dd, max_duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(side: Side, price: f64, size: f64, ts: i64) -> RestingOrder {
        RestingOrder {
            id: 0,
            market_id: 0,
            side,
            price,
            size,
            placed_ts_ms: ts,
            filled: true,
            fill_price: price,
            fill_ts_ms: ts,
        }
    }

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                timestamp: i as i64 * 60_000,
                equity,
            })
            .collect()
    }

    /// Scenario: a filled bid at 99.9 immediately followed by a filled ask
    /// of equal size at 100.1.
    /// Expected: exactly one round trip with pnl = 0.1 * (100.1 - 99.9).
    #[test]
    fn test_round_trip_pnl_exact() {
        let fills = vec![fill(Side::Bid, 99.9, 0.1, 1), fill(Side::Ask, 100.1, 0.1, 2)];
        let r = compute(&fills, &curve(&[10_000.0, 10_000.02]), 2, 0.002, 10_000.0, 10_000.02);
        assert_eq!(r.num_trades, 1);
        assert_eq!(r.num_wins, 1);
        assert!((r.total_pnl - 0.02).abs() < 1e-9);
        let expected = 0.1 * (100.1 - 99.9);
        assert!((r.avg_win - expected).abs() < 1e-9);
    }

    /// Scenario: ask filled first, bought back lower (short round trip).
    /// Expected: positive pnl = size * (sell - buy).
    #[test]
    fn test_short_round_trip() {
        let fills = vec![fill(Side::Ask, 100.1, 0.5, 1), fill(Side::Bid, 99.9, 0.5, 2)];
        let r = compute(&fills, &curve(&[10_000.0]), 2, 0.0, 10_000.0, 10_000.1);
        assert_eq!(r.num_trades, 1);
        assert!((r.avg_win - 0.1).abs() < 1e-9);
    }

    /// Scenario: consecutive same-side fills.
    /// Expected: no round trip is counted between them.
    #[test]
    fn test_same_side_fills_no_trade() {
        let fills = vec![fill(Side::Bid, 99.9, 0.1, 1), fill(Side::Bid, 99.8, 0.1, 2)];
        let r = compute(&fills, &curve(&[10_000.0]), 2, 0.0, 10_000.0, 10_000.0);
        assert_eq!(r.num_trades, 0);
        assert_eq!(r.win_rate, 0.0);
    }

    /// Scenario: constant equity curve.
    /// Expected: Sharpe exactly 0 — zero variance must not divide.
    #[test]
    fn test_constant_equity_sharpe_zero() {
        let r = compute(&[], &curve(&[10_000.0; 50]), 0, 0.0, 10_000.0, 10_000.0);
        assert_eq!(r.sharpe_ratio, 0.0);
        assert_eq!(r.max_drawdown, 0.0);
    }

    /// Scenario: equity 100 → 110 → 99 → 110 → 121.
    /// Expected: max drawdown (110-99)/110; one completed interval so the
    /// average equals the max; duration 1 bar.
    #[test]
    fn test_drawdown_accounting() {
        let r = compute(
            &[],
            &curve(&[100.0, 110.0, 99.0, 110.0, 121.0]),
            0,
            0.0,
            100.0,
            121.0,
        );
        let expected = (110.0 - 99.0) / 110.0;
        assert!((r.max_drawdown - expected).abs() < 1e-12);
        assert!((r.avg_drawdown - expected).abs() < 1e-12);
        assert_eq!(r.max_drawdown_duration_bars, 1);
        assert!(r.calmar_ratio > 0.0);
    }

    /// Scenario: two drawdown intervals of different depth, the second never
    /// recovered.
    /// Expected: the average covers only the completed interval; the trailing
    /// interval still extends the duration.
    #[test]
    fn test_unrecovered_drawdown_excluded_from_avg() {
        let r = compute(
            &[],
            &curve(&[100.0, 90.0, 100.0, 100.0, 80.0, 85.0]),
            0,
            0.0,
            100.0,
            85.0,
        );
        assert!((r.avg_drawdown - 0.1).abs() < 1e-12);
        assert!((r.max_drawdown - 0.2).abs() < 1e-12);
        assert_eq!(r.max_drawdown_duration_bars, 2);
    }

    /// Scenario: 3 fills out of 12 placements.
    /// Expected: fill rate 0.25; volume sums size * fill price.
    #[test]
    fn test_fill_rate_and_volume() {
        let fills = vec![
            fill(Side::Bid, 100.0, 1.0, 1),
            fill(Side::Ask, 101.0, 1.0, 2),
            fill(Side::Bid, 100.5, 1.0, 3),
        ];
        let r = compute(&fills, &curve(&[10_000.0]), 12, 0.0, 10_000.0, 10_000.0);
        assert!((r.fill_rate - 0.25).abs() < 1e-12);
        assert!((r.total_volume - 301.5).abs() < 1e-9);
    }

    /// Scenario: one winning and one losing round trip (B, A, B with a
    /// higher re-entry).
    /// Expected: both consecutive opposite-side pairs count; profit factor
    /// is wins over absolute losses.
    #[test]
    fn test_profit_factor() {
        let fills = vec![
            fill(Side::Bid, 100.0, 1.0, 1),
            fill(Side::Ask, 102.0, 1.0, 2), // +2
            fill(Side::Bid, 103.0, 1.0, 3), // ask->bid: 1*(102-103) = -1
        ];
        let r = compute(&fills, &curve(&[10_000.0]), 3, 0.0, 10_000.0, 10_001.0);
        assert_eq!(r.num_trades, 2);
        assert_eq!(r.num_wins, 1);
        assert_eq!(r.num_losses, 1);
        assert!((r.profit_factor - 2.0).abs() < 1e-12);
        assert!((r.largest_win - 2.0).abs() < 1e-12);
        assert!((r.largest_loss - 1.0).abs() < 1e-12);
    }

    /// Scenario: rising equity with dips, sanity on the Sharpe sign.
    /// Expected: positive mean return gives a positive annualized Sharpe.
    #[test]
    fn test_sharpe_sign() {
        let r = compute(
            &[],
            &curve(&[100.0, 101.0, 100.5, 102.0, 103.0]),
            0,
            0.0,
            100.0,
            103.0,
        );
        assert!(r.sharpe_ratio > 0.0);
    }
}
