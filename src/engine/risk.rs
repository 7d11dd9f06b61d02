use crate::config::{Config, RiskConfig};
use crate::types::{AccountInfo, Position};
use crate::venue::VenueClient;

/// Structured veto. Logged, suppresses one quote cycle, never fatal.
#[derive(Clone, Debug)]
pub struct RiskDenial {
    pub reason: &'static str,
    pub detail: String,
}

impl std::fmt::Display for RiskDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.reason, self.detail)
    }
}

/// Pre-quote exposure gate. Four ordered checks; the first violation wins.
pub struct RiskGate {
    cfg: RiskConfig,
}

impl RiskGate {
    pub fn new(config: &Config) -> Self {
        Self {
            cfg: config.risk.clone(),
        }
    }

    /// 1. margin fraction, 2. free collateral floor, 3. per-market exposure,
    /// 4. total exposure across markets.
    pub fn can_quote(
        &self,
        market_id: u32,
        account: &AccountInfo,
        margin_fraction: f64,
    ) -> Result<(), RiskDenial> {
        if margin_fraction < self.cfg.min_margin_fraction {
            return Err(RiskDenial {
                reason: "Margin fraction too low",
                detail: format!(
                    "{:.4} < required {:.4}",
                    margin_fraction, self.cfg.min_margin_fraction
                ),
            });
        }

        let available = account.balance.available;
        if available < self.cfg.min_free_collateral {
            return Err(RiskDenial {
                reason: "Free collateral below minimum",
                detail: format!("{:.2} < required {:.2}", available, self.cfg.min_free_collateral),
            });
        }

        let position = account.position(market_id);
        let market_cap = available * self.cfg.max_exposure_per_market;
        if position.notional() > market_cap {
            return Err(RiskDenial {
                reason: "Market exposure limit exceeded",
                detail: format!(
                    "market {} notional {:.2} > cap {:.2}",
                    market_id,
                    position.notional(),
                    market_cap
                ),
            });
        }

        let total = account.balance.total;
        // Zero collateral reads as zero utilization, not infinity.
        let utilization = if total > 0.0 {
            account.gross_notional() / total
        } else {
            0.0
        };
        if utilization > self.cfg.max_total_exposure {
            return Err(RiskDenial {
                reason: "Total exposure limit exceeded",
                detail: format!(
                    "utilization {:.4} > cap {:.4}",
                    utilization, self.cfg.max_total_exposure
                ),
            });
        }

        Ok(())
    }

    /// Signed exposure as a fraction of the per-market budget. Zero when
    /// flat, when there is no free collateral, or when the budget is zero.
    pub fn position_ratio(
        &self,
        position: &Position,
        reference_price: f64,
        available: f64,
    ) -> f64 {
        if position.is_flat() || available <= 0.0 {
            return 0.0;
        }
        let budget = available * self.cfg.max_exposure_per_market;
        if budget == 0.0 {
            return 0.0;
        }
        (position.size * reference_price) / budget
    }

    /// Cancel every resting order at the venue. Used on shutdown and on
    /// catastrophic failure; errors are logged and swallowed.
    pub async fn emergency_cancel_all(&self, venue: &dyn VenueClient) {
        match venue.cancel_all_orders(None).await {
            Ok(()) => log::info!("[RISK] Emergency cancel-all issued"),
            Err(e) => log::error!("[RISK] Emergency cancel-all failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Balance;

    fn account(total: f64, available: f64) -> AccountInfo {
        AccountInfo {
            balance: Balance { total, available },
            positions: Default::default(),
            open_orders: Vec::new(),
        }
    }

    fn gate() -> RiskGate {
        RiskGate::new(&Config::defaults())
    }

    /// Scenario: venue reports margin fraction 0.1 with minMarginFraction
    /// 0.18 (the leverage-too-low case).
    /// Expected: denial with reason "Margin fraction too low".
    #[test]
    fn test_margin_fraction_deny() {
        let mut config = Config::defaults();
        config.risk.min_margin_fraction = 0.18;
        let gate = RiskGate::new(&config);
        let e = gate.can_quote(0, &account(1000.0, 1000.0), 0.1).unwrap_err();
        assert_eq!(e.reason, "Margin fraction too low");
    }

    /// Scenario: available collateral 5 with minFreeCollateral 10; margin ok.
    /// Expected: the free-collateral check fires second.
    #[test]
    fn test_free_collateral_deny() {
        let e = gate().can_quote(0, &account(5.0, 5.0), 1.0).unwrap_err();
        assert_eq!(e.reason, "Free collateral below minimum");
    }

    /// Scenario: single-market notional above available * maxExposurePerMarket.
    /// Expected: per-market exposure denial naming the market.
    #[test]
    fn test_market_exposure_deny() {
        let mut acct = account(1000.0, 1000.0);
        acct.positions.insert(
            4,
            Position {
                size: 10.0,
                entry_price: 50.0, // notional 500 > 1000 * 0.3
                unrealized_pnl: 0.0,
            },
        );
        let e = gate().can_quote(4, &acct, 1.0).unwrap_err();
        assert_eq!(e.reason, "Market exposure limit exceeded");
        assert!(e.detail.contains("market 4"));
    }

    /// Scenario: two markets each inside their own cap, summing past
    /// maxTotalExposure of total collateral.
    /// Expected: the aggregate check catches what per-market checks miss.
    #[test]
    fn test_total_exposure_deny() {
        let mut acct = account(1000.0, 1000.0);
        acct.positions.insert(0, Position { size: 5.0, entry_price: 90.0, unrealized_pnl: 0.0 });
        acct.positions.insert(1, Position { size: -5.0, entry_price: 90.0, unrealized_pnl: 0.0 });
        let mut config = Config::defaults();
        config.risk.max_exposure_per_market = 0.5;
        config.risk.max_total_exposure = 0.8;
        let gate = RiskGate::new(&config);
        let e = gate.can_quote(0, &acct, 1.0).unwrap_err();
        assert_eq!(e.reason, "Total exposure limit exceeded");
    }

    /// Scenario: healthy account, no positions.
    /// Expected: quoting allowed.
    #[test]
    fn test_allow() {
        assert!(gate().can_quote(0, &account(1000.0, 800.0), 1.0).is_ok());
    }

    /// Scenario: ordered short-circuit — margin AND collateral both bad.
    /// Expected: the margin check reports first.
    #[test]
    fn test_checks_are_ordered() {
        let e = gate().can_quote(0, &account(0.0, 0.0), 0.0).unwrap_err();
        assert_eq!(e.reason, "Margin fraction too low");
    }

    /// Scenario: long 2 units at reference 100, available 1000, per-market
    /// budget fraction 0.3 (budget 300).
    /// Expected: ratio 200/300; sign follows the position sign.
    #[test]
    fn test_position_ratio_sign_and_scale() {
        let g = gate();
        let long = Position { size: 2.0, entry_price: 95.0, unrealized_pnl: 0.0 };
        let r = g.position_ratio(&long, 100.0, 1000.0);
        assert!((r - 200.0 / 300.0).abs() < 1e-12);

        let short = Position { size: -2.0, entry_price: 95.0, unrealized_pnl: 0.0 };
        assert!(g.position_ratio(&short, 100.0, 1000.0) < 0.0);
    }

    /// Scenario: flat position, and separately zero available collateral.
    /// Expected: ratio 0 in both cases — never a division blowup.
    #[test]
    fn test_position_ratio_zero_guards() {
        let g = gate();
        assert_eq!(g.position_ratio(&Position::default(), 100.0, 1000.0), 0.0);
        let long = Position { size: 2.0, entry_price: 95.0, unrealized_pnl: 0.0 };
        assert_eq!(g.position_ratio(&long, 100.0, 0.0), 0.0);
    }

    /// Scenario: |position notional| exactly at the per-market budget.
    /// Expected: |ratio| == 1 at the boundary, below 1 inside it.
    #[test]
    fn test_position_ratio_bounded_by_budget() {
        let g = gate();
        let p = Position { size: 3.0, entry_price: 100.0, unrealized_pnl: 0.0 };
        let r = g.position_ratio(&p, 100.0, 1000.0); // notional 300 == budget
        assert!((r.abs() - 1.0).abs() < 1e-12);
    }

    /// Emergency cancel-all delegates to the venue and swallows errors.
    #[tokio::test]
    async fn test_emergency_cancel_all() {
        use crate::venue::sim::SimVenue;
        let venue = SimVenue::with_default_market();
        gate().emergency_cancel_all(&venue).await;
        assert_eq!(venue.counters().cancel_all_calls, 1);
    }
}
