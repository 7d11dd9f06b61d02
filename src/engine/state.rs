use crate::types::{LastQuotePrices, Market, QuoteLadder};

/// Quote lifecycle for a subscribed market.
///
/// NoQuote → Quoting on the first successful cycle; any health/risk/size
/// failure parks the market in Suppressed (keeping `last_quote`); a later
/// successful cycle returns it to Quoting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotePhase {
    NoQuote,
    Quoting,
    Suppressed,
}

/// Everything the engine tracks per market. Created on subscription, reset
/// on unsubscribe. The venue remains authoritative for order state —
/// `current_quotes` is an optimistic cache.
pub struct MarketState {
    pub market: Market,
    pub phase: QuotePhase,
    pub last_quote: Option<LastQuotePrices>,
    pub current_quotes: Option<QuoteLadder>,
    /// Timestamp of the last orderbook event, for staleness diagnostics.
    pub last_book_ts_ms: i64,
}

impl MarketState {
    pub fn new(market: Market) -> Self {
        Self {
            market,
            phase: QuotePhase::NoQuote,
            last_quote: None,
            current_quotes: None,
            last_book_ts_ms: 0,
        }
    }

    pub fn on_quoted(&mut self, ladder: QuoteLadder, last: LastQuotePrices) {
        self.last_quote = Some(last);
        self.current_quotes = Some(ladder);
        self.phase = QuotePhase::Quoting;
    }

    pub fn on_suppressed(&mut self) {
        // last_quote survives suppression so the requote gate still has a
        // baseline when quoting resumes.
        self.phase = QuotePhase::Suppressed;
    }
}

/// Requote gate: true when either target moved by more than `threshold`
/// relative to the previous quote. The first-ever quote always passes.
pub fn requote_exceeded(
    prev: Option<&LastQuotePrices>,
    bid_price: f64,
    ask_price: f64,
    threshold: f64,
) -> bool {
    let prev = match prev {
        Some(p) => p,
        None => return true,
    };
    let bid_delta = if prev.bid > 0.0 {
        (bid_price - prev.bid).abs() / prev.bid
    } else {
        1.0
    };
    let ask_delta = if prev.ask > 0.0 {
        (ask_price - prev.ask).abs() / prev.ask
    } else {
        1.0
    };
    bid_delta > threshold || ask_delta > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prev(bid: f64, ask: f64) -> LastQuotePrices {
        LastQuotePrices { bid, ask, ts_ms: 0 }
    }

    /// First-ever quote always passes the gate.
    #[test]
    fn test_first_quote_always_passes() {
        assert!(requote_exceeded(None, 100.0, 100.1, 0.0002));
    }

    /// Threshold 0.0002 against prior bid 100.00: a move to 100.01
    /// (delta 0.0001) holds; a move to 100.03 (delta 0.0003) requotes.
    #[test]
    fn test_threshold_walkthrough() {
        let p = prev(100.0, 100.2);
        assert!(!requote_exceeded(Some(&p), 100.01, 100.21, 0.0002));
        assert!(requote_exceeded(Some(&p), 100.03, 100.21, 0.0002));
    }

    /// Either side alone moving past the threshold triggers a requote.
    #[test]
    fn test_single_side_move_triggers() {
        let p = prev(100.0, 100.2);
        assert!(requote_exceeded(Some(&p), 100.0, 100.5, 0.0002));
        assert!(requote_exceeded(Some(&p), 99.5, 100.2, 0.0002));
    }

    /// A delta exactly at the threshold does not requote (gate is strict).
    #[test]
    fn test_exact_threshold_holds() {
        let p = prev(100.0, 100.0);
        assert!(!requote_exceeded(Some(&p), 100.02, 100.02, 0.0002));
    }

    /// Zero threshold requotes on any move but not on identical prices.
    #[test]
    fn test_zero_threshold() {
        let p = prev(100.0, 100.2);
        assert!(!requote_exceeded(Some(&p), 100.0, 100.2, 0.0));
        assert!(requote_exceeded(Some(&p), 100.0000001, 100.2, 0.0));
    }

    /// Suppression keeps last_quote; a new quote restores Quoting.
    #[test]
    fn test_phase_transitions() {
        let market = Market {
            id: 0,
            symbol: "SOL-PERP".into(),
            tick_size: 0.01,
            min_size: 0.01,
            max_leverage: 10.0,
        };
        let mut state = MarketState::new(market);
        assert_eq!(state.phase, QuotePhase::NoQuote);

        state.on_quoted(
            QuoteLadder {
                market_id: 0,
                bids: vec![],
                asks: vec![],
                ts_ms: 1,
            },
            prev(100.0, 100.2),
        );
        assert_eq!(state.phase, QuotePhase::Quoting);

        state.on_suppressed();
        assert_eq!(state.phase, QuotePhase::Suppressed);
        assert!(state.last_quote.is_some());

        state.on_quoted(
            QuoteLadder {
                market_id: 0,
                bids: vec![],
                asks: vec![],
                ts_ms: 2,
            },
            prev(100.1, 100.3),
        );
        assert_eq!(state.phase, QuotePhase::Quoting);
    }
}
