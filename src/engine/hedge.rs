use crate::math::sizing::{round_size, DEFAULT_STEP_SIZE};
use crate::types::{FillMode, Market, OrderIntent, Position, Side};
use crate::venue::VenueClient;

/// Fraction of the position unwound per hedge. Fixed, not configurable.
pub const HEDGE_SIZE_RATIO: f64 = 0.3;

/// Builds the reduce-only market order that trims an oversized position:
/// opposite side, 30% of |size|. Returns None when flat.
pub fn hedge_intent(market: &Market, position: &Position) -> Option<OrderIntent> {
    if position.is_flat() {
        return None;
    }
    let side = if position.size > 0.0 {
        Side::Ask
    } else {
        Side::Bid
    };
    let size = round_size(
        position.size.abs() * HEDGE_SIZE_RATIO,
        market.min_size,
        DEFAULT_STEP_SIZE,
    );
    Some(OrderIntent {
        market_id: market.id,
        side,
        price: None,
        size,
        fill_mode: FillMode::Market,
        reduce_only: true,
    })
}

/// Fire-and-forget: hedging is advisory, so failures are logged and
/// swallowed rather than suppressing the quote cycle.
pub async fn execute(venue: &dyn VenueClient, market: &Market, position: &Position) {
    let intent = match hedge_intent(market, position) {
        Some(i) => i,
        None => return,
    };
    match venue.place_order(&intent).await {
        Ok(order_id) => log::info!(
            "[HEDGE] {} {} {:.4} reduce-only (order {})",
            market.symbol,
            intent.side,
            intent.size,
            order_id
        ),
        Err(e) => log::warn!("[HEDGE] {} hedge failed: {}", market.symbol, e),
    }
}
