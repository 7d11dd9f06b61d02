pub mod sim;
pub mod ws;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{AccountInfo, Market, OrderIntent};

/// Failure talking to the venue. Per-order failures are logged and the rest
/// of the ladder proceeds; only startup-time failures are fatal.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("venue http error: {0}")]
    Http(String),
    #[error("venue ws error: {0}")]
    Ws(String),
    #[error("venue rejected request: {0}")]
    Rejected(String),
    #[error("venue response malformed: {0}")]
    Malformed(String),
}

/// The thin seam in front of the venue SDK. Orderbook delivery is not part
/// of this trait: adapters own a feed task that pushes `EngineEvent`s into
/// the engine channel, so per-market handling stays serial by construction.
#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn get_all_markets(&self) -> Result<Vec<Market>, VenueError>;

    async fn subscribe_orderbook(&self, market_id: u32) -> Result<(), VenueError>;
    async fn unsubscribe_orderbook(&self, market_id: u32) -> Result<(), VenueError>;

    /// Refresh balances, positions, and open orders.
    async fn fetch_info(&self) -> Result<AccountInfo, VenueError>;

    /// Account margin fraction.
    async fn get_leverage(&self) -> Result<f64, VenueError>;

    /// Returns the venue-assigned order id.
    async fn place_order(&self, intent: &OrderIntent) -> Result<u64, VenueError>;

    async fn cancel_order(&self, order_id: u64) -> Result<(), VenueError>;

    /// Cancel every resting order, or only one market's when given.
    async fn cancel_all_orders(&self, market_id: Option<u32>) -> Result<(), VenueError>;
}
