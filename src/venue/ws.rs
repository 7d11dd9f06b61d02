use std::collections::HashSet;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::config::Config;
use crate::types::{
    AccountInfo, Balance, EngineEvent, FillMode, Market, OrderIntent, OrderbookSnapshot, Position,
    RestingOrder, Side,
};
use crate::venue::{VenueClient, VenueError};

/// Subscription control for the feed task, which owns the socket.
#[derive(Clone, Copy, Debug)]
pub enum SubCmd {
    Subscribe(u32),
    Unsubscribe(u32),
}

/// Live venue adapter: account and order operations over the venue's HTTPS
/// endpoint, orderbook delivery over its WS endpoint (see `orderbook_feed`).
pub struct LiveVenue {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    sub_tx: mpsc::UnboundedSender<SubCmd>,
}

impl LiveVenue {
    /// Returns the adapter plus the control receiver the feed task consumes.
    pub fn new(config: &Config) -> Result<(Self, mpsc::UnboundedReceiver<SubCmd>), VenueError> {
        let api_key = config
            .private_key
            .clone()
            .ok_or_else(|| VenueError::Rejected("PRIVATE_KEY_BASE58 is not set".into()))?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| VenueError::Http(e.to_string()))?;
        let (sub_tx, sub_rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                http,
                api_base: api_base_from_ws(&config.web_server_url),
                api_key,
                sub_tx,
            },
            sub_rx,
        ))
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value, VenueError> {
        let url = format!("{}{}", self.api_base, path);
        let resp = self
            .http
            .get(&url)
            .header("authorization", &self.api_key)
            .send()
            .await
            .map_err(|e| VenueError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VenueError::Rejected(format!(
                "{} -> {}",
                path,
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| VenueError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl VenueClient for LiveVenue {
    async fn get_all_markets(&self) -> Result<Vec<Market>, VenueError> {
        let v = self.get_json("/markets").await?;
        parse_markets(&v).ok_or_else(|| VenueError::Malformed("markets payload".into()))
    }

    async fn subscribe_orderbook(&self, market_id: u32) -> Result<(), VenueError> {
        self.sub_tx
            .send(SubCmd::Subscribe(market_id))
            .map_err(|_| VenueError::Ws("feed task is gone".into()))
    }

    async fn unsubscribe_orderbook(&self, market_id: u32) -> Result<(), VenueError> {
        self.sub_tx
            .send(SubCmd::Unsubscribe(market_id))
            .map_err(|_| VenueError::Ws("feed task is gone".into()))
    }

    async fn fetch_info(&self) -> Result<AccountInfo, VenueError> {
        let v = self.get_json("/account").await?;
        parse_account(&v).ok_or_else(|| VenueError::Malformed("account payload".into()))
    }

    async fn get_leverage(&self) -> Result<f64, VenueError> {
        let v = self.get_json("/account/leverage").await?;
        v.get("leverage")
            .and_then(|l| l.as_f64())
            .ok_or_else(|| VenueError::Malformed("leverage payload".into()))
    }

    async fn place_order(&self, intent: &OrderIntent) -> Result<u64, VenueError> {
        let body = serde_json::json!({
            "market": intent.market_id,
            "side": match intent.side { Side::Bid => "bid", Side::Ask => "ask" },
            "fillMode": match intent.fill_mode {
                FillMode::Limit => "limit",
                FillMode::Market => "market",
                FillMode::Ioc => "ioc",
                FillMode::Fok => "fok",
            },
            "reduceOnly": intent.reduce_only,
            "size": intent.size,
            "price": intent.price,
        });
        let url = format!("{}/orders", self.api_base);
        let resp = self
            .http
            .post(&url)
            .header("authorization", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VenueError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VenueError::Rejected(format!("place -> {}", resp.status())));
        }
        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| VenueError::Malformed(e.to_string()))?;
        v.get("orderId")
            .and_then(|id| id.as_u64())
            .ok_or_else(|| VenueError::Malformed("order id missing".into()))
    }

    async fn cancel_order(&self, order_id: u64) -> Result<(), VenueError> {
        let url = format!("{}/orders/{}", self.api_base, order_id);
        let resp = self
            .http
            .delete(&url)
            .header("authorization", &self.api_key)
            .send()
            .await
            .map_err(|e| VenueError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VenueError::Rejected(format!("cancel -> {}", resp.status())));
        }
        Ok(())
    }

    async fn cancel_all_orders(&self, market_id: Option<u32>) -> Result<(), VenueError> {
        let url = match market_id {
            Some(id) => format!("{}/orders?market={}", self.api_base, id),
            None => format!("{}/orders", self.api_base),
        };
        let resp = self
            .http
            .delete(&url)
            .header("authorization", &self.api_key)
            .send()
            .await
            .map_err(|e| VenueError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VenueError::Rejected(format!(
                "cancel_all -> {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

// ─── Orderbook feed ───

/// Pure producer: connects to the venue WS, keeps the subscription set across
/// reconnects, parses book snapshots into engine events. Owns no shared
/// state — only the sender and the control receiver.
pub async fn orderbook_feed(
    feed_tx: mpsc::Sender<EngineEvent>,
    ws_url: String,
    mut sub_rx: mpsc::UnboundedReceiver<SubCmd>,
) {
    let mut subscribed: HashSet<u32> = HashSet::new();
    let mut backoff_ms: u64 = 1000;

    loop {
        log::info!("[VENUE] Connecting to {}", ws_url);
        let ws = match connect_async(&ws_url).await {
            Ok((ws, _)) => {
                log::info!("[VENUE] Connected");
                backoff_ms = 1000;
                ws
            }
            Err(e) => {
                log::warn!(
                    "[VENUE] Connection failed: {}, retrying in {}ms",
                    e,
                    backoff_ms
                );
                tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(10_000);
                continue;
            }
        };

        let (mut write, mut read) = ws.split();

        // Replay the subscription set after every (re)connect.
        for &id in &subscribed {
            if let Err(e) = write.send(Message::Text(sub_frame(id, true))).await {
                log::warn!("[VENUE] Resubscribe {} failed: {}", id, e);
            }
        }

        let mut ping_interval = tokio::time::interval(tokio::time::Duration::from_secs(10));

        loop {
            tokio::select! {
                cmd = sub_rx.recv() => {
                    let cmd = match cmd {
                        Some(c) => c,
                        None => {
                            log::info!("[VENUE] Control channel closed, feed exiting");
                            return;
                        }
                    };
                    let (id, on) = match cmd {
                        SubCmd::Subscribe(id) => { subscribed.insert(id); (id, true) }
                        SubCmd::Unsubscribe(id) => { subscribed.remove(&id); (id, false) }
                    };
                    if let Err(e) = write.send(Message::Text(sub_frame(id, on))).await {
                        log::warn!("[VENUE] Subscription frame failed: {}, reconnecting", e);
                        break;
                    }
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            log::warn!("[VENUE] WS error: {}, reconnecting", e);
                            break;
                        }
                        None => {
                            log::warn!("[VENUE] Stream ended, reconnecting");
                            break;
                        }
                    };
                    if let Message::Text(text) = msg {
                        if let Some(book) = parse_book_message(&text) {
                            if feed_tx.send(EngineEvent::Orderbook(book)).await.is_err() {
                                log::info!("[VENUE] Engine channel closed, feed exiting");
                                return;
                            }
                        }
                    }
                }
                _ = ping_interval.tick() => {
                    let _ = write.send(Message::Ping(vec![])).await;
                }
            }
        }

        log::warn!("[VENUE] Disconnected, reconnecting in {}ms", backoff_ms);
        tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(10_000);
    }
}

fn sub_frame(market_id: u32, subscribe: bool) -> String {
    serde_json::json!({
        "op": if subscribe { "subscribe" } else { "unsubscribe" },
        "channel": "orderbook",
        "market": market_id,
    })
    .to_string()
}

// ─── Payload parsing ───

/// `wss://host/ws` → `https://host`; plain `ws://` maps to `http://`.
pub fn api_base_from_ws(ws_url: &str) -> String {
    let stripped = ws_url.trim_end_matches("/ws");
    if let Some(rest) = stripped.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = stripped.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else {
        stripped.to_string()
    }
}

fn parse_levels(v: Option<&serde_json::Value>) -> Vec<(f64, f64)> {
    v.and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|lvl| {
                    let pair = lvl.as_array()?;
                    Some((pair.first()?.as_f64()?, pair.get(1)?.as_f64()?))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_book_message(text: &str) -> Option<OrderbookSnapshot> {
    let v: serde_json::Value = serde_json::from_str(text).ok()?;
    if v.get("type").and_then(|t| t.as_str()) != Some("orderbook") {
        return None;
    }
    let market_id = v.get("market").and_then(|m| m.as_u64())? as u32;
    let ts_ms = v
        .get("ts")
        .and_then(|t| t.as_i64())
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    let mut book = OrderbookSnapshot {
        market_id,
        ts_ms,
        bids: parse_levels(v.get("bids")),
        asks: parse_levels(v.get("asks")),
    };
    book.sort_levels();
    Some(book)
}

fn parse_markets(v: &serde_json::Value) -> Option<Vec<Market>> {
    let arr = v.as_array()?;
    let mut out = Vec::with_capacity(arr.len());
    for m in arr {
        out.push(Market {
            id: m.get("id")?.as_u64()? as u32,
            symbol: m.get("symbol")?.as_str()?.to_string(),
            tick_size: m.get("tickSize")?.as_f64()?,
            min_size: m.get("minSize")?.as_f64()?,
            max_leverage: m.get("maxLeverage").and_then(|l| l.as_f64()).unwrap_or(1.0),
        });
    }
    Some(out)
}

fn parse_account(v: &serde_json::Value) -> Option<AccountInfo> {
    let balance = v.get("balance")?;
    let mut info = AccountInfo {
        balance: Balance {
            total: balance.get("total")?.as_f64()?,
            available: balance.get("available")?.as_f64()?,
        },
        positions: Default::default(),
        open_orders: Vec::new(),
    };

    if let Some(positions) = v.get("positions").and_then(|p| p.as_array()) {
        for p in positions {
            let market_id = match p.get("market").and_then(|m| m.as_u64()) {
                Some(id) => id as u32,
                None => continue,
            };
            info.positions.insert(
                market_id,
                Position {
                    size: p.get("size").and_then(|s| s.as_f64()).unwrap_or(0.0),
                    entry_price: p.get("entryPrice").and_then(|e| e.as_f64()).unwrap_or(0.0),
                    unrealized_pnl: p
                        .get("unrealizedPnl")
                        .and_then(|u| u.as_f64())
                        .unwrap_or(0.0),
                },
            );
        }
    }

    if let Some(orders) = v.get("orders").and_then(|o| o.as_array()) {
        for o in orders {
            let (id, market_id) = match (
                o.get("id").and_then(|i| i.as_u64()),
                o.get("market").and_then(|m| m.as_u64()),
            ) {
                (Some(id), Some(m)) => (id, m as u32),
                _ => continue,
            };
            info.open_orders.push(RestingOrder {
                id,
                market_id,
                side: if o.get("side").and_then(|s| s.as_str()) == Some("ask") {
                    Side::Ask
                } else {
                    Side::Bid
                },
                price: o.get("price").and_then(|p| p.as_f64()).unwrap_or(0.0),
                size: o.get("size").and_then(|s| s.as_f64()).unwrap_or(0.0),
                placed_ts_ms: o.get("placedAt").and_then(|t| t.as_i64()).unwrap_or(0),
                filled: false,
                fill_price: 0.0,
                fill_ts_ms: 0,
            });
        }
    }

    Some(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// WS URLs map to the sibling HTTPS API base.
    #[test]
    fn test_api_base_from_ws() {
        assert_eq!(
            api_base_from_ws("wss://quote.venue.exchange/ws"),
            "https://quote.venue.exchange"
        );
        assert_eq!(api_base_from_ws("ws://localhost:9000/ws"), "http://localhost:9000");
    }

    /// A book frame parses into a sorted snapshot; non-book frames are dropped.
    #[test]
    fn test_parse_book_message() {
        let text = r#"{"type":"orderbook","market":3,"ts":1700000000000,
            "bids":[[99.8,5.0],[99.9,10.0]],"asks":[[100.2,4.0],[100.1,8.0]]}"#;
        let book = parse_book_message(text).unwrap();
        assert_eq!(book.market_id, 3);
        assert_eq!(book.best_bid(), Some(99.9));
        assert_eq!(book.best_ask(), Some(100.1));

        assert!(parse_book_message(r#"{"type":"trade","market":3}"#).is_none());
        assert!(parse_book_message("not json").is_none());
    }

    /// Account payload parses balances, positions, and open orders; rows with
    /// missing ids are skipped instead of failing the whole snapshot.
    #[test]
    fn test_parse_account() {
        let v: serde_json::Value = serde_json::from_str(
            r#"{
                "balance": {"total": 1000.0, "available": 800.0},
                "positions": [
                    {"market": 1, "size": -2.5, "entryPrice": 101.0, "unrealizedPnl": 3.0},
                    {"size": 9.0}
                ],
                "orders": [
                    {"id": 11, "market": 1, "side": "ask", "price": 102.0, "size": 1.0, "placedAt": 5}
                ]
            }"#,
        )
        .unwrap();
        let info = parse_account(&v).unwrap();
        assert_eq!(info.balance.available, 800.0);
        assert_eq!(info.positions.len(), 1);
        assert_eq!(info.position(1).size, -2.5);
        assert_eq!(info.open_orders.len(), 1);
        assert_eq!(info.open_orders[0].side, Side::Ask);
    }

    /// Markets payload parses; maxLeverage defaults to 1 when omitted.
    #[test]
    fn test_parse_markets() {
        let v: serde_json::Value = serde_json::from_str(
            r#"[{"id": 0, "symbol": "SOL-PERP", "tickSize": 0.01, "minSize": 0.1}]"#,
        )
        .unwrap();
        let markets = parse_markets(&v).unwrap();
        assert_eq!(markets[0].symbol, "SOL-PERP");
        assert_eq!(markets[0].max_leverage, 1.0);
    }
}
