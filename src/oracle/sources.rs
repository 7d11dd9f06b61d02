use crate::config::OracleSource;
use crate::oracle::OracleError;

/// Normalized best bid/offer from one exchange ticker endpoint.
#[derive(Clone, Copy, Debug)]
pub struct SourceTicker {
    pub bid: f64,
    pub ask: f64,
    pub volume_24h: f64,
}

/// Query one source for `symbol` (the base symbol, e.g. "SOL").
/// Any HTTP, status, or payload problem is a per-source failure — the
/// caller drops the source from aggregation.
pub async fn fetch(
    source: OracleSource,
    http: &reqwest::Client,
    symbol: &str,
) -> Result<SourceTicker, OracleError> {
    let symbol = symbol.to_uppercase();
    let url = match source {
        OracleSource::Binance => format!(
            "https://api.binance.com/api/v3/ticker/bookTicker?symbol={}USDT",
            symbol
        ),
        OracleSource::Bybit => format!(
            "https://api.bybit.com/v5/market/tickers?category=linear&symbol={}USDT",
            symbol
        ),
        OracleSource::Coinbase => format!(
            "https://api.exchange.coinbase.com/products/{}-USD/ticker",
            symbol
        ),
    };

    let resp = http
        .get(&url)
        .send()
        .await
        .map_err(|e| OracleError::Http(source.name(), e.to_string()))?;
    if !resp.status().is_success() {
        return Err(OracleError::Http(source.name(), resp.status().to_string()));
    }
    let v: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| OracleError::Malformed(source.name(), e.to_string()))?;

    let ticker = match source {
        OracleSource::Binance => parse_binance(&v),
        OracleSource::Bybit => parse_bybit(&v),
        OracleSource::Coinbase => parse_coinbase(&v),
    };
    ticker.ok_or_else(|| OracleError::Malformed(source.name(), "missing ticker fields".into()))
}

/// Exchanges ship numbers as JSON strings; accept either encoding.
fn num(v: Option<&serde_json::Value>) -> Option<f64> {
    let v = v?;
    v.as_f64().or_else(|| v.as_str()?.parse().ok())
}

pub fn parse_binance(v: &serde_json::Value) -> Option<SourceTicker> {
    let bid = num(v.get("bidPrice"))?;
    let ask = num(v.get("askPrice"))?;
    if bid <= 0.0 || ask <= 0.0 {
        return None;
    }
    // bookTicker carries no volume
    Some(SourceTicker {
        bid,
        ask,
        volume_24h: 0.0,
    })
}

pub fn parse_bybit(v: &serde_json::Value) -> Option<SourceTicker> {
    let row = v.get("result")?.get("list")?.as_array()?.first()?;
    let bid = num(row.get("bid1Price"))?;
    let ask = num(row.get("ask1Price"))?;
    if bid <= 0.0 || ask <= 0.0 {
        return None;
    }
    Some(SourceTicker {
        bid,
        ask,
        volume_24h: num(row.get("volume24h")).unwrap_or(0.0),
    })
}

pub fn parse_coinbase(v: &serde_json::Value) -> Option<SourceTicker> {
    let bid = num(v.get("bid"))?;
    let ask = num(v.get("ask"))?;
    if bid <= 0.0 || ask <= 0.0 {
        return None;
    }
    Some(SourceTicker {
        bid,
        ask,
        volume_24h: num(v.get("volume")).unwrap_or(0.0),
    })
}
