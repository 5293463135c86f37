//! Binance spot REST client
//!
//! Covers the handful of endpoints the bot needs: ticker price, hourly
//! klines, exchange filters, account balances and market orders.
//! Private endpoints are signed with HMAC-SHA256 over the query string.

use super::errors::ExchangeError;
use super::{AccountSource, MarketData, OrderGateway};
use crate::config::Config;
use crate::types::{AccountSnapshot, OrderFill, OrderSide, SymbolRules, TradingPair};
use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

type HmacSha256 = Hmac<Sha256>;

/// Binance production REST endpoint
pub const BINANCE_BASE_URL: &str = "https://api.binance.com";

/// Server-side tolerance for request timestamps, in milliseconds
const RECV_WINDOW_MS: u64 = 5000;

/// How the reference price is derived from hourly klines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceMode {
    /// Volume-weighted average over the lookback window
    Vwap,
    /// Open price of the candle `lookback` hours ago
    LookbackOpen,
}

impl FromStr for ReferenceMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "vwap" => Ok(ReferenceMode::Vwap),
            "lookback_open" | "open" => Ok(ReferenceMode::LookbackOpen),
            other => anyhow::bail!("Unknown REFERENCE_MODE '{}' (expected vwap or lookback_open)", other),
        }
    }
}

struct Credentials {
    api_key: String,
    api_secret: String,
}

/// Binance REST client
pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    reference_mode: ReferenceMode,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    filters: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    locked: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    #[serde(with = "rust_decimal::serde::str")]
    executed_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    cummulative_quote_qty: Decimal,
}

impl BinanceClient {
    pub fn new(config: &Config) -> Result<Self> {
        let credentials = match (&config.api_key, &config.api_secret) {
            (Some(key), Some(secret)) => Some((key.clone(), secret.clone())),
            _ => None,
        };
        Self::with_base_url(&config.binance_base_url, credentials, config.reference_mode)
    }

    pub fn with_base_url(
        base_url: &str,
        credentials: Option<(String, String)>,
        reference_mode: ReferenceMode,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: credentials.map(|(api_key, api_secret)| Credentials { api_key, api_secret }),
            reference_mode,
        })
    }

    /// Connectivity check against the exchange
    pub async fn ping(&self) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self.public_get("/api/v3/ping", &[]).await?;
        Ok(())
    }

    /// Verify the API key works by fetching the account; used at startup
    pub async fn verify_credentials(&self) -> Result<(), ExchangeError> {
        let _: AccountInfo = self.signed_request(Method::GET, "/api/v3/account", Vec::new()).await?;
        info!("[Binance] API credentials verified");
        Ok(())
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = if params.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, build_query(params))
        };
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::from_network_error(&e))?;

        decode(response).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<T, ExchangeError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            ExchangeError::Authentication("BINANCE_API_KEY/BINANCE_API_SECRET not configured".to_string())
        })?;

        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", chrono::Utc::now().timestamp_millis().to_string()));

        let query = build_query(&params);
        let signature = sign(&credentials.api_secret, &query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
        debug!("{} {}{} (signed)", method, self.base_url, path);

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &credentials.api_key)
            .send()
            .await
            .map_err(|e| ExchangeError::from_network_error(&e))?;

        decode(response).await
    }

    async fn balances(&self) -> Result<Vec<BalanceEntry>, ExchangeError> {
        let account: AccountInfo = self.signed_request(Method::GET, "/api/v3/account", Vec::new()).await?;
        Ok(account.balances)
    }
}

impl MarketData for BinanceClient {
    async fn current_price(&self, pair: &TradingPair) -> Result<Decimal, ExchangeError> {
        let ticker: TickerPrice = self
            .public_get("/api/v3/ticker/price", &[("symbol", pair.symbol())])
            .await?;
        Ok(ticker.price)
    }

    async fn reference_price(&self, pair: &TradingPair, lookback_hours: u32) -> Result<Decimal, ExchangeError> {
        let lookback = lookback_hours.max(1);
        let klines: Vec<Vec<serde_json::Value>> = self
            .public_get(
                "/api/v3/klines",
                &[
                    ("symbol", pair.symbol()),
                    ("interval", "1h".to_string()),
                    ("limit", (lookback + 1).to_string()),
                ],
            )
            .await?;

        let candles = klines
            .iter()
            .map(|k| Candle::from_raw(k))
            .collect::<Result<Vec<_>, _>>()?;

        reference_from_candles(&candles, lookback as usize, self.reference_mode)
    }
}

impl OrderGateway for BinanceClient {
    async fn place_market_order(
        &self,
        pair: &TradingPair,
        side: OrderSide,
        quote_amount: Decimal,
    ) -> Result<OrderFill, ExchangeError> {
        let params = vec![
            ("symbol", pair.symbol()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quoteOrderQty", quote_amount.round_dp(2).to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ];

        let response: OrderResponse = self.signed_request(Method::POST, "/api/v3/order", params).await?;
        info!(
            "[Binance] {} {} filled: {} {} for {} {}",
            side, pair, response.executed_qty, pair.base, response.cummulative_quote_qty, pair.quote
        );

        Ok(OrderFill {
            order_id: response.order_id.to_string(),
            filled_quantity: response.executed_qty,
            quote_amount: response.cummulative_quote_qty,
        })
    }

    async fn symbol_rules(&self, pair: &TradingPair) -> Result<SymbolRules, ExchangeError> {
        let symbol = pair.symbol();
        let info: ExchangeInfo = self
            .public_get("/api/v3/exchangeInfo", &[("symbol", symbol.clone())])
            .await?;

        let min_notional = info
            .symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .and_then(|s| min_notional_from_filters(&s.filters));

        Ok(SymbolRules { min_notional })
    }
}

impl AccountSource for BinanceClient {
    async fn free_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        let balances = self.balances().await?;
        Ok(balances
            .iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO))
    }

    async fn account_snapshot(&self, pair: &TradingPair) -> Result<AccountSnapshot, ExchangeError> {
        let balances = self.balances().await?;
        let open_orders: Vec<serde_json::Value> = self
            .signed_request(Method::GET, "/api/v3/openOrders", vec![("symbol", pair.symbol())])
            .await?;

        let find = |asset: &str| balances.iter().find(|b| b.asset.eq_ignore_ascii_case(asset));
        let base = find(&pair.base);
        let quote = find(&pair.quote);

        Ok(AccountSnapshot {
            base_asset: pair.base.clone(),
            base_total: base.map(|b| b.free + b.locked).unwrap_or(Decimal::ZERO),
            quote_asset: pair.quote.clone(),
            quote_total: quote.map(|b| b.free + b.locked).unwrap_or(Decimal::ZERO),
            quote_free: quote.map(|b| b.free).unwrap_or(Decimal::ZERO),
            open_orders: open_orders.len(),
        })
    }
}

/// The kline fields the reference computation needs
#[derive(Debug, Clone, PartialEq)]
struct Candle {
    open: Decimal,
    close: Decimal,
    volume: Decimal,
    quote_volume: Decimal,
}

impl Candle {
    /// Binance klines are positional arrays: [openTime, open, high, low, close, volume, closeTime, quoteVolume, ...]
    fn from_raw(raw: &[serde_json::Value]) -> Result<Self, ExchangeError> {
        let field = |idx: usize| -> Result<Decimal, ExchangeError> {
            raw.get(idx)
                .and_then(|v| v.as_str())
                .and_then(|s| Decimal::from_str(s).ok())
                .ok_or_else(|| ExchangeError::Unknown {
                    status: 0,
                    body: format!("Malformed kline field {}", idx),
                })
        };

        Ok(Self {
            open: field(1)?,
            close: field(4)?,
            volume: field(5)?,
            quote_volume: field(7)?,
        })
    }
}

fn reference_from_candles(candles: &[Candle], lookback: usize, mode: ReferenceMode) -> Result<Decimal, ExchangeError> {
    if candles.len() < lookback + 1 {
        return Err(ExchangeError::Unknown {
            status: 0,
            body: format!("Not enough kline data returned ({} of {})", candles.len(), lookback + 1),
        });
    }

    match mode {
        ReferenceMode::LookbackOpen => Ok(candles[0].open),
        ReferenceMode::Vwap => {
            let volume: Decimal = candles.iter().map(|c| c.volume).sum();
            if volume.is_zero() {
                // No trades in the window: fall back to the mean close
                let closes: Decimal = candles.iter().map(|c| c.close).sum();
                return Ok(closes / Decimal::from(candles.len()));
            }
            let quote_volume: Decimal = candles.iter().map(|c| c.quote_volume).sum();
            Ok(quote_volume / volume)
        }
    }
}

fn min_notional_from_filters(filters: &[serde_json::Value]) -> Option<Decimal> {
    filters
        .iter()
        .filter(|f| {
            matches!(
                f.get("filterType").and_then(|t| t.as_str()),
                Some("MIN_NOTIONAL") | Some("NOTIONAL")
            )
        })
        .find_map(|f| f.get("minNotional").and_then(|v| v.as_str()))
        .and_then(|s| Decimal::from_str(s).ok())
        .filter(|d| !d.is_zero())
}

fn build_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn sign(secret: &str, payload: &str) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Authentication(format!("Invalid API secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ExchangeError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ExchangeError::from_response(status.as_u16(), &body));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ExchangeError::from_network_error(&e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ErrorKind;
    use mockito::Matcher;
    use rust_decimal_macros::dec;

    fn pair() -> TradingPair {
        TradingPair::new("BTC", "EUR")
    }

    fn candle(open: Decimal, close: Decimal, volume: Decimal, quote_volume: Decimal) -> Candle {
        Candle {
            open,
            close,
            volume,
            quote_volume,
        }
    }

    #[test]
    fn test_signature_matches_binance_docs() {
        // Example from the Binance API documentation
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let payload = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign(secret, payload).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_reference_vwap_and_open() {
        let candles = vec![
            candle(dec!(100), dec!(101), dec!(1), dec!(100)),
            candle(dec!(101), dec!(102), dec!(3), dec!(306)),
        ];
        assert_eq!(reference_from_candles(&candles, 1, ReferenceMode::Vwap).unwrap(), dec!(101.5));
        assert_eq!(reference_from_candles(&candles, 1, ReferenceMode::LookbackOpen).unwrap(), dec!(100));
    }

    #[test]
    fn test_reference_requires_full_window() {
        let candles = vec![candle(dec!(100), dec!(101), dec!(1), dec!(100))];
        let err = reference_from_candles(&candles, 12, ReferenceMode::Vwap).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_min_notional_filter() {
        let filters: Vec<serde_json::Value> = serde_json::from_str(
            r#"[{"filterType":"PRICE_FILTER","minPrice":"0.01"},{"filterType":"NOTIONAL","minNotional":"5.00000000","applyMinToMarket":true}]"#,
        )
        .unwrap();
        assert_eq!(min_notional_from_filters(&filters), Some(dec!(5)));
        assert_eq!(min_notional_from_filters(&[]), None);
    }

    #[tokio::test]
    async fn test_current_price() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCEUR".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"symbol":"BTCEUR","price":"61234.56000000"}"#)
            .create_async()
            .await;

        let client = BinanceClient::with_base_url(&server.url(), None, ReferenceMode::Vwap).unwrap();
        let price = client.current_price(&pair()).await.unwrap();

        assert_eq!(price, dec!(61234.56));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_signed_order_auth_failure_is_classified() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v3/order")
            .match_query(Matcher::Any)
            .match_header("X-MBX-APIKEY", "key")
            .with_status(401)
            .with_body(r#"{"code":-2015,"msg":"Invalid API-key, IP, or permissions for action."}"#)
            .create_async()
            .await;

        let client = BinanceClient::with_base_url(
            &server.url(),
            Some(("key".to_string(), "secret".to_string())),
            ReferenceMode::Vwap,
        )
        .unwrap();
        let err = client
            .place_market_order(&pair(), OrderSide::Buy, dec!(10))
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_signed_request_without_credentials() {
        let client = BinanceClient::with_base_url("http://127.0.0.1:1", None, ReferenceMode::Vwap).unwrap();
        let err = client.free_balance("EUR").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn test_order_fill_parsed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v3/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("side".into(), "BUY".into()),
                Matcher::UrlEncoded("quoteOrderQty".into(), "12.34".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"symbol":"BTCEUR","orderId":28,"executedQty":"0.00020000","cummulativeQuoteQty":"12.34","status":"FILLED"}"#)
            .create_async()
            .await;

        let client = BinanceClient::with_base_url(
            &server.url(),
            Some(("key".to_string(), "secret".to_string())),
            ReferenceMode::Vwap,
        )
        .unwrap();
        let fill = client
            .place_market_order(&pair(), OrderSide::Buy, dec!(12.344))
            .await
            .unwrap();

        assert_eq!(fill.order_id, "28");
        assert_eq!(fill.filled_quantity, dec!(0.0002));
        assert_eq!(fill.quote_amount, dec!(12.34));
    }
}
