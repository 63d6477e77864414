//! Bybit v5 linear-perpetual Exchange Adapter (§4.2, §10.4).
//!
//! HMAC-SHA256 request signing over the `X-BAPI-*` header convention,
//! `category=linear` on every call, and `retCode`/HTTP-status classification
//! into `ExchangeError::{Transient, RateLimited, Permanent}`. This is one
//! concrete adapter behind the venue-agnostic `ExchangeAdapter` trait;
//! nothing upstream depends on Bybit specifics.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::config::exchange_config::ExchangeEnvConfig;
use crate::domain::errors::ExchangeError;
use crate::domain::ports::{ExchangeAdapter, FillInfo, PlacedOrder, PositionInfo, TpSl, ExitInfo};
use crate::domain::types::{ExitReason, OrderType, Side};
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;

type HmacSha256 = Hmac<Sha256>;

pub struct BybitExchangeAdapter {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    symbol_suffix: String,
    position_idx: u8,
    time_in_force: String,
    demo_trading: bool,
    circuit_breaker: CircuitBreaker,
}

impl BybitExchangeAdapter {
    pub fn new(config: ExchangeEnvConfig) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url: config.base_url,
            api_key: config.api_key,
            api_secret: config.api_secret,
            recv_window_ms: config.recv_window_ms,
            symbol_suffix: config.symbol_suffix,
            position_idx: config.position_idx,
            time_in_force: config.time_in_force,
            demo_trading: config.demo_trading,
            circuit_breaker: CircuitBreaker::new(
                "BybitExchangeAdapter",
                5,
                2,
                Duration::from_secs(30),
            ),
        }
    }

    /// The analyzer uses `BTC/USDT`; Bybit's wire form is `BTCUSDT`, with an
    /// optional venue-specific suffix for demo-trading symbol dialects.
    fn venue_symbol(&self, symbol: &str) -> String {
        format!("{}{}", symbol.replace('/', ""), self.symbol_suffix)
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts a key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn auth_headers(&self, ts: &str, payload: &str) -> reqwest::header::HeaderMap {
        let recv_window = self.recv_window_ms.to_string();
        let signature = self.sign(payload);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-BAPI-API-KEY", self.api_key.parse().unwrap());
        headers.insert("X-BAPI-TIMESTAMP", ts.parse().unwrap());
        headers.insert("X-BAPI-SIGN", signature.parse().unwrap());
        headers.insert("X-BAPI-RECV-WINDOW", recv_window.parse().unwrap());
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            "application/json".parse().unwrap(),
        );
        if self.demo_trading {
            headers.insert("X-BAPI-TESTNET", "1".parse().unwrap());
        }
        headers
    }

    async fn signed_get(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        let ts = Self::timestamp_ms().to_string();
        let recv_window = self.recv_window_ms.to_string();
        let payload = format!("{ts}{}{recv_window}{query}", self.api_key);
        let headers = self.auth_headers(&ts, &payload);

        let url = if query.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query}", self.base_url)
        };

        let resp = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(format!("HTTP error: {e}")))?;

        Self::parse_envelope(resp).await
    }

    async fn signed_post(&self, path: &str, body: &Value) -> Result<Value, ExchangeError> {
        let body_str = body.to_string();
        let ts = Self::timestamp_ms().to_string();
        let recv_window = self.recv_window_ms.to_string();
        let payload = format!("{ts}{}{recv_window}{body_str}", self.api_key);
        let headers = self.auth_headers(&ts, &payload);

        let url = format!("{}{path}", self.base_url);

        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .body(body_str)
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(format!("HTTP error: {e}")))?;

        Self::parse_envelope(resp).await
    }

    async fn parse_envelope(resp: reqwest::Response) -> Result<Value, ExchangeError> {
        let http_status = resp.status().as_u16();
        let json: Value = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Transient(format!("parse error: {e}")))?;

        let ret_code = json["retCode"].as_i64().unwrap_or(-1);
        if ret_code == 0 {
            return Ok(json);
        }

        let msg = json["retMsg"].as_str().unwrap_or("unknown").to_string();
        Err(Self::classify_error(ret_code, http_status, &msg))
    }

    /// Classifies a Bybit `retCode`/HTTP status into the venue-agnostic
    /// transient/rate-limited/permanent taxonomy the core branches on (§7).
    fn classify_error(ret_code: i64, http_status: u16, msg: &str) -> ExchangeError {
        match (ret_code, http_status) {
            (10006, _) | (_, 429) => ExchangeError::RateLimited {
                retry_after_secs: 10,
                message: msg.to_string(),
            },
            (10016, _) | (_, 500..=599) => ExchangeError::Transient(msg.to_string()),
            _ => ExchangeError::Permanent(format!("retCode={ret_code} msg={msg}")),
        }
    }

    async fn guarded<T, F>(&self, fut: F) -> Result<T, ExchangeError>
    where
        F: std::future::Future<Output = Result<T, ExchangeError>>,
    {
        self.circuit_breaker.call(fut).await.map_err(|e| match e {
            CircuitBreakerError::Open(msg) => ExchangeError::Transient(msg),
            CircuitBreakerError::Inner(inner) => inner,
        })
    }

    fn parse_decimal(v: &Value) -> Option<Decimal> {
        v.as_str().and_then(|s| s.parse::<Decimal>().ok())
    }

    fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[async_trait]
impl ExchangeAdapter for BybitExchangeAdapter {
    async fn current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let venue_symbol = self.venue_symbol(symbol);
        let query = format!("category=linear&symbol={venue_symbol}");
        let json = self.guarded(self.signed_get("/v5/market/tickers", &query)).await?;

        let entry = json["result"]["list"]
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| ExchangeError::Permanent("tickers: empty list".into()))?;

        Self::parse_decimal(&entry["lastPrice"])
            .ok_or_else(|| ExchangeError::Permanent("tickers: missing lastPrice".into()))
    }

    async fn volatility_pct(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let venue_symbol = self.venue_symbol(symbol);
        let query = format!("category=linear&symbol={venue_symbol}&interval=1&limit=30");
        let json = self.guarded(self.signed_get("/v5/market/kline", &query)).await?;

        let list = json["result"]["list"]
            .as_array()
            .ok_or_else(|| ExchangeError::Permanent("kline: missing list".into()))?;

        if list.is_empty() {
            return Err(ExchangeError::Permanent("kline: empty window".into()));
        }

        let mut total = Decimal::ZERO;
        let mut count = 0u32;
        for row in list {
            let arr = match row.as_array() {
                Some(a) if a.len() >= 5 => a,
                _ => continue,
            };
            let (Some(high), Some(low), Some(close)) = (
                arr[2].as_str().and_then(|s| s.parse::<Decimal>().ok()),
                arr[3].as_str().and_then(|s| s.parse::<Decimal>().ok()),
                arr[4].as_str().and_then(|s| s.parse::<Decimal>().ok()),
            ) else {
                continue;
            };
            if close.is_zero() {
                continue;
            }
            total += (high - low) / close * Decimal::from(100);
            count += 1;
        }

        if count == 0 {
            return Err(ExchangeError::Permanent("kline: no usable candles".into()));
        }
        Ok(total / Decimal::from(count))
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        qty: Decimal,
        price: Option<Decimal>,
        reduce_only: bool,
    ) -> Result<PlacedOrder, ExchangeError> {
        let venue_symbol = self.venue_symbol(symbol);
        let side_str = match side {
            Side::Long => "Buy",
            Side::Short => "Sell",
        };
        let order_type_str = match order_type {
            OrderType::Market => "Market",
            OrderType::Limit => "Limit",
        };

        let mut body = json!({
            "category": "linear",
            "symbol": venue_symbol,
            "side": side_str,
            "orderType": order_type_str,
            "qty": qty.to_string(),
            "reduceOnly": reduce_only,
        });
        if let Some(price) = price {
            body["price"] = json!(price.to_string());
            body["timeInForce"] = json!(self.time_in_force);
        }
        if self.position_idx != 0 {
            body["positionIdx"] = json!(self.position_idx);
        }

        let json = self.guarded(self.signed_post("/v5/order/create", &body)).await?;
        let order_id = json["result"]["orderId"]
            .as_str()
            .ok_or_else(|| ExchangeError::Permanent("order/create: missing orderId".into()))?
            .to_string();

        info!(symbol, %side, order_id, "placed order");
        Ok(PlacedOrder {
            id: order_id,
            status: "PLACED".to_string(),
        })
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), ExchangeError> {
        let venue_symbol = self.venue_symbol(symbol);
        let body = json!({
            "category": "linear",
            "symbol": venue_symbol,
            "orderId": order_id,
        });
        self.guarded(self.signed_post("/v5/order/cancel", &body)).await?;
        Ok(())
    }

    async fn order_fill_info(
        &self,
        order_id: &str,
        symbol: &str,
    ) -> Result<Option<FillInfo>, ExchangeError> {
        let venue_symbol = self.venue_symbol(symbol);

        // §4.2: consult the live order book first.
        let query = format!("category=linear&symbol={venue_symbol}&orderId={order_id}");
        let live = self.guarded(self.signed_get("/v5/order/realtime", &query)).await?;
        if let Some(fill) = Self::extract_fill(&live, order_id) {
            return Ok(Some(fill));
        }

        // Then fall back to the closed-orders history (up to 500).
        let query = format!("category=linear&symbol={venue_symbol}&orderId={order_id}&limit=500");
        let closed = self.guarded(self.signed_get("/v5/order/history", &query)).await?;
        Ok(Self::extract_fill(&closed, order_id))
    }

    async fn position_info(&self, symbol: &str) -> Result<Option<PositionInfo>, ExchangeError> {
        let venue_symbol = self.venue_symbol(symbol);
        let query = format!("category=linear&symbol={venue_symbol}");
        let json = self.guarded(self.signed_get("/v5/position/list", &query)).await?;

        let entry = json["result"]["list"].as_array().and_then(|a| a.first());
        let Some(entry) = entry else {
            return Ok(None);
        };

        let size = Self::parse_decimal(&entry["size"]).unwrap_or(Decimal::ZERO);
        if size.is_zero() {
            return Ok(None);
        }

        let side = match entry["side"].as_str() {
            Some("Buy") => Side::Long,
            Some("Sell") => Side::Short,
            _ => return Ok(None),
        };

        let tp = Self::parse_decimal(&entry["takeProfit"]).filter(|d| !d.is_zero());
        let sl = Self::parse_decimal(&entry["stopLoss"]).filter(|d| !d.is_zero());

        Ok(Some(PositionInfo {
            side,
            contracts: size,
            entry_price: Self::parse_decimal(&entry["avgPrice"]).unwrap_or(Decimal::ZERO),
            take_profit: tp,
            stop_loss: sl,
            position_idx: entry["positionIdx"].as_u64().unwrap_or(0) as u8,
        }))
    }

    async fn exit_fill_info(
        &self,
        symbol: &str,
        entry_order_id: &str,
        since: DateTime<Utc>,
        position_side: Side,
    ) -> Result<Option<ExitInfo>, ExchangeError> {
        let venue_symbol = self.venue_symbol(symbol);
        let since_ms = since.timestamp_millis();
        let opposite_side = match position_side {
            Side::Long => "Sell",
            Side::Short => "Buy",
        };

        // Preference 1: closing trades (opposite side, or reduceOnly).
        let query = format!(
            "category=linear&symbol={venue_symbol}&startTime={since_ms}&limit=50"
        );
        let trades = self.guarded(self.signed_get("/v5/execution/list", &query)).await?;
        if let Some(list) = trades["result"]["list"].as_array() {
            let mut candidates: Vec<&Value> = list
                .iter()
                .filter(|t| {
                    t["side"].as_str() == Some(opposite_side)
                        || t["closedSize"]
                            .as_str()
                            .and_then(|s| s.parse::<f64>().ok())
                            .is_some_and(|v| v > 0.0)
                })
                .collect();
            candidates.sort_by_key(|t| t["execTime"].as_str().and_then(|s| s.parse::<i64>().ok()).unwrap_or(i64::MAX));
            if let Some(earliest) = candidates.first() {
                let price = Self::parse_decimal(&earliest["execPrice"])
                    .ok_or_else(|| ExchangeError::Permanent("execution/list: missing execPrice".into()))?;
                let ts_ms = earliest["execTime"]
                    .as_str()
                    .and_then(|s| s.parse::<i64>().ok())
                    .unwrap_or(since_ms);
                return Ok(Some(ExitInfo {
                    price,
                    timestamp: Self::millis_to_datetime(ts_ms),
                    reason: Self::classify_exit_order_type("", false),
                }));
            }
        }

        // Preference 2: closing orders (reduce-only, conditional TP/SL, or opposite side).
        let query = format!(
            "category=linear&symbol={venue_symbol}&startTime={since_ms}&limit=50"
        );
        let orders = self.guarded(self.signed_get("/v5/order/history", &query)).await?;
        if let Some(list) = orders["result"]["list"].as_array() {
            let mut candidates: Vec<&Value> = list
                .iter()
                .filter(|o| o["orderId"].as_str() != Some(entry_order_id))
                .filter(|o| {
                    o["orderStatus"].as_str() == Some("Filled")
                        && (o["reduceOnly"].as_bool().unwrap_or(false)
                            || o["stopOrderType"].as_str().is_some_and(|s| !s.is_empty())
                            || o["side"].as_str() == Some(opposite_side))
                })
                .collect();
            candidates.sort_by_key(|o| {
                o["updatedTime"]
                    .as_str()
                    .and_then(|s| s.parse::<i64>().ok())
                    .unwrap_or(i64::MAX)
            });
            if let Some(earliest) = candidates.first() {
                let price = Self::parse_decimal(&earliest["avgPrice"])
                    .ok_or_else(|| ExchangeError::Permanent("order/history: missing avgPrice".into()))?;
                let ts_ms = earliest["updatedTime"]
                    .as_str()
                    .and_then(|s| s.parse::<i64>().ok())
                    .unwrap_or(since_ms);
                let stop_order_type = earliest["stopOrderType"].as_str().unwrap_or("");
                let reduce_only = earliest["reduceOnly"].as_bool().unwrap_or(false);
                return Ok(Some(ExitInfo {
                    price,
                    timestamp: Self::millis_to_datetime(ts_ms),
                    reason: Self::classify_exit_order_type(stop_order_type, reduce_only),
                }));
            }
        }

        Ok(None)
    }

    async fn set_position_tp_sl(&self, symbol: &str, tp_sl: TpSl) -> Result<(), ExchangeError> {
        let venue_symbol = self.venue_symbol(symbol);
        let mut body = json!({
            "category": "linear",
            "symbol": venue_symbol,
            "tpslMode": "Full",
        });
        if let Some(tp) = tp_sl.take_profit {
            body["takeProfit"] = json!(tp.to_string());
        }
        if let Some(sl) = tp_sl.stop_loss {
            body["stopLoss"] = json!(sl.to_string());
        }
        if self.position_idx != 0 {
            body["positionIdx"] = json!(self.position_idx);
        }

        self.guarded(self.signed_post("/v5/position/trading-stop", &body)).await?;
        debug!(symbol, ?tp_sl.take_profit, ?tp_sl.stop_loss, "tp/sl installed");
        Ok(())
    }

    async fn ensure_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        let venue_symbol = self.venue_symbol(symbol);
        let body = json!({
            "category": "linear",
            "symbol": venue_symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });

        match self.guarded(self.signed_post("/v5/position/set-leverage", &body)).await {
            Ok(_) => Ok(()),
            // 110043 = "leverage not modified" -- idempotent no-op.
            Err(ExchangeError::Permanent(msg)) if msg.contains("110043") => Ok(()),
            Err(e) => {
                warn!(symbol, leverage, error = %e, "ensure_leverage failed");
                Err(e)
            }
        }
    }
}

impl BybitExchangeAdapter {
    fn extract_fill(envelope: &Value, order_id: &str) -> Option<FillInfo> {
        let list = envelope["result"]["list"].as_array()?;
        let entry = list
            .iter()
            .find(|o| o["orderId"].as_str() == Some(order_id))?;

        if entry["orderStatus"].as_str() != Some("Filled") {
            return None;
        }

        let price = Self::parse_decimal(&entry["avgPrice"]).filter(|d| !d.is_zero())?;
        let ts_ms = entry["updatedTime"]
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())?;

        Some(FillInfo {
            price,
            timestamp: Self::millis_to_datetime(ts_ms),
        })
    }

    fn classify_exit_order_type(stop_order_type: &str, _reduce_only: bool) -> ExitReason {
        match stop_order_type {
            "TakeProfit" => ExitReason::TakeProfit,
            "StopLoss" => ExitReason::StopLoss,
            _ => ExitReason::ManualClose,
        }
    }
}
