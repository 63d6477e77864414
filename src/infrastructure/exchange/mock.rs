//! Deterministic, hand-scripted `ExchangeAdapter` fake (§10.5). No mocking
//! framework: state lives behind a `Mutex` and is programmed directly by
//! tests, matching the teacher's `MockExecService`/`FailExecService` idiom.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::errors::ExchangeError;
use crate::domain::ports::{ExchangeAdapter, ExitInfo, FillInfo, PlacedOrder, PositionInfo, TpSl};
use crate::domain::types::{OrderType, Side};

#[derive(Default)]
struct MockState {
    prices: HashMap<String, Decimal>,
    volatility: HashMap<String, Decimal>,
    positions: HashMap<String, PositionInfo>,
    fills: HashMap<String, FillInfo>,
    exits: HashMap<String, ExitInfo>,
    placed_orders: Vec<PlacedOrderCall>,
    cancelled_orders: Vec<String>,
    tp_sl_calls: Vec<(String, TpSl)>,
    leverage_calls: Vec<(String, u32)>,
    next_order_id: u64,
    forced_errors: HashMap<&'static str, ExchangeError>,
}

#[derive(Debug, Clone)]
pub struct PlacedOrderCall {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: Decimal,
    pub price: Option<Decimal>,
    pub reduce_only: bool,
}

/// Scriptable fake venue. Every setter mutates shared state visible to the
/// adapter under test; `fail_next` consumes a single forced error for the
/// named method on its next call.
#[derive(Default)]
pub struct MockExchangeAdapter {
    state: Mutex<MockState>,
}

impl MockExchangeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.state.lock().unwrap().prices.insert(symbol.to_string(), price);
    }

    pub fn set_volatility(&self, symbol: &str, pct: Decimal) {
        self.state.lock().unwrap().volatility.insert(symbol.to_string(), pct);
    }

    pub fn set_position(&self, symbol: &str, position: PositionInfo) {
        self.state.lock().unwrap().positions.insert(symbol.to_string(), position);
    }

    pub fn clear_position(&self, symbol: &str) {
        self.state.lock().unwrap().positions.remove(symbol);
    }

    pub fn set_fill(&self, order_id: &str, fill: FillInfo) {
        self.state.lock().unwrap().fills.insert(order_id.to_string(), fill);
    }

    pub fn set_exit(&self, entry_order_id: &str, exit: ExitInfo) {
        self.state.lock().unwrap().exits.insert(entry_order_id.to_string(), exit);
    }

    /// Forces the named method's next call to return `err` instead of its
    /// scripted result. One-shot: consumed on the next matching call.
    pub fn fail_next(&self, method: &'static str, err: ExchangeError) {
        self.state.lock().unwrap().forced_errors.insert(method, err);
    }

    pub fn placed_orders(&self) -> Vec<PlacedOrderCall> {
        self.state.lock().unwrap().placed_orders.clone()
    }

    pub fn cancelled_orders(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled_orders.clone()
    }

    pub fn tp_sl_calls(&self) -> Vec<(String, TpSl)> {
        self.state.lock().unwrap().tp_sl_calls.clone()
    }

    pub fn leverage_calls(&self) -> Vec<(String, u32)> {
        self.state.lock().unwrap().leverage_calls.clone()
    }

    fn take_forced_error(&self, method: &'static str) -> Option<ExchangeError> {
        self.state.lock().unwrap().forced_errors.remove(method)
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchangeAdapter {
    async fn current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        if let Some(e) = self.take_forced_error("current_price") {
            return Err(e);
        }
        self.state
            .lock()
            .unwrap()
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::Permanent(format!("no price scripted for {symbol}")))
    }

    async fn volatility_pct(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        if let Some(e) = self.take_forced_error("volatility_pct") {
            return Err(e);
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .volatility
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO))
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
        if let Some(e) = self.take_forced_error("place_order") {
            return Err(e);
        }
        let mut state = self.state.lock().unwrap();
        state.next_order_id += 1;
        let id = format!("mock-order-{}", state.next_order_id);
        state.placed_orders.push(PlacedOrderCall {
            symbol: symbol.to_string(),
            side,
            order_type,
            qty,
            price,
            reduce_only,
        });
        Ok(PlacedOrder { id, status: "PLACED".to_string() })
    }

    async fn cancel_order(&self, order_id: &str, _symbol: &str) -> Result<(), ExchangeError> {
        if let Some(e) = self.take_forced_error("cancel_order") {
            return Err(e);
        }
        self.state.lock().unwrap().cancelled_orders.push(order_id.to_string());
        Ok(())
    }

    async fn order_fill_info(
        &self,
        order_id: &str,
        _symbol: &str,
    ) -> Result<Option<FillInfo>, ExchangeError> {
        if let Some(e) = self.take_forced_error("order_fill_info") {
            return Err(e);
        }
        Ok(self.state.lock().unwrap().fills.get(order_id).cloned())
    }

    async fn position_info(&self, symbol: &str) -> Result<Option<PositionInfo>, ExchangeError> {
        if let Some(e) = self.take_forced_error("position_info") {
            return Err(e);
        }
        Ok(self.state.lock().unwrap().positions.get(symbol).cloned())
    }

    async fn exit_fill_info(
        &self,
        _symbol: &str,
        entry_order_id: &str,
        _since: DateTime<Utc>,
        _position_side: Side,
    ) -> Result<Option<ExitInfo>, ExchangeError> {
        if let Some(e) = self.take_forced_error("exit_fill_info") {
            return Err(e);
        }
        Ok(self.state.lock().unwrap().exits.get(entry_order_id).cloned())
    }

    async fn set_position_tp_sl(&self, symbol: &str, tp_sl: TpSl) -> Result<(), ExchangeError> {
        if let Some(e) = self.take_forced_error("set_position_tp_sl") {
            return Err(e);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(position) = state.positions.get_mut(symbol) {
            if let Some(tp) = tp_sl.take_profit {
                position.take_profit = Some(tp);
            }
            if let Some(sl) = tp_sl.stop_loss {
                position.stop_loss = Some(sl);
            }
        }
        state.tp_sl_calls.push((symbol.to_string(), tp_sl));
        Ok(())
    }

    async fn ensure_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        if let Some(e) = self.take_forced_error("ensure_leverage") {
            return Err(e);
        }
        self.state
            .lock()
            .unwrap()
            .leverage_calls
            .push((symbol.to_string(), leverage));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_price_is_returned() {
        let mock = MockExchangeAdapter::new();
        mock.set_price("BTC/USDT", Decimal::from(50000));
        assert_eq!(mock.current_price("BTC/USDT").await.unwrap(), Decimal::from(50000));
    }

    #[tokio::test]
    async fn missing_price_is_permanent_error() {
        let mock = MockExchangeAdapter::new();
        let err = mock.current_price("ETH/USDT").await.unwrap_err();
        assert!(matches!(err, ExchangeError::Permanent(_)));
    }

    #[tokio::test]
    async fn forced_error_is_one_shot() {
        let mock = MockExchangeAdapter::new();
        mock.set_price("BTC/USDT", Decimal::from(50000));
        mock.fail_next("current_price", ExchangeError::Transient("down".into()));

        assert!(mock.current_price("BTC/USDT").await.is_err());
        assert_eq!(mock.current_price("BTC/USDT").await.unwrap(), Decimal::from(50000));
    }

    #[tokio::test]
    async fn place_order_records_call_and_assigns_id() {
        let mock = MockExchangeAdapter::new();
        let placed = mock
            .place_order("BTC/USDT", Side::Long, OrderType::Market, Decimal::from(1), None, false)
            .await
            .unwrap();
        assert_eq!(placed.id, "mock-order-1");
        assert_eq!(mock.placed_orders().len(), 1);
    }

    #[tokio::test]
    async fn set_position_tp_sl_updates_tracked_position() {
        let mock = MockExchangeAdapter::new();
        mock.set_position(
            "BTC/USDT",
            PositionInfo {
                side: Side::Long,
                contracts: Decimal::from(1),
                entry_price: Decimal::from(50000),
                take_profit: None,
                stop_loss: None,
                position_idx: 0,
            },
        );
        mock.set_position_tp_sl(
            "BTC/USDT",
            TpSl { take_profit: Some(Decimal::from(51000)), stop_loss: None },
        )
        .await
        .unwrap();

        let position = mock.position_info("BTC/USDT").await.unwrap().unwrap();
        assert_eq!(position.take_profit, Some(Decimal::from(51000)));
        assert_eq!(mock.tp_sl_calls().len(), 1);
    }
}
