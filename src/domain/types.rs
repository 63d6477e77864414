use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LONG" | "BUY" => Ok(Side::Long),
            "SHORT" | "SELL" => Ok(Side::Short),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// Coarse lifecycle of a `Signal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    Active,
    Closed,
}

/// Fine-grained lifecycle of a `Signal`, tracked through submission, fill,
/// and exit. Exhaustive matching on this enum is what makes the executor's
/// state machine verifiable at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Submitting,
    Placed,
    OpenPosition,
    SlToBreakeven,
    WaitingForPrice,
    PriceDeviationTooLarge,
    LevelBroken,
    SignalTooOld,
    ElderScreensFailed,
    PositionAlreadyOpen,
    LiveDisabled,
    NotConfigured,
    InvalidEntry,
    InvalidQuantity,
    InvalidMarketPrice,
    OrderCancelledPriceMoved,
    SignalClosedNoOrder,
    Cancelled,
    Failed,
}

impl TradeStatus {
    /// §4.4 preflight step 6: statuses from which a retry attempt is allowed.
    pub const RETRYABLE: &'static [TradeStatus] = &[
        TradeStatus::Failed,
        TradeStatus::Cancelled,
        TradeStatus::LiveDisabled,
        TradeStatus::NotConfigured,
        TradeStatus::InvalidEntry,
        TradeStatus::InvalidQuantity,
        TradeStatus::InvalidMarketPrice,
        TradeStatus::SignalTooOld,
        TradeStatus::WaitingForPrice,
    ];

    pub fn is_retryable(self) -> bool {
        Self::RETRYABLE.contains(&self)
    }

    /// States in which an entry order is live at the venue (§4.5 step 4).
    pub fn is_open_entry_order(self) -> bool {
        matches!(self, TradeStatus::Placed | TradeStatus::Submitting)
    }

    /// States in which a position is considered filled and open (§4.5 steps 7-9).
    pub fn is_open_position(self) -> bool {
        matches!(
            self,
            TradeStatus::OpenPosition | TradeStatus::SlToBreakeven | TradeStatus::PositionAlreadyOpen
        )
    }

    /// States that represent a reversible "parked" wait, eligible for revival (§4.5 step 2/5).
    pub fn is_waiting_family(self) -> bool {
        matches!(
            self,
            TradeStatus::WaitingForPrice
                | TradeStatus::LevelBroken
                | TradeStatus::PriceDeviationTooLarge
        )
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeStatus::Submitting => "SUBMITTING",
            TradeStatus::Placed => "PLACED",
            TradeStatus::OpenPosition => "OPEN_POSITION",
            TradeStatus::SlToBreakeven => "SL_TO_BREAKEVEN",
            TradeStatus::WaitingForPrice => "WAITING_FOR_PRICE",
            TradeStatus::PriceDeviationTooLarge => "PRICE_DEVIATION_TOO_LARGE",
            TradeStatus::LevelBroken => "LEVEL_BROKEN",
            TradeStatus::SignalTooOld => "SIGNAL_TOO_OLD",
            TradeStatus::ElderScreensFailed => "ELDER_SCREENS_FAILED",
            TradeStatus::PositionAlreadyOpen => "POSITION_ALREADY_OPEN",
            TradeStatus::LiveDisabled => "LIVE_DISABLED",
            TradeStatus::NotConfigured => "NOT_CONFIGURED",
            TradeStatus::InvalidEntry => "INVALID_ENTRY",
            TradeStatus::InvalidQuantity => "INVALID_QUANTITY",
            TradeStatus::InvalidMarketPrice => "INVALID_MARKET_PRICE",
            TradeStatus::OrderCancelledPriceMoved => "ORDER_CANCELLED_PRICE_MOVED",
            TradeStatus::SignalClosedNoOrder => "SIGNAL_CLOSED_NO_ORDER",
            TradeStatus::Cancelled => "CANCELLED",
            TradeStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "SUBMITTING" => TradeStatus::Submitting,
            "PLACED" | "NEW" | "OPEN" => TradeStatus::Placed,
            "OPEN_POSITION" | "FILLED" => TradeStatus::OpenPosition,
            "SL_TO_BREAKEVEN" => TradeStatus::SlToBreakeven,
            "WAITING_FOR_PRICE" => TradeStatus::WaitingForPrice,
            "PRICE_DEVIATION_TOO_LARGE" => TradeStatus::PriceDeviationTooLarge,
            "LEVEL_BROKEN" => TradeStatus::LevelBroken,
            "SIGNAL_TOO_OLD" => TradeStatus::SignalTooOld,
            "ELDER_SCREENS_FAILED" => TradeStatus::ElderScreensFailed,
            "POSITION_ALREADY_OPEN" => TradeStatus::PositionAlreadyOpen,
            "LIVE_DISABLED" => TradeStatus::LiveDisabled,
            "NOT_CONFIGURED" => TradeStatus::NotConfigured,
            "INVALID_ENTRY" => TradeStatus::InvalidEntry,
            "INVALID_QUANTITY" => TradeStatus::InvalidQuantity,
            "INVALID_MARKET_PRICE" => TradeStatus::InvalidMarketPrice,
            "ORDER_CANCELLED_PRICE_MOVED" => TradeStatus::OrderCancelledPriceMoved,
            "SIGNAL_CLOSED_NO_ORDER" => TradeStatus::SignalClosedNoOrder,
            "CANCELLED" => TradeStatus::Cancelled,
            "FAILED" => TradeStatus::Failed,
            other => return Err(format!("unknown trade_status: {other}")),
        })
    }
}

/// Reason a position was closed, as classified by the venue adapter from
/// the closing order/trade type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    ManualClose,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::ManualClose => "MANUAL_CLOSE",
        };
        write!(f, "{s}")
    }
}

/// Result of `SignalExecutor::attempt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Submitted,
    WaitingForPrice,
    Invalidated(TradeStatus),
    AlreadyProcessed,
    Disabled,
    RiskBlocked,
    DuplicatePosition,
    SignalNotFound,
    SignalClosed,
    Failed(String),
}

/// Order type chosen for entry (§4.4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}
