use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Korea Standard Time (UTC+9). KRX trades on KST and Korea has no DST,
/// so a fixed offset is sufficient.
pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).expect("valid KST offset")
}

/// Current wall-clock time on the exchange.
pub fn now_kst() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&kst())
}

/// A single trade execution event from the realtime feed.
///
/// Volume is signed: positive means buy-initiated, negative sell-initiated.
/// Prices are integer KRW.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickEvent {
    pub symbol: String,
    pub time: DateTime<FixedOffset>,
    pub price: i64,
    pub volume: i64,
    pub acc_volume: i64,
    pub acc_amount: i64,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub execution_strength: f64,
    pub buy_ratio: f64,
}

impl TickEvent {
    /// Parse an exchange-local "HHMMSS" execution-time string into a KST
    /// timestamp on the current date. Malformed input falls back to now.
    pub fn parse_execution_time(raw: &str) -> DateTime<FixedOffset> {
        let now = now_kst();
        if raw.len() != 6 {
            return now;
        }
        match NaiveTime::parse_from_str(raw, "%H%M%S") {
            Ok(t) => kst()
                .from_local_datetime(&now.date_naive().and_time(t))
                .single()
                .unwrap_or(now),
            Err(_) => now,
        }
    }
}

/// Completion status of an aggregation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowStatus {
    InsufficientData,
    Completed,
}

/// One-minute OHLC window within a [`MinuteAggregate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcWindow {
    pub status: WindowStatus,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub close: i64,
    pub avg_price: f64,
    pub sample_count: usize,
    pub strength: f64,
}

impl OhlcWindow {
    pub fn insufficient() -> Self {
        Self {
            status: WindowStatus::InsufficientData,
            open: 0,
            high: 0,
            low: 0,
            close: 0,
            avg_price: 0.0,
            sample_count: 0,
            strength: 0.0,
        }
    }
}

/// Trailing multi-minute window (5- or 10-minute) within a [`MinuteAggregate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingWindow {
    pub status: WindowStatus,
    pub avg_price: f64,
    pub sample_count: usize,
    pub strength: f64,
}

impl TrailingWindow {
    pub fn insufficient() -> Self {
        Self {
            status: WindowStatus::InsufficientData,
            avg_price: 0.0,
            sample_count: 0,
            strength: 0.0,
        }
    }
}

/// Per-minute aggregate for one symbol, keyed by (symbol, "HH:MM").
///
/// Written once when the minute completes and never overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinuteAggregate {
    pub symbol: String,
    /// Wall-clock minute label, e.g. "09:31".
    pub minute: String,
    pub one_min: OhlcWindow,
    pub five_min: TrailingWindow,
    pub ten_min: TrailingWindow,
    pub created_at: DateTime<FixedOffset>,
}

/// Last committed trade direction for a tracked symbol.
///
/// Transitions only Hold -> Buy -> Sell -> Buy -> ..., driven by confirmed
/// fills rather than by signal evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeType {
    Hold,
    Buy,
    Sell,
}

/// Short-term vs. long-term tracking horizon for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodType {
    Short,
    Long,
}

/// Mutable tracking state for one actively-watched symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTrackingRecord {
    pub symbol: String,
    pub current_price: i64,
    pub highest_price: i64,
    pub lowest_price: i64,
    pub trade_price: i64,
    pub trade_time: DateTime<FixedOffset>,
    pub last_updated: DateTime<FixedOffset>,
    pub price_to_buy: i64,
    pub price_to_sell: i64,
    pub qty_to_sell: u32,
    pub qty_to_buy: u32,
    pub trade_type: TradeType,
    pub ma20: f64,
    pub ma20_slope: f64,
    pub ma20_avg_slope: f64,
    pub is_first: bool,
    pub is_afternoon: bool,
    pub period_type: PeriodType,
}

impl PriceTrackingRecord {
    pub fn new(symbol: impl Into<String>) -> Self {
        let now = now_kst();
        Self {
            symbol: symbol.into(),
            current_price: 0,
            highest_price: 0,
            lowest_price: 0,
            trade_price: 0,
            trade_time: now,
            last_updated: now,
            price_to_buy: 0,
            price_to_sell: 0,
            qty_to_sell: 0,
            qty_to_buy: 0,
            trade_type: TradeType::Hold,
            ma20: 0.0,
            ma20_slope: 0.0,
            ma20_avg_slope: 0.0,
            is_first: true,
            is_afternoon: true,
            period_type: PeriodType::Short,
        }
    }

    /// Percent change of the current price against the last trade price.
    pub fn change_from_trade(&self) -> f64 {
        if self.trade_price <= 0 {
            return 0.0;
        }
        (self.current_price - self.trade_price) as f64 / self.trade_price as f64 * 100.0
    }
}

/// Trading-session zones on the KST wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionZone {
    /// 09:00-09:05 - observation only, no orders.
    Monitor,
    /// 09:05-09:30 - opening-gap momentum window.
    GapTrading,
    /// 09:30-13:00 - main session with holding-band logic.
    MainTrading,
    /// 13:00-15:00 - sell-only wind-down.
    Afternoon,
    /// Outside trading hours.
    Closed,
}

/// Proposed action for one symbol on one evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Buy,
    Sell,
    Neutral,
}

/// Output of one signal-engine evaluation. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub action: TradeAction,
    pub quantity: u32,
    pub reason: String,
    pub time_zone: SessionZone,
}

impl TradingSignal {
    pub fn neutral(reason: impl Into<String>, zone: SessionZone) -> Self {
        Self {
            action: TradeAction::Neutral,
            quantity: 0,
            reason: reason.into(),
            time_zone: zone,
        }
    }

    /// Build a signal, coercing any non-neutral action with a zero quantity
    /// down to neutral.
    pub fn checked(
        action: TradeAction,
        quantity: u32,
        reason: impl Into<String>,
        zone: SessionZone,
    ) -> Self {
        if action != TradeAction::Neutral && quantity == 0 {
            return Self::neutral(reason, zone);
        }
        Self {
            action,
            quantity,
            reason: reason.into(),
            time_zone: zone,
        }
    }
}

/// Side of an order sent to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}
