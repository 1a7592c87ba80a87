use crate::models::{OrderSide, TickEvent};
use crate::tracker::{PriceTrackerStore, TrackerUpdate};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

use super::TickIngest;

/// Realtime event envelope from the broker feed.
///
/// The `Unknown` variant absorbs event types this engine does not consume,
/// so new feed types never break ingestion.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    Trade(RawTrade),
    OrderFill(RawOrderFill),
    Balance(RawBalance),
    IndexUpdate(RawIndexUpdate),
    #[serde(other)]
    Unknown,
}

/// Raw per-execution payload. Numeric fields arrive as strings with
/// optional sign prefixes, matching the broker's realtime format.
#[derive(Debug, Deserialize)]
pub struct RawTrade {
    pub symbol: String,
    /// Exchange-local execution time, "HHMMSS".
    pub time: String,
    pub price: String,
    /// Signed: positive buy-initiated, negative sell-initiated.
    pub volume: String,
    pub acc_volume: String,
    pub acc_amount: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub strength: String,
    #[serde(default)]
    pub buy_ratio: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOrderFill {
    pub order_no: String,
    pub symbol: String,
    pub side: String,
    #[serde(default)]
    pub order_qty: u32,
    #[serde(default)]
    pub cumulative_qty: u32,
    #[serde(default)]
    pub untraded_qty: u32,
    #[serde(default)]
    pub fill_price: i64,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct RawBalance {
    pub symbol: String,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct RawIndexUpdate {
    pub market: String,
    pub change_rate: f64,
}

/// Fill notification handed to the reconciliation side.
#[derive(Debug, Clone)]
pub struct FillNotice {
    pub order_no: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_qty: u32,
    pub cumulative_qty: u32,
    pub untraded_qty: u32,
    pub fill_price: i64,
    pub cancelled: bool,
}

impl FillNotice {
    fn from_raw(raw: RawOrderFill) -> Option<Self> {
        let side = match raw.side.to_ascii_lowercase() {
            s if s.contains("buy") || s.contains("매수") => OrderSide::Buy,
            s if s.contains("sell") || s.contains("매도") => OrderSide::Sell,
            other => {
                tracing::warn!("order fill with unknown side {:?}, dropped", other);
                return None;
            }
        };
        let status = raw.status.to_ascii_lowercase();
        Some(Self {
            order_no: raw.order_no,
            symbol: raw.symbol,
            side,
            order_qty: raw.order_qty,
            cumulative_qty: raw.cumulative_qty,
            untraded_qty: raw.untraded_qty,
            fill_price: raw.fill_price,
            cancelled: status.contains("cancel") || status.contains("취소") || status.contains("거부"),
        })
    }
}

/// Latest market-index change rates, kept for log context only.
#[derive(Clone, Default)]
pub struct IndexSnapshot {
    rates: Arc<RwLock<HashMap<String, f64>>>,
}

impl IndexSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, market: &str, change_rate: f64) {
        if let Ok(mut rates) = self.rates.write() {
            rates.insert(market.to_string(), change_rate);
        }
    }

    pub fn get(&self, market: &str) -> Option<f64> {
        self.rates.read().ok()?.get(market).copied()
    }
}

/// Routes raw feed messages to the tick path, the fill path, or the
/// bookkeeping paths.
pub struct EventDispatcher {
    ingest: TickIngest,
    tracker: PriceTrackerStore,
    index: IndexSnapshot,
    fills: mpsc::Sender<FillNotice>,
}

impl EventDispatcher {
    pub fn new(
        ingest: TickIngest,
        tracker: PriceTrackerStore,
        index: IndexSnapshot,
        fills: mpsc::Sender<FillNotice>,
    ) -> Self {
        Self {
            ingest,
            tracker,
            index,
            fills,
        }
    }

    /// Handle one raw JSON message from the feed.
    pub async fn dispatch(&self, payload: &str) {
        let event: RealtimeEvent = match serde_json::from_str(payload) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("unparseable feed message dropped: {}", e);
                return;
            }
        };

        match event {
            RealtimeEvent::Trade(raw) => {
                if let Some(tick) = parse_trade(raw) {
                    self.ingest.ingest(tick);
                }
            }
            RealtimeEvent::OrderFill(raw) => {
                if let Some(notice) = FillNotice::from_raw(raw) {
                    if let Err(e) = self.fills.send(notice).await {
                        tracing::error!("fill channel closed, dropping notice: {}", e);
                    }
                }
            }
            RealtimeEvent::Balance(raw) => {
                // Confirmed fills own the sellable quantity; a balance
                // snapshot only shrinks it (external sells, transfers out).
                // A snapshot above the fill-confirmed quantity can arrive
                // between partial fills and must not inflate it.
                let held = self
                    .tracker
                    .read(&raw.symbol)
                    .map(|r| r.qty_to_sell)
                    .unwrap_or(0);
                if raw.quantity < held {
                    tracing::info!(
                        "⚖️ {} balance snapshot {} below tracked {}, shrinking",
                        raw.symbol,
                        raw.quantity,
                        held
                    );
                    self.tracker.update(
                        &raw.symbol,
                        TrackerUpdate {
                            qty_to_sell: Some(raw.quantity),
                            ..Default::default()
                        },
                    );
                    self.tracker.set_holding(&raw.symbol, raw.quantity > 0);
                }
            }
            RealtimeEvent::IndexUpdate(raw) => {
                self.index.set(&raw.market, raw.change_rate);
                tracing::debug!("index {} now {:+.2}%", raw.market, raw.change_rate);
            }
            RealtimeEvent::Unknown => {}
        }
    }
}

/// Strip a sign prefix and parse the magnitude. The feed reports price
/// fields signed by direction-of-change; the sign carries no price meaning.
fn parse_unsigned(raw: &str) -> Option<i64> {
    raw.trim()
        .trim_start_matches(['+', '-'])
        .parse::<i64>()
        .ok()
}

fn parse_signed(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

/// Convert a raw trade payload into a [`TickEvent`].
///
/// Returns `None` for payloads missing a symbol or carrying a non-positive
/// price; those are logged and dropped, never propagated.
pub fn parse_trade(raw: RawTrade) -> Option<TickEvent> {
    if raw.symbol.is_empty() {
        tracing::warn!("trade event without symbol dropped");
        return None;
    }

    let price = parse_unsigned(&raw.price)?;
    if price <= 0 {
        tracing::warn!("trade event for {} with price {} dropped", raw.symbol, price);
        return None;
    }

    let volume = parse_signed(&raw.volume).unwrap_or(0);
    let strength = raw.strength.trim().parse::<f64>().unwrap_or(100.0);
    let buy_ratio = raw
        .buy_ratio
        .as_deref()
        .and_then(|r| r.trim().parse::<f64>().ok())
        .unwrap_or(50.0);

    Some(TickEvent {
        symbol: raw.symbol,
        time: TickEvent::parse_execution_time(&raw.time),
        price,
        volume,
        acc_volume: parse_unsigned(&raw.acc_volume).unwrap_or(0),
        acc_amount: parse_unsigned(&raw.acc_amount).unwrap_or(0),
        open: parse_unsigned(&raw.open).unwrap_or(price),
        high: parse_unsigned(&raw.high).unwrap_or(price),
        low: parse_unsigned(&raw.low).unwrap_or(price),
        execution_strength: strength,
        buy_ratio,
    })
}
