use crate::broker::BrokerClient;
use crate::ingest::FillNotice;
use crate::models::{OrderSide, TradeType};
use crate::tracker::{PriceTrackerStore, TrackerUpdate};
use chrono::Duration as ChronoDuration;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use super::{FillOutcome, FillTracker};

/// Orders unfilled for this long get one cancel attempt.
const STALE_ORDER_MINUTES: i64 = 5;
/// Cadence of the stale-order scan.
const RECONCILE_INTERVAL_SECS: u64 = 10;

/// Last known cash balance, refreshed whenever an order finishes.
#[derive(Clone, Default)]
pub struct DepositSnapshot {
    krw: Arc<RwLock<i64>>,
}

impl DepositSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> i64 {
        self.krw.read().map(|v| *v).unwrap_or(0)
    }

    pub fn set(&self, krw: i64) {
        if let Ok(mut v) = self.krw.write() {
            *v = krw;
        }
    }
}

async fn refresh_deposit<C: BrokerClient>(client: &C, deposit: &DepositSnapshot) {
    match client.deposit_balance().await {
        Ok(krw) => {
            deposit.set(krw);
            tracing::info!("💰 예수금 {}원", krw);
        }
        Err(e) => tracing::warn!("deposit refresh failed: {}", e),
    }
}

/// Fold one confirmed fill callback into the tracking state.
///
/// This is the only place trade quantities, trade price and trade type
/// change; order placement never touches them.
pub async fn handle_fill<C: BrokerClient>(
    notice: &FillNotice,
    fills: &FillTracker,
    tracker: &PriceTrackerStore,
    client: &C,
    deposit: &DepositSnapshot,
) {
    let outcome = fills.apply(notice);

    match outcome {
        FillOutcome::Cancelled => {
            tracing::info!(
                "🚫 {} order {} cancelled/rejected, releasing symbol",
                notice.symbol,
                notice.order_no
            );
            // The symbol becomes eligible again for today.
            tracker.clear_trade_done(&notice.symbol);
            refresh_deposit(client, deposit).await;
        }
        FillOutcome::Partial { incremental } | FillOutcome::Completed { incremental } => {
            if incremental > 0 && notice.fill_price > 0 {
                apply_increment(notice, incremental, tracker);
            }
            if matches!(outcome, FillOutcome::Completed { .. }) {
                tracing::info!(
                    "✅ {} order {} fully filled",
                    notice.symbol,
                    notice.order_no
                );
                refresh_deposit(client, deposit).await;
            }
        }
    }
}

fn apply_increment(notice: &FillNotice, incremental: u32, tracker: &PriceTrackerStore) {
    let Some(record) = tracker.read(&notice.symbol) else {
        tracing::warn!(
            "fill for untracked symbol {} ({}주), ignored",
            notice.symbol,
            incremental
        );
        return;
    };

    let (qty_to_sell, qty_to_buy, trade_type) = match notice.side {
        OrderSide::Buy => (
            record.qty_to_sell + incremental,
            record.qty_to_buy.saturating_sub(incremental),
            TradeType::Buy,
        ),
        OrderSide::Sell => (
            record.qty_to_sell.saturating_sub(incremental),
            record.qty_to_buy + incremental,
            TradeType::Sell,
        ),
    };

    tracker.update(
        &notice.symbol,
        TrackerUpdate {
            current_price: Some(notice.fill_price),
            trade_price: Some(notice.fill_price),
            trade_type: Some(trade_type),
            qty_to_sell: Some(qty_to_sell),
            qty_to_buy: Some(qty_to_buy),
            reset_extremes: true,
            ..Default::default()
        },
    );

    match notice.side {
        OrderSide::Buy => {
            tracker.set_holding(&notice.symbol, true);
            tracing::info!(
                "🟢 {} 매수 체결 +{}주 @ {}원 (보유 {}주)",
                notice.symbol,
                incremental,
                notice.fill_price,
                qty_to_sell
            );
        }
        OrderSide::Sell => {
            tracing::info!(
                "🔴 {} 매도 체결 -{}주 @ {}원 (잔여 {}주)",
                notice.symbol,
                incremental,
                notice.fill_price,
                qty_to_sell
            );
            if qty_to_sell == 0 {
                tracker.set_holding(&notice.symbol, false);
                tracker.mark_trade_done(&notice.symbol);
                tracing::info!("🏁 {} 일일 거래 완료", notice.symbol);
            }
        }
    }
}

/// Consume fill notices from the feed until the channel closes.
pub async fn run_fill_loop<C: BrokerClient>(
    mut rx: mpsc::Receiver<FillNotice>,
    fills: FillTracker,
    tracker: PriceTrackerStore,
    client: C,
    deposit: DepositSnapshot,
) {
    tracing::info!("🧾 Fill loop starting...");
    while let Some(notice) = rx.recv().await {
        handle_fill(&notice, &fills, &tracker, &client, &deposit).await;
    }
    tracing::info!("fill loop shutting down, channel closed");
}

/// Periodically cancel orders that have sat unfilled too long.
///
/// Each stale order gets exactly one cancel attempt; the local entry is
/// removed whether or not the broker call succeeds, so a dead order can
/// never be retried forever.
pub async fn run_reconciliation_loop<C: BrokerClient>(
    fills: FillTracker,
    client: C,
) {
    tracing::info!("🔁 Order reconciliation loop starting...");

    let mut ticker = interval(Duration::from_secs(RECONCILE_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        for (order_no, progress) in fills.stale(ChronoDuration::minutes(STALE_ORDER_MINUTES)) {
            tracing::warn!(
                "⏱ {} order {} unfilled for {}+ min ({}/{}주), cancelling",
                progress.symbol,
                order_no,
                STALE_ORDER_MINUTES,
                progress.cumulative_qty,
                progress.order_qty
            );

            // cancel_qty 0 = cancel all remaining.
            match client.cancel_order(&order_no, &progress.symbol, 0).await {
                Ok(result) if result.is_success() => {
                    tracing::info!("🚫 cancel accepted for {}", order_no);
                }
                Ok(result) => {
                    tracing::warn!(
                        "cancel rejected for {} (code {}): {}",
                        order_no,
                        result.return_code,
                        result.message
                    );
                }
                Err(e) => {
                    tracing::error!("cancel call failed for {}: {}", order_no, e);
                }
            }

            fills.remove(&order_no);
        }
    }
}
