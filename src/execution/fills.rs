use crate::ingest::FillNotice;
use crate::models::{now_kst, OrderSide};
use chrono::{DateTime, Duration, FixedOffset};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Cumulative fill progress for one live order.
///
/// The broker reports cumulative filled quantity per callback, not deltas;
/// this entry exists solely to turn those into increments. Deleted once the
/// order is fully filled or cancelled.
#[derive(Debug, Clone)]
pub struct OrderFillProgress {
    pub symbol: String,
    pub side: OrderSide,
    pub order_qty: u32,
    pub cumulative_qty: u32,
    pub untraded_qty: u32,
    pub placed_at: DateTime<FixedOffset>,
}

/// What one fill callback amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillOutcome {
    /// Order was cancelled or rejected; local bookkeeping dropped.
    Cancelled,
    /// Some quantity filled; more remains.
    Partial { incremental: u32 },
    /// The order is done; entry removed.
    Completed { incremental: u32 },
}

/// Shared map of live-order fill progress, keyed by broker order number.
#[derive(Clone, Default)]
pub struct FillTracker {
    entries: Arc<RwLock<HashMap<String, OrderFillProgress>>>,
}

impl FillTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly placed order.
    pub fn register(&self, order_no: &str, symbol: &str, side: OrderSide, order_qty: u32) {
        let mut entries = match self.entries.write() {
            Ok(e) => e,
            Err(e) => {
                tracing::error!("fill tracker lock poisoned: {}", e);
                return;
            }
        };
        entries.insert(
            order_no.to_string(),
            OrderFillProgress {
                symbol: symbol.to_string(),
                side,
                order_qty,
                cumulative_qty: 0,
                untraded_qty: order_qty,
                placed_at: now_kst(),
            },
        );
    }

    /// Fold one broker callback into the progress map.
    ///
    /// The incremental quantity is clamped at zero, so stale or out-of-order
    /// callbacks can never un-fill an order.
    pub fn apply(&self, notice: &FillNotice) -> FillOutcome {
        let mut entries = match self.entries.write() {
            Ok(e) => e,
            Err(e) => {
                tracing::error!("fill tracker lock poisoned: {}", e);
                return FillOutcome::Partial { incremental: 0 };
            }
        };

        if notice.cancelled {
            entries.remove(&notice.order_no);
            return FillOutcome::Cancelled;
        }

        let entry = entries
            .entry(notice.order_no.clone())
            .or_insert_with(|| OrderFillProgress {
                symbol: notice.symbol.clone(),
                side: notice.side,
                order_qty: notice.order_qty,
                cumulative_qty: 0,
                untraded_qty: notice.order_qty,
                placed_at: now_kst(),
            });

        let incremental = notice.cumulative_qty.saturating_sub(entry.cumulative_qty);
        entry.cumulative_qty = entry.cumulative_qty.max(notice.cumulative_qty);
        entry.untraded_qty = notice.untraded_qty;

        let complete = entry.cumulative_qty >= entry.order_qty && entry.untraded_qty == 0;
        if complete {
            entries.remove(&notice.order_no);
            FillOutcome::Completed { incremental }
        } else {
            FillOutcome::Partial { incremental }
        }
    }

    /// Orders placed before the cutoff and still unfilled.
    pub fn stale(&self, older_than: Duration) -> Vec<(String, OrderFillProgress)> {
        let cutoff = now_kst() - older_than;
        self.entries
            .read()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, p)| p.placed_at < cutoff)
                    .map(|(no, p)| (no.clone(), p.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop an entry unconditionally (used after a cancel attempt, whatever
    /// its outcome, so a dead order can never be cancelled twice).
    pub fn remove(&self, order_no: &str) -> Option<OrderFillProgress> {
        self.entries.write().ok()?.remove(order_no)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(order_no: &str, cumulative: u32, untraded: u32) -> FillNotice {
        FillNotice {
            order_no: order_no.to_string(),
            symbol: "005930".to_string(),
            side: OrderSide::Buy,
            order_qty: 100,
            cumulative_qty: cumulative,
            untraded_qty: untraded,
            fill_price: 70_100,
            cancelled: false,
        }
    }

    #[test]
    fn test_incremental_from_cumulative_callbacks() {
        let tracker = FillTracker::new();
        tracker.register("0000138", "005930", OrderSide::Buy, 100);

        // 40 of 100 filled.
        let outcome = tracker.apply(&notice("0000138", 40, 60));
        assert_eq!(outcome, FillOutcome::Partial { incremental: 40 });
        assert_eq!(tracker.len(), 1);

        // Remaining 60 fill; entry removed.
        let outcome = tracker.apply(&notice("0000138", 100, 0));
        assert_eq!(outcome, FillOutcome::Completed { incremental: 60 });
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_out_of_order_callback_never_negative() {
        let tracker = FillTracker::new();
        tracker.register("0000138", "005930", OrderSide::Buy, 100);

        tracker.apply(&notice("0000138", 70, 30));
        // A stale callback arrives late; increment clamps to zero.
        let outcome = tracker.apply(&notice("0000138", 40, 30));
        assert_eq!(outcome, FillOutcome::Partial { incremental: 0 });
    }

    #[test]
    fn test_unregistered_order_is_adopted() {
        let tracker = FillTracker::new();
        let outcome = tracker.apply(&notice("0000999", 25, 75));
        assert_eq!(outcome, FillOutcome::Partial { incremental: 25 });
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_cancel_drops_entry() {
        let tracker = FillTracker::new();
        tracker.register("0000138", "005930", OrderSide::Buy, 100);

        let mut cancelled = notice("0000138", 0, 100);
        cancelled.cancelled = true;
        assert_eq!(tracker.apply(&cancelled), FillOutcome::Cancelled);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_stale_selection() {
        let tracker = FillTracker::new();
        tracker.register("0000001", "005930", OrderSide::Buy, 100);
        // Backdate it.
        {
            let mut entries = tracker.entries.write().unwrap();
            entries.get_mut("0000001").unwrap().placed_at = now_kst() - Duration::minutes(6);
        }
        tracker.register("0000002", "000660", OrderSide::Sell, 30);

        let stale = tracker.stale(Duration::minutes(5));
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].0, "0000001");
    }
}
