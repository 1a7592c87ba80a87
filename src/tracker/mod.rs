use crate::models::{now_kst, PeriodType, PriceTrackingRecord, TradeType};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

/// Partial update applied to a tracking record. `None` fields keep their
/// current value.
#[derive(Debug, Clone, Default)]
pub struct TrackerUpdate {
    pub current_price: Option<i64>,
    pub trade_price: Option<i64>,
    pub price_to_buy: Option<i64>,
    pub price_to_sell: Option<i64>,
    pub qty_to_sell: Option<u32>,
    pub qty_to_buy: Option<u32>,
    pub trade_type: Option<TradeType>,
    pub ma20: Option<f64>,
    pub ma20_slope: Option<f64>,
    pub ma20_avg_slope: Option<f64>,
    pub is_first: Option<bool>,
    pub is_afternoon: Option<bool>,
    pub period_type: Option<PeriodType>,
    /// Collapse both extremes to the (new) trade price.
    pub reset_extremes: bool,
    /// Collapse both extremes to the current price.
    pub force_extremes: bool,
}

impl TrackerUpdate {
    pub fn price(current_price: i64) -> Self {
        Self {
            current_price: Some(current_price),
            ..Default::default()
        }
    }

    pub fn trade(trade_price: i64, trade_type: TradeType) -> Self {
        Self {
            trade_price: Some(trade_price),
            trade_type: Some(trade_type),
            reset_extremes: true,
            ..Default::default()
        }
    }
}

/// Store of per-symbol tracking records.
///
/// Each record sits behind its own mutex under an outer map lock, so updates
/// for one symbol serialize while different symbols proceed in parallel.
#[derive(Clone, Default)]
pub struct PriceTrackerStore {
    records: Arc<RwLock<HashMap<String, Arc<Mutex<PriceTrackingRecord>>>>>,
    holding: Arc<RwLock<HashSet<String>>>,
    trade_done: Arc<RwLock<HashSet<String>>>,
}

impl PriceTrackerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or overwrite) the record for a symbol.
    pub fn initialize(&self, record: PriceTrackingRecord) {
        let symbol = record.symbol.clone();
        let mut records = match self.records.write() {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("tracker map lock poisoned on initialize: {}", e);
                return;
            }
        };
        records.insert(symbol.clone(), Arc::new(Mutex::new(record)));
        tracing::debug!("📌 Tracking initialized for {}", symbol);
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.records
            .read()
            .map(|r| r.contains_key(symbol))
            .unwrap_or(false)
    }

    /// Snapshot of the record for a symbol.
    pub fn read(&self, symbol: &str) -> Option<PriceTrackingRecord> {
        let entry = {
            let records = self.records.read().ok()?;
            records.get(symbol)?.clone()
        };
        let record = entry.lock().ok()?;
        Some(record.clone())
    }

    /// Apply a partial update and return the resulting record.
    ///
    /// Returns `None` (logged) when no record exists for the symbol; a price
    /// update for an untracked symbol is a normal race, not an error.
    pub fn update(&self, symbol: &str, update: TrackerUpdate) -> Option<PriceTrackingRecord> {
        let entry = {
            let records = self.records.read().ok()?;
            match records.get(symbol) {
                Some(e) => e.clone(),
                None => {
                    tracing::debug!("tracker update for untracked symbol {}, skipped", symbol);
                    return None;
                }
            }
        };

        let mut record = entry.lock().ok()?;
        let now = now_kst();

        if let Some(price) = update.current_price {
            record.current_price = price;
        }
        if let Some(price) = update.trade_price {
            record.trade_price = price;
            record.trade_time = now;
        }
        if let Some(v) = update.price_to_buy {
            record.price_to_buy = v;
        }
        if let Some(v) = update.price_to_sell {
            record.price_to_sell = v;
        }
        if let Some(v) = update.qty_to_sell {
            record.qty_to_sell = v;
        }
        if let Some(v) = update.qty_to_buy {
            record.qty_to_buy = v;
        }
        if let Some(v) = update.trade_type {
            record.trade_type = v;
        }
        if let Some(v) = update.ma20 {
            record.ma20 = v;
        }
        if let Some(v) = update.ma20_slope {
            record.ma20_slope = v;
        }
        if let Some(v) = update.ma20_avg_slope {
            record.ma20_avg_slope = v;
        }
        if let Some(v) = update.is_first {
            record.is_first = v;
        }
        if let Some(v) = update.is_afternoon {
            record.is_afternoon = v;
        }
        if let Some(v) = update.period_type {
            record.period_type = v;
        }

        if update.reset_extremes {
            record.highest_price = record.trade_price;
            record.lowest_price = record.trade_price;
        } else if update.force_extremes {
            record.highest_price = record.current_price;
            record.lowest_price = record.current_price;
        } else {
            // Extremes only ever widen.
            if record.current_price > record.highest_price {
                record.highest_price = record.current_price;
            }
            if record.lowest_price == 0 || record.current_price < record.lowest_price {
                record.lowest_price = record.current_price;
            }
        }

        record.last_updated = now;
        Some(record.clone())
    }

    pub fn remove(&self, symbol: &str) -> Option<PriceTrackingRecord> {
        let entry = {
            let mut records = self.records.write().ok()?;
            records.remove(symbol)?
        };
        let record = entry.lock().ok()?;
        tracing::debug!("📍 Tracking removed for {}", symbol);
        Some(record.clone())
    }

    pub fn symbols(&self) -> Vec<String> {
        self.records
            .read()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    }

    // --- watch / done bookkeeping -------------------------------------------

    pub fn is_holding(&self, symbol: &str) -> bool {
        self.holding
            .read()
            .map(|h| h.contains(symbol))
            .unwrap_or(false)
    }

    pub fn set_holding(&self, symbol: &str, holding: bool) {
        if let Ok(mut set) = self.holding.write() {
            if holding {
                set.insert(symbol.to_string());
            } else {
                set.remove(symbol);
            }
        }
    }

    pub fn is_trade_done(&self, symbol: &str) -> bool {
        self.trade_done
            .read()
            .map(|d| d.contains(symbol))
            .unwrap_or(false)
    }

    pub fn mark_trade_done(&self, symbol: &str) {
        if let Ok(mut set) = self.trade_done.write() {
            set.insert(symbol.to_string());
        }
    }

    pub fn clear_trade_done(&self, symbol: &str) {
        if let Ok(mut set) = self.trade_done.write() {
            set.remove(symbol);
        }
    }

    /// Clear the done set ahead of the next session.
    pub fn reset_daily(&self) {
        if let Ok(mut set) = self.trade_done.write() {
            let cleared = set.len();
            set.clear();
            tracing::info!("🌅 Daily reset: cleared {} completed symbols", cleared);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracked_store(symbol: &str) -> PriceTrackerStore {
        let store = PriceTrackerStore::new();
        store.initialize(PriceTrackingRecord::new(symbol));
        store
    }

    #[test]
    fn test_update_missing_symbol_returns_none() {
        let store = PriceTrackerStore::new();
        assert!(store.update("005930", TrackerUpdate::price(70_000)).is_none());
    }

    #[test]
    fn test_extremes_only_widen() {
        let store = tracked_store("005930");

        store.update("005930", TrackerUpdate::price(70_000)).unwrap();
        store.update("005930", TrackerUpdate::price(71_000)).unwrap();
        let record = store.update("005930", TrackerUpdate::price(70_500)).unwrap();

        assert_eq!(record.highest_price, 71_000);
        assert_eq!(record.lowest_price, 70_000);
        assert_eq!(record.current_price, 70_500);
    }

    #[test]
    fn test_trade_price_resets_extremes() {
        let store = tracked_store("005930");

        store.update("005930", TrackerUpdate::price(72_000)).unwrap();
        let record = store
            .update("005930", TrackerUpdate::trade(70_000, TradeType::Buy))
            .unwrap();

        assert_eq!(record.trade_price, 70_000);
        assert_eq!(record.highest_price, 70_000);
        assert_eq!(record.lowest_price, 70_000);
        assert_eq!(record.trade_type, TradeType::Buy);
    }

    #[test]
    fn test_force_extremes_uses_current_price() {
        let store = tracked_store("005930");

        store.update("005930", TrackerUpdate::price(70_000)).unwrap();
        store.update("005930", TrackerUpdate::price(73_000)).unwrap();

        let record = store
            .update(
                "005930",
                TrackerUpdate {
                    current_price: Some(71_000),
                    force_extremes: true,
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(record.highest_price, 71_000);
        assert_eq!(record.lowest_price, 71_000);
    }

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let store = tracked_store("005930");

        store
            .update(
                "005930",
                TrackerUpdate {
                    qty_to_buy: Some(140),
                    ..Default::default()
                },
            )
            .unwrap();
        let record = store
            .update("005930", TrackerUpdate::price(70_000))
            .unwrap();

        assert_eq!(record.qty_to_buy, 140);
        assert_eq!(record.current_price, 70_000);
    }

    #[test]
    fn test_trade_done_lifecycle() {
        let store = tracked_store("005930");

        assert!(!store.is_trade_done("005930"));
        store.mark_trade_done("005930");
        assert!(store.is_trade_done("005930"));

        store.reset_daily();
        assert!(!store.is_trade_done("005930"));
    }

    #[test]
    fn test_holding_set() {
        let store = tracked_store("005930");

        store.set_holding("005930", true);
        assert!(store.is_holding("005930"));
        store.set_holding("005930", false);
        assert!(!store.is_holding("005930"));
    }

    #[test]
    fn test_remove_returns_final_state() {
        let store = tracked_store("005930");
        store.update("005930", TrackerUpdate::price(70_000)).unwrap();

        let record = store.remove("005930").unwrap();
        assert_eq!(record.current_price, 70_000);
        assert!(!store.contains("005930"));
    }
}
