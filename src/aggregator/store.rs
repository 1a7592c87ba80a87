use crate::models::{now_kst, MinuteAggregate};
use chrono::Duration;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Aggregates live this long before a sweep removes them.
const TTL_MINUTES: i64 = 30;

/// Write-once store of minute aggregates keyed by (symbol, "HH:MM").
///
/// A key, once written, is never overwritten; re-running the aggregator
/// over the same span is a no-op.
#[derive(Clone, Default)]
pub struct MinuteStore {
    data: Arc<RwLock<HashMap<(String, String), MinuteAggregate>>>,
}

impl MinuteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the key already exists. Returns whether the insert won.
    pub fn put_if_absent(&self, aggregate: MinuteAggregate) -> bool {
        let key = (aggregate.symbol.clone(), aggregate.minute.clone());
        let mut data = match self.data.write() {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("minute store lock poisoned: {}", e);
                return false;
            }
        };
        if data.contains_key(&key) {
            return false;
        }
        data.insert(key, aggregate);
        true
    }

    pub fn get(&self, symbol: &str, minute: &str) -> Option<MinuteAggregate> {
        let data = self.data.read().ok()?;
        data.get(&(symbol.to_string(), minute.to_string())).cloned()
    }

    pub fn contains(&self, symbol: &str, minute: &str) -> bool {
        self.data
            .read()
            .map(|d| d.contains_key(&(symbol.to_string(), minute.to_string())))
            .unwrap_or(false)
    }

    /// Most recently created aggregate for a symbol.
    pub fn latest(&self, symbol: &str) -> Option<MinuteAggregate> {
        let data = self.data.read().ok()?;
        data.values()
            .filter(|a| a.symbol == symbol)
            .max_by_key(|a| a.created_at)
            .cloned()
    }

    /// Drop aggregates past their TTL. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let cutoff = now_kst() - Duration::minutes(TTL_MINUTES);
        let mut data = match self.data.write() {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("minute store lock poisoned: {}", e);
                return 0;
            }
        };
        let before = data.len();
        data.retain(|_, a| a.created_at >= cutoff);
        let removed = before - data.len();
        if removed > 0 {
            tracing::debug!("purged {} expired minute aggregates", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
