use crate::models::TickEvent;
use chrono::{DateTime, Duration, FixedOffset};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

/// Retention horizon for raw ticks. The aggregator looks back 10 minutes,
/// so one extra minute gives it a full view of the oldest window.
const RETENTION_MINUTES: i64 = 11;

/// Thread-safe rolling buffer of raw tick events, one queue per symbol.
///
/// Entries older than the retention horizon are evicted on every push, so
/// the buffer stays bounded without a separate sweeper.
#[derive(Clone)]
pub struct TickBuffer {
    data: Arc<RwLock<HashMap<String, VecDeque<TickEvent>>>>,
    retention: Duration,
}

impl Default for TickBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TickBuffer {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            retention: Duration::minutes(RETENTION_MINUTES),
        }
    }

    #[cfg(test)]
    pub fn with_retention_minutes(minutes: i64) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            retention: Duration::minutes(minutes),
        }
    }

    /// Append a tick and evict anything past the retention horizon.
    pub fn push(&self, tick: TickEvent) -> Result<(), String> {
        let cutoff = tick.time - self.retention;
        let mut data = self.data.write().map_err(|e| e.to_string())?;

        let queue = data.entry(tick.symbol.clone()).or_default();
        queue.push_back(tick);

        while queue.front().is_some_and(|t| t.time < cutoff) {
            queue.pop_front();
        }

        Ok(())
    }

    /// All buffered ticks for a symbol, oldest first.
    pub fn events(&self, symbol: &str) -> Result<Vec<TickEvent>, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;
        Ok(data
            .get(symbol)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Ticks at or after `since`, oldest first.
    pub fn events_since(
        &self,
        symbol: &str,
        since: DateTime<FixedOffset>,
    ) -> Result<Vec<TickEvent>, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;
        Ok(data
            .get(symbol)
            .map(|q| q.iter().filter(|t| t.time >= since).cloned().collect())
            .unwrap_or_default())
    }

    pub fn len(&self, symbol: &str) -> Result<usize, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;
        Ok(data.get(symbol).map(|q| q.len()).unwrap_or(0))
    }

    pub fn is_empty(&self, symbol: &str) -> Result<bool, String> {
        Ok(self.len(symbol)? == 0)
    }

    pub fn symbols(&self) -> Result<Vec<String>, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;
        Ok(data.keys().cloned().collect())
    }

    pub fn clear_symbol(&self, symbol: &str) -> Result<(), String> {
        let mut data = self.data.write().map_err(|e| e.to_string())?;
        data.remove(symbol);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now_kst;

    fn tick_at(symbol: &str, minutes_ago: i64, price: i64) -> TickEvent {
        TickEvent {
            symbol: symbol.to_string(),
            time: now_kst() - Duration::minutes(minutes_ago),
            price,
            volume: 10,
            acc_volume: 1_000,
            acc_amount: price * 1_000,
            open: price,
            high: price,
            low: price,
            execution_strength: 100.0,
            buy_ratio: 50.0,
        }
    }

    #[test]
    fn test_push_and_read() {
        let buffer = TickBuffer::new();
        buffer.push(tick_at("005930", 2, 70_000)).unwrap();
        buffer.push(tick_at("005930", 1, 70_100)).unwrap();
        buffer.push(tick_at("005930", 0, 70_200)).unwrap();

        let events = buffer.events("005930").unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].price, 70_000);
        assert_eq!(events[2].price, 70_200);
    }

    #[test]
    fn test_retention_eviction() {
        let buffer = TickBuffer::with_retention_minutes(11);

        buffer.push(tick_at("005930", 20, 69_000)).unwrap();
        buffer.push(tick_at("005930", 15, 69_500)).unwrap();
        buffer.push(tick_at("005930", 5, 70_000)).unwrap();
        buffer.push(tick_at("005930", 0, 70_500)).unwrap();

        // The 20- and 15-minute-old ticks fall outside the 11-minute window.
        let events = buffer.events("005930").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].price, 70_000);
    }

    #[test]
    fn test_events_since() {
        let buffer = TickBuffer::new();
        buffer.push(tick_at("005930", 8, 70_000)).unwrap();
        buffer.push(tick_at("005930", 3, 70_100)).unwrap();
        buffer.push(tick_at("005930", 1, 70_200)).unwrap();

        let since = now_kst() - Duration::minutes(5);
        let events = buffer.events_since("005930", since).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].price, 70_100);
    }

    #[test]
    fn test_symbols_are_independent() {
        let buffer = TickBuffer::new();
        buffer.push(tick_at("005930", 0, 70_000)).unwrap();
        buffer.push(tick_at("000660", 0, 120_000)).unwrap();

        buffer.clear_symbol("005930").unwrap();

        assert_eq!(buffer.len("005930").unwrap(), 0);
        assert_eq!(buffer.len("000660").unwrap(), 1);
    }

    #[test]
    fn test_unknown_symbol_is_empty() {
        let buffer = TickBuffer::new();
        assert!(buffer.events("035720").unwrap().is_empty());
        assert!(buffer.is_empty("035720").unwrap());
    }

    #[test]
    fn test_thread_safety() {
        use std::thread;

        let buffer = TickBuffer::new();
        let clone = buffer.clone();

        let handle = thread::spawn(move || {
            for i in 0..50 {
                clone.push(tick_at("005930", 0, 70_000 + i)).unwrap();
            }
        });

        for i in 50..100 {
            buffer.push(tick_at("005930", 0, 70_000 + i)).unwrap();
        }

        handle.join().unwrap();
        assert_eq!(buffer.len("005930").unwrap(), 100);
    }
}
