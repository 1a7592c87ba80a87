// Realtime feed intake: raw event dispatch, tick validation, rolling buffer.
pub mod dispatch;
pub mod tick_buffer;

pub use dispatch::{EventDispatcher, FillNotice, IndexSnapshot, RealtimeEvent};
pub use tick_buffer::TickBuffer;

use crate::models::TickEvent;
use crate::tracker::{PriceTrackerStore, TrackerUpdate};

/// Board-lot sizing: shares for one allocation slice, rounded up to the
/// next multiple of 10.
pub fn sized_order_qty(allocation_krw: i64, price: i64) -> u32 {
    if price <= 0 || allocation_krw <= 0 {
        return 0;
    }
    let shares = allocation_krw as f64 / price as f64;
    ((shares / 10.0).ceil() as u32) * 10
}

/// Applies validated ticks to the buffer and the tracking store.
#[derive(Clone)]
pub struct TickIngest {
    buffer: TickBuffer,
    tracker: PriceTrackerStore,
    allocation_krw: i64,
}

impl TickIngest {
    pub fn new(buffer: TickBuffer, tracker: PriceTrackerStore, allocation_krw: i64) -> Self {
        Self {
            buffer,
            tracker,
            allocation_krw,
        }
    }

    pub fn buffer(&self) -> &TickBuffer {
        &self.buffer
    }

    /// Ingest one validated tick.
    ///
    /// Buffers it for aggregation, then updates the tracking record if the
    /// symbol is tracked. The first tick seen for a fresh record also sizes
    /// the symbol's buy quantity from the per-symbol allocation.
    pub fn ingest(&self, tick: TickEvent) {
        let symbol = tick.symbol.clone();
        let price = tick.price;

        if let Err(e) = self.buffer.push(tick) {
            tracing::error!("tick buffer write failed for {}: {}", symbol, e);
        }

        let Some(record) = self.tracker.read(&symbol) else {
            return;
        };

        if record.is_first {
            let qty = sized_order_qty(self.allocation_krw, price);
            self.tracker.update(
                &symbol,
                TrackerUpdate {
                    current_price: Some(price),
                    qty_to_buy: Some(qty),
                    is_first: Some(false),
                    ..Default::default()
                },
            );
            tracing::info!("🎯 {} first tick @ {}원, sized buy qty {}", symbol, price, qty);
        } else {
            self.tracker.update(&symbol, TrackerUpdate::price(price));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_kst, PriceTrackingRecord};

    fn tick(symbol: &str, price: i64) -> TickEvent {
        TickEvent {
            symbol: symbol.to_string(),
            time: now_kst(),
            price,
            volume: 10,
            acc_volume: 100,
            acc_amount: price * 100,
            open: price,
            high: price,
            low: price,
            execution_strength: 100.0,
            buy_ratio: 50.0,
        }
    }

    #[test]
    fn test_sized_order_qty_rounds_up_to_ten() {
        // 10,000,000 / 70,000 = 142.86 shares -> 150
        assert_eq!(sized_order_qty(10_000_000, 70_000), 150);
        // Exact multiple stays put: 1,000,000 / 10,000 = 100
        assert_eq!(sized_order_qty(1_000_000, 10_000), 100);
        assert_eq!(sized_order_qty(10_000_000, 0), 0);
    }

    #[test]
    fn test_first_tick_sizes_buy_quantity() {
        let tracker = PriceTrackerStore::new();
        tracker.initialize(PriceTrackingRecord::new("005930"));
        let ingest = TickIngest::new(TickBuffer::new(), tracker.clone(), 10_000_000);

        ingest.ingest(tick("005930", 70_000));

        let record = tracker.read("005930").unwrap();
        assert!(!record.is_first);
        assert_eq!(record.qty_to_buy, 150);
        assert_eq!(record.current_price, 70_000);

        // Second tick only moves the price.
        ingest.ingest(tick("005930", 70_500));
        let record = tracker.read("005930").unwrap();
        assert_eq!(record.qty_to_buy, 150);
        assert_eq!(record.current_price, 70_500);
    }

    #[test]
    fn test_untracked_symbol_still_buffers() {
        let ingest = TickIngest::new(TickBuffer::new(), PriceTrackerStore::new(), 10_000_000);
        ingest.ingest(tick("000660", 120_000));
        assert_eq!(ingest.buffer().len("000660").unwrap(), 1);
    }
}
