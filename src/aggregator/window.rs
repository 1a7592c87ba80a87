use crate::ingest::TickBuffer;
use crate::models::{
    now_kst, MinuteAggregate, OhlcWindow, TickEvent, TrailingWindow, WindowStatus,
};
use chrono::{DateTime, Duration, DurationRound, FixedOffset};

use super::MinuteStore;

/// Minimum samples in the whole buffer before any aggregation happens.
const MIN_BUFFER_SAMPLES: usize = 10;
/// Minimum samples per trailing window.
const MIN_5MIN_SAMPLES: usize = 3;
const MIN_10MIN_SAMPLES: usize = 5;

const STRENGTH_FLOOR: f64 = 50.0;
const STRENGTH_CEIL: f64 = 200.0;
const STRENGTH_NO_SELL: f64 = 150.0;

/// Turns the rolling tick buffer into per-minute aggregates.
///
/// Each completed wall-clock minute gets a 1-minute OHLC window plus 5- and
/// 10-minute trailing averages, persisted write-once into the minute store.
#[derive(Clone)]
pub struct WindowAggregator {
    buffer: TickBuffer,
    store: MinuteStore,
}

impl WindowAggregator {
    pub fn new(buffer: TickBuffer, store: MinuteStore) -> Self {
        Self { buffer, store }
    }

    pub fn store(&self) -> &MinuteStore {
        &self.store
    }

    /// Aggregate all completed minutes for a symbol.
    ///
    /// Returns `false` when the buffer holds too few samples to say anything;
    /// that is a status, not an error. Minutes already persisted are skipped,
    /// so the call is safe to repeat.
    pub fn compute_for_symbol(&self, symbol: &str) -> bool {
        let events = match self.buffer.events(symbol) {
            Ok(e) => e,
            Err(e) => {
                tracing::error!("tick buffer read failed for {}: {}", symbol, e);
                return false;
            }
        };

        if events.len() < MIN_BUFFER_SAMPLES {
            tracing::debug!(
                "{}: {} samples in buffer, need {} - skipping aggregation",
                symbol,
                events.len(),
                MIN_BUFFER_SAMPLES
            );
            return false;
        }

        let first = events[0].time;
        let last = events[events.len() - 1].time;
        let current_minute = truncate_to_minute(now_kst());

        let mut minute = truncate_to_minute(first);
        let mut written = 0usize;

        // A minute is complete once its end boundary lies strictly inside
        // the buffered span. The still-filling wall-clock minute never
        // qualifies.
        while minute + Duration::minutes(1) < last {
            if minute >= current_minute {
                break;
            }
            let label = minute.format("%H:%M").to_string();
            if !self.store.contains(symbol, &label) {
                let aggregate = build_minute(symbol, &label, minute, &events);
                if self.store.put_if_absent(aggregate) {
                    written += 1;
                }
            }
            minute += Duration::minutes(1);
        }

        if written > 0 {
            tracing::debug!("{}: wrote {} minute aggregates", symbol, written);
        }
        true
    }
}

fn truncate_to_minute(t: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    t.duration_trunc(Duration::minutes(1)).unwrap_or(t)
}

fn build_minute(
    symbol: &str,
    label: &str,
    minute: DateTime<FixedOffset>,
    events: &[TickEvent],
) -> MinuteAggregate {
    let end = minute + Duration::minutes(1);

    MinuteAggregate {
        symbol: symbol.to_string(),
        minute: label.to_string(),
        one_min: ohlc_window(events, minute, end),
        five_min: trailing_window(events, end - Duration::minutes(5), end, MIN_5MIN_SAMPLES),
        ten_min: trailing_window(events, end - Duration::minutes(10), end, MIN_10MIN_SAMPLES),
        created_at: now_kst(),
    }
}

fn ohlc_window(
    events: &[TickEvent],
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
) -> OhlcWindow {
    let samples: Vec<&TickEvent> = events
        .iter()
        .filter(|t| t.time >= start && t.time < end)
        .collect();

    if samples.is_empty() {
        return OhlcWindow::insufficient();
    }

    let prices: Vec<i64> = samples.iter().map(|t| t.price).collect();
    let avg = prices.iter().sum::<i64>() as f64 / prices.len() as f64;
    let strength = samples.iter().map(|t| t.execution_strength).sum::<f64>()
        / samples.len() as f64;

    OhlcWindow {
        status: WindowStatus::Completed,
        open: prices[0],
        high: *prices.iter().max().unwrap_or(&prices[0]),
        low: *prices.iter().min().unwrap_or(&prices[0]),
        close: prices[prices.len() - 1],
        avg_price: avg,
        sample_count: samples.len(),
        strength,
    }
}

fn trailing_window(
    events: &[TickEvent],
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    min_samples: usize,
) -> TrailingWindow {
    let samples: Vec<&TickEvent> = events
        .iter()
        .filter(|t| t.time >= start && t.time < end)
        .collect();

    if samples.len() < min_samples {
        return TrailingWindow::insufficient();
    }

    let avg = samples.iter().map(|t| t.price).sum::<i64>() as f64 / samples.len() as f64;

    TrailingWindow {
        status: WindowStatus::Completed,
        avg_price: avg,
        sample_count: samples.len(),
        strength: volume_strength(&samples),
    }
}

/// Buy-vs-sell pressure score: 100 x buy volume over sell volume, clamped
/// to [50, 200]. All-buy flow pins at 150, all-sell flow at 50.
fn volume_strength(samples: &[&TickEvent]) -> f64 {
    let buy: i64 = samples.iter().map(|t| t.volume.max(0)).sum();
    let sell: i64 = samples.iter().map(|t| (-t.volume).max(0)).sum();

    if buy == 0 {
        return STRENGTH_FLOOR;
    }
    if sell == 0 {
        return STRENGTH_NO_SELL;
    }
    (100.0 * buy as f64 / sell as f64).clamp(STRENGTH_FLOOR, STRENGTH_CEIL)
}
