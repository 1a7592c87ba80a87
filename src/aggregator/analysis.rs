use crate::models::TickEvent;
use chrono::{DateTime, Duration, FixedOffset};

/// Price direction over the short analysis window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Momentum {
    Up,
    Down,
    Flat,
}

/// Snapshot of the most recent tick flow for one symbol, computed fresh on
/// every evaluation sweep. This is the signal engine's market view.
#[derive(Debug, Clone)]
pub struct SweepAnalysis {
    pub symbol: String,
    pub time: DateTime<FixedOffset>,
    pub price: i64,
    pub open: i64,
    pub acc_amount: i64,
    /// Volume-weighted execution strength over the last minute.
    pub strength_1m: f64,
    /// Volume-weighted execution strength over the last five minutes.
    pub strength_5m: f64,
    pub buy_volume: i64,
    pub sell_volume: i64,
    /// Buy share of traded volume over the last minute, in percent.
    pub buy_ratio: f64,
    pub momentum: Momentum,
}

/// Analyze the buffered ticks for one symbol.
///
/// Returns `None` when the buffer is empty; callers treat that as
/// "no decision possible this cycle".
pub fn analyze(events: &[TickEvent]) -> Option<SweepAnalysis> {
    let latest = events.last()?;
    let one_min_start = latest.time - Duration::minutes(1);
    let five_min_start = latest.time - Duration::minutes(5);

    let one_min: Vec<&TickEvent> = events.iter().filter(|t| t.time >= one_min_start).collect();
    let five_min: Vec<&TickEvent> = events.iter().filter(|t| t.time >= five_min_start).collect();

    let buy_volume: i64 = one_min.iter().map(|t| t.volume.max(0)).sum();
    let sell_volume: i64 = one_min.iter().map(|t| (-t.volume).max(0)).sum();
    let traded = buy_volume + sell_volume;
    let buy_ratio = if traded > 0 {
        100.0 * buy_volume as f64 / traded as f64
    } else {
        latest.buy_ratio
    };

    let momentum = match one_min.first().map(|t| t.price) {
        Some(first) if latest.price > first => Momentum::Up,
        Some(first) if latest.price < first => Momentum::Down,
        _ => Momentum::Flat,
    };

    Some(SweepAnalysis {
        symbol: latest.symbol.clone(),
        time: latest.time,
        price: latest.price,
        open: latest.open,
        acc_amount: latest.acc_amount,
        strength_1m: weighted_strength(&one_min),
        strength_5m: weighted_strength(&five_min),
        buy_volume,
        sell_volume,
        buy_ratio,
        momentum,
    })
}

/// Execution strength weighted by traded volume, so a burst of large
/// executions dominates a trickle of odd lots.
fn weighted_strength(samples: &[&TickEvent]) -> f64 {
    let total: i64 = samples.iter().map(|t| t.volume.abs()).sum();
    if total == 0 {
        let n = samples.len();
        if n == 0 {
            return 100.0;
        }
        return samples.iter().map(|t| t.execution_strength).sum::<f64>() / n as f64;
    }
    samples
        .iter()
        .map(|t| t.execution_strength * t.volume.abs() as f64)
        .sum::<f64>()
        / total as f64
}
