use crate::broker::DailyCandle;
use crate::models::PeriodType;
use crate::tracker::{PriceTrackerStore, TrackerUpdate};

/// Calculate Simple Moving Average (SMA)
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Daily-chart indicators for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyIndicators {
    /// 20-day close average, rounded to whole won.
    pub ma20: i64,
    /// Day-over-day change of the MA, in percent.
    pub ma20_slope: f64,
    /// Mean of the last 20 daily slopes, in percent.
    pub ma20_avg_slope: f64,
}

/// 20-day MA on day `offset` back from the newest candle. Shorter windows
/// near the end of history still produce a value, matching the partial
/// rolling means the daily chart is read with.
fn ma20_at(closes_newest_first: &[f64], offset: usize) -> Option<f64> {
    if offset >= closes_newest_first.len() {
        return None;
    }
    let window = &closes_newest_first[offset..(offset + 20).min(closes_newest_first.len())];
    calculate_sma(window, window.len())
}

fn slope_at(closes_newest_first: &[f64], offset: usize) -> Option<f64> {
    let current = ma20_at(closes_newest_first, offset)?;
    let prev = ma20_at(closes_newest_first, offset + 1)?;
    if prev == 0.0 {
        return None;
    }
    Some((current - prev) / prev * 100.0)
}

/// Compute MA20 indicators from a daily chart (newest candle first).
pub fn daily_indicators(candles: &[DailyCandle]) -> Option<DailyIndicators> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close as f64).collect();

    let ma20 = ma20_at(&closes, 0)?;
    let ma20_slope = slope_at(&closes, 0).unwrap_or(0.0);

    let slopes: Vec<f64> = (0..20).filter_map(|i| slope_at(&closes, i)).collect();
    let ma20_avg_slope = if slopes.is_empty() {
        0.0
    } else {
        slopes.iter().sum::<f64>() / slopes.len() as f64
    };

    Some(DailyIndicators {
        ma20: ma20.round() as i64,
        ma20_slope,
        ma20_avg_slope,
    })
}

/// A symbol trades the long playbook only when its MA trend is up both
/// today and on average.
pub fn classify_period(indicators: &DailyIndicators) -> PeriodType {
    if indicators.ma20_slope > 0.0 && indicators.ma20_avg_slope > 0.0 {
        PeriodType::Long
    } else {
        PeriodType::Short
    }
}

/// Fill a symbol's `ma20*` fields from its daily chart.
pub fn apply_daily_indicators(
    tracker: &PriceTrackerStore,
    symbol: &str,
    candles: &[DailyCandle],
) -> bool {
    let Some(indicators) = daily_indicators(candles) else {
        tracing::warn!("{}: empty daily chart, MA20 left unset", symbol);
        return false;
    };

    let period_type = classify_period(&indicators);
    tracing::info!(
        "📈 {} MA20 {}원 slope {:.2}% avg {:.2}% ({:?})",
        symbol,
        indicators.ma20,
        indicators.ma20_slope,
        indicators.ma20_avg_slope,
        period_type
    );

    tracker
        .update(
            symbol,
            TrackerUpdate {
                ma20: Some(indicators.ma20 as f64),
                ma20_slope: Some(indicators.ma20_slope),
                ma20_avg_slope: Some(indicators.ma20_avg_slope),
                period_type: Some(period_type),
                ..Default::default()
            },
        )
        .is_some()
}
