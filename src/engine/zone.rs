use crate::aggregator::{Momentum, SweepAnalysis};
use crate::models::{SessionZone, TradeAction, TradeType, TradingSignal};
use chrono::{DateTime, Duration, FixedOffset, TimeZone};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{classify_zone, SignalContext, Strategy};

/// Thresholds for the time-zone policy. Percentages are absolute, e.g.
/// `2.0` means two percent.
#[derive(Debug, Clone)]
pub struct ZoneConfig {
    /// No action while |change from trade price| stays inside this band.
    pub holding_band_pct: f64,
    /// Above this gain, only the trailing stop can trigger a sell.
    pub full_profit_pct: f64,
    /// Sell when price retraces this far from the post-trade high.
    pub trailing_stop_pct: f64,
    /// Gap zone: sell this far below the session high since trade.
    pub gap_high_drop_pct: f64,
    /// Gap and afternoon zones: sell this far below the trade price.
    pub loss_cut_pct: f64,
    pub gap_min_strength: f64,
    /// Minimum extrapolated 5-minute trade amount, in KRW.
    pub gap_min_amount: i64,
    pub gap_min_open_rise_pct: f64,
    /// Afternoon: sell this far below the post-13:00 high.
    pub afternoon_drop_pct: f64,
    /// Holding a position with no market data for this long forces a sell.
    pub outage_minutes: i64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            holding_band_pct: 2.0,
            full_profit_pct: 4.0,
            trailing_stop_pct: 2.0,
            gap_high_drop_pct: 2.0,
            loss_cut_pct: 1.0,
            gap_min_strength: 150.0,
            gap_min_amount: 100_000_000,
            gap_min_open_rise_pct: 1.0,
            afternoon_drop_pct: 1.0,
            outage_minutes: 5,
        }
    }
}

/// The active signal policy: one rule set per session zone.
///
/// Keeps two pieces of cross-evaluation state per symbol: the high-water
/// mark since 13:00 and the start of any ongoing market-data outage.
pub struct ZoneStrategy {
    config: ZoneConfig,
    afternoon_high: RwLock<HashMap<String, i64>>,
    outage_since: RwLock<HashMap<String, DateTime<FixedOffset>>>,
}

impl Default for ZoneStrategy {
    fn default() -> Self {
        Self::new(ZoneConfig::default())
    }
}

impl ZoneStrategy {
    pub fn new(config: ZoneConfig) -> Self {
        Self {
            config,
            afternoon_high: RwLock::new(HashMap::new()),
            outage_since: RwLock::new(HashMap::new()),
        }
    }

    /// Forget per-day state ahead of the next session.
    pub fn reset_daily(&self) {
        if let Ok(mut map) = self.afternoon_high.write() {
            map.clear();
        }
        if let Ok(mut map) = self.outage_since.write() {
            map.clear();
        }
    }

    fn note_data_ok(&self, symbol: &str) {
        if let Ok(mut map) = self.outage_since.write() {
            map.remove(symbol);
        }
    }

    /// Track a continuing data outage; returns true once it has lasted
    /// long enough to force liquidation.
    fn note_data_missing(&self, symbol: &str, now: DateTime<FixedOffset>) -> bool {
        let mut map = match self.outage_since.write() {
            Ok(m) => m,
            Err(_) => return false,
        };
        let since = *map.entry(symbol.to_string()).or_insert(now);
        now - since >= Duration::minutes(self.config.outage_minutes)
    }

    /// Post-13:00 high-water mark, updated with the current price.
    fn afternoon_high(&self, symbol: &str, price: i64) -> i64 {
        let mut map = match self.afternoon_high.write() {
            Ok(m) => m,
            Err(_) => return price,
        };
        let entry = map.entry(symbol.to_string()).or_insert(price);
        if price > *entry {
            *entry = price;
        }
        *entry
    }

    fn gap_signal(&self, ctx: &SignalContext, analysis: &SweepAnalysis) -> TradingSignal {
        let record = ctx.record;
        let zone = SessionZone::GapTrading;
        let price = record.current_price;

        if record.qty_to_sell > 0 && record.trade_price > 0 {
            let high_floor = record.highest_price as f64 * (1.0 - self.config.gap_high_drop_pct / 100.0);
            let loss_floor = record.trade_price as f64 * (1.0 - self.config.loss_cut_pct / 100.0);

            if record.highest_price > 0 && (price as f64) <= high_floor {
                return TradingSignal::checked(
                    TradeAction::Sell,
                    record.qty_to_sell,
                    format!("갭 매도: 고점 {} 대비 2% 하락", record.highest_price),
                    zone,
                );
            }
            if (price as f64) <= loss_floor {
                return TradingSignal::checked(
                    TradeAction::Sell,
                    record.qty_to_sell,
                    format!("갭 매도: 매수가 {} 대비 1% 하락", record.trade_price),
                    zone,
                );
            }
        }

        if record.qty_to_buy > 0 {
            let open_rise_ok = analysis.open > 0
                && (price as f64)
                    >= analysis.open as f64 * (1.0 + self.config.gap_min_open_rise_pct / 100.0);
            let amount = extrapolated_5min_amount(analysis.acc_amount, ctx.now);
            if analysis.strength_1m >= self.config.gap_min_strength
                && amount >= self.config.gap_min_amount as f64
                && open_rise_ok
            {
                return TradingSignal::checked(
                    TradeAction::Buy,
                    record.qty_to_buy,
                    format!(
                        "갭 매수: 체결강도 {:.0}, 5분 거래대금 {:.0}원",
                        analysis.strength_1m, amount
                    ),
                    zone,
                );
            }
        }

        TradingSignal::neutral("갭 구간 조건 미충족", zone)
    }

    fn main_signal(&self, ctx: &SignalContext, analysis: &SweepAnalysis) -> TradingSignal {
        let record = ctx.record;
        let zone = SessionZone::MainTrading;
        let price = record.current_price as f64;

        if record.qty_to_sell > 0 && record.trade_price > 0 {
            let change = record.change_from_trade();

            // Inclusive band boundary: exactly +/-2.0% is still "no action".
            if change.abs() <= self.config.holding_band_pct {
                return TradingSignal::neutral(
                    format!("보유 밴드 내 ({:+.2}%)", change),
                    zone,
                );
            }

            if change < -self.config.holding_band_pct {
                return TradingSignal::checked(
                    TradeAction::Sell,
                    record.qty_to_sell,
                    format!("손절 매도 ({:+.2}%)", change),
                    zone,
                );
            }

            // Above the band: profit management.
            let trailing_floor =
                record.highest_price as f64 * (1.0 - self.config.trailing_stop_pct / 100.0);
            let trailing_hit = record.highest_price > 0 && price <= trailing_floor;

            if change >= self.config.full_profit_pct {
                if trailing_hit {
                    return TradingSignal::checked(
                        TradeAction::Sell,
                        record.qty_to_sell,
                        format!("추적 손절 매도: 고점 {} 대비 2% 하락", record.highest_price),
                        zone,
                    );
                }
                return TradingSignal::neutral(format!("수익 추세 유지 ({:+.2}%)", change), zone);
            }

            // 2% < change < 4%: lock in the +2% target or trail out.
            let lock_in = record.trade_price as f64 * (1.0 + self.config.holding_band_pct / 100.0);
            if price <= lock_in || trailing_hit {
                return TradingSignal::checked(
                    TradeAction::Sell,
                    record.qty_to_sell,
                    format!("수익 확정 매도 ({:+.2}%)", change),
                    zone,
                );
            }
            return TradingSignal::neutral(format!("보유 지속 ({:+.2}%)", change), zone);
        }

        if record.qty_to_buy > 0 {
            let score = momentum_score(analysis);
            if score >= 2 {
                return TradingSignal::checked(
                    TradeAction::Buy,
                    record.qty_to_buy,
                    format!(
                        "모멘텀 매수: score {} (강도 {:.0}, 매수비중 {:.0}%)",
                        score, analysis.strength_1m, analysis.buy_ratio
                    ),
                    zone,
                );
            }
        }

        TradingSignal::neutral("본장 조건 미충족", zone)
    }

    fn afternoon_signal(&self, ctx: &SignalContext) -> TradingSignal {
        let record = ctx.record;
        let zone = SessionZone::Afternoon;
        let price = record.current_price;

        // No new buys after 13:00; the high-water mark restarts fresh here.
        let high = self.afternoon_high(&record.symbol, price);

        if record.qty_to_sell > 0 {
            let drop_floor = high as f64 * (1.0 - self.config.afternoon_drop_pct / 100.0);
            if (price as f64) <= drop_floor {
                return TradingSignal::checked(
                    TradeAction::Sell,
                    record.qty_to_sell,
                    format!("오후 매도: 오후 고점 {} 대비 1% 하락", high),
                    zone,
                );
            }
            if record.trade_price > 0 {
                let loss_floor =
                    record.trade_price as f64 * (1.0 - self.config.loss_cut_pct / 100.0);
                if (price as f64) <= loss_floor {
                    return TradingSignal::checked(
                        TradeAction::Sell,
                        record.qty_to_sell,
                        format!("오후 매도: 매수가 {} 대비 1% 하락", record.trade_price),
                        zone,
                    );
                }
            }
        }

        TradingSignal::neutral("오후 구간 조건 미충족", zone)
    }
}

impl Strategy for ZoneStrategy {
    fn evaluate(&self, ctx: &SignalContext) -> TradingSignal {
        let record = ctx.record;
        let zone = classify_zone(ctx.now);

        // The symbol finished its buy->sell cycle for the day.
        if record.qty_to_sell == 0 && record.trade_type == TradeType::Sell {
            return TradingSignal::neutral("일일 거래 완료", zone);
        }

        if matches!(zone, SessionZone::Closed | SessionZone::Monitor) {
            return TradingSignal::neutral("관찰 구간", zone);
        }

        let analysis = match ctx.analysis {
            Some(a) => {
                self.note_data_ok(&record.symbol);
                a
            }
            None => {
                if self.note_data_missing(&record.symbol, ctx.now) && record.qty_to_sell > 0 {
                    return TradingSignal::checked(
                        TradeAction::Sell,
                        record.qty_to_sell,
                        "시세 데이터 장애: 보유분 청산",
                        zone,
                    );
                }
                return TradingSignal::neutral("시세 데이터 없음", zone);
            }
        };

        match zone {
            SessionZone::GapTrading => self.gap_signal(ctx, analysis),
            SessionZone::MainTrading => self.main_signal(ctx, analysis),
            SessionZone::Afternoon => self.afternoon_signal(ctx),
            SessionZone::Monitor | SessionZone::Closed => unreachable!("handled above"),
        }
    }

    fn name(&self) -> &str {
        "zone"
    }
}

/// Momentum score over the 1-minute analysis window.
fn momentum_score(a: &SweepAnalysis) -> i32 {
    if a.strength_1m > 120.0 && a.momentum == Momentum::Up && a.buy_ratio > 60.0 {
        3
    } else if a.strength_1m > 100.0 && a.buy_ratio > 55.0 {
        2
    } else if a.strength_1m < 80.0 && a.momentum == Momentum::Down && a.buy_ratio < 40.0 {
        -2
    } else {
        0
    }
}

/// Projected 5-minute trade amount from the day's cumulative amount:
/// amount per elapsed minute since 09:00, times five.
fn extrapolated_5min_amount(acc_amount: i64, now: DateTime<FixedOffset>) -> f64 {
    let open = now
        .date_naive()
        .and_hms_opt(9, 0, 0)
        .and_then(|dt| now.timezone().from_local_datetime(&dt).single())
        .unwrap_or(now);
    let elapsed = (now - open).num_minutes().max(1);
    acc_amount as f64 / elapsed as f64 * 5.0
}
