// Signal evaluation: session-zone classification and the decision policy.
pub mod zone;

pub use zone::{ZoneConfig, ZoneStrategy};

use crate::aggregator::SweepAnalysis;
use crate::models::{PriceTrackingRecord, SessionZone, TradingSignal};
use chrono::{DateTime, FixedOffset, Timelike};

/// Everything a strategy may look at for one evaluation of one symbol.
pub struct SignalContext<'a> {
    pub record: &'a PriceTrackingRecord,
    /// Fresh tick-flow analysis; `None` means no usable market data this
    /// cycle.
    pub analysis: Option<&'a SweepAnalysis>,
    pub now: DateTime<FixedOffset>,
}

/// Common interface for signal policies. One variant is active at a time,
/// chosen when the engine is wired together.
pub trait Strategy: Send + Sync {
    fn evaluate(&self, ctx: &SignalContext) -> TradingSignal;

    fn name(&self) -> &str;
}

/// Classify a KST wall-clock instant into its trading-session zone.
///
/// This is the single time authority; no other code compares wall-clock
/// times against session boundaries.
pub fn classify_zone(now: DateTime<FixedOffset>) -> SessionZone {
    let minute_of_day = now.hour() * 60 + now.minute();
    match minute_of_day {
        m if (540..545).contains(&m) => SessionZone::Monitor, // 09:00-09:05
        m if (545..570).contains(&m) => SessionZone::GapTrading, // 09:05-09:30
        m if (570..780).contains(&m) => SessionZone::MainTrading, // 09:30-13:00
        m if (780..900).contains(&m) => SessionZone::Afternoon, // 13:00-15:00
        _ => SessionZone::Closed,
    }
}
