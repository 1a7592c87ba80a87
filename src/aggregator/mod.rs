// Per-minute aggregation over the rolling tick buffer, plus the
// fresh-per-sweep analysis consumed by the signal engine.
pub mod analysis;
pub mod store;
pub mod window;

pub use analysis::{analyze, Momentum, SweepAnalysis};
pub use store::MinuteStore;
pub use window::WindowAggregator;
