pub mod executor;
pub mod fills;
pub mod reconcile;

pub use executor::TradeExecutor;
pub use fills::{FillOutcome, FillTracker, OrderFillProgress};
pub use reconcile::{
    handle_fill, run_fill_loop, run_reconciliation_loop, DepositSnapshot,
};
