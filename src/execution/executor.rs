use crate::aggregator::analyze;
use crate::broker::OrderChannel;
use crate::engine::{SignalContext, Strategy};
use crate::ingest::TickBuffer;
use crate::models::{now_kst, OrderSide, TradeAction};
use crate::tracker::PriceTrackerStore;
use chrono::{DateTime, Duration, FixedOffset};
use std::sync::Arc;

use super::FillTracker;

/// Buffered ticks older than this no longer count as a live market view;
/// the strategy sees missing analysis instead.
const ANALYSIS_STALE_SECS: i64 = 60;

/// Evaluates the active strategy for a symbol and places the resulting
/// order, if any.
///
/// Placement never mutates the tracking record; quantities and trade price
/// move only when fills are confirmed (see the reconciliation side).
#[derive(Clone)]
pub struct TradeExecutor {
    strategy: Arc<dyn Strategy>,
    tracker: PriceTrackerStore,
    buffer: TickBuffer,
    orders: OrderChannel,
    fills: FillTracker,
}

impl TradeExecutor {
    pub fn new(
        strategy: Arc<dyn Strategy>,
        tracker: PriceTrackerStore,
        buffer: TickBuffer,
        orders: OrderChannel,
        fills: FillTracker,
    ) -> Self {
        Self {
            strategy,
            tracker,
            buffer,
            orders,
            fills,
        }
    }

    /// Whether a trading cycle is due for this symbol: fresh ticks arrived
    /// since `since`, or a position is held. A held position is evaluated
    /// even on a silent feed so the outage clock keeps running.
    pub fn needs_evaluation(&self, symbol: &str, since: DateTime<FixedOffset>) -> bool {
        if self.tracker.is_holding(symbol) {
            return true;
        }
        self.buffer
            .events_since(symbol, since)
            .map(|events| !events.is_empty())
            .unwrap_or(false)
    }

    /// One evaluation cycle for one symbol. Returns whether an order was
    /// placed and acknowledged by the broker.
    pub async fn execute(&self, symbol: &str) -> bool {
        // One completed buy->sell cycle per symbol per day.
        if self.tracker.is_trade_done(symbol) {
            tracing::debug!("{}: daily cycle already complete, skipping", symbol);
            return false;
        }

        let Some(record) = self.tracker.read(symbol) else {
            tracing::debug!("{}: no tracking record, skipping", symbol);
            return false;
        };

        let now = now_kst();
        let events = self.buffer.events(symbol).unwrap_or_default();
        let analysis =
            analyze(&events).filter(|a| now - a.time <= Duration::seconds(ANALYSIS_STALE_SECS));

        let signal = self.strategy.evaluate(&SignalContext {
            record: &record,
            analysis: analysis.as_ref(),
            now,
        });

        if signal.action == TradeAction::Neutral || signal.quantity == 0 {
            tracing::debug!("{}: NEUTRAL ({})", symbol, signal.reason);
            return false;
        }

        let side = match signal.action {
            TradeAction::Buy => OrderSide::Buy,
            TradeAction::Sell => OrderSide::Sell,
            TradeAction::Neutral => return false,
        };

        tracing::info!(
            "💹 {} {:?} {}주 @ {:?} - {}",
            symbol,
            side,
            signal.quantity,
            signal.time_zone,
            signal.reason
        );

        match self.orders.place(symbol, side, signal.quantity).await {
            Ok(result) if result.is_success() => {
                self.fills
                    .register(&result.order_no, symbol, side, signal.quantity);
                true
            }
            Ok(result) => {
                tracing::warn!(
                    "{}: order rejected (code {}): {} [{:?} {}주]",
                    symbol,
                    result.return_code,
                    result.message,
                    side,
                    signal.quantity
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    "{}: order call failed: {} [{:?} {}주]",
                    symbol,
                    e,
                    side,
                    signal.quantity
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{run_order_consumer, BrokerClient, BrokerError, OrderResult};
    use crate::broker::{AccountPosition, AccountReturn, DailyCandle};
    use crate::models::{PriceTrackingRecord, SessionZone, TickEvent, TradingSignal};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::time::Duration;

    fn tick_at(minutes_ago: i64, price: i64) -> TickEvent {
        TickEvent {
            symbol: "005930".to_string(),
            time: now_kst() - chrono::Duration::minutes(minutes_ago),
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

    struct FixedStrategy {
        action: TradeAction,
        quantity: u32,
    }

    impl Strategy for FixedStrategy {
        fn evaluate(&self, _ctx: &SignalContext) -> TradingSignal {
            TradingSignal::checked(
                self.action,
                self.quantity,
                "fixed",
                SessionZone::MainTrading,
            )
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[derive(Clone, Default)]
    struct CountingBroker {
        orders: Arc<AtomicU32>,
        reject: bool,
    }

    impl BrokerClient for CountingBroker {
        async fn place_buy_order(
            &self,
            _symbol: &str,
            _quantity: u32,
        ) -> Result<OrderResult, BrokerError> {
            self.orders.fetch_add(1, Ordering::SeqCst);
            Ok(OrderResult {
                return_code: if self.reject { 8 } else { 0 },
                order_no: "0000138".to_string(),
                message: String::new(),
            })
        }

        async fn place_sell_order(
            &self,
            symbol: &str,
            quantity: u32,
        ) -> Result<OrderResult, BrokerError> {
            self.place_buy_order(symbol, quantity).await
        }

        async fn cancel_order(
            &self,
            _orig_order_no: &str,
            _symbol: &str,
            _cancel_qty: u32,
        ) -> Result<OrderResult, BrokerError> {
            unreachable!()
        }

        async fn account_positions(&self) -> Result<Vec<AccountPosition>, BrokerError> {
            Ok(Vec::new())
        }

        async fn deposit_balance(&self) -> Result<i64, BrokerError> {
            Ok(0)
        }

        async fn daily_chart(
            &self,
            _symbol: &str,
            _base_date: &str,
        ) -> Result<Vec<DailyCandle>, BrokerError> {
            Ok(Vec::new())
        }

        async fn account_return(&self) -> Result<AccountReturn, BrokerError> {
            Ok(AccountReturn {
                total_purchase: 0,
                total_value: 0,
                profit_rate: 0.0,
            })
        }
    }

    fn executor_with(
        broker: CountingBroker,
        action: TradeAction,
        quantity: u32,
    ) -> (TradeExecutor, PriceTrackerStore, FillTracker) {
        let tracker = PriceTrackerStore::new();
        tracker.initialize(PriceTrackingRecord::new("005930"));
        let fills = FillTracker::new();
        let (orders, rx) = OrderChannel::new(8);
        tokio::spawn(run_order_consumer(broker, rx, Duration::from_millis(0)));

        let executor = TradeExecutor::new(
            Arc::new(FixedStrategy { action, quantity }),
            tracker.clone(),
            TickBuffer::new(),
            orders,
            fills.clone(),
        );
        (executor, tracker, fills)
    }

    #[tokio::test]
    async fn test_neutral_signal_places_nothing() {
        let broker = CountingBroker::default();
        let orders = broker.orders.clone();
        let (executor, _, _) = executor_with(broker, TradeAction::Neutral, 0);

        assert!(!executor.execute("005930").await);
        assert_eq!(orders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_successful_order_registers_fill_entry() {
        let broker = CountingBroker::default();
        let (executor, _, fills) = executor_with(broker, TradeAction::Buy, 150);

        assert!(executor.execute("005930").await);
        assert_eq!(fills.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_order_reports_failure() {
        let broker = CountingBroker {
            reject: true,
            ..Default::default()
        };
        let (executor, _, fills) = executor_with(broker, TradeAction::Sell, 10);

        assert!(!executor.execute("005930").await);
        assert!(fills.is_empty());
    }

    #[tokio::test]
    async fn test_daily_done_symbol_is_skipped() {
        let broker = CountingBroker::default();
        let orders = broker.orders.clone();
        let (executor, tracker, _) = executor_with(broker, TradeAction::Buy, 150);
        tracker.mark_trade_done("005930");

        assert!(!executor.execute("005930").await);
        assert_eq!(orders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_untracked_symbol_is_skipped() {
        let broker = CountingBroker::default();
        let (executor, _, _) = executor_with(broker, TradeAction::Buy, 150);
        assert!(!executor.execute("035720").await);
    }

    struct CapturingStrategy {
        saw_analysis: Arc<AtomicBool>,
    }

    impl Strategy for CapturingStrategy {
        fn evaluate(&self, ctx: &SignalContext) -> TradingSignal {
            self.saw_analysis.store(ctx.analysis.is_some(), Ordering::SeqCst);
            TradingSignal::neutral("captured", SessionZone::MainTrading)
        }

        fn name(&self) -> &str {
            "capturing"
        }
    }

    #[tokio::test]
    async fn test_stale_ticks_evaluate_as_missing_analysis() {
        let saw_analysis = Arc::new(AtomicBool::new(true));
        let tracker = PriceTrackerStore::new();
        tracker.initialize(PriceTrackingRecord::new("005930"));
        let buffer = TickBuffer::new();
        let (orders, rx) = OrderChannel::new(8);
        tokio::spawn(run_order_consumer(
            CountingBroker::default(),
            rx,
            Duration::from_millis(0),
        ));
        let executor = TradeExecutor::new(
            Arc::new(CapturingStrategy {
                saw_analysis: saw_analysis.clone(),
            }),
            tracker,
            buffer.clone(),
            orders,
            FillTracker::new(),
        );

        // The only buffered tick is three minutes old: a dead feed.
        buffer.push(tick_at(3, 70_000)).unwrap();
        executor.execute("005930").await;
        assert!(!saw_analysis.load(Ordering::SeqCst));

        // A live tick restores the market view.
        buffer.push(tick_at(0, 70_100)).unwrap();
        executor.execute("005930").await;
        assert!(saw_analysis.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_needs_evaluation_on_fresh_ticks_or_held_position() {
        let tracker = PriceTrackerStore::new();
        tracker.initialize(PriceTrackingRecord::new("005930"));
        let buffer = TickBuffer::new();
        let (orders, rx) = OrderChannel::new(8);
        tokio::spawn(run_order_consumer(
            CountingBroker::default(),
            rx,
            Duration::from_millis(0),
        ));
        let executor = TradeExecutor::new(
            Arc::new(FixedStrategy {
                action: TradeAction::Neutral,
                quantity: 0,
            }),
            tracker.clone(),
            buffer.clone(),
            orders,
            FillTracker::new(),
        );
        let since = now_kst() - chrono::Duration::seconds(30);

        // Quiet feed, no position: nothing to do.
        assert!(!executor.needs_evaluation("005930", since));

        // A held position is due even with no fresh ticks.
        tracker.set_holding("005930", true);
        assert!(executor.needs_evaluation("005930", since));

        // Fresh ticks alone are also enough.
        tracker.set_holding("005930", false);
        buffer.push(tick_at(0, 70_000)).unwrap();
        assert!(executor.needs_evaluation("005930", since));
    }

    #[tokio::test]
    async fn test_placement_does_not_mutate_tracker() {
        let broker = CountingBroker::default();
        let (executor, tracker, _) = executor_with(broker, TradeAction::Buy, 150);
        let before = tracker.read("005930").unwrap();

        assert!(executor.execute("005930").await);

        let after = tracker.read("005930").unwrap();
        assert_eq!(after.qty_to_sell, before.qty_to_sell);
        assert_eq!(after.qty_to_buy, before.qty_to_buy);
        assert_eq!(after.trade_type, before.trade_type);
    }
}
