use stockbot::aggregator::{MinuteStore, WindowAggregator};
use stockbot::broker::{run_order_consumer, BrokerClient, OrderChannel, RestBrokerClient};
use stockbot::engine::ZoneStrategy;
use stockbot::execution::{
    run_fill_loop, run_reconciliation_loop, DepositSnapshot, FillTracker, TradeExecutor,
};
use stockbot::indicators::apply_daily_indicators;
use stockbot::ingest::{EventDispatcher, FillNotice, IndexSnapshot, TickBuffer, TickIngest};
use stockbot::models::{now_kst, PriceTrackingRecord, TradeType};
use stockbot::persistence::RedisPersistence;
use stockbot::tracker::PriceTrackerStore;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, FixedOffset};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Aggregator sweep cadence.
const SWEEP_INTERVAL_SECS: u64 = 5;
/// Minimum gap between strategy evaluations for one symbol.
const EVAL_FLOOR_SECS: i64 = 30;
/// Minimum spacing between broker order calls.
const ORDER_SPACING_MS: u64 = 250;
/// Redis tick history trimmed down to the buffer's retention.
const TICK_KEEP_MINUTES: u64 = 11;
/// Trim Redis tick history every this many sweeps (~10 minutes).
const TICK_CLEANUP_SWEEPS: u32 = 120;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    tracing::info!("🚀 StockBot starting - Multi-Loop Architecture");

    // Get environment variables
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let broker_host = std::env::var("BROKER_HOST").expect("BROKER_HOST not found in environment");
    let app_key = std::env::var("BROKER_APP_KEY").expect("BROKER_APP_KEY not found in environment");
    let secret_key =
        std::env::var("BROKER_SECRET_KEY").expect("BROKER_SECRET_KEY not found in environment");
    let feed_queue =
        std::env::var("FEED_QUEUE").unwrap_or_else(|_| "stockbot:feed".to_string());
    let allocation_krw = get_allocation_krw();
    let watch_symbols = get_watch_symbols();

    if watch_symbols.is_empty() {
        bail!("WATCH_SYMBOLS is empty, nothing to trade");
    }

    // Broker auth is mandatory; no unauthenticated mode.
    let broker = RestBrokerClient::connect(&broker_host, &app_key, &secret_key)
        .await
        .context("broker authentication failed")?;

    // Shared state
    let buffer = TickBuffer::new();
    let tracker = PriceTrackerStore::new();
    let store = MinuteStore::new();
    let index = IndexSnapshot::new();
    let fills = FillTracker::new();
    let deposit = DepositSnapshot::new();
    let strategy = Arc::new(ZoneStrategy::default());

    for symbol in &watch_symbols {
        tracker.initialize(PriceTrackingRecord::new(symbol));
    }

    seed_account_state(&broker, &tracker, &deposit).await;
    seed_daily_indicators(&broker, &tracker, &watch_symbols).await;

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Allocation per symbol: {}원", allocation_krw);
    tracing::info!("  Watch symbols: {}", watch_symbols.join(", "));
    tracing::info!("  Feed queue: {}", feed_queue);

    // Channels: placements funnel through the order channel; fills come in
    // from the feed.
    let (orders, order_rx) = OrderChannel::new(32);
    let (fill_tx, fill_rx) = mpsc::channel::<FillNotice>(256);

    let ingest = TickIngest::new(buffer.clone(), tracker.clone(), allocation_krw);
    let dispatcher = EventDispatcher::new(ingest, tracker.clone(), index.clone(), fill_tx);
    let executor = TradeExecutor::new(
        strategy.clone(),
        tracker.clone(),
        buffer.clone(),
        orders,
        fills.clone(),
    );

    tracing::info!("\n🔄 Spawning independent loops...");

    let order_task = tokio::spawn(run_order_consumer(
        broker.clone(),
        order_rx,
        Duration::from_millis(ORDER_SPACING_MS),
    ));

    let fill_task = tokio::spawn(run_fill_loop(
        fill_rx,
        fills.clone(),
        tracker.clone(),
        broker.clone(),
        deposit.clone(),
    ));

    let reconcile_task = tokio::spawn(run_reconciliation_loop(fills.clone(), broker.clone()));

    let feed_task = {
        let redis_url = redis_url.clone();
        tokio::spawn(async move {
            feed_loop(redis_url, feed_queue, dispatcher).await;
        })
    };

    let aggregator_task = {
        let buffer = buffer.clone();
        let store = store.clone();
        let tracker = tracker.clone();
        let redis_url = redis_url.clone();
        tokio::spawn(async move {
            aggregator_loop(buffer, store, tracker, redis_url).await;
        })
    };

    let trading_task = {
        let tracker = tracker.clone();
        let strategy = strategy.clone();
        tokio::spawn(async move {
            trading_loop(executor, tracker, strategy).await;
        })
    };

    tracing::info!("✅ All loops spawned successfully");
    tracing::info!("  📡 Feed: Redis queue consumer");
    tracing::info!("  📊 Aggregator: every {}s", SWEEP_INTERVAL_SECS);
    tracing::info!(
        "  💹 Trading: on fresh ticks or held positions, {}s floor",
        EVAL_FLOOR_SECS
    );
    tracing::info!("  🔁 Reconciliation: every 10s");
    tracing::info!("\nPress Ctrl+C to stop...\n");

    // Wait for Ctrl+C or task failure
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = feed_task => {
            tracing::error!("Feed loop exited: {:?}", result);
        }
        result = aggregator_task => {
            tracing::error!("Aggregator loop exited: {:?}", result);
        }
        result = trading_task => {
            tracing::error!("Trading loop exited: {:?}", result);
        }
        result = order_task => {
            tracing::error!("Order consumer exited: {:?}", result);
        }
        result = fill_task => {
            tracing::error!("Fill loop exited: {:?}", result);
        }
        result = reconcile_task => {
            tracing::error!("Reconciliation loop exited: {:?}", result);
        }
    }

    tracing::info!("👋 StockBot stopped");
    Ok(())
}

// ============================================================================
// Initialization
// ============================================================================

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter("stockbot=info,stockbot::engine=debug")
        .init();
}

fn get_allocation_krw() -> i64 {
    std::env::var("ALLOCATION_KRW")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(10_000_000)
}

fn get_watch_symbols() -> Vec<String> {
    std::env::var("WATCH_SYMBOLS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Seed the tracker from the live account: held positions become sellable
/// quantity, and the deposit snapshot starts from the real balance.
async fn seed_account_state(
    broker: &RestBrokerClient,
    tracker: &PriceTrackerStore,
    deposit: &DepositSnapshot,
) {
    match broker.account_positions().await {
        Ok(positions) => {
            for position in positions {
                let mut record = PriceTrackingRecord::new(&position.symbol);
                record.current_price = position.current_price;
                record.trade_price = position.purchase_price;
                record.highest_price = position.current_price.max(position.purchase_price);
                record.lowest_price = position.current_price.min(position.purchase_price);
                record.qty_to_sell = position.quantity;
                record.trade_type = TradeType::Buy;
                record.is_first = false;
                tracker.initialize(record);
                tracker.set_holding(&position.symbol, true);

                tracing::info!(
                    "📦 Holding {} ({}) {}주 @ {}원",
                    position.symbol,
                    position.name,
                    position.quantity,
                    position.purchase_price
                );
            }
        }
        Err(e) => tracing::warn!("account position load failed: {}", e),
    }

    match broker.deposit_balance().await {
        Ok(krw) => {
            deposit.set(krw);
            tracing::info!("💰 예수금 {}원", krw);
        }
        Err(e) => tracing::warn!("deposit load failed: {}", e),
    }

    match broker.account_return().await {
        Ok(ret) => tracing::info!(
            "📈 계좌 수익률 {:+.2}% (매입 {}원, 평가 {}원)",
            ret.profit_rate,
            ret.total_purchase,
            ret.total_value
        ),
        Err(e) => tracing::warn!("account return load failed: {}", e),
    }
}

/// Fill each watched symbol's MA20 fields from its daily chart.
async fn seed_daily_indicators(
    broker: &RestBrokerClient,
    tracker: &PriceTrackerStore,
    symbols: &[String],
) {
    let base_date = now_kst().format("%Y%m%d").to_string();

    for symbol in symbols {
        match broker.daily_chart(symbol, &base_date).await {
            Ok(candles) => {
                apply_daily_indicators(tracker, symbol, &candles);
            }
            Err(e) => tracing::warn!("{}: daily chart load failed: {}", symbol, e),
        }
    }
}

// ============================================================================
// Independent Loop Tasks
// ============================================================================

/// Feed loop: pop raw realtime JSON messages off a Redis queue and hand
/// them to the dispatcher. Reconnects on connection loss.
async fn feed_loop(redis_url: String, queue: String, dispatcher: EventDispatcher) {
    tracing::info!("📡 Feed loop starting...");

    loop {
        let client = match redis::Client::open(redis_url.as_str()) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("Feed loop: bad Redis URL: {}", e);
                return;
            }
        };

        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Feed loop: Redis connect failed ({}), retrying in 5s", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        tracing::info!("📡 Feed connected, consuming {}", queue);

        loop {
            // Blocking pop with a timeout so connection loss surfaces.
            let popped: std::result::Result<Option<(String, String)>, _> =
                conn.blpop(&queue, 5.0).await;

            match popped {
                Ok(Some((_key, payload))) => dispatcher.dispatch(&payload).await,
                Ok(None) => {} // queue idle
                Err(e) => {
                    tracing::warn!("Feed loop: Redis read failed ({}), reconnecting", e);
                    break;
                }
            }
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Aggregator loop: sweep every buffered symbol, mirror fresh state to
/// Redis best-effort, and trim expired data.
async fn aggregator_loop(
    buffer: TickBuffer,
    store: MinuteStore,
    tracker: PriceTrackerStore,
    redis_url: String,
) {
    tracing::info!("📊 Aggregator loop starting...");

    let aggregator = WindowAggregator::new(buffer.clone(), store.clone());

    // The engine runs fully in-memory when Redis is absent.
    let mut redis = match RedisPersistence::new(&redis_url).await {
        Ok(r) => Some(r),
        Err(e) => {
            tracing::warn!("Aggregator loop: no Redis mirror ({})", e);
            None
        }
    };

    let mut ticker = interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut sweep_count = 0u32;
    let mut last_sweep = now_kst();

    loop {
        ticker.tick().await;
        sweep_count += 1;
        let sweep_started = now_kst();

        let symbols = match buffer.symbols() {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Aggregator loop: buffer read failed: {}", e);
                continue;
            }
        };

        for symbol in &symbols {
            aggregator.compute_for_symbol(symbol);

            if let Some(ref mut redis) = redis {
                mirror_symbol(redis, &buffer, &store, &tracker, symbol, last_sweep).await;

                if sweep_count % TICK_CLEANUP_SWEEPS == 0 {
                    if let Err(e) = redis.cleanup_old_ticks(symbol, TICK_KEEP_MINUTES).await {
                        tracing::warn!("  ✗ Failed to trim ticks for {}: {}", symbol, e);
                    }
                }
            }
        }

        store.purge_expired();
        last_sweep = sweep_started;
    }
}

/// Best-effort Redis mirror of one symbol's fresh ticks, latest aggregate
/// and tracking record.
async fn mirror_symbol(
    redis: &mut RedisPersistence,
    buffer: &TickBuffer,
    store: &MinuteStore,
    tracker: &PriceTrackerStore,
    symbol: &str,
    since: DateTime<FixedOffset>,
) {
    if let Ok(fresh) = buffer.events_since(symbol, since) {
        if !fresh.is_empty() {
            if let Err(e) = redis.save_ticks(symbol, &fresh).await {
                tracing::warn!("  ✗ Failed to mirror ticks for {}: {}", symbol, e);
            }
        }
    }

    if let Some(latest) = store.latest(symbol) {
        if let Err(e) = redis.save_minute_aggregate(&latest).await {
            tracing::warn!("  ✗ Failed to mirror aggregate for {}: {}", symbol, e);
        }
    }

    if let Some(record) = tracker.read(symbol) {
        if let Err(e) = redis.save_tracking_record(&record).await {
            tracing::warn!("  ✗ Failed to mirror tracker for {}: {}", symbol, e);
        }
    }
}

/// Trading loop: evaluate each tracked symbol when it has fresh ticks or a
/// held position, never more often than the per-symbol floor. Resets daily
/// state when the session date rolls over.
async fn trading_loop(
    executor: TradeExecutor,
    tracker: PriceTrackerStore,
    strategy: Arc<ZoneStrategy>,
) {
    tracing::info!("💹 Trading loop starting...");

    let mut ticker = interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_eval: HashMap<String, DateTime<FixedOffset>> = HashMap::new();
    let mut session_day = now_kst().ordinal();

    loop {
        ticker.tick().await;
        let now = now_kst();

        // New session day: daily counters and per-day strategy state reset.
        if now.ordinal() != session_day {
            tracing::info!("🌅 New session day, resetting daily state");
            tracker.reset_daily();
            strategy.reset_daily();
            last_eval.clear();
            session_day = now.ordinal();
        }

        for symbol in tracker.symbols() {
            let since = last_eval
                .get(&symbol)
                .copied()
                .unwrap_or(now - chrono::Duration::seconds(EVAL_FLOOR_SECS));

            if now - since < chrono::Duration::seconds(EVAL_FLOOR_SECS)
                && last_eval.contains_key(&symbol)
            {
                continue;
            }

            if !executor.needs_evaluation(&symbol, since) {
                continue;
            }

            last_eval.insert(symbol.clone(), now);
            executor.execute(&symbol).await;
        }
    }
}
