use crate::models::{now_kst, MinuteAggregate, PriceTrackingRecord, TickEvent};
use crate::Result;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

/// Minute aggregates mirror the in-memory store's 30 minute retention.
const MINUTE_TTL_SECS: u64 = 1800;
/// Tracking records live a full session plus slack, never into the next day.
const TRACKER_TTL_SECS: u64 = 28_800;

/// Redis mirror of the hot in-memory state.
///
/// Ticks go into sorted sets with timestamps as scores for efficient
/// time-range queries; minute aggregates and tracking records are plain
/// JSON values with TTLs. Everything here is a mirror: losing Redis loses
/// restart continuity, never live trading state.
pub struct RedisPersistence {
    conn: ConnectionManager,
}

impl RedisPersistence {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| "Redis connection timeout after 5 seconds")??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    /// Save ticks to Redis
    ///
    /// Stores in sorted set: `ticks:{symbol}` with the event timestamp as
    /// score
    pub async fn save_ticks(&mut self, symbol: &str, ticks: &[TickEvent]) -> Result<()> {
        let key = format!("ticks:{}", symbol);

        for tick in ticks {
            let value = serde_json::to_string(tick)?;
            let score = tick.time.timestamp() as f64;

            self.conn.zadd::<_, _, _, ()>(&key, value, score).await?;
        }

        tracing::debug!("Saved {} ticks for {} to Redis", ticks.len(), symbol);

        Ok(())
    }

    /// Load recent ticks from Redis, oldest first.
    pub async fn load_ticks(&mut self, symbol: &str, minutes_back: u64) -> Result<Vec<TickEvent>> {
        let key = format!("ticks:{}", symbol);

        let cutoff = now_kst() - chrono::Duration::minutes(minutes_back as i64);
        let min_score = cutoff.timestamp() as f64;

        let results: Vec<String> = self.conn.zrangebyscore(&key, min_score, "+inf").await?;

        let mut ticks = Vec::new();
        for json_str in results {
            ticks.push(serde_json::from_str::<TickEvent>(&json_str)?);
        }

        tracing::info!("Loaded {} ticks for {} from Redis", ticks.len(), symbol);

        Ok(ticks)
    }

    /// Remove ticks older than the retention window.
    pub async fn cleanup_old_ticks(&mut self, symbol: &str, keep_minutes: u64) -> Result<usize> {
        let key = format!("ticks:{}", symbol);

        let cutoff = now_kst() - chrono::Duration::minutes(keep_minutes as i64);
        let max_score = cutoff.timestamp() as f64;

        let removed: usize = self.conn.zrembyscore(&key, "-inf", max_score).await?;

        if removed > 0 {
            tracing::debug!("Cleaned up {} old ticks for {}", removed, symbol);
        }

        Ok(removed)
    }

    /// Get count of stored ticks for a symbol
    pub async fn tick_count(&mut self, symbol: &str) -> Result<usize> {
        let key = format!("ticks:{}", symbol);
        let count: usize = self.conn.zcard(&key).await?;
        Ok(count)
    }

    /// Mirror a minute aggregate under `agg:{symbol}:{HH:MM}`.
    ///
    /// SET NX keeps the write-once rule: once a minute is stored it never
    /// changes. Returns whether this call stored it.
    pub async fn save_minute_aggregate(&mut self, aggregate: &MinuteAggregate) -> Result<bool> {
        let key = format!("agg:{}:{}", aggregate.symbol, aggregate.minute);
        let value = serde_json::to_string(aggregate)?;

        let stored: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(MINUTE_TTL_SECS)
            .query_async(&mut self.conn)
            .await?;

        Ok(stored.is_some())
    }

    /// Load one mirrored minute aggregate, if present.
    pub async fn load_minute_aggregate(
        &mut self,
        symbol: &str,
        minute: &str,
    ) -> Result<Option<MinuteAggregate>> {
        let key = format!("agg:{}:{}", symbol, minute);
        let value: Option<String> = self.conn.get(&key).await?;

        match value {
            Some(json_str) => Ok(Some(serde_json::from_str(&json_str)?)),
            None => Ok(None),
        }
    }

    /// Mirror the full tracking record under `tracker:{symbol}`.
    pub async fn save_tracking_record(&mut self, record: &PriceTrackingRecord) -> Result<()> {
        let key = format!("tracker:{}", record.symbol);
        let value = serde_json::to_string(record)?;

        self.conn
            .set_ex::<_, _, ()>(&key, value, TRACKER_TTL_SECS)
            .await?;

        Ok(())
    }

    /// Load a mirrored tracking record, if present.
    pub async fn load_tracking_record(
        &mut self,
        symbol: &str,
    ) -> Result<Option<PriceTrackingRecord>> {
        let key = format!("tracker:{}", symbol);
        let value: Option<String> = self.conn.get(&key).await?;

        match value {
            Some(json_str) => Ok(Some(serde_json::from_str(&json_str)?)),
            None => Ok(None),
        }
    }

    /// Drop a mirrored tracking record (symbol left the watch list).
    pub async fn delete_tracking_record(&mut self, symbol: &str) -> Result<()> {
        let key = format!("tracker:{}", symbol);
        self.conn.del::<_, ()>(&key).await?;
        Ok(())
    }
}
