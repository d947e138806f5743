//! Configuration for Almanac
//!
//! CLI arguments and environment variable handling using clap. The release
//! window and decay rate live here rather than in code so a revised
//! announcement only needs a restart.

use chrono::NaiveDate;
use clap::Parser;
use std::time::Duration;
use uuid::Uuid;

use crate::engine::EngineConfig;
use crate::retry::RetryPolicy;
use crate::stats::StatsConfig;
use crate::weight::WeightPolicy;

/// Almanac - community release-date forecasting engine
#[derive(Parser, Debug, Clone)]
#[command(name = "almanac")]
#[command(about = "Aggregates community date predictions into a weighted-median estimate")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "almanac")]
    pub mongodb_db: String,

    /// Enable development mode (in-memory store fallback when MongoDB is down)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Hard daily request ceiling driving the degradation levels
    #[arg(long, env = "DAILY_LIMIT", default_value = "100000")]
    pub daily_limit: u64,

    /// First date of the announced release window (YYYY-MM-DD, full weight)
    #[arg(long, env = "WINDOW_START", default_value = "2027-01-01")]
    pub window_start: NaiveDate,

    /// Last date of the announced release window (YYYY-MM-DD, full weight)
    #[arg(long, env = "WINDOW_END", default_value = "2027-06-30")]
    pub window_end: NaiveDate,

    /// Influence lost per day predicted past the window's end
    #[arg(long, env = "WEIGHT_DECAY_PER_DAY", default_value = "0.0005")]
    pub weight_decay_per_day: f64,

    /// Baseline statistics cache TTL in seconds
    #[arg(long, env = "STATS_TTL_SECS", default_value = "300")]
    pub stats_ttl_secs: u64,

    /// Extended statistics cache TTL once load is high, in seconds
    #[arg(long, env = "STATS_TTL_EXTENDED_SECS", default_value = "1800")]
    pub stats_ttl_extended_secs: u64,

    /// Minimum submissions before a median is published
    #[arg(long, env = "MIN_SAMPLE_COUNT", default_value = "50")]
    pub min_sample_count: u64,

    /// Seconds between queue drain sweeps
    #[arg(long, env = "DRAIN_INTERVAL_SECS", default_value = "30")]
    pub drain_interval_secs: u64,

    /// Queued submissions committed per drain sweep
    #[arg(long, env = "DRAIN_BATCH_SIZE", default_value = "100")]
    pub drain_batch_size: usize,

    /// Hours a queued submission stays eligible for draining
    #[arg(long, env = "QUEUE_RETENTION_HOURS", default_value = "24")]
    pub queue_retention_hours: u64,

    /// Seconds between cache cleanup sweeps
    #[arg(long, env = "CACHE_CLEANUP_INTERVAL_SECS", default_value = "300")]
    pub cache_cleanup_interval_secs: u64,
}

impl Args {
    pub fn weight_policy(&self) -> WeightPolicy {
        WeightPolicy {
            window_start: self.window_start,
            window_end: self.window_end,
            decay_per_day: self.weight_decay_per_day,
        }
    }

    pub fn stats_config(&self) -> StatsConfig {
        StatsConfig {
            ttl: Duration::from_secs(self.stats_ttl_secs),
            extended_ttl: Duration::from_secs(self.stats_ttl_extended_secs),
            min_sample_count: self.min_sample_count,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            drain_batch_size: self.drain_batch_size,
            queue_retention: Duration::from_secs(self.queue_retention_hours * 60 * 60),
            retry: RetryPolicy::default(),
            transient_retry_hint_secs: 30,
        }
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn cache_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cache_cleanup_interval_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.window_start > self.window_end {
            return Err("WINDOW_START must be on or before WINDOW_END".to_string());
        }
        if self.daily_limit == 0 {
            return Err("DAILY_LIMIT must be greater than zero".to_string());
        }
        if self.weight_decay_per_day <= 0.0 {
            return Err("WEIGHT_DECAY_PER_DAY must be positive".to_string());
        }
        if self.min_sample_count == 0 {
            return Err("MIN_SAMPLE_COUNT must be greater than zero".to_string());
        }
        if self.drain_batch_size == 0 {
            return Err("DRAIN_BATCH_SIZE must be greater than zero".to_string());
        }
        Ok(())
    }
}
