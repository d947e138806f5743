//! Cache-aside statistics service
//!
//! Readers check the cache first and recompute from the durable store on a
//! miss. The TTL is not fixed: as the capacity level climbs, the extended
//! TTL trades freshness for store pressure. Writers call `invalidate()`
//! before returning success, so a reader is never more than one generation
//! stale.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::TtlCache;
use crate::capacity::{CapacityLevel, FeatureFlags};
use crate::median::{date_bounds, weighted_median};
use crate::store::SubmissionStore;
use crate::types::{AggregateStats, AlmanacError, Result, StatsReading};

/// Fixed cache key for the aggregate view
pub const STATS_CACHE_KEY: &str = "stats:aggregate";

/// Tuning for the statistics layer
#[derive(Debug, Clone, Copy)]
pub struct StatsConfig {
    /// Baseline TTL under normal load
    pub ttl: Duration,
    /// TTL once the capacity level asks for the extended cache
    pub extended_ttl: Duration,
    /// Minimum submissions before a median is published
    pub min_sample_count: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            extended_ttl: Duration::from_secs(1800),
            min_sample_count: 50,
        }
    }
}

/// Aggregate statistics with a cache-aside read path
pub struct StatsService {
    store: Arc<dyn SubmissionStore>,
    cache: Arc<TtlCache>,
    config: StatsConfig,
}

impl StatsService {
    pub fn new(store: Arc<dyn SubmissionStore>, cache: Arc<TtlCache>, config: StatsConfig) -> Self {
        Self { store, cache, config }
    }

    /// Read the aggregate view. The bool is true on a cache hit.
    pub async fn read(&self, level: CapacityLevel) -> Result<(StatsReading, bool)> {
        if let Some(reading) = self.cache.get_json::<StatsReading>(STATS_CACHE_KEY) {
            return Ok((reading, true));
        }

        let reading = self.recompute().await?;
        self.cache
            .put_json(STATS_CACHE_KEY, &reading, self.ttl_for_level(level));
        Ok((reading, false))
    }

    /// Drop the cached view so the next read reflects the latest write.
    pub fn invalidate(&self) {
        if self.cache.remove(STATS_CACHE_KEY) {
            debug!("Aggregate statistics invalidated");
        }
    }

    /// Which TTL the current degradation level asks for.
    pub fn ttl_for_level(&self, level: CapacityLevel) -> Duration {
        if FeatureFlags::for_level(level).extended_cache {
            self.config.extended_ttl
        } else {
            self.config.ttl
        }
    }

    async fn recompute(&self) -> Result<StatsReading> {
        let samples = self.store.samples().await?;
        let count = samples.len() as u64;

        if count < self.config.min_sample_count {
            debug!(count, required = self.config.min_sample_count, "Too few submissions for a median");
            return Ok(StatsReading::InsufficientData {
                count,
                required: self.config.min_sample_count,
            });
        }

        if samples.iter().any(|(_, w)| *w < 0.0) {
            return Err(AlmanacError::Invariant(
                "negative submission weight in aggregate input".to_string(),
            ));
        }

        let median = weighted_median(&samples).ok_or_else(|| {
            AlmanacError::Invariant("median undefined for non-empty sample set".to_string())
        })?;
        let (min, max) = date_bounds(&samples).ok_or_else(|| {
            AlmanacError::Invariant("bounds undefined for non-empty sample set".to_string())
        })?;

        debug!(count, %median, "Aggregate statistics recomputed");
        Ok(StatsReading::Ready(AggregateStats {
            median,
            min,
            max,
            count,
            computed_at: Utc::now(),
        }))
    }
}
