//! Capacity controller
//!
//! Tracks the rolling daily request counter in the cache store and derives
//! a discrete degradation level from it. The level is never persisted - it
//! is recomputed from the counter on every evaluation, so the state machine
//! is a total function and safe under concurrent evaluation. The counter
//! window rolls over at the UTC day boundary via the counter's expiry, no
//! reset job required.
//!
//! Fail-open: a counter the store cannot produce reads as zero, i.e.
//! `Normal`. Under-counting only risks exceeding the free quota; it never
//! corrupts data, so availability wins.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::cache::TtlCache;

/// Discrete degradation tier derived from load against the daily ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityLevel {
    Normal,
    Elevated,
    High,
    Critical,
    Exceeded,
}

impl CapacityLevel {
    /// Derive the level from utilization of the daily ceiling.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 1.0 {
            CapacityLevel::Exceeded
        } else if ratio >= 0.95 {
            CapacityLevel::Critical
        } else if ratio >= 0.90 {
            CapacityLevel::High
        } else if ratio >= 0.80 {
            CapacityLevel::Elevated
        } else {
            CapacityLevel::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CapacityLevel::Normal => "normal",
            CapacityLevel::Elevated => "elevated",
            CapacityLevel::High => "high",
            CapacityLevel::Critical => "critical",
            CapacityLevel::Exceeded => "exceeded",
        }
    }
}

/// What the current level allows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// New submissions accepted (synchronously or queued)
    pub submissions_enabled: bool,
    /// Statistics reads served (from cache at worst)
    pub stats_enabled: bool,
    /// The per-date distribution breakdown, the first feature shed
    pub distribution_enabled: bool,
    /// Statistics cached on the extended TTL instead of the baseline
    pub extended_cache: bool,
}

impl FeatureFlags {
    pub fn for_level(level: CapacityLevel) -> Self {
        Self {
            submissions_enabled: level < CapacityLevel::Exceeded,
            stats_enabled: true,
            distribution_enabled: level < CapacityLevel::High,
            extended_cache: level >= CapacityLevel::High,
        }
    }
}

/// Point-in-time capacity view for operators and the HTTP layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityReport {
    pub level: CapacityLevel,
    pub requests_today: u64,
    pub daily_limit: u64,
    pub reset_at: DateTime<Utc>,
    pub features: FeatureFlags,
}

/// Midnight UTC of the following day - when the counter window rolls over
pub fn next_utc_midnight(day: NaiveDate) -> DateTime<Utc> {
    let next = day.succ_opt().unwrap_or(day);
    next.and_time(NaiveTime::MIN).and_utc()
}

/// Derives the capacity level from the shared daily request counter
pub struct CapacityController {
    cache: Arc<TtlCache>,
    daily_limit: u64,
}

impl CapacityController {
    pub fn new(cache: Arc<TtlCache>, daily_limit: u64) -> Self {
        Self { cache, daily_limit }
    }

    fn counter_key(day: NaiveDate) -> String {
        format!("requests:{}", day)
    }

    fn alert_key(day: NaiveDate) -> String {
        format!("alerted:{}", day)
    }

    fn level_for(&self, requests_today: u64) -> CapacityLevel {
        CapacityLevel::from_ratio(requests_today as f64 / self.daily_limit as f64)
    }

    /// Count one request against today's ceiling and derive the level fresh.
    pub fn record_request(&self) -> CapacityLevel {
        let now = Utc::now();
        let day = now.date_naive();
        let reset_at = next_utc_midnight(day);

        let requests_today = self.cache.incr(&Self::counter_key(day), reset_at);
        let level = self.level_for(requests_today);

        // One alert per day once we first climb out of normal territory
        if level >= CapacityLevel::Elevated && self.cache.set_flag(&Self::alert_key(day), reset_at)
        {
            warn!(
                level = level.as_str(),
                requests_today,
                daily_limit = self.daily_limit,
                "Daily request volume crossed the elevated threshold"
            );
        }

        level
    }

    /// Derive the level without counting a request.
    pub fn current_level(&self) -> CapacityLevel {
        let day = Utc::now().date_naive();
        self.level_for(self.cache.counter(&Self::counter_key(day)))
    }

    /// When today's counter window rolls over.
    pub fn reset_at(&self) -> DateTime<Utc> {
        next_utc_midnight(Utc::now().date_naive())
    }

    /// Observational snapshot; does not count a request.
    pub fn report(&self) -> CapacityReport {
        let day = Utc::now().date_naive();
        let requests_today = self.cache.counter(&Self::counter_key(day));
        let level = self.level_for(requests_today);
        CapacityReport {
            level,
            requests_today,
            daily_limit: self.daily_limit,
            reset_at: next_utc_midnight(day),
            features: FeatureFlags::for_level(level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: u64 = 100_000;

    fn level_of(count: u64) -> CapacityLevel {
        CapacityLevel::from_ratio(count as f64 / LIMIT as f64)
    }

    #[test]
    fn level_boundaries_are_exact() {
        assert_eq!(level_of(0), CapacityLevel::Normal);
        assert_eq!(level_of(79_999), CapacityLevel::Normal);
        assert_eq!(level_of(80_000), CapacityLevel::Elevated);
        assert_eq!(level_of(89_999), CapacityLevel::Elevated);
        assert_eq!(level_of(90_000), CapacityLevel::High);
        assert_eq!(level_of(94_999), CapacityLevel::High);
        assert_eq!(level_of(95_000), CapacityLevel::Critical);
        assert_eq!(level_of(99_999), CapacityLevel::Critical);
        assert_eq!(level_of(100_000), CapacityLevel::Exceeded);
        assert_eq!(level_of(250_000), CapacityLevel::Exceeded);
    }

    #[test]
    fn level_is_deterministic() {
        for count in [0, 80_000, 96_000, 100_000] {
            assert_eq!(level_of(count), level_of(count));
        }
    }

    #[test]
    fn levels_are_ordered() {
        assert!(CapacityLevel::Normal < CapacityLevel::Elevated);
        assert!(CapacityLevel::Elevated < CapacityLevel::High);
        assert!(CapacityLevel::High < CapacityLevel::Critical);
        assert!(CapacityLevel::Critical < CapacityLevel::Exceeded);
    }

    #[test]
    fn feature_flags_shed_in_order() {
        let normal = FeatureFlags::for_level(CapacityLevel::Normal);
        assert!(normal.submissions_enabled);
        assert!(normal.stats_enabled);
        assert!(normal.distribution_enabled);
        assert!(!normal.extended_cache);

        let elevated = FeatureFlags::for_level(CapacityLevel::Elevated);
        assert_eq!(elevated, normal, "elevated is log-only");

        let high = FeatureFlags::for_level(CapacityLevel::High);
        assert!(high.submissions_enabled);
        assert!(!high.distribution_enabled);
        assert!(high.extended_cache);

        let critical = FeatureFlags::for_level(CapacityLevel::Critical);
        assert!(critical.submissions_enabled, "critical still accepts, queued");

        let exceeded = FeatureFlags::for_level(CapacityLevel::Exceeded);
        assert!(!exceeded.submissions_enabled);
        assert!(exceeded.stats_enabled, "reads stay on at every level");
    }

    #[test]
    fn recording_increments_and_derives() {
        let cache = Arc::new(TtlCache::new());
        let controller = CapacityController::new(Arc::clone(&cache), 10);

        assert_eq!(controller.current_level(), CapacityLevel::Normal);
        for _ in 0..7 {
            assert_eq!(controller.record_request(), CapacityLevel::Normal);
        }
        assert_eq!(controller.record_request(), CapacityLevel::Elevated);
        assert_eq!(controller.record_request(), CapacityLevel::High);
        assert_eq!(controller.record_request(), CapacityLevel::Exceeded);

        let report = controller.report();
        assert_eq!(report.requests_today, 10);
        assert_eq!(report.level, CapacityLevel::Exceeded);
        assert!(report.reset_at > Utc::now());
    }

    #[test]
    fn report_does_not_count_a_request() {
        let cache = Arc::new(TtlCache::new());
        let controller = CapacityController::new(cache, 10);
        controller.record_request();
        controller.report();
        controller.report();
        assert_eq!(controller.report().requests_today, 1);
    }

    #[test]
    fn missing_counter_fails_open_to_normal() {
        let cache = Arc::new(TtlCache::new());
        let controller = CapacityController::new(cache, LIMIT);
        assert_eq!(controller.current_level(), CapacityLevel::Normal);
        assert_eq!(controller.report().requests_today, 0);
    }

    #[test]
    fn midnight_rollover_is_the_next_day() {
        let day = NaiveDate::from_ymd_opt(2026, 8, 5).expect("valid date");
        let reset = next_utc_midnight(day);
        assert_eq!(reset.date_naive(), NaiveDate::from_ymd_opt(2026, 8, 6).expect("valid date"));
        assert_eq!(reset.time(), NaiveTime::MIN);
    }
}
