//! Submission influence weighting
//!
//! Maps a predicted date to an influence weight in [0.1, 1.0] relative to
//! the publicly announced release window. Dates inside the window count
//! fully; earlier-but-future dates are mildly discounted; dates past the
//! window decay linearly with distance, and dates already behind us are
//! treated as noise. No submission is ever fully discounted - the floor
//! keeps every voice with at least minimal influence.

use chrono::NaiveDate;

/// Full influence for dates inside the announced window
pub const FULL_WEIGHT: f64 = 1.0;

/// Mild discount for optimists predicting before the window opens
pub const EARLY_WEIGHT: f64 = 0.8;

/// Minimum influence - past dates and far-out dates land here
pub const FLOOR_WEIGHT: f64 = 0.1;

/// Weighting policy around the announced release window.
///
/// The window bounds and decay rate are runtime configuration so a revised
/// announcement only requires a restart, not a rebuild.
#[derive(Debug, Clone, Copy)]
pub struct WeightPolicy {
    /// First date of the announced window (inclusive, full weight)
    pub window_start: NaiveDate,
    /// Last date of the announced window (inclusive, full weight)
    pub window_end: NaiveDate,
    /// Weight lost per day past the window's end
    pub decay_per_day: f64,
}

impl WeightPolicy {
    /// Compute the influence weight for a predicted date.
    ///
    /// Total and deterministic: never errors for any valid calendar date.
    pub fn weight_for(&self, predicted: NaiveDate, today: NaiveDate) -> f64 {
        // Dates already behind us are noise, not votes
        if predicted < today {
            return FLOOR_WEIGHT;
        }
        if predicted < self.window_start {
            return EARLY_WEIGHT;
        }
        if predicted <= self.window_end {
            return FULL_WEIGHT;
        }
        let days_past = predicted.signed_duration_since(self.window_end).num_days() as f64;
        (FULL_WEIGHT - self.decay_per_day * days_past).max(FLOOR_WEIGHT)
    }
}
