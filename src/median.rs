//! Weighted median over (date, weight) samples
//!
//! The community estimate is a weighted order statistic, not a mean: the
//! answer is always one of the submitted dates, never an interpolation.

use chrono::NaiveDate;

/// Return the date at which cumulative weight first reaches half the total.
///
/// Samples are sorted ascending by date, then walked accumulating weight
/// until the running sum crosses the 50% threshold. Empty input yields
/// `None`. If the total weight has collapsed to zero (only possible when
/// the weight function misbehaved upstream) the unweighted median of the
/// sorted dates is used as a safety net.
pub fn weighted_median(samples: &[(NaiveDate, f64)]) -> Option<NaiveDate> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted: Vec<(NaiveDate, f64)> = samples.to_vec();
    sorted.sort_by_key(|(date, _)| *date);

    let total: f64 = sorted.iter().map(|(_, w)| w).sum();
    if total <= f64::EPSILON {
        // Safety net: unweighted median, lower middle on even counts so the
        // result is still one of the inputs
        return Some(sorted[(sorted.len() - 1) / 2].0);
    }

    let half = total / 2.0;
    let mut running = 0.0;
    for (date, w) in &sorted {
        running += w;
        if running >= half {
            return Some(*date);
        }
    }

    // Float round-off can leave the sum epsilon short of half; the last
    // element is the crossing point by construction
    sorted.last().map(|(date, _)| *date)
}

/// Earliest and latest dates in the sample set
pub fn date_bounds(samples: &[(NaiveDate, f64)]) -> Option<(NaiveDate, NaiveDate)> {
    let min = samples.iter().map(|(d, _)| *d).min()?;
    let max = samples.iter().map(|(d, _)| *d).max()?;
    Some((min, max))
}
