//! Time ranges, read windows, and coverage analysis.
//!
//! All instants are `u64` nanoseconds since the Unix epoch. The value `0`
//! stands for "unbounded in the past" and `u64::MAX` for "unbounded in the
//! future", so [`TimeRange::UNBOUNDED`] covers everything a catalog could
//! ever produce.

use serde::{Deserialize, Serialize};

use crate::error::{ReadError, Result};

/// Sentinel for a range that is open towards the past.
pub const UNBOUNDED_BEGIN: u64 = 0;

/// Sentinel for a range that is open towards the future.
pub const UNBOUNDED_END: u64 = u64::MAX;

/// A half-open `[begin, end)` range of absolute instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive start in nanoseconds since the epoch.
    pub begin: u64,
    /// Exclusive end in nanoseconds since the epoch.
    pub end: u64,
}

impl TimeRange {
    /// The range open on both sides.
    pub const UNBOUNDED: TimeRange = TimeRange {
        begin: UNBOUNDED_BEGIN,
        end: UNBOUNDED_END,
    };

    /// Creates a new range without validation.
    pub fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    /// Returns `true` if the range is open towards the past.
    pub fn is_open_begin(&self) -> bool {
        self.begin == UNBOUNDED_BEGIN
    }

    /// Returns `true` if the range is open towards the future.
    pub fn is_open_end(&self) -> bool {
        self.end == UNBOUNDED_END
    }

    /// Returns the range length in nanoseconds, zero if reversed.
    pub fn duration_nanos(&self) -> u64 {
        self.end.saturating_sub(self.begin)
    }

    /// Returns `true` if `timestamp` lies within `[begin, end)`.
    ///
    /// An open end also contains `u64::MAX` itself.
    pub fn contains(&self, timestamp: u64) -> bool {
        timestamp >= self.begin && (timestamp < self.end || self.is_open_end())
    }

    /// Returns the intersection of two ranges, or `None` if they are disjoint.
    pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end);
        (begin < end).then_some(TimeRange { begin, end })
    }

    /// Computes the fraction of `window` that this range covers.
    ///
    /// Returns a value in `[0, 1]`. A window fully inside the range yields
    /// exactly `1.0`, a disjoint window `0.0`. Widening the window never
    /// increases the fraction.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::InvalidWindow`] if `window.begin >= window.end`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strata::window::TimeRange;
    ///
    /// let coverage = TimeRange::new(100, 200);
    /// assert_eq!(coverage.coverage_of(&TimeRange::new(120, 180)).unwrap(), 1.0);
    /// assert_eq!(coverage.coverage_of(&TimeRange::new(150, 250)).unwrap(), 0.5);
    /// assert_eq!(coverage.coverage_of(&TimeRange::new(300, 400)).unwrap(), 0.0);
    /// ```
    #[allow(clippy::cast_precision_loss)] // a ratio, precision loss is harmless
    pub fn coverage_of(&self, window: &TimeRange) -> Result<f64> {
        validate_window(window.begin, window.end)?;

        let covered = match self.intersect(window) {
            Some(overlap) if overlap == *window => return Ok(1.0),
            Some(overlap) => overlap.duration_nanos(),
            None => return Ok(0.0),
        };

        let fraction = covered as f64 / window.duration_nanos() as f64;
        Ok(fraction.clamp(0.0, 1.0))
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

/// Checks that a read window is non-empty.
///
/// # Errors
///
/// Returns [`ReadError::InvalidWindow`] if `begin >= end`.
pub fn validate_window(begin: u64, end: u64) -> Result<()> {
    if begin >= end {
        return Err(ReadError::InvalidWindow { begin, end }.into());
    }
    Ok(())
}

/// Number of ticks of period `period_nanos` in `[begin, end)`.
///
/// This is `ceil((end - begin) / period)`, zero for an empty window.
/// A zero period yields zero.
///
/// # Examples
///
/// ```rust
/// use strata::window::sample_count;
///
/// const SECOND: u64 = 1_000_000_000;
/// assert_eq!(sample_count(0, 3 * SECOND, SECOND), 3);
/// assert_eq!(sample_count(0, 3 * SECOND + 1, SECOND), 4);
/// assert_eq!(sample_count(0, SECOND / 2, SECOND), 1);
/// ```
pub fn sample_count(begin: u64, end: u64, period_nanos: u64) -> u64 {
    if period_nanos == 0 {
        return 0;
    }
    end.saturating_sub(begin).div_ceil(period_nanos)
}

/// Timestamp of tick `index` in a window starting at `begin`.
///
/// Saturates at `u64::MAX` for ticks past the representable range.
pub fn tick_timestamp(begin: u64, period_nanos: u64, index: u64) -> u64 {
    index
        .checked_mul(period_nanos)
        .and_then(|offset| begin.checked_add(offset))
        .unwrap_or(u64::MAX)
}
