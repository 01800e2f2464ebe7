//! Monotonic clock shared by probes and the sampler.
//!
//! Time points are measured against a process-wide epoch: the first clock
//! read in the process. Nanosecond scalars therefore start near zero and
//! fit comfortably in an `i64`.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Opaque monotonic time point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePoint(Instant);

impl TimePoint {
    /// Time elapsed since the epoch.
    pub fn since_epoch(&self) -> Duration {
        self.0.saturating_duration_since(epoch())
    }
}

/// Namespace for clock reads and conversions.
pub struct Clock;

impl Clock {
    pub fn now() -> TimePoint {
        // Pin the epoch before the first reading so no point precedes it.
        let _ = epoch();
        TimePoint(Instant::now())
    }

    pub fn now_nanoseconds() -> i64 {
        Self::to_nanoseconds(&Self::now())
    }

    pub fn now_microseconds() -> i64 {
        Self::to_microseconds(&Self::now())
    }

    pub fn now_milliseconds() -> f64 {
        Self::to_milliseconds(&Self::now())
    }

    pub fn now_seconds() -> f64 {
        Self::to_seconds(&Self::now())
    }

    pub fn to_nanoseconds(tp: &TimePoint) -> i64 {
        i64::try_from(tp.since_epoch().as_nanos()).unwrap_or(i64::MAX)
    }

    pub fn to_microseconds(tp: &TimePoint) -> i64 {
        i64::try_from(tp.since_epoch().as_micros()).unwrap_or(i64::MAX)
    }

    pub fn to_milliseconds(tp: &TimePoint) -> f64 {
        Self::to_nanoseconds(tp) as f64 / 1_000_000.0
    }

    pub fn to_seconds(tp: &TimePoint) -> f64 {
        Self::to_nanoseconds(tp) as f64 / 1_000_000_000.0
    }

    /// Signed span from `start` to `end`; negative when `end` precedes `start`.
    pub fn duration_nanoseconds(start: &TimePoint, end: &TimePoint) -> i64 {
        Self::to_nanoseconds(end) - Self::to_nanoseconds(start)
    }

    pub fn duration_milliseconds(start: &TimePoint, end: &TimePoint) -> f64 {
        Self::duration_nanoseconds(start, end) as f64 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let mut last = Clock::now_nanoseconds();
        for _ in 0..1000 {
            let now = Clock::now_nanoseconds();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_duration_matches_scalar_difference() {
        let a = Clock::now();
        std::thread::sleep(Duration::from_millis(2));
        let b = Clock::now();

        let d = Clock::duration_nanoseconds(&a, &b);
        assert_eq!(d, Clock::to_nanoseconds(&b) - Clock::to_nanoseconds(&a));
        assert!(d >= 2_000_000);
        assert_eq!(Clock::duration_nanoseconds(&b, &a), -d);
    }

    #[test]
    fn test_unit_conversions_agree() {
        let tp = Clock::now();
        let ns = Clock::to_nanoseconds(&tp);
        assert_eq!(Clock::to_microseconds(&tp), ns / 1_000);
        assert!((Clock::to_milliseconds(&tp) - ns as f64 / 1e6).abs() < 1e-9);
        assert!((Clock::to_seconds(&tp) - ns as f64 / 1e9).abs() < 1e-12);
    }
}
