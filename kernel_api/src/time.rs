//! Time abstractions
//!
//! The kernel clock is whole seconds plus a millisecond remainder, the
//! resolution sleepers are expressed in. Sleep requests arrive in
//! hundredths of a second.

use core::fmt;
use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};

/// A point on the kernel clock
///
/// Always normalized: `millis < 1000`. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClockTime {
    seconds: u64,
    millis: u16,
}

impl ClockTime {
    /// The clock origin
    pub const ZERO: ClockTime = ClockTime {
        seconds: 0,
        millis: 0,
    };

    /// Creates a clock time, carrying excess milliseconds into seconds
    pub const fn new(seconds: u64, millis: u64) -> Self {
        Self {
            seconds: seconds + millis / 1000,
            millis: (millis % 1000) as u16,
        }
    }

    /// Creates a clock time from total milliseconds
    pub const fn from_millis(total: u64) -> Self {
        Self::new(0, total)
    }

    pub const fn seconds(&self) -> u64 {
        self.seconds
    }

    /// Sub-second remainder in milliseconds
    pub const fn millis(&self) -> u16 {
        self.millis
    }

    /// Total milliseconds since the origin
    pub const fn as_millis(&self) -> u64 {
        self.seconds * 1000 + self.millis as u64
    }

    /// Returns the duration since another clock time (zero if `earlier` is later)
    pub fn duration_since(&self, earlier: ClockTime) -> Duration {
        Duration::from_millis(self.as_millis().saturating_sub(earlier.as_millis()))
    }
}

impl Default for ClockTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add<Duration> for ClockTime {
    type Output = ClockTime;

    fn add(self, duration: Duration) -> Self::Output {
        ClockTime::new(
            self.seconds.saturating_add(duration.as_millis() / 1000),
            self.millis as u64 + duration.as_millis() % 1000,
        )
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}s", self.seconds, self.millis)
    }
}

/// A span of kernel time, millisecond resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Duration {
    millis: u64,
}

impl Duration {
    pub const ZERO: Duration = Duration { millis: 0 };

    /// Creates a duration from milliseconds
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// Creates a duration from hundredths of a second (the sleep unit)
    pub const fn from_hundredths(hundredths: u64) -> Self {
        Self {
            millis: hundredths * 10,
        }
    }

    /// Creates a duration from seconds
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            millis: secs * 1000,
        }
    }

    pub const fn as_millis(&self) -> u64 {
        self.millis
    }

    pub const fn as_secs(&self) -> u64 {
        self.millis / 1000
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, other: Duration) -> Self::Output {
        Duration::from_millis(self.millis + other.millis)
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, other: Duration) -> Self::Output {
        Duration::from_millis(self.millis.saturating_sub(other.millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_normalizes_carry() {
        let t = ClockTime::new(5, 2_345);
        assert_eq!(t.seconds(), 7);
        assert_eq!(t.millis(), 345);
        assert_eq!(ClockTime::from_millis(1_000), ClockTime::new(1, 0));
    }

    #[test]
    fn test_clock_ordering() {
        assert!(ClockTime::new(1, 0) > ClockTime::new(0, 999));
        assert!(ClockTime::new(2, 5) < ClockTime::new(2, 6));
        assert_eq!(ClockTime::new(3, 10), ClockTime::new(2, 1_010));
    }

    #[test]
    fn test_add_carries_millis() {
        let t = ClockTime::new(10, 950) + Duration::from_hundredths(10);
        assert_eq!(t, ClockTime::new(11, 50));

        let t = ClockTime::new(10, 990) + Duration::from_hundredths(199);
        assert_eq!(t, ClockTime::new(12, 980));
    }

    #[test]
    fn test_duration_units() {
        assert_eq!(Duration::from_hundredths(100), Duration::from_secs(1));
        assert_eq!(Duration::from_millis(1500).as_secs(), 1);
        assert_eq!(
            Duration::from_millis(500) + Duration::from_millis(300),
            Duration::from_millis(800)
        );
        assert_eq!(
            Duration::from_millis(300) - Duration::from_millis(500),
            Duration::ZERO
        );
    }

    #[test]
    fn test_duration_since() {
        let a = ClockTime::new(1, 500);
        let b = ClockTime::new(3, 250);
        assert_eq!(b.duration_since(a), Duration::from_millis(1_750));
        assert_eq!(a.duration_since(b), Duration::ZERO);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", ClockTime::new(4, 7)), "4.007s");
    }
}
