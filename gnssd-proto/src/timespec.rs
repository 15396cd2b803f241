//! Normalized nanosecond-precision time arithmetic.
//!
//! Timing paths must never drop to `f64` before the last formatting step —
//! a 53-bit double loses nanosecond precision past 2038. Everything here
//! stays in a `(sec, nsec)` pair of integers until a caller explicitly asks
//! for a float (for display or for a consumer wire format that wants one).

use std::ops::{Add, Sub};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub const NSEC_PER_SEC: i64 = 1_000_000_000;

/// A normalized (seconds, nanoseconds) pair. `nsec` is always in `[0,
/// NSEC_PER_SEC)`; a negative total duration is represented by a negative
/// `sec` with a non-negative `nsec` ("floor" normalization), matching
/// POSIX `timespec` conventions and gpsd's `TS_NORM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: i32,
}

impl TimeSpec {
    pub const ZERO: TimeSpec = TimeSpec { sec: 0, nsec: 0 };

    pub fn new(sec: i64, nsec: i64) -> Self {
        let mut ts = TimeSpec { sec, nsec: 0 };
        ts.normalize_from(nsec);
        ts
    }

    fn normalize_from(&mut self, nsec: i64) {
        let mut sec = self.sec;
        let mut n = nsec;
        while n >= NSEC_PER_SEC {
            n -= NSEC_PER_SEC;
            sec += 1;
        }
        while n < 0 {
            n += NSEC_PER_SEC;
            sec -= 1;
        }
        self.sec = sec;
        self.nsec = n as i32;
    }

    /// Wall-clock time right now, per the system clock.
    pub fn now() -> Self {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        TimeSpec {
            sec: d.as_secs() as i64,
            nsec: d.subsec_nanos() as i32,
        }
    }

    /// Construct from a whole number of seconds (fractional part zero).
    pub fn from_secs(sec: i64) -> Self {
        TimeSpec { sec, nsec: 0 }
    }

    /// Convert to floating-point seconds. Only ever call this for display
    /// or for an external wire format that demands a float; never reuse
    /// the result for further timing arithmetic.
    pub fn to_f64(self) -> f64 {
        self.sec as f64 + self.nsec as f64 / NSEC_PER_SEC as f64
    }

    /// Microseconds part, for consumers (e.g. the SHM segment) that want
    /// sec+usec instead of sec+nsec.
    pub fn usec(self) -> i32 {
        self.nsec / 1000
    }

    /// Absolute difference between two timestamps, in whole microseconds.
    pub fn diff_usec(self, other: TimeSpec) -> i64 {
        let d = self - other;
        d.sec * 1_000_000 + d.nsec as i64 / 1000
    }

    /// Floor to the start of the containing second.
    pub fn floor_sec(self) -> TimeSpec {
        TimeSpec { sec: self.sec, nsec: 0 }
    }

    /// One second later, same sub-second offset.
    pub fn plus_one_sec(self) -> TimeSpec {
        TimeSpec { sec: self.sec + 1, nsec: self.nsec }
    }

    pub fn is_zero(self) -> bool {
        self.sec == 0 && self.nsec == 0
    }
}

impl Add for TimeSpec {
    type Output = TimeSpec;
    fn add(self, rhs: TimeSpec) -> TimeSpec {
        TimeSpec::new(self.sec + rhs.sec, self.nsec as i64 + rhs.nsec as i64)
    }
}

impl Sub for TimeSpec {
    type Output = TimeSpec;
    fn sub(self, rhs: TimeSpec) -> TimeSpec {
        TimeSpec::new(self.sec - rhs.sec, self.nsec as i64 - rhs.nsec as i64)
    }
}

/// GPS epoch: 1980-01-06T00:00:00Z, as a Unix timestamp.
const GPS_EPOCH_UNIX: i64 = 315_964_800;
const SEC_PER_WEEK: i64 = 604_800;

/// Resolve a GPS (week number, iTOW in ms, nano offset) triple to an
/// absolute UTC `TimeSpec`, applying the current leap-second offset
/// (GPS time runs ahead of UTC by this many seconds).
///
/// `nano` may be negative (it is the sub-millisecond residual the receiver
/// reports alongside `itow_ms`) and is normalized away by `TimeSpec::new`.
pub fn gps_week_to_utc(week: u16, itow_ms: u32, nano: i32, leap_seconds: i32) -> TimeSpec {
    let gps_sec = GPS_EPOCH_UNIX + week as i64 * SEC_PER_WEEK + (itow_ms as i64) / 1000;
    let ms_remainder_ns = (itow_ms as i64 % 1000) * 1_000_000;
    let total_nsec = ms_remainder_ns + nano as i64;
    TimeSpec::new(gps_sec - leap_seconds as i64, total_nsec)
}

/// Build a `TimeSpec` from a calendar UTC date/time plus a signed
/// nanosecond residual (the shape UBX-NAV-PVT reports its date in).
/// Returns `None` for an invalid calendar date.
pub fn utc_ymdhms_to_timespec(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    nano: i32,
) -> Option<TimeSpec> {
    let days = days_from_civil(year, month, day)?;
    let sec_of_day = hour as i64 * 3600 + minute as i64 * 60 + second as i64;
    TimeSpec::new(days * 86_400 + sec_of_day, nano as i64).into()
}

/// Howard Hinnant's `days_from_civil`, the standard branchless algorithm
/// for proleptic-Gregorian civil date to days-since-epoch (1970-01-01).
fn days_from_civil(y: i32, m: u32, d: u32) -> Option<i64> {
    if !(1..=12).contains(&m) || !(1..=31).contains(&d) {
        return None;
    }
    let y = if m <= 2 { y - 1 } else { y } as i64;
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = (m as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    Some(era * 146_097 + doe - 719_468)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_overflowing_nanoseconds() {
        let t = TimeSpec::new(5, 1_500_000_000);
        assert_eq!(t, TimeSpec { sec: 6, nsec: 500_000_000 });
    }

    #[test]
    fn normalizes_negative_nanoseconds() {
        let t = TimeSpec::new(5, -1);
        assert_eq!(t, TimeSpec { sec: 4, nsec: 999_999_999 });
    }

    #[test]
    fn civil_date_matches_known_epoch_offset() {
        // 2019-10-04T08:51:34Z, from scenario S1 in the spec.
        let ts = utc_ymdhms_to_timespec(2019, 10, 4, 8, 51, 34, 0).unwrap();
        // Independently known Unix timestamp for this instant.
        assert_eq!(ts.sec, 1_570_179_094);
        assert_eq!(ts.nsec, 0);
    }

    #[test]
    fn gps_week_resolution_matches_civil_date() {
        // Same instant as above, expressed as GPS week/iTOW (no leap offset
        // applied here since both sides already encode UTC-equivalent time
        // for the purposes of this cross-check: week 2072, Friday.
        let direct = utc_ymdhms_to_timespec(2019, 10, 4, 8, 51, 34, 0).unwrap();
        let gps_sec_since_epoch = direct.sec - GPS_EPOCH_UNIX + 18; // 18 leap seconds as of 2019
        let week = (gps_sec_since_epoch / SEC_PER_WEEK) as u16;
        let itow_ms = ((gps_sec_since_epoch % SEC_PER_WEEK) * 1000) as u32;
        let resolved = gps_week_to_utc(week, itow_ms, 0, 18);
        assert_eq!(resolved, direct);
    }

    #[test]
    fn diff_usec_is_symmetric_in_magnitude() {
        let a = TimeSpec::new(100, 0);
        let b = TimeSpec::new(100, 500_000_000);
        assert_eq!(b.diff_usec(a), 500_000);
        assert_eq!(a.diff_usec(b), -500_000);
    }
}
