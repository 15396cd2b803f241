//! The fix record: a receiver-computed position/time solution.

use serde::{Deserialize, Serialize};

use crate::timespec::TimeSpec;

/// Dimensionality of the current solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    None,
    TwoD,
    ThreeD,
    TimeOnly,
    DeadReckoning,
}

/// Solution quality/status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    NoFix,
    Fix,
    Dgps,
    RtkFixed,
    RtkFloat,
    Dr,
    GnssDr,
    Time,
}

/// Per-axis accuracy estimates, all in SI units (meters, meters/sec,
/// seconds, degrees) unless noted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Accuracy {
    /// Horizontal position error estimate, meters.
    pub eph: f64,
    /// Vertical position error estimate, meters.
    pub epv: f64,
    /// Speed error estimate, meters/sec.
    pub eps: f64,
    /// Time error estimate, seconds.
    pub ept: f64,
    /// Track/course error estimate, degrees.
    pub epd: f64,
}

impl Default for Accuracy {
    fn default() -> Self {
        Accuracy { eph: f64::NAN, epv: f64::NAN, eps: f64::NAN, ept: f64::NAN, epd: f64::NAN }
    }
}

/// A receiver-computed position/time solution.
///
/// Every scalar defaults to `f64::NAN`, the "not provided this cycle"
/// sentinel. Invariant: a consumer that observes `mode >= TwoD` may rely on
/// `latitude`/`longitude` being finite; `mode == ThreeD` additionally
/// guarantees `alt_hae` is finite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Fix {
    pub time: TimeSpec,
    pub mode: Mode,
    pub status: Status,
    pub latitude: f64,
    pub longitude: f64,
    /// Height above the WGS-84 ellipsoid, meters.
    pub alt_hae: f64,
    /// Height above mean sea level, meters.
    pub alt_msl: f64,
    /// Ground speed, meters/sec.
    pub speed: f64,
    /// Course over ground, degrees from true north.
    pub track: f64,
    /// Vertical velocity (positive up), meters/sec.
    pub climb: f64,
    pub accuracy: Accuracy,
}

impl Default for Fix {
    fn default() -> Self {
        Fix {
            time: TimeSpec::ZERO,
            mode: Mode::None,
            status: Status::NoFix,
            latitude: f64::NAN,
            longitude: f64::NAN,
            alt_hae: f64::NAN,
            alt_msl: f64::NAN,
            speed: f64::NAN,
            track: f64::NAN,
            climb: f64::NAN,
            accuracy: Accuracy::default(),
        }
    }
}

impl Fix {
    /// True once this fix's invariant for its `mode` is satisfiable —
    /// i.e. lat/lon are finite at `TwoD` and above, and altitude is also
    /// finite at `ThreeD`.
    pub fn is_consistent(&self) -> bool {
        match self.mode {
            Mode::None => true,
            Mode::TimeOnly => self.time.sec != 0 || self.time.nsec != 0,
            Mode::TwoD | Mode::DeadReckoning => {
                self.latitude.is_finite() && self.longitude.is_finite()
            }
            Mode::ThreeD => {
                self.latitude.is_finite() && self.longitude.is_finite() && self.alt_hae.is_finite()
            }
        }
    }

    pub fn set_no_fix(&mut self) {
        *self = Fix::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fix_is_no_fix_and_consistent() {
        let f = Fix::default();
        assert_eq!(f.mode, Mode::None);
        assert!(f.is_consistent());
    }

    #[test]
    fn three_d_without_altitude_is_inconsistent() {
        let mut f = Fix::default();
        f.mode = Mode::ThreeD;
        f.latitude = 1.0;
        f.longitude = 2.0;
        assert!(!f.is_consistent());
        f.alt_hae = 10.0;
        assert!(f.is_consistent());
    }
}
