//! The set of satellites the receiver currently tracks, whether or not
//! used in the solution.

use serde::{Deserialize, Serialize};

/// Upper bound on tracked satellites in one cycle (GPS+GLONASS+Galileo+
/// BeiDou+QZSS+SBAS comfortably fit well under this on any receiver gpsd
/// has ever supported).
pub const MAX_SATELLITES: usize = 120;

/// One tracked satellite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Satellite {
    pub gnss_id: u8,
    pub sv_id: u8,
    /// NMEA-4.0 extended PRN, or 0 if this constellation/sv has none.
    pub prn: u16,
    /// Carrier-to-noise ratio, dB-Hz. NaN if unknown.
    pub snr: f64,
    /// Elevation, degrees above horizon. NaN if unknown.
    pub elevation: f64,
    /// Azimuth, degrees from true north. NaN if unknown.
    pub azimuth: f64,
    pub used: bool,
    pub healthy: bool,
}

impl Default for Satellite {
    fn default() -> Self {
        Satellite {
            gnss_id: 0,
            sv_id: 0,
            prn: 0,
            snr: f64::NAN,
            elevation: f64::NAN,
            azimuth: f64::NAN,
            used: false,
            healthy: true,
        }
    }
}

/// A bounded snapshot of tracked satellites. Invariant: `used_count()`
/// never exceeds `visible_count()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Skyview {
    satellites: Vec<Satellite>,
}

impl Skyview {
    pub fn new() -> Self {
        Skyview { satellites: Vec::new() }
    }

    /// Append a satellite, truncating (and reporting the overflow count)
    /// once `MAX_SATELLITES` is reached rather than growing unbounded.
    /// Returns `true` if the satellite was kept.
    pub fn push(&mut self, sat: Satellite) -> bool {
        if self.satellites.len() >= MAX_SATELLITES {
            return false;
        }
        self.satellites.push(sat);
        true
    }

    pub fn clear(&mut self) {
        self.satellites.clear();
    }

    pub fn satellites(&self) -> &[Satellite] {
        &self.satellites
    }

    pub fn visible_count(&self) -> usize {
        self.satellites.len()
    }

    pub fn used_count(&self) -> usize {
        self.satellites.iter().filter(|s| s.used).count()
    }

    pub fn is_consistent(&self) -> bool {
        self.used_count() <= self.visible_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn used_never_exceeds_visible() {
        let mut sky = Skyview::new();
        for i in 0..5u8 {
            sky.push(Satellite { sv_id: i, used: i % 2 == 0, ..Default::default() });
        }
        assert!(sky.is_consistent());
        assert_eq!(sky.visible_count(), 5);
        assert_eq!(sky.used_count(), 3);
    }

    #[test]
    fn push_refuses_past_cap() {
        let mut sky = Skyview::new();
        for i in 0..MAX_SATELLITES {
            assert!(sky.push(Satellite { sv_id: (i % 255) as u8, ..Default::default() }));
        }
        assert!(!sky.push(Satellite::default()));
        assert_eq!(sky.visible_count(), MAX_SATELLITES);
    }
}
