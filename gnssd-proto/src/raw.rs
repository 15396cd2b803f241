//! Optional per-satellite raw measurement data (pseudorange, carrier
//! phase, Doppler). Populated only if a raw-measurement frame arrived
//! this cycle — most consumers never see this.

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ObsFlags: u8 {
        const PR_VALID      = 0b0000_0001;
        const CP_VALID      = 0b0000_0010;
        const HALF_CYCLE    = 0b0000_0100;
        const DOPPLER_VALID = 0b0000_1000;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawObservation {
    pub gnss_id: u8,
    pub sv_id: u8,
    /// Pseudorange, meters.
    pub pseudorange: f64,
    /// Carrier phase, cycles.
    pub carrier_phase: f64,
    /// Doppler shift, Hz (negative approaching).
    pub doppler: f64,
    /// Lock time since last half-cycle slip, milliseconds.
    pub lock_time_ms: u16,
    /// Vendor-specific signal/observation code (e.g. L1C, L2CM).
    pub obs_code: u8,
    pub flags: ObsFlags,
}

/// One cycle's worth of raw per-satellite measurements, if the receiver
/// emitted a raw-measurement frame this cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMeasurement {
    pub receiver_tow: f64,
    pub week: u16,
    pub leap_seconds: i8,
    pub observations: Vec<RawObservation>,
}
