//! The driver trait (C4) and the registry that dispatches a classified
//! packet to whichever driver claims it. This replaces the C original's
//! table of function pointers (`struct gps_type_t`) with a trait object,
//! the idiomatic Rust substitute.

use gnssd_proto::fix::Fix;
use gnssd_proto::leap::LeapNotify;
use gnssd_proto::packet::{PacketType, UpdateMask};
use gnssd_proto::raw::RawMeasurement;
use gnssd_proto::skyview::Skyview;

use crate::error::GnssdError;

/// Learns which message ID marks the end of a reporting cycle on
/// firmware that never sends an explicit cycle terminator (e.g. UBX
/// without NAV-EOE enabled), by watching which message consistently
/// arrives last before the receiver's time-of-week value changes.
///
/// A single observation is not trusted: the candidate must repeat on two
/// consecutive cycles before it is latched, so one reordered or dropped
/// frame can't mislatch the wrong id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleEnderTracker {
    /// True once an explicit cycle terminator (UBX NAV-EOE) has been
    /// observed on this device; once true, discovery stops running
    /// entirely and the explicit terminator is trusted exclusively.
    pub eoe_seen: bool,
    last_cycle_key: Option<u32>,
    last_msg_id: Option<u8>,
    candidate: Option<u8>,
    confirmations: u32,
    locked: Option<u8>,
}

impl CycleEnderTracker {
    /// Record that message `id` arrived while the receiver's per-cycle
    /// discriminator (UBX iTOW) read `cycle_key`. Call once per NAV-class
    /// message other than the real terminator, only while `eoe_seen` is
    /// false.
    pub fn observe(&mut self, id: u8, cycle_key: u32) {
        if let Some(prev_key) = self.last_cycle_key {
            if prev_key != cycle_key {
                let candidate_id = self.last_msg_id;
                if candidate_id == self.candidate {
                    self.confirmations += 1;
                } else {
                    self.candidate = candidate_id;
                    self.confirmations = 1;
                }
                if self.confirmations >= 2 {
                    self.locked = self.candidate;
                }
            }
        }
        self.last_cycle_key = Some(cycle_key);
        self.last_msg_id = Some(id);
    }

    /// True once `id` has been confirmed, twice in a row, as the last
    /// message of a cycle.
    pub fn is_ender(&self, id: u8) -> bool {
        self.locked == Some(id)
    }
}

/// Everything a driver's `parse` call is allowed to mutate. Bundled so a
/// session can hold one of these per device without the driver needing a
/// back-reference into session internals.
pub struct DeviceState {
    pub fix: Fix,
    pub skyview: Skyview,
    pub raw: RawMeasurement,
    /// Leap seconds currently believed valid (from TIMEGPS/TIMELS, or a
    /// sane hardcoded floor); used to resolve GPS week/iTOW timestamps.
    pub leap_seconds: i32,
    /// Forward-looking leap-second flag, learned from NAV-TIMELS's
    /// pending-change fields (not just the current leap-second count).
    pub pending_leap_notify: LeapNotify,
    /// Receiver-reported protocol version string, if the device ever sent
    /// one (UBX MON-VER `PROTVER=`, e.g. `"27.11"`).
    pub protocol_version: Option<f32>,
    /// End-of-cycle discriminator state, for firmware that never sends an
    /// explicit cycle terminator.
    pub cycle_ender: CycleEnderTracker,
}

impl Default for DeviceState {
    fn default() -> Self {
        DeviceState {
            fix: Fix::default(),
            skyview: Skyview::new(),
            raw: RawMeasurement::default(),
            leap_seconds: 18,
            pending_leap_notify: LeapNotify::Unknown,
            protocol_version: None,
            cycle_ender: CycleEnderTracker::default(),
        }
    }
}

/// A protocol driver: recognizes its own packet types and decodes them
/// into the shared device-state model. Implementors are long-lived and
/// shared across every device that speaks their protocol, so they must
/// not hold per-device mutable state themselves — that lives in
/// [`DeviceState`], passed in on every call.
pub trait Driver: Send + Sync {
    /// Human-readable driver name, for logging (`"u-blox"`, `"NMEA0183"`).
    fn name(&self) -> &'static str;

    /// True if this driver recognizes (and wants first refusal on) frames
    /// of this packet type.
    fn claims(&self, packet_type: &PacketType) -> bool;

    /// Decode one already-classified, checksum-validated frame, folding
    /// its contents into `state`. Returns which fields changed.
    fn parse(&self, frame: &[u8], state: &mut DeviceState) -> Result<UpdateMask, GnssdError>;

    /// Device-specific probe sent once right after a hunt-loop lock, to
    /// confirm the device is what the driver thinks it is. Default: no
    /// probe needed.
    fn probe(&self, _write: &mut dyn FnMut(&[u8]) -> std::io::Result<()>) -> std::io::Result<()> {
        Ok(())
    }

    /// Wakeup string/bytes to elicit a first report from a device that
    /// speaks only on request. Default: none.
    fn wakeup(&self, _write: &mut dyn FnMut(&[u8]) -> std::io::Result<()>) -> std::io::Result<()> {
        Ok(())
    }

    /// Called once per completed event cycle (`UpdateMask::END_OF_CYCLE`),
    /// after dispatch, so a driver can run bookkeeping that spans several
    /// frames. Default: no-op.
    fn event(&self, _state: &mut DeviceState) {}

    /// Ask the device to change its reporting baud rate. Default:
    /// unsupported.
    fn speed_switch(
        &self,
        _baud: u32,
        _write: &mut dyn FnMut(&[u8]) -> std::io::Result<()>,
    ) -> Result<(), GnssdError> {
        Err(GnssdError::ConfigWrite { reason: "driver does not support speed switching".into() })
    }

    /// Ask the device to change fix dimensionality hints (2D/3D/auto).
    /// Default: unsupported.
    fn mode_switch(
        &self,
        _mode: u8,
        _write: &mut dyn FnMut(&[u8]) -> std::io::Result<()>,
    ) -> Result<(), GnssdError> {
        Err(GnssdError::ConfigWrite { reason: "driver does not support mode switching".into() })
    }

    /// Ask the device to change its reporting rate, Hz. Default:
    /// unsupported.
    fn rate_switch(
        &self,
        _hz: f64,
        _write: &mut dyn FnMut(&[u8]) -> std::io::Result<()>,
    ) -> Result<(), GnssdError> {
        Err(GnssdError::ConfigWrite { reason: "driver does not support rate switching".into() })
    }

    /// Send a raw vendor control string/binary command through to the
    /// device, bypassing the normal report path. Default: unsupported.
    fn control_send(
        &self,
        _payload: &[u8],
        _write: &mut dyn FnMut(&[u8]) -> std::io::Result<()>,
    ) -> Result<(), GnssdError> {
        Err(GnssdError::ConfigWrite { reason: "driver does not support raw control sends".into() })
    }

    /// Fixed cable/processing delay this driver's protocol is known to
    /// add between the PPS edge and the device's report of the second
    /// boundary, seconds. Default: zero.
    fn time_offset(&self) -> f64 {
        0.0
    }
}

/// Holds every driver the daemon was built with and picks the first one
/// that claims a given packet type.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: Vec<Box<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        DriverRegistry { drivers: Vec::new() }
    }

    pub fn register(&mut self, driver: Box<dyn Driver>) {
        self.drivers.push(driver);
    }

    pub fn find(&self, packet_type: &PacketType) -> Option<&dyn Driver> {
        self.drivers.iter().find(|d| d.claims(packet_type)).map(|b| b.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub;
    impl Driver for Stub {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn claims(&self, packet_type: &PacketType) -> bool {
            matches!(packet_type, PacketType::Ubx { .. })
        }
        fn parse(&self, _frame: &[u8], _state: &mut DeviceState) -> Result<UpdateMask, GnssdError> {
            Ok(UpdateMask::empty())
        }
    }

    #[test]
    fn registry_dispatches_to_the_claiming_driver() {
        let mut reg = DriverRegistry::new();
        reg.register(Box::new(Stub));
        assert!(reg.find(&PacketType::Ubx { class: 1, id: 7 }).is_some());
        assert!(reg.find(&PacketType::Nmea).is_none());
    }

    #[test]
    fn cycle_ender_is_not_latched_on_a_single_observation() {
        // Two messages (ids 7 and 18) complete one cycle at iTOW 100, then
        // the next cycle begins at iTOW 200. Id 18 was last both times,
        // but this is still only the first confirmation.
        let mut tracker = CycleEnderTracker::default();
        tracker.observe(7, 100);
        tracker.observe(18, 100);
        tracker.observe(7, 200);
        assert!(!tracker.is_ender(18));
    }

    #[test]
    fn cycle_ender_latches_after_two_consecutive_confirmations() {
        let mut tracker = CycleEnderTracker::default();
        tracker.observe(7, 100);
        tracker.observe(18, 100); // candidate: 18 (last before iTOW changes)
        tracker.observe(7, 200);
        tracker.observe(18, 200); // confirmation 1
        tracker.observe(7, 300); // itow change -> confirmation 2, latches
        assert!(tracker.is_ender(18));
        assert!(!tracker.is_ender(7));
    }

    #[test]
    fn cycle_ender_discovery_does_not_latch_a_one_off_reorder() {
        let mut tracker = CycleEnderTracker::default();
        tracker.observe(7, 100);
        tracker.observe(18, 100);
        tracker.observe(7, 200); // candidate 18 confirmed once
        tracker.observe(9, 200); // a different id now arrives last
        tracker.observe(7, 300); // candidate resets to 9, only one confirmation
        assert!(!tracker.is_ender(18));
        assert!(!tracker.is_ender(9));
    }
}
