//! Packet type tags and the driver update-mask bitflags.

use serde::{Deserialize, Serialize};

/// Discriminated value identifying which protocol the last completed
/// frame belongs to, or an error sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketType {
    /// Frame failed checksum/length/magic validation; not dispatched.
    Bad,
    /// Comment or non-parseable printable line.
    Comment,
    /// NMEA `$...*hh` text line.
    Nmea,
    /// UBX binary frame; `(class, id)` identifies the message within it.
    Ubx { class: u8, id: u8 },
}

impl PacketType {
    pub fn is_bad(&self) -> bool {
        matches!(self, PacketType::Bad)
    }
}

bitflags::bitflags! {
    /// Which fields of the fix/skyview/raw records a driver's `parse` call
    /// mutated this invocation. Adopted from `Kato-emb-gpsd-json`, the one
    /// example in the retrieval pack already depending on `bitflags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct UpdateMask: u32 {
        const TIME       = 1 << 0;
        const LATLON     = 1 << 1;
        const ALTITUDE   = 1 << 2;
        const SPEED      = 1 << 3;
        const TRACK      = 1 << 4;
        const CLIMB      = 1 << 5;
        const STATUS     = 1 << 6;
        const MODE       = 1 << 7;
        const SATELLITES = 1 << 8;
        const DOP        = 1 << 9;
        const RAW        = 1 << 10;
        const DEVICE_ID  = 1 << 11;
        const LEAP_SECOND = 1 << 12;
        /// Driver considers this the end of a reporting cycle; the session
        /// should publish a consistent snapshot to consumers.
        const END_OF_CYCLE = 1 << 31;
    }
}

impl Default for UpdateMask {
    fn default() -> Self {
        UpdateMask::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_cycle_is_detectable_independent_of_other_bits() {
        let mask = UpdateMask::LATLON | UpdateMask::TIME | UpdateMask::END_OF_CYCLE;
        assert!(mask.contains(UpdateMask::END_OF_CYCLE));
        assert!(mask.contains(UpdateMask::LATLON));
        assert!(!mask.contains(UpdateMask::SATELLITES));
    }
}
