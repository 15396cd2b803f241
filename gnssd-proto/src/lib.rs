//! # gnssd-proto
//!
//! Device-independent types shared between the `gnssd` daemon and anything
//! else that wants to speak the same fix/skyview model without pulling in
//! the daemon's I/O, threading, or driver framework.
//!
//! - [`bits`]: endian-safe accessors into a raw frame buffer, plus the two
//!   checksums the device-facing wire formats use.
//! - [`timespec`]: nanosecond-precision time arithmetic and GPS-week
//!   resolution. Timing code should use this, never `f64`, until the very
//!   last formatting step.
//! - [`fix`], [`skyview`], [`raw`]: the shared per-device model.
//! - [`packet`]: the packet type tag and the driver update-mask bitflags.
//! - [`leap`]: leap-second notification plumbing.
//! - [`prn`]: vendor `(gnssid, svid)` to NMEA PRN translation.

pub mod bits;
pub mod fix;
pub mod leap;
pub mod packet;
pub mod prn;
pub mod raw;
pub mod skyview;
pub mod timespec;

pub use fix::{Accuracy, Fix, Mode, Status};
pub use leap::LeapNotify;
pub use packet::{PacketType, UpdateMask};
pub use raw::{ObsFlags, RawMeasurement, RawObservation};
pub use skyview::{Satellite, Skyview, MAX_SATELLITES};
pub use timespec::TimeSpec;
