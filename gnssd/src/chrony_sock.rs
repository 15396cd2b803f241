//! Chrony SOCK refclock publisher (C9, socket half).
//!
//! Chrony's `SOCK` refclock driver reads fixed-layout datagrams off a
//! Unix domain socket; the wire struct below is chrony's own
//! `sock_sample` (`refclock_sock.c`), reproduced field-for-field so the
//! bytes we send are exactly what chronyd expects, no translation layer
//! in between.

use std::os::unix::net::UnixDatagram;

use bytemuck::{Pod, Zeroable};
use gnssd_proto::leap::LeapNotify;
use gnssd_proto::timespec::TimeSpec;

use crate::error::GnssdError;

const SOCK_MAGIC: u32 = 0x534f434b; // "SOCK" read as a little-endian u32

/// Bit-identical to chrony's `struct sock_sample`. `Pod`+`Zeroable` (via
/// `bytemuck`) let us hand `bytemuck::bytes_of(&sample)` straight to
/// `send()` with no manual byte-twiddling.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SockSample {
    tv_sec: i64,
    tv_usec: i64,
    offset: f64,
    pulse: i32,
    leap: i32,
    _pad: i32,
    magic: u32,
}

fn leap_code(notify: LeapNotify) -> i32 {
    match notify {
        LeapNotify::None => 0,
        LeapNotify::AddSecond => 1,
        LeapNotify::DeleteSecond => 2,
        LeapNotify::Unknown => 0,
    }
}

impl SockSample {
    /// Build a sample reporting that the system clock read `system_time`
    /// at the instant the receiver's time was `device_time`. `offset` is
    /// `device - system`, seconds, the sign convention chronyd expects.
    pub fn new(device_time: TimeSpec, system_time: TimeSpec, leap_notify: LeapNotify, is_pps: bool) -> Self {
        let offset = device_time.to_f64() - system_time.to_f64();
        SockSample {
            tv_sec: system_time.sec,
            tv_usec: system_time.usec() as i64,
            offset,
            pulse: if is_pps { 1 } else { 0 },
            leap: leap_code(leap_notify),
            _pad: 0,
            magic: SOCK_MAGIC,
        }
    }
}

/// A connected-or-not publisher. Construction never fails on a missing
/// socket path — chronyd may not be running, or may not be configured
/// with a SOCK refclock at all, and the daemon must keep serving every
/// other consumer regardless.
pub struct ChronySocket {
    socket: Option<UnixDatagram>,
    target: String,
}

impl ChronySocket {
    pub fn connect(target: &str) -> Self {
        let socket = UnixDatagram::unbound().ok().and_then(|s| match s.connect(target) {
            Ok(()) => Some(s),
            Err(e) => {
                tracing::warn!(target = target, error = %e, "chrony socket not connected; will retry lazily");
                None
            }
        });
        ChronySocket { socket, target: target.to_string() }
    }

    pub fn publish(&mut self, sample: SockSample) -> Result<(), GnssdError> {
        if self.socket.is_none() {
            self.socket = UnixDatagram::unbound().ok().and_then(|s| s.connect(&self.target).ok().map(|_| s));
        }
        let Some(socket) = &self.socket else {
            return Ok(()); // best-effort; chronyd coming back later is fine
        };
        let bytes = bytemuck::bytes_of(&sample);
        if let Err(e) = socket.send(bytes) {
            self.socket = None;
            return Err(GnssdError::io(self.target.clone(), e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sock_sample_has_chronys_documented_wire_size() {
        assert_eq!(std::mem::size_of::<SockSample>(), 40);
    }

    #[test]
    fn offset_sign_convention_is_device_minus_system() {
        let device = TimeSpec::new(1000, 100_000_000);
        let system = TimeSpec::new(1000, 0);
        let sample = SockSample::new(device, system, LeapNotify::None, false);
        assert!((sample.offset - 0.1).abs() < 1e-9);
    }

    #[test]
    fn publish_to_a_nonexistent_socket_does_not_error() {
        let mut sock = ChronySocket::connect("/nonexistent/gnssd-test.sock");
        let sample = SockSample::new(TimeSpec::now(), TimeSpec::now(), LeapNotify::None, true);
        assert!(sock.publish(sample).is_ok());
    }
}
