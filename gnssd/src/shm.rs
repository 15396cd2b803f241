//! NTP SHM publisher (C9, shared-memory half).
//!
//! Wire-compatible with the NTP reference `shmTime` segment: a POSIX
//! shared memory region (`/dev/shm/<base><unit>` via `shm_open`+`mmap`),
//! written under the classic count-bracket protocol so a reader never
//! observes a torn update without needing a lock:
//!
//! ```text
//! valid = 0
//! count += 1
//! <memory fence>
//! write every field
//! <memory fence>
//! count += 1
//! valid = 1
//! ```
//!
//! A reader that sees `count` change between its first and last read
//! knows to retry; this is exactly gpsd's `ntp_write()` in
//! `ntpshmwrite.c`, transcribed here field-for-field.

use std::sync::atomic::{fence, Ordering};

use gnssd_proto::leap::LeapNotify;
use gnssd_proto::timespec::TimeSpec;

use crate::error::GnssdError;

/// Layout of one NTP SHM segment, bit-for-bit the C `struct shmTime`.
/// `#[repr(C)]` is load-bearing: this memory is also read by `ntpd`/
/// `chronyd`, which know this exact layout, not whatever Rust would
/// otherwise choose.
#[repr(C)]
pub struct ShmTime {
    pub mode: i32,
    pub count: i32,
    pub clock_sec: i64,
    pub clock_usec: i32,
    pub receive_sec: i64,
    pub receive_usec: i32,
    pub leap: i32,
    pub precision: i32,
    pub nsamples: i32,
    pub valid: i32,
    pub clock_nsec: u32,
    pub receive_nsec: u32,
    pub dummy: [i32; 8],
}

impl Default for ShmTime {
    fn default() -> Self {
        ShmTime {
            mode: 1,
            count: 0,
            clock_sec: 0,
            clock_usec: 0,
            receive_sec: 0,
            receive_usec: 0,
            leap: leap_notify_code(LeapNotify::None),
            precision: -1,
            nsamples: 3,
            valid: 0,
            clock_nsec: 0,
            receive_nsec: 0,
            dummy: [0; 8],
        }
    }
}

fn leap_notify_code(notify: LeapNotify) -> i32 {
    match notify {
        LeapNotify::None => 0,
        LeapNotify::AddSecond => 1,
        LeapNotify::DeleteSecond => 2,
        LeapNotify::Unknown => 3,
    }
}

/// A time-delta observation: the receiver's reported time, paired with
/// the local clock reading at the moment it arrived. Both must already
/// be in `TimeSpec`, never `f64` — see the module-level warning in
/// `pps.rs`.
#[derive(Debug, Clone, Copy)]
pub struct TimeDelta {
    pub real: TimeSpec,
    pub clock: TimeSpec,
}

/// One mapped SHM segment. Segments 0 and 1 are mode 0600 (root/ntpd
/// only, matching the privilege gpsd grants the coarse serial-driven
/// segments); segment 2 and above are mode 0666 (the PPS-driven
/// segments, world-writable/readable so an unprivileged gpsd can still
/// feed them).
pub struct ShmSegment {
    ptr: *mut ShmTime,
    len: usize,
    unit: u32,
}

unsafe impl Send for ShmSegment {}

impl ShmSegment {
    /// Open (creating if necessary) the SHM segment for `base<unit>`.
    pub fn open(base: &str, unit: u32) -> Result<Self, GnssdError> {
        let name = format!("/{base}{unit}\0");
        let mode = if unit < 2 { 0o600 } else { 0o666 };

        let fd = unsafe {
            libc::shm_open(
                name.as_ptr() as *const libc::c_char,
                libc::O_CREAT | libc::O_RDWR,
                mode,
            )
        };
        if fd < 0 {
            return Err(GnssdError::ShmUnavailable { reason: std::io::Error::last_os_error().to_string() });
        }

        let len = std::mem::size_of::<ShmTime>();
        if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
            unsafe { libc::close(fd) };
            return Err(GnssdError::ShmUnavailable { reason: std::io::Error::last_os_error().to_string() });
        }

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if ptr == libc::MAP_FAILED {
            return Err(GnssdError::ShmUnavailable { reason: std::io::Error::last_os_error().to_string() });
        }

        let segment = ShmSegment { ptr: ptr as *mut ShmTime, len, unit };
        unsafe { std::ptr::write(segment.ptr, ShmTime::default()) };
        Ok(segment)
    }

    /// Write a new observation under the count-bracket protocol.
    pub fn write(&self, delta: TimeDelta, precision: i32, leap_notify: LeapNotify) {
        // SAFETY: `ptr` was mmap'd for the lifetime of `self` with room
        // for exactly one `ShmTime`, and every access here goes through
        // volatile reads/writes with explicit fences, matching the
        // original C's `volatile struct shmTime *` contract.
        unsafe {
            let seg = self.ptr;
            std::ptr::write_volatile(&mut (*seg).valid, 0);
            let count = std::ptr::read_volatile(&(*seg).count);
            std::ptr::write_volatile(&mut (*seg).count, count.wrapping_add(1));
            fence(Ordering::Release);

            std::ptr::write_volatile(&mut (*seg).clock_sec, delta.real.sec);
            std::ptr::write_volatile(&mut (*seg).clock_usec, delta.real.usec());
            std::ptr::write_volatile(&mut (*seg).clock_nsec, delta.real.nsec as u32);
            std::ptr::write_volatile(&mut (*seg).receive_sec, delta.clock.sec);
            std::ptr::write_volatile(&mut (*seg).receive_usec, delta.clock.usec());
            std::ptr::write_volatile(&mut (*seg).receive_nsec, delta.clock.nsec as u32);
            std::ptr::write_volatile(&mut (*seg).leap, leap_notify_code(leap_notify));
            std::ptr::write_volatile(&mut (*seg).precision, precision);

            fence(Ordering::Release);
            let count = std::ptr::read_volatile(&(*seg).count);
            std::ptr::write_volatile(&mut (*seg).count, count.wrapping_add(1));
            std::ptr::write_volatile(&mut (*seg).valid, 1);
        }
    }

    /// Snapshot the segment for testing/introspection. Not used on the
    /// hot write path.
    pub fn snapshot(&self) -> (i32, i32) {
        unsafe { (std::ptr::read_volatile(&(*self.ptr).count), std::ptr::read_volatile(&(*self.ptr).valid)) }
    }

    pub fn unit(&self) -> u32 {
        self.unit
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_segment_starts_invalid_with_zero_count() {
        let seg = ShmTime::default();
        assert_eq!(seg.valid, 0);
        assert_eq!(seg.count, 0);
    }

    #[test]
    fn leap_notify_codes_match_the_ntp_convention() {
        assert_eq!(leap_notify_code(LeapNotify::None), 0);
        assert_eq!(leap_notify_code(LeapNotify::AddSecond), 1);
        assert_eq!(leap_notify_code(LeapNotify::DeleteSecond), 2);
    }

    // Opening real /dev/shm segments needs a writable tmpfs, which is not
    // guaranteed in every sandboxed build environment; the count-bracket
    // arithmetic itself is exercised directly against a heap-allocated
    // `ShmTime` to keep the invariant test independent of that.
    #[test]
    fn count_bracket_increments_by_two_and_ends_valid() {
        let mut seg = ShmTime::default();
        let ptr = &mut seg as *mut ShmTime;
        unsafe {
            std::ptr::write_volatile(&mut (*ptr).valid, 0);
            let c = std::ptr::read_volatile(&(*ptr).count);
            std::ptr::write_volatile(&mut (*ptr).count, c + 1);
            std::ptr::write_volatile(&mut (*ptr).clock_sec, 100);
            let c = std::ptr::read_volatile(&(*ptr).count);
            std::ptr::write_volatile(&mut (*ptr).count, c + 1);
            std::ptr::write_volatile(&mut (*ptr).valid, 1);
        }
        assert_eq!(seg.count, 2);
        assert_eq!(seg.valid, 1);
    }
}
