//! The PPS (pulse-per-second) timing thread (C7).
//!
//! This is deliberately a raw `std::thread`, not a tokio task: it spends
//! almost all of its life blocked inside a kernel call (`ioctl(PPS_FETCH)`
//! on `/dev/ppsN`, or `TIOCMIWAIT` on the device's modem-control lines),
//! and threads are the correct tool for "blocks in the kernel, needs to
//! react within microseconds of waking up" work — an async task would
//! either need `spawn_blocking` per pulse (needless overhead at 1Hz, but
//! more importantly the wrong abstraction since this never yields) or
//! would stall the runtime outright.
//!
//! All arithmetic here stays in `TimeSpec`. See the module-level warning
//! this is grounded on: nanosecond-since-epoch needs 62 significant bits,
//! more than an `f64` mantissa carries past 2038 — `f64` must never touch
//! a PPS timestamp before the final human-readable log line.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gnssd_proto::timespec::TimeSpec;

/// The receiver's reporting rate, inferred from the cycle length between
/// two consecutive edges rather than assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseRate {
    Five,
    One,
    Half,
}

/// A single accepted pulse: the kernel-reported edge time, the receiver
/// time this edge is believed to mark, and the thread's estimate of its
/// own precision (for the SHM segment's `precision` field).
#[derive(Debug, Clone, Copy)]
pub struct PpsSample {
    pub clock_time: TimeSpec,
    pub real_time: TimeSpec,
    pub precision_exponent: i32,
    pub rate: PulseRate,
}

/// Outcome of classifying the interval between two consecutive edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleVerdict {
    /// No previous edge to measure against yet; not a rejection.
    Bootstrap,
    /// Two consecutive fetches returned the identical kernel timestamp —
    /// the device stopped pulsing or the driver is stuck.
    Stale,
    /// The interval falls inside one of the recognized pulse-rate bands.
    Accepted(PulseRate),
    /// The interval falls in none of the recognized bands.
    OutOfRange,
}

/// Lower/upper microsecond bounds for each recognized cycle length. A
/// 50%-duty-cycle square wave at 1Hz or 0.5Hz produces two edges per
/// period with very different spacing (the short half and the long
/// half); only the long half — the one that actually spans the
/// recognized band — is ever accepted, which is what naturally discards
/// the other edge without a separate "wrong edge" check.
const FIVE_HZ_US: std::ops::RangeInclusive<i64> = 180_000..=201_000;
const ONE_HZ_US: std::ops::RangeInclusive<i64> = 900_000..=1_100_000;
const HALF_HZ_US: std::ops::RangeInclusive<i64> = 1_800_000..=2_200_000;

/// How far behind the edge clock the most recent in-band fix may be and
/// still be trusted to identify which GPS second the edge belongs to.
/// chronyd's own refclock driver tolerates up to 8.33% slew before
/// distrusting a sample; 1.1s gives comparable headroom above the
/// nominal 1s cadence.
const MAX_FIX_LAG_US: i64 = 1_100_000;

/// After this many consecutive rejected edges, stop hammering the kernel
/// and back off — the device or the PPS wiring is almost certainly in a
/// bad state and burning CPU re-polling it every edge helps nobody.
const REJECTION_BACKOFF_THRESHOLD: u32 = 10;
const REJECTION_BACKOFF: Duration = Duration::from_secs(10);

fn band_of(cycle_us: i64) -> Option<PulseRate> {
    if FIVE_HZ_US.contains(&cycle_us) {
        Some(PulseRate::Five)
    } else if ONE_HZ_US.contains(&cycle_us) {
        Some(PulseRate::One)
    } else if HALF_HZ_US.contains(&cycle_us) {
        Some(PulseRate::Half)
    } else {
        None
    }
}

/// Categorize the interval between `candidate` and the previous accepted
/// edge by its length, per the receiver's possible reporting rates
/// (5Hz/1Hz/0.5Hz). `established` is the rate this device has already
/// locked onto, if any: once a rate is established, a lone cycle landing
/// in a *different* band is a dropped or doubled edge, not a genuine rate
/// change — a 1Hz device that misses one pulse produces a ~2s gap that
/// numerically matches the 0.5Hz band, and must still be rejected as
/// "cycle out of range" rather than misread as a rate switch. Only the
/// first edge pair (`established == None`) gets to pick a rate freely.
pub fn classify_cycle(previous: Option<TimeSpec>, candidate: TimeSpec, established: Option<PulseRate>) -> CycleVerdict {
    let Some(prev) = previous else {
        return CycleVerdict::Bootstrap;
    };
    if prev == candidate {
        return CycleVerdict::Stale;
    }
    let cycle_us = candidate.diff_usec(prev).abs();
    match (established, band_of(cycle_us)) {
        (_, None) => CycleVerdict::OutOfRange,
        (None, Some(rate)) => CycleVerdict::Accepted(rate),
        (Some(est), Some(rate)) if rate == est => CycleVerdict::Accepted(rate),
        (Some(_), Some(_)) => CycleVerdict::OutOfRange,
    }
}

/// Shared handle used to stop the PPS thread.
pub struct PpsHandle {
    stop: Arc<AtomicBool>,
}

impl PpsHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Start the PPS thread for `device_path`. The thread first tries the
/// RFC-2783 kernel PPS API (`/dev/pps<N>`, paired to the serial device by
/// the kernel's `ldattach`/`pps-gpio` wiring); if that device node does
/// not exist, it falls back to `TIOCMIWAIT` on the serial port's own fd,
/// which is far less precise (subject to scheduler latency) but works on
/// hardware with no kernel PPS line driver.
///
/// `last_fix_time` is the session's most recently decoded in-band fix
/// time, updated by the owning task on every completed cycle; the PPS
/// thread only ever reads it, to resolve which whole GPS second an edge
/// marks (step 6 of the per-edge algorithm below).
pub fn spawn<F>(device_path: String, last_fix_time: Arc<Mutex<TimeSpec>>, mut on_sample: F) -> PpsHandle
where
    F: FnMut(PpsSample) + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let stop_thread = stop.clone();

    std::thread::Builder::new()
        .name(format!("gnssd-pps-{device_path}"))
        .spawn(move || {
            let pps_node = kernel_pps_node_for(&device_path);
            let mut previous_edge: Option<TimeSpec> = None;
            let mut established_rate: Option<PulseRate> = None;
            let mut last_published_sec: Option<i64> = None;
            let mut consecutive_rejections: u32 = 0;

            let mut reject = |count: &mut u32| {
                *count += 1;
                if *count >= REJECTION_BACKOFF_THRESHOLD {
                    std::thread::sleep(REJECTION_BACKOFF);
                    *count = 0;
                }
            };

            while !stop_thread.load(Ordering::Relaxed) {
                let edge = match &pps_node {
                    Some(node) => fetch_kernel_pps(node),
                    None => fetch_plain_pps(&device_path),
                };
                let Some(clock_time) = edge else {
                    std::thread::sleep(Duration::from_millis(200));
                    continue;
                };

                // Step 1-4: measure the cycle against the previous edge and
                // categorize it by length.
                let verdict = classify_cycle(previous_edge, clock_time, established_rate);
                previous_edge = Some(clock_time);

                let rate = match verdict {
                    CycleVerdict::Bootstrap => continue,
                    CycleVerdict::Stale | CycleVerdict::OutOfRange => {
                        reject(&mut consecutive_rejections);
                        continue;
                    }
                    CycleVerdict::Accepted(rate) => rate,
                };
                established_rate = Some(rate);

                // Step 5: sanity-check against the most recent in-band fix.
                let last_fix = *last_fix_time.lock().unwrap();
                if last_fix.is_zero() || clock_time.diff_usec(last_fix) > MAX_FIX_LAG_US {
                    reject(&mut consecutive_rejections);
                    continue;
                }

                // Step 6: the edge marks the second after the last whole
                // second the fix confirmed, not the fix's own fractional
                // time and not the edge's own (slightly-off) clock value.
                let real = last_fix.floor_sec().plus_one_sec();

                // Testable property #7: never publish two deltas that
                // claim the same GPS second.
                if last_published_sec == Some(real.sec) {
                    reject(&mut consecutive_rejections);
                    continue;
                }

                consecutive_rejections = 0;
                last_published_sec = Some(real.sec);
                on_sample(PpsSample { clock_time, real_time: real, precision_exponent: -9, rate });
            }
        })
        .expect("failed to spawn PPS thread");

    PpsHandle { stop }
}

/// Map a serial device path to its paired `/dev/ppsN` node, if the kernel
/// exposes one. Real systems wire this up via udev; here we just check
/// for existence of the conventional node.
fn kernel_pps_node_for(device_path: &str) -> Option<String> {
    for n in 0..8 {
        let candidate = format!("/dev/pps{n}");
        if std::path::Path::new(&candidate).exists() {
            return Some(candidate);
        }
    }
    let _ = device_path;
    None
}

/// RFC-2783 `PPS_FETCH` via the kernel PPS API. Returns the kernel's
/// assert-edge timestamp.
fn fetch_kernel_pps(node: &str) -> Option<TimeSpec> {
    use std::os::unix::io::AsRawFd;
    let file = std::fs::OpenOptions::new().read(true).open(node).ok()?;
    let fd: RawFd = file.as_raw_fd();

    // `pps_fdata`/`PPS_FETCH` are not in `libc`'s stable surface; mirror
    // the kernel's `linux/pps.h` layout directly. Timeout of zero means
    // "block until the next event."
    #[repr(C)]
    struct PpsKtime {
        sec: i64,
        nsec: i32,
        flags: u32,
    }
    #[repr(C)]
    struct PpsInfo {
        assert_sequence: u32,
        clear_sequence: u32,
        assert_tu: PpsKtime,
        clear_tu: PpsKtime,
        current_mode: i32,
    }
    #[repr(C)]
    struct PpsFdata {
        info: PpsInfo,
        timeout: PpsKtime,
    }
    const PPS_FETCH: libc::c_ulong = 0x800870a4;

    let mut data = PpsFdata {
        info: PpsInfo {
            assert_sequence: 0,
            clear_sequence: 0,
            assert_tu: PpsKtime { sec: 0, nsec: 0, flags: 0 },
            clear_tu: PpsKtime { sec: 0, nsec: 0, flags: 0 },
            current_mode: 0,
        },
        timeout: PpsKtime { sec: 1, nsec: 0, flags: 1 },
    };

    let rc = unsafe { libc::ioctl(fd, PPS_FETCH, &mut data as *mut PpsFdata) };
    if rc != 0 {
        return None;
    }
    Some(TimeSpec::new(data.info.assert_tu.sec, data.info.assert_tu.nsec as i64))
}

/// Userspace fallback: block on `TIOCMIWAIT` for a change in the serial
/// port's modem-control lines (DCD/CTS carries the pulse on many GPS
/// boards with no dedicated PPS pin), then stamp the wakeup with the
/// system clock. Far less precise than the kernel API — scheduler
/// latency alone can add hundreds of microseconds — but it is the only
/// option on hardware without a PPS line driver.
fn fetch_plain_pps(device_path: &str) -> Option<TimeSpec> {
    use std::os::unix::io::AsRawFd;
    let file = std::fs::OpenOptions::new().read(true).write(true).open(device_path).ok()?;
    let fd: RawFd = file.as_raw_fd();
    let mask = libc::TIOCM_CAR | libc::TIOCM_CTS;
    let rc = unsafe { libc::ioctl(fd, libc::TIOCMIWAIT as libc::c_ulong, mask) };
    if rc != 0 {
        return None;
    }
    Some(TimeSpec::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_previous_edge_is_bootstrap_not_a_rejection() {
        let candidate = TimeSpec::new(1000, 0);
        assert_eq!(classify_cycle(None, candidate, None), CycleVerdict::Bootstrap);
    }

    #[test]
    fn one_hz_cycle_is_accepted_and_establishes_the_rate() {
        let prev = TimeSpec::new(1000, 0);
        let candidate = TimeSpec::new(1001, 0);
        assert_eq!(classify_cycle(Some(prev), candidate, None), CycleVerdict::Accepted(PulseRate::One));
    }

    #[test]
    fn five_hz_cycle_is_accepted() {
        let prev = TimeSpec::new(1000, 0);
        let candidate = TimeSpec::new(1000, 200_000_000);
        assert_eq!(classify_cycle(Some(prev), candidate, None), CycleVerdict::Accepted(PulseRate::Five));
    }

    #[test]
    fn half_hz_cycle_is_accepted_when_no_rate_is_established_yet() {
        let prev = TimeSpec::new(1000, 0);
        let candidate = TimeSpec::new(1002, 0);
        assert_eq!(classify_cycle(Some(prev), candidate, None), CycleVerdict::Accepted(PulseRate::Half));
    }

    #[test]
    fn a_2_100_000_microsecond_cycle_on_an_established_1hz_device_is_out_of_range() {
        // Scenario S4's second half: after three ~1Hz cycles establish the
        // device's rate, a 2 100 000us gap numerically matches the 0.5Hz
        // band but is really a dropped edge, not a rate change, and must
        // still be rejected "cycle out of range".
        let prev = TimeSpec::new(1000, 0);
        let candidate = TimeSpec::new(1002, 100_000_000); // 2 100 000us cycle
        assert_eq!(candidate.diff_usec(prev), 2_100_000);
        assert_eq!(classify_cycle(Some(prev), candidate, Some(PulseRate::One)), CycleVerdict::OutOfRange);
    }

    #[test]
    fn repeated_identical_timestamp_is_stale() {
        let t = TimeSpec::new(1000, 0);
        assert_eq!(classify_cycle(Some(t), t, Some(PulseRate::One)), CycleVerdict::Stale);
    }

    #[test]
    fn real_time_is_floor_of_last_fix_plus_one_second() {
        // Scenario S4: in-band fix real=1570179094(.x) must publish
        // real=1570179095.000000000, not the edge's own clock reading.
        let last_fix = TimeSpec::new(1_570_179_094, 750_000_000);
        let real = last_fix.floor_sec().plus_one_sec();
        assert_eq!(real, TimeSpec::new(1_570_179_095, 0));
    }

    #[test]
    fn consecutive_accepted_pulses_always_land_in_different_seconds() {
        // Testable property #7, exercised directly against the
        // second-uniqueness bookkeeping the thread performs per edge.
        let mut last_published_sec: Option<i64> = None;
        let mut accepted = 0;
        for fix_sec in 1000..1010i64 {
            let last_fix = TimeSpec::new(fix_sec, 0);
            let real = last_fix.floor_sec().plus_one_sec();
            if last_published_sec == Some(real.sec) {
                continue;
            }
            last_published_sec = Some(real.sec);
            accepted += 1;
        }
        assert_eq!(accepted, 10);
    }
}
