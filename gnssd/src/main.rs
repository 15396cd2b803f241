//! gnssd: a location-services daemon that multiplexes one or more GNSS
//! receivers into a device-independent fix feed, publishing time deltas
//! to NTP SHM segments and a chrony SOCK refclock.

mod chrony_sock;
mod config;
mod context;
mod driver;
mod drivers;
mod error;
mod lexer;
mod pps;
mod session;
mod shm;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use chrony_sock::{ChronySocket, SockSample};
use config::Config;
use context::Context;
use gnssd_proto::fix::Fix;
use gnssd_proto::leap::gate_by_month;
use gnssd_proto::timespec::TimeSpec;
use session::Session;
use shm::{ShmSegment, TimeDelta};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cfg.log_directive)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gnssd=info")),
        )
        .init();

    let devices: Vec<String> = std::env::args().skip(1).collect();
    if devices.is_empty() {
        anyhow::bail!("usage: gnssd <device-path> [device-path...]");
    }

    tracing::info!(?devices, units = ?cfg.units, "starting gnssd");
    let ctx = Context::new(cfg);

    let mut tasks = Vec::new();
    for device in devices {
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(run_device(ctx, device)));
    }

    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "device task panicked");
        }
    }

    Ok(())
}

/// Own one device end to end: open it, hunt for its baud/framing, lock a
/// driver, then pump frames while publishing time deltas on every
/// completed cycle. Runs until the device falls silent for five stale
/// windows in a row, or the process exits.
async fn run_device(ctx: Arc<Context>, path: String) {
    let hunt_ctx = ctx.clone();
    let hunt_path = path.clone();
    let hunted = tokio::task::spawn_blocking(move || -> Result<(Session, &'static str), error::GnssdError> {
        let mut session = Session::open(&hunt_path)?;
        let locked = session.hunt(&hunt_ctx.drivers)?;
        tracing::info!(
            device = %hunt_path,
            baud = ?locked.baud,
            stopbits = ?locked.stopbits,
            driver = locked.driver_name,
            "hunt locked"
        );
        Ok((session, locked.driver_name))
    })
    .await;

    let mut session = match hunted {
        Ok(Ok((session, _driver_name))) => session,
        Ok(Err(e)) => {
            tracing::error!(device = %path, error = %e, "failed to lock device");
            return;
        }
        Err(e) => {
            tracing::error!(device = %path, error = %e, "hunt task panicked");
            return;
        }
    };
    // Seed this device's leap-second belief (both the current count and
    // the pending-change flag) from whatever the daemon has already
    // learned from another device this session, so a receiver with a
    // weaker time source doesn't have to wait on its own TIMEGPS/TIMELS
    // frame to catch up.
    session.state.leap_seconds = ctx.leap_seconds();
    session.state.pending_leap_notify = ctx.leap_notify();

    let shm = ShmSegment::open(&ctx.config.shm_base, 0).ok();
    if shm.is_none() {
        tracing::warn!(device = %path, "SHM segment unavailable; continuing without NTP SHM publication");
    }
    let mut chrony = ChronySocket::connect("/var/run/chrony.sock");
    let stale_secs = ctx.config.stale_secs;

    let last_fix_time = Arc::new(Mutex::new(TimeSpec::ZERO));
    let pps_last_fix_time = last_fix_time.clone();
    let pps_ctx = ctx.clone();
    let pps_path = path.clone();
    let pps_handle = pps::spawn(path.clone(), pps_last_fix_time, move |sample| {
        let delta = TimeDelta { real: sample.real_time, clock: sample.clock_time };
        if fresh_enough(sample.real_time, stale_secs) {
            if let Some(seg) = &shm {
                let leap = gate_by_month(pps_ctx.leap_notify(), utc_month_of(sample.clock_time), false);
                seg.write(delta, sample.precision_exponent, leap);
            }
        } else {
            tracing::debug!(device = %pps_path, sec = sample.real_time.sec, "dropping stale pps sample");
        }
        tracing::trace!(device = %pps_path, sec = sample.clock_time.sec, "pps sample");
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Fix>();
    let stale = Duration::from_secs(stale_secs.max(1)) * 5;
    let pump_ctx = ctx.clone();
    let pump_path = path.clone();
    let pump = tokio::task::spawn_blocking(move || {
        session.run_blocking(&pump_ctx.drivers, stale, |state| {
            pump_ctx.set_leap_seconds(state.leap_seconds);
            pump_ctx.set_leap_notify(state.pending_leap_notify);
            let _ = tx.send(state.fix);
        });
        tracing::warn!(device = %pump_path, "device silent past the watchdog window; closing session");
    });

    while let Some(fix) = rx.recv().await {
        *last_fix_time.lock().unwrap() = fix.time;
        if !fresh_enough(fix.time, stale_secs) {
            tracing::debug!(device = %path, sec = fix.time.sec, "dropping stale fix before chrony publish");
            continue;
        }
        let system = TimeSpec::now();
        let leap = gate_by_month(ctx.leap_notify(), utc_month_of(system), false);
        let sample = SockSample::new(fix.time, system, leap, false);
        if let Err(e) = chrony.publish(sample) {
            tracing::debug!(device = %path, error = %e, "chrony publish failed");
        }
    }

    let _ = pump.await;
    pps_handle.stop();
}

/// True if `fix_time` is no more than `stale_secs` behind the system
/// clock. Gates every SHM and chrony publication so a receiver that has
/// stalled (dead antenna, jammed serial line) doesn't keep feeding a
/// downstream NTP/chrony client a timestamp that stopped advancing.
fn fresh_enough(fix_time: TimeSpec, stale_secs: u64) -> bool {
    if fix_time.is_zero() {
        return false;
    }
    let age_us = TimeSpec::now().diff_usec(fix_time);
    age_us >= 0 && age_us <= (stale_secs as i64) * 1_000_000
}

/// Civil UTC month (1-12) for a `TimeSpec`, used only to gate leap-second
/// notifications to the months the ITU schedule actually uses. The
/// inverse of `gnssd_proto::timespec::days_from_civil`, transcribed the
/// same way (Howard Hinnant's `civil_from_days`).
fn utc_month_of(ts: TimeSpec) -> u32 {
    const DAYS_PER_400Y: i64 = 146_097;
    let days = ts.sec.div_euclid(86_400) + 719_468;
    let era = days.div_euclid(DAYS_PER_400Y);
    let doe = days - era * DAYS_PER_400Y;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    month as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_month_recovers_known_calendar_months() {
        // 2019-10-04T08:51:34Z from Scenario S1.
        assert_eq!(utc_month_of(TimeSpec::new(1_570_179_094, 0)), 10);
        // A known June instant, for the leap-season gating path.
        assert_eq!(utc_month_of(TimeSpec::new(1_560_000_000, 0)), 6);
    }
}
