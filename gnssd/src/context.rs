//! Process-wide shared state (the driver registry, leap-second belief,
//! and the config this run was started with). One `Arc<Context>` is
//! cloned into every per-device task.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;

use gnssd_proto::leap::LeapNotify;

use crate::config::Config;
use crate::driver::DriverRegistry;
use crate::drivers::ubx::UbxDriver;

fn leap_notify_to_u8(notify: LeapNotify) -> u8 {
    match notify {
        LeapNotify::None => 0,
        LeapNotify::AddSecond => 1,
        LeapNotify::DeleteSecond => 2,
        LeapNotify::Unknown => 3,
    }
}

fn leap_notify_from_u8(value: u8) -> LeapNotify {
    match value {
        1 => LeapNotify::AddSecond,
        2 => LeapNotify::DeleteSecond,
        3 => LeapNotify::Unknown,
        _ => LeapNotify::None,
    }
}

pub struct Context {
    pub config: Config,
    pub drivers: DriverRegistry,
    /// Leap seconds currently believed valid, shared across every device
    /// so a device with a weaker time source can borrow the belief of one
    /// that has already resolved it this session.
    leap_seconds: AtomicI32,
    /// Pending leap-notify flag, learned from NAV-TIMELS/NAV-TIMEGPS and
    /// shared the same way `leap_seconds` is.
    leap_notify: AtomicU8,
}

impl Context {
    pub fn new(config: Config) -> Arc<Self> {
        let mut drivers = DriverRegistry::new();
        drivers.register(Box::new(UbxDriver::new()));
        Arc::new(Context {
            config,
            drivers,
            leap_seconds: AtomicI32::new(18),
            leap_notify: AtomicU8::new(leap_notify_to_u8(LeapNotify::Unknown)),
        })
    }

    pub fn leap_seconds(&self) -> i32 {
        self.leap_seconds.load(Ordering::Relaxed)
    }

    pub fn set_leap_seconds(&self, value: i32) {
        self.leap_seconds.store(value, Ordering::Relaxed);
    }

    pub fn leap_notify(&self) -> LeapNotify {
        leap_notify_from_u8(self.leap_notify.load(Ordering::Relaxed))
    }

    pub fn set_leap_notify(&self, value: LeapNotify) {
        self.leap_notify.store(leap_notify_to_u8(value), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_starts_with_a_sane_leap_second_floor() {
        let ctx = Context::new(Config::default());
        assert_eq!(ctx.leap_seconds(), 18);
        ctx.set_leap_seconds(19);
        assert_eq!(ctx.leap_seconds(), 19);
    }

    #[test]
    fn leap_notify_starts_unknown_and_round_trips() {
        let ctx = Context::new(Config::default());
        assert_eq!(ctx.leap_notify(), LeapNotify::Unknown);
        ctx.set_leap_notify(LeapNotify::AddSecond);
        assert_eq!(ctx.leap_notify(), LeapNotify::AddSecond);
    }
}
