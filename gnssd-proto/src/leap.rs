//! Leap-second bookkeeping shared between the UBX driver, the PPS thread,
//! and the time-delta publishers.

use serde::{Deserialize, Serialize};

/// Forward-looking flag indicating an upcoming leap second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeapNotify {
    #[default]
    None,
    AddSecond,
    DeleteSecond,
    Unknown,
}

/// Gate a raw leap-notify flag to the months the real-world leap-second
/// schedule actually uses. GPS emits the pending flag for up to three
/// months prior to insertion; NTP only wants one month of warning, and the
/// ITU schedule (ITU-R TF.460-6 §2.1) allows June, December, and — rarely —
/// March or September. `allow_march_september` controls whether the rarer
/// insertion months are honored; the default publisher leaves it off to
/// match the historical gpsd behavior of only trusting June/December.
pub fn gate_by_month(notify: LeapNotify, utc_month: u32, allow_march_september: bool) -> LeapNotify {
    let allowed = matches!(utc_month, 6 | 12) || (allow_march_september && matches!(utc_month, 3 | 9));
    if allowed {
        notify
    } else {
        LeapNotify::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gates_outside_leap_months() {
        assert_eq!(gate_by_month(LeapNotify::AddSecond, 3, false), LeapNotify::None);
        assert_eq!(gate_by_month(LeapNotify::AddSecond, 6, false), LeapNotify::AddSecond);
        assert_eq!(gate_by_month(LeapNotify::AddSecond, 12, false), LeapNotify::AddSecond);
    }

    #[test]
    fn march_september_opt_in() {
        assert_eq!(gate_by_month(LeapNotify::AddSecond, 3, true), LeapNotify::AddSecond);
        assert_eq!(gate_by_month(LeapNotify::AddSecond, 9, true), LeapNotify::AddSecond);
        assert_eq!(gate_by_month(LeapNotify::AddSecond, 1, true), LeapNotify::None);
    }
}
