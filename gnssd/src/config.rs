//! Process configuration, read once at startup from the environment —
//! there is no config file, matching the daemon's original no-file-config
//! philosophy.

use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Metric,
    Imperial,
    Nautical,
}

impl Units {
    fn from_locale_tag(tag: &str) -> Option<Units> {
        // Mirrors the gpsd convention: a US/UK locale defaults to
        // imperial, everything else defaults to metric. Nautical is only
        // ever selected explicitly.
        let tag = tag.to_ascii_uppercase();
        if tag.contains("US") || tag.contains("GB") {
            Some(Units::Imperial)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub units: Units,
    /// How long a fix may go unrefreshed before downstream consumers
    /// should treat it as stale, seconds.
    pub stale_secs: u64,
    /// Base name for the NTP SHM segments (`/dev/shm/<base>0`, ...).
    pub shm_base: String,
    /// `tracing-subscriber` env-filter directive.
    pub log_directive: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            units: Units::Metric,
            stale_secs: 2,
            shm_base: "gnssd-shm".to_string(),
            log_directive: "gnssd=info".to_string(),
        }
    }
}

impl Config {
    /// Build configuration from the process environment. Never fails —
    /// every variable has a sane default, the same posture the daemon
    /// takes toward a missing config file.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(units) = env::var("GPSD_UNITS") {
            cfg.units = match units.to_ascii_lowercase().as_str() {
                "imperial" => Units::Imperial,
                "nautical" => Units::Nautical,
                "metric" => Units::Metric,
                _ => cfg.units,
            };
        } else {
            for var in ["LC_MEASUREMENT", "LANG"] {
                if let Ok(tag) = env::var(var) {
                    if let Some(units) = Units::from_locale_tag(&tag) {
                        cfg.units = units;
                        break;
                    }
                }
            }
        }

        if let Ok(secs) = env::var("GNSSD_STALE_SECS") {
            if let Ok(parsed) = secs.parse() {
                cfg.stale_secs = parsed;
            }
        }

        if let Ok(base) = env::var("GNSSD_SHM_BASE") {
            cfg.shm_base = base;
        }

        if let Ok(log) = env::var("GNSSD_LOG") {
            cfg.log_directive = log;
        } else if let Ok(log) = env::var("RUST_LOG") {
            cfg.log_directive = log;
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_metric_and_has_a_stale_window() {
        let cfg = Config::default();
        assert_eq!(cfg.units, Units::Metric);
        assert_eq!(cfg.stale_secs, 2);
    }

    #[test]
    fn locale_tag_recognizes_us_and_gb() {
        assert_eq!(Units::from_locale_tag("en_US.UTF-8"), Some(Units::Imperial));
        assert_eq!(Units::from_locale_tag("en_GB.UTF-8"), Some(Units::Imperial));
        assert_eq!(Units::from_locale_tag("de_DE.UTF-8"), None);
    }
}
