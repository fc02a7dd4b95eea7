//! Auto-update scheduling.
//!
//! [`should_update`] is a pure function of the schedule and the current
//! time. Only a completed pipeline run moves `last_update` forward.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::str::FromStr;

use crate::config::UpdateConfig;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFrequency {
    Manual,
    Startup,
    Daily,
    EveryNDays(u32),
}

impl FromStr for UpdateFrequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "manual" => Ok(UpdateFrequency::Manual),
            "startup" => Ok(UpdateFrequency::Startup),
            "daily" => Ok(UpdateFrequency::Daily),
            other => other
                .strip_prefix("every_")
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|&n| n > 0)
                .map(UpdateFrequency::EveryNDays)
                .ok_or_else(|| {
                    Error::Configuration(format!("unknown update_frequency: '{}'", other))
                }),
        }
    }
}

impl fmt::Display for UpdateFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateFrequency::Manual => f.write_str("manual"),
            UpdateFrequency::Startup => f.write_str("startup"),
            UpdateFrequency::Daily => f.write_str("daily"),
            UpdateFrequency::EveryNDays(n) => write!(f, "every_{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSchedule {
    pub auto_update: bool,
    pub frequency: UpdateFrequency,
    pub last_update: Option<DateTime<Utc>>,
}

impl UpdateSchedule {
    /// Build from the `[update]` section.
    ///
    /// A bare `every_n` uses `update_days`. Anything unparseable degrades
    /// to `manual` with a warning rather than failing.
    pub fn from_config(cfg: &UpdateConfig) -> Self {
        let raw = cfg.update_frequency.trim();
        let frequency = if raw.eq_ignore_ascii_case("every_n") {
            UpdateFrequency::EveryNDays(cfg.update_days.max(1))
        } else {
            raw.parse().unwrap_or_else(|e: Error| {
                tracing::warn!(error = %e, "treating update schedule as manual");
                UpdateFrequency::Manual
            })
        };
        Self {
            auto_update: cfg.auto_update,
            frequency,
            last_update: cfg.last_update_at(),
        }
    }

    pub fn should_update(&self, now: DateTime<Utc>) -> bool {
        should_update(self, now)
    }
}

/// Decide whether an automatic run is due.
pub fn should_update(schedule: &UpdateSchedule, now: DateTime<Utc>) -> bool {
    if !schedule.auto_update {
        return false;
    }
    let due_after = |interval: Duration| match schedule.last_update {
        None => true,
        Some(last) => now - last >= interval,
    };
    match schedule.frequency {
        UpdateFrequency::Manual => false,
        UpdateFrequency::Startup => true,
        UpdateFrequency::Daily => due_after(Duration::days(1)),
        UpdateFrequency::EveryNDays(n) => due_after(Duration::days(i64::from(n))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn sched(auto: bool, freq: UpdateFrequency, last: Option<&str>) -> UpdateSchedule {
        UpdateSchedule {
            auto_update: auto,
            frequency: freq,
            last_update: last.map(at),
        }
    }

    #[test]
    fn disabled_never_runs() {
        let now = at("2026-05-01T00:00:00Z");
        for freq in [
            UpdateFrequency::Manual,
            UpdateFrequency::Startup,
            UpdateFrequency::Daily,
            UpdateFrequency::EveryNDays(3),
        ] {
            assert!(!should_update(&sched(false, freq, None), now));
        }
    }

    #[test]
    fn manual_and_startup() {
        let now = at("2026-05-01T00:00:00Z");
        assert!(!should_update(&sched(true, UpdateFrequency::Manual, None), now));
        assert!(should_update(
            &sched(true, UpdateFrequency::Startup, Some("2026-05-01T00:00:00Z")),
            now
        ));
    }

    #[test]
    fn daily_boundary() {
        let now = at("2026-05-02T12:00:00Z");
        assert!(should_update(&sched(true, UpdateFrequency::Daily, None), now));
        assert!(should_update(
            &sched(true, UpdateFrequency::Daily, Some("2026-05-01T12:00:00Z")),
            now
        ));
        assert!(!should_update(
            &sched(true, UpdateFrequency::Daily, Some("2026-05-01T12:00:01Z")),
            now
        ));
    }

    #[test]
    fn every_n_days() {
        let now = at("2026-05-10T00:00:00Z");
        let f = UpdateFrequency::EveryNDays(7);
        assert!(should_update(&sched(true, f, None), now));
        assert!(should_update(&sched(true, f, Some("2026-05-03T00:00:00Z")), now));
        assert!(!should_update(&sched(true, f, Some("2026-05-04T00:00:00Z")), now));
    }

    #[test]
    fn parse_frequencies() {
        assert_eq!("manual".parse::<UpdateFrequency>().unwrap(), UpdateFrequency::Manual);
        assert_eq!("Daily".parse::<UpdateFrequency>().unwrap(), UpdateFrequency::Daily);
        assert_eq!(
            "every_14".parse::<UpdateFrequency>().unwrap(),
            UpdateFrequency::EveryNDays(14)
        );
        assert!("every_0".parse::<UpdateFrequency>().is_err());
        assert!("weekly".parse::<UpdateFrequency>().is_err());
        assert_eq!(UpdateFrequency::EveryNDays(3).to_string(), "every_3");
    }

    #[test]
    fn from_config_handles_bare_every_n_and_junk() {
        let cfg = UpdateConfig {
            auto_update: true,
            update_frequency: "every_n".into(),
            update_days: 5,
            ..UpdateConfig::default()
        };
        assert_eq!(
            UpdateSchedule::from_config(&cfg).frequency,
            UpdateFrequency::EveryNDays(5)
        );

        let junk = UpdateConfig {
            auto_update: true,
            update_frequency: "hourly".into(),
            ..UpdateConfig::default()
        };
        let s = UpdateSchedule::from_config(&junk);
        assert_eq!(s.frequency, UpdateFrequency::Manual);
        assert!(!s.should_update(Utc::now()));
    }
}
