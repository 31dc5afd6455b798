use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// A time window of the schedule and the VU count to reach by its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Stage {
    #[serde(deserialize_with = "deserialize_duration")]
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Ordered ramp schedule. VU counts move linearly from the previous stage's
/// target (or `start_vus` for the first stage) to each stage's target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampConfig {
    pub start_vus: u64,
    pub stages: Vec<Stage>,
}

impl RampConfig {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            start_vus: 0,
            stages,
        }
    }

    pub fn with_start_vus(mut self, start_vus: u64) -> Self {
        self.start_vus = start_vus;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::InvalidConfig(
                "ramp schedule needs at least one stage".to_owned(),
            ));
        }
        let Some(total) = self.checked_total_duration() else {
            return Err(Error::InvalidConfig(
                "ramp schedule duration overflows".to_owned(),
            ));
        };
        if total.is_zero() {
            return Err(Error::InvalidConfig(
                "ramp schedule has zero total duration".to_owned(),
            ));
        }
        Ok(())
    }

    /// Sum of the stage durations, saturating at `Duration::MAX`.
    /// Schedules that overflow are rejected by [`RampConfig::validate`].
    pub fn total_duration(&self) -> Duration {
        self.checked_total_duration().unwrap_or(Duration::MAX)
    }

    pub fn checked_total_duration(&self) -> Option<Duration> {
        self.stages
            .iter()
            .try_fold(Duration::ZERO, |acc, s| acc.checked_add(s.duration))
    }

    pub fn max_target(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_vus, u64::max)
    }

    /// Number of VUs that should be active `elapsed` into the run.
    /// Zero-duration stages jump straight to their target; past the end of
    /// the schedule no VUs are wanted.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let mut from = self.start_vus;
        let mut stage_start = Duration::ZERO;

        for stage in &self.stages {
            let stage_end = stage_start.saturating_add(stage.duration);
            if elapsed < stage_end {
                // elapsed >= stage_start here, so the stage has a non-zero length
                let progress =
                    (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let value = from as f64 + (stage.target as f64 - from as f64) * progress;
                return value.round().max(0.0) as u64;
            }
            from = stage.target;
            stage_start = stage_end;
        }

        0
    }
}

/// Parses durations written as `<n><unit>` segments, e.g. `3m`, `1m30s`,
/// `250ms`. Units: `ms`, `s`, `m`, `h`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidConfig("duration cannot be empty".to_owned()));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(Error::InvalidConfig(format!(
                "invalid duration '{}': expected a number before '{}'",
                s, rest
            )));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("invalid duration '{}'", s)))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let segment = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            "" => {
                return Err(Error::InvalidConfig(format!(
                    "invalid duration '{}': missing unit (ms, s, m, h)",
                    s
                )));
            }
            other => {
                return Err(Error::InvalidConfig(format!(
                    "invalid duration '{}': unknown unit '{}'",
                    s, other
                )));
            }
        };
        total = total.checked_add(segment).ok_or_else(|| {
            Error::InvalidConfig(format!("invalid duration '{}': value too large", s))
        })?;
    }

    Ok(total)
}

pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}
