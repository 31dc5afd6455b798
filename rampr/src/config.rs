use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use rampr_core::{RampConfig, Stage, deserialize_duration};
use serde::Deserialize;

use crate::cli::Args;
use crate::consts::{
    DEFAULT_COMPLEXITY, DEFAULT_PAUSE, DEFAULT_SERVICES, DEFAULT_STAGES, DEFAULT_START_VUS,
};

/// A named endpoint hit once per iteration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceTarget {
    pub name: String,
    pub url: String,
}

impl ServiceTarget {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    #[serde(default = "default_stages")]
    pub stages: Vec<Stage>,
    #[serde(default = "default_start_vus")]
    pub start_vus: u64,
    #[serde(default = "default_services")]
    pub services: Vec<ServiceTarget>,
    #[serde(default = "default_complexity")]
    pub complexity: u64,
    #[serde(default = "default_pause", deserialize_with = "deserialize_duration")]
    pub pause: Duration,
}

fn default_stages() -> Vec<Stage> {
    DEFAULT_STAGES
        .iter()
        .map(|&(secs, target)| Stage::new(Duration::from_secs(secs), target))
        .collect()
}

fn default_start_vus() -> u64 {
    DEFAULT_START_VUS
}

fn default_services() -> Vec<ServiceTarget> {
    DEFAULT_SERVICES
        .iter()
        .map(|&(name, url)| ServiceTarget::new(name, url))
        .collect()
}

fn default_complexity() -> u64 {
    DEFAULT_COMPLEXITY
}

fn default_pause() -> Duration {
    DEFAULT_PAUSE
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
            start_vus: default_start_vus(),
            services: default_services(),
            complexity: default_complexity(),
            pause: default_pause(),
        }
    }
}

impl ScenarioConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid scenario file {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn with_overrides(mut self, args: &Args) -> Self {
        if let Some(complexity) = args.complexity {
            self.complexity = complexity;
        }
        if let Some(pause_ms) = args.pause_ms {
            self.pause = Duration::from_millis(pause_ms);
        }
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.services.is_empty() {
            bail!("At least one service must be configured");
        }
        if let Some(svc) = self.services.iter().find(|s| s.name.trim().is_empty()) {
            bail!("Service with url '{}' has an empty name", svc.url);
        }
        if let Some(svc) = self
            .services
            .iter()
            .find(|s| !(s.url.starts_with("http://") || s.url.starts_with("https://")))
        {
            bail!("Service '{}' has a non-HTTP url '{}'", svc.name, svc.url);
        }
        self.ramp().validate()?;
        Ok(())
    }

    pub fn ramp(&self) -> RampConfig {
        RampConfig::new(self.stages.clone()).with_start_vus(self.start_vus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn default_schedule_lasts_eleven_minutes_and_ends_at_zero() {
        let config = ScenarioConfig::default();
        let ramp = config.ramp();

        assert_eq!(ramp.total_duration(), Duration::from_secs(11 * 60));
        let targets: Vec<u64> = ramp.stages.iter().map(|s| s.target).collect();
        assert_eq!(targets, vec![10, 600, 0]);
        assert_eq!(ramp.stages.last().map(|s| s.target), Some(0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_ramp_starts_with_one_vu() {
        let ramp = ScenarioConfig::default().ramp();
        assert_eq!(ramp.start_vus, 1);
        assert_eq!(ramp.target_at(Duration::ZERO), 1);
        assert_eq!(ramp.target_at(Duration::from_secs(90)), 6);

        let explicit = ScenarioConfig::from_yaml("start_vus: 0\n").unwrap();
        assert_eq!(explicit.ramp().target_at(Duration::ZERO), 0);
    }

    #[test]
    fn default_services_in_request_order() {
        let config = ScenarioConfig::default();
        let names: Vec<&str> = config.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Java17", "Java21", "Java25"]);
        assert_eq!(config.services[1].url, "http://localhost:8082/compute");
        assert_eq!(config.complexity, 50_000);
        assert_eq!(config.pause, Duration::from_millis(100));
    }

    #[test]
    fn parses_yaml_scenario() {
        let config = ScenarioConfig::from_yaml(
            r#"
stages:
  - { duration: 30s, target: 5 }
  - { duration: 1m30s, target: 50 }
  - { duration: 10s, target: 0 }
services:
  - { name: A, url: "http://127.0.0.1:9000/compute" }
complexity: 10
pause: 250ms
"#,
        )
        .unwrap();

        assert_eq!(config.stages.len(), 3);
        assert_eq!(config.stages[1], Stage::new(Duration::from_secs(90), 50));
        assert_eq!(config.services, vec![ServiceTarget::new("A", "http://127.0.0.1:9000/compute")]);
        assert_eq!(config.complexity, 10);
        assert_eq!(config.pause, Duration::from_millis(250));
        assert_eq!(config.start_vus, 1);
    }

    #[test]
    fn bundled_compute_scenario_matches_defaults() {
        let config = ScenarioConfig::from_yaml(include_str!("../scenarios/compute.yaml")).unwrap();
        assert_eq!(config, ScenarioConfig::default());
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = ScenarioConfig::from_yaml("complexity: 7\n").unwrap();
        assert_eq!(config.complexity, 7);
        assert_eq!(config.services, ScenarioConfig::default().services);
        assert_eq!(config.stages, ScenarioConfig::default().stages);
    }

    #[test]
    fn rejects_bad_scenarios() {
        assert!(ScenarioConfig::from_yaml("stages:\n  - { duration: 3x, target: 1 }\n").is_err());
        assert!(ScenarioConfig::from_yaml("stages:\n  - { duration: 3m, target: -1 }\n").is_err());
        assert!(ScenarioConfig::from_yaml("unknown: 1\n").is_err());

        let empty_services = ScenarioConfig::from_yaml("services: []\n").unwrap();
        assert!(empty_services.validate().is_err());

        let empty_stages = ScenarioConfig::from_yaml("stages: []\n").unwrap();
        assert!(empty_stages.validate().is_err());

        let bad_url =
            ScenarioConfig::from_yaml("services:\n  - { name: A, url: \"localhost:1\" }\n").unwrap();
        assert!(bad_url.validate().is_err());

        // Each stage parses on its own but the schedule total overflows
        let huge = ScenarioConfig::from_yaml(
            "stages: [{duration: 5124095576030431h, target: 1}, {duration: 1h, target: 0}]\n",
        )
        .unwrap();
        assert!(huge.validate().is_err());
        assert!(ScenarioConfig::from_yaml("pause: 18446744073709551615s1s\n").is_err());
    }

    #[test]
    fn cli_flags_override_file_values() {
        let args = Args::parse_from(["rampr", "--complexity", "99", "--pause-ms", "5"]);
        let config = ScenarioConfig::default().with_overrides(&args);
        assert_eq!(config.complexity, 99);
        assert_eq!(config.pause, Duration::from_millis(5));
    }
}
