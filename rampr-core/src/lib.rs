use std::time::Duration;

mod context;
mod error;
mod response;
mod runner;
mod scenario;
mod stage;
mod stats;

pub use context::{CheckResult, VuContext};
pub use error::*;
pub use response::Response;
pub use scenario::Scenario;
pub use stage::{RampConfig, Stage, deserialize_duration, parse_duration};
pub use stats::{CheckCounts, StatsSnapshot};
pub use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: format!("rampr/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ramp: RampConfig,
    /// Scheduler resolution: VU counts are adjusted and progress reported
    /// once per tick.
    pub tick: Duration,
    /// How long in-flight iterations may run after the schedule ends or the
    /// run is aborted.
    pub graceful_stop: Duration,
    pub http: HttpConfig,
}

impl EngineConfig {
    pub fn new(ramp: RampConfig) -> Self {
        Self {
            ramp,
            tick: Duration::from_secs(1),
            graceful_stop: Duration::from_secs(30),
            http: HttpConfig::default(),
        }
    }
}

/// Checks recorded by a single iteration, in the order they were made.
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub checks: Vec<CheckResult>,
    pub stats: StatsSnapshot,
}

pub async fn run_scenario<S, F>(
    config: EngineConfig,
    scenario: S,
    on_progress: Option<F>,
    shutdown: CancellationToken,
) -> error::Result<StatsSnapshot>
where
    S: Scenario,
    F: FnMut(StatsSnapshot) + Send + 'static,
{
    runner::run_scenario(config, scenario, on_progress, shutdown).await
}

pub async fn run_once<S: Scenario>(http: HttpConfig, scenario: S) -> error::Result<IterationReport> {
    runner::run_once(http, scenario).await
}
