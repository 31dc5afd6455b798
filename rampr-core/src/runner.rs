use crate::context::VuContext;
use crate::scenario::Scenario;
use crate::stats::{Stats, StatsSnapshot};
use crate::{EngineConfig, HttpConfig, IterationReport, error::*};
use futures::FutureExt;
use reqwest::Client;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Duration, Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct ActiveVu {
    id: u64,
    token: CancellationToken,
}

/// Flushes counters and releases the VU slot even when the task is aborted
/// mid-iteration.
struct VuGuard(VuContext);

impl Drop for VuGuard {
    fn drop(&mut self) {
        self.0.flush_stats();
        self.0.stats().vu_stopped();
    }
}

/// Per-tick request rate. The first observation only sets the baseline, so
/// every sample spans a full tick.
#[derive(Debug, Default)]
struct RpsSampler {
    baseline: Option<(Instant, u64)>,
    samples: Vec<f64>,
}

impl RpsSampler {
    fn observe(&mut self, now: Instant, requests: u64) {
        match self.baseline {
            None => self.baseline = Some((now, requests)),
            Some((last_sample, last_requests)) => {
                let interval_secs = now.duration_since(last_sample).as_secs_f64();
                if interval_secs > 0.0 {
                    self.samples
                        .push(requests.saturating_sub(last_requests) as f64 / interval_secs);
                    self.baseline = Some((now, requests));
                }
            }
        }
    }
}

fn build_client(http: &HttpConfig) -> Result<Client> {
    Client::builder()
        // One connection per VU: single idle slot and no cross-VU pooling
        .pool_max_idle_per_host(1)
        .http1_only()
        .tcp_nodelay(true)
        .no_proxy()
        .timeout(http.timeout)
        .user_agent(http.user_agent.clone())
        .build()
        .map_err(Error::from)
}

pub async fn run_scenario<S, F>(
    config: EngineConfig,
    scenario: S,
    mut on_progress: Option<F>,
    shutdown: CancellationToken,
) -> Result<StatsSnapshot>
where
    S: Scenario,
    F: FnMut(StatsSnapshot) + Send + 'static,
{
    config.ramp.validate()?;
    if config.tick.is_zero() {
        return Err(Error::InvalidConfig("tick must be non-zero".to_owned()));
    }

    let scenario: Arc<dyn Scenario> = Arc::new(scenario);
    let stats = Arc::new(Stats::new());
    let run_token = shutdown.child_token();
    let mut set = JoinSet::new();
    let mut active: Vec<ActiveVu> = Vec::new();
    let mut next_vu_id = 1;

    let total = config.ramp.total_duration();
    let start_time = Instant::now();
    let mut rps = RpsSampler::default();

    info!(
        stages = config.ramp.stages.len(),
        duration_secs = total.as_secs_f64(),
        max_vus = config.ramp.max_target(),
        "Starting ramp"
    );

    // Main loop
    loop {
        let elapsed = start_time.elapsed();
        if elapsed >= total {
            break;
        }
        if shutdown.is_cancelled() {
            info!(elapsed_secs = elapsed.as_secs_f64(), "Run aborted");
            break;
        }

        let target = config.ramp.target_at(elapsed) as usize;
        if active.len() < target {
            let to_spawn = target - active.len();
            for _ in 0..to_spawn {
                let id = next_vu_id;
                next_vu_id += 1;
                let token = run_token.child_token();
                let ctx = VuContext::new(build_client(&config.http)?, stats.clone(), id);
                set.spawn(run_vu(ctx, scenario.clone(), token.clone(), config.tick));
                active.push(ActiveVu { id, token });
            }
            debug!(target, spawned = to_spawn, "Scaled VUs up");
        } else if active.len() > target {
            // Most recently started VUs go first; each stops after its
            // current iteration.
            for vu in active.drain(target..) {
                debug!(vu = vu.id, "Retiring VU");
                vu.token.cancel();
            }
        }

        while let Some(res) = set.try_join_next() {
            log_vu_exit(res);
        }

        rps.observe(Instant::now(), stats.total_requests.load(Ordering::Relaxed));

        if let Some(ref mut cb) = on_progress {
            cb(stats.snapshot(elapsed, rps.samples.clone()));
        }

        let remaining = total.saturating_sub(start_time.elapsed());
        tokio::select! {
            _ = sleep(config.tick.min(remaining)) => {}
            _ = shutdown.cancelled() => {}
        }
    }

    run_token.cancel();
    active.clear();

    let drained = timeout(config.graceful_stop, async {
        while let Some(res) = set.join_next().await {
            log_vu_exit(res);
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = set.len(),
            graceful_stop_secs = config.graceful_stop.as_secs_f64(),
            "Graceful stop elapsed, aborting in-flight iterations"
        );
        set.abort_all();
        while let Some(res) = set.join_next().await {
            log_vu_exit(res);
        }
    }

    let snapshot = stats.snapshot(start_time.elapsed(), rps.samples);
    info!(
        iterations = snapshot.total_iterations,
        requests = snapshot.total_requests,
        errors = snapshot.total_errors,
        "Ramp finished"
    );

    Ok(snapshot)
}

pub async fn run_once<S: Scenario>(http: HttpConfig, scenario: S) -> Result<IterationReport> {
    let stats = Arc::new(Stats::new());
    let start = Instant::now();

    let ctx = VuContext::new(build_client(&http)?, stats.clone(), 1);
    stats.vu_started();
    run_iteration(&ctx, &scenario).await;
    let checks = ctx.take_checks();
    ctx.flush_stats();
    stats.vu_stopped();

    Ok(IterationReport {
        checks,
        stats: stats.snapshot(start.elapsed(), Vec::new()),
    })
}

async fn run_vu(
    ctx: VuContext,
    scenario: Arc<dyn Scenario>,
    token: CancellationToken,
    flush_interval: Duration,
) {
    ctx.stats().vu_started();
    let _guard = VuGuard(ctx.clone());
    debug!(vu = ctx.vu_id(), "VU started");

    let mut last_flush = Instant::now();
    while !token.is_cancelled() {
        run_iteration(&ctx, scenario.as_ref()).await;

        if last_flush.elapsed() >= flush_interval {
            ctx.flush_stats();
            last_flush = Instant::now();
        }

        tokio::task::yield_now().await;
    }

    debug!(vu = ctx.vu_id(), iterations = ctx.iteration(), "VU stopped");
}

async fn run_iteration(ctx: &VuContext, scenario: &dyn Scenario) {
    ctx.begin_iteration();
    if let Err(panic) = AssertUnwindSafe(scenario.iteration(ctx))
        .catch_unwind()
        .await
    {
        let msg = panic_message(panic.as_ref());
        warn!(vu = ctx.vu_id(), iteration = ctx.iteration(), "Iteration panicked: {}", msg);
        ctx.stats().record_error(format!("Iteration panicked: {}", msg));
    }
    ctx.end_iteration();
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

fn log_vu_exit(res: std::result::Result<(), JoinError>) {
    match res {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => {}
        Err(e) => warn!("VU task failed: {}", e),
    }
}
