use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use humanize_bytes::humanize_bytes_binary;
use indicatif::{ProgressBar, ProgressStyle};
use mimalloc::MiMalloc;
use rampr_core::{EngineConfig, HttpConfig, StatsSnapshot, run_once, run_scenario};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ScenarioConfig;
use crate::scenario::ComputeScenario;
use crate::summary::{JsonStats, RateTracker};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod cli;
mod config;
mod consts;
mod scenario;
mod summary;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,rampr=info,rampr_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let json = args.output == cli::OutputFormat::Json;

    let scenario_config = match &args.config {
        Some(path) => ScenarioConfig::load(path)?,
        None => ScenarioConfig::default(),
    }
    .with_overrides(&args);
    scenario_config
        .validate()
        .context("Invalid scenario configuration")?;

    let http = HttpConfig {
        timeout: Duration::from_secs(args.timeout),
        ..HttpConfig::default()
    };
    let scenario = ComputeScenario::from_config(&scenario_config);

    if args.once {
        let report = run_once(http, scenario).await?;
        summary::print_iteration(&report, json)?;
        return Ok(());
    }

    let ramp = scenario_config.ramp();
    let total = ramp.total_duration();
    let mut engine = EngineConfig::new(ramp);
    engine.http = http;
    engine.graceful_stop = Duration::from_secs(args.graceful_stop);

    info!(
        services = scenario_config.services.len(),
        complexity = scenario_config.complexity,
        "{} v{}",
        env!("CARGO_PKG_DESCRIPTION"),
        env!("CARGO_PKG_VERSION")
    );
    if !json {
        println!(
            "Running {}s ramp over {} stages, up to {} VUs",
            total.as_secs(),
            scenario_config.stages.len(),
            engine.ramp.max_target()
        );
        for svc in &scenario_config.services {
            println!("  {} @ {}", svc.name, svc.url);
        }
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping VUs");
                shutdown.cancel();
            }
        });
    }

    let pb = if json {
        None
    } else {
        let pb = ProgressBar::new(total.as_secs());
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}]",
            )?
            .progress_chars("=>-"),
        );
        Some(pb)
    };

    let pb_clone = pb.clone();
    let mut rates = RateTracker::default();

    let stats = run_scenario(
        engine,
        scenario,
        Some(move |p: StatsSnapshot| {
            let (rps, tps) = rates.update(&p);

            if let Some(pb) = &pb_clone {
                pb.set_position(p.elapsed.as_secs());
                let checks = p.check_totals();
                pb.set_message(format!(
                    "VUs: {} | RPS: {:.0} | TPS: {} | Checks: {:.1}%",
                    p.active_vus,
                    rps,
                    humanize_bytes_binary!(tps),
                    checks.pass_rate() * 100.0,
                ));
            } else if p.total_requests > 0 {
                // Skip output until the first request lands
                match serde_json::to_string(&JsonStats::new(&p, rps, tps)) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Failed to serialize progress: {}", e),
                }
            }
        }),
        shutdown,
    )
    .await?;
    std::io::stdout().flush().ok();

    if let Some(pb) = pb {
        pb.finish_with_message("Done!");
    }

    if json {
        let duration_secs = stats.elapsed.as_secs_f64().max(f64::EPSILON);
        let line = JsonStats::new(
            &stats,
            stats.total_requests as f64 / duration_secs,
            (stats.total_bytes_received as f64 / duration_secs) as u64,
        );
        println!("{}", serde_json::to_string(&line)?);
    } else {
        summary::print_text_summary(&stats);
    }

    std::io::stdout().flush().ok();

    Ok(())
}
