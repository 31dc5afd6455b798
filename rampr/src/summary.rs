use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::time::Duration;

use console::style;
use hdrhistogram::Histogram;
use humanize_bytes::humanize_bytes_binary;
use rampr_core::{CheckCounts, IterationReport, StatsSnapshot};
use serde::Serialize;

/// Turns cumulative snapshots into per-interval request and byte rates.
#[derive(Debug, Default)]
pub struct RateTracker {
    last_requests: u64,
    last_bytes: u64,
    last_elapsed: Duration,
}

impl RateTracker {
    /// Returns (requests/sec, bytes/sec) since the previous call.
    pub fn update(&mut self, p: &StatsSnapshot) -> (f64, u64) {
        let interval_secs = p.elapsed.saturating_sub(self.last_elapsed).as_secs_f64();
        let (rps, tps) = if interval_secs > 0.0 {
            (
                p.total_requests.saturating_sub(self.last_requests) as f64 / interval_secs,
                (p.total_bytes_received.saturating_sub(self.last_bytes) as f64 / interval_secs)
                    as u64,
            )
        } else {
            (0.0, 0)
        };

        self.last_requests = p.total_requests;
        self.last_bytes = p.total_bytes_received;
        self.last_elapsed = p.elapsed;
        (rps, tps)
    }
}

#[derive(Debug, Serialize)]
pub struct JsonStats {
    pub elapsed_secs: f64,
    pub vus: u64,
    pub vus_max: u64,
    pub iterations: u64,
    pub requests_per_sec: f64,
    pub bytes_per_sec: u64,
    pub total_requests: u64,
    pub total_bytes: u64,
    pub total_errors: u64,
    pub latency_mean: f64,
    pub latency_stdev: f64,
    pub latency_max: u64,
    pub latency_p50: u64,
    pub latency_p90: u64,
    pub latency_p95: u64,
    pub latency_p99: u64,
    pub req_per_sec_avg: f64,
    pub req_per_sec_stdev: f64,
    pub req_per_sec_max: f64,
    pub checks: BTreeMap<String, CheckCounts>,
    pub errors: HashMap<String, u64>,
}

impl JsonStats {
    pub fn new(p: &StatsSnapshot, requests_per_sec: f64, bytes_per_sec: u64) -> Self {
        let (rps_mean, rps_stdev, rps_max) = sample_stats(&p.rps_samples);
        let latency = LatencySummary::from_histogram(&p.latency_histogram);
        Self {
            elapsed_secs: p.elapsed.as_secs_f64(),
            vus: p.active_vus,
            vus_max: p.peak_vus,
            iterations: p.total_iterations,
            requests_per_sec,
            bytes_per_sec,
            total_requests: p.total_requests,
            total_bytes: p.total_bytes_received,
            total_errors: p.total_errors,
            latency_mean: latency.mean,
            latency_stdev: latency.stdev,
            latency_max: latency.max,
            latency_p50: latency.percentile(50),
            latency_p90: latency.percentile(90),
            latency_p95: latency.percentile(95),
            latency_p99: latency.percentile(99),
            req_per_sec_avg: rps_mean,
            req_per_sec_stdev: rps_stdev,
            req_per_sec_max: rps_max,
            checks: p.checks.clone(),
            errors: p.errors.clone(),
        }
    }
}

/// Mean, sample standard deviation and max of the per-tick RPS samples.
fn sample_stats(samples: &[f64]) -> (f64, f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let max = samples.iter().fold(0.0f64, |a, &b| a.max(b));
    let stdev = if samples.len() > 1 {
        let variance = samples
            .iter()
            .map(|value| {
                let diff = mean - *value;
                diff * diff
            })
            .sum::<f64>()
            / (samples.len() - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };
    (mean, stdev, max)
}

const PERCENTILES: [u8; 5] = [50, 75, 90, 95, 99];

/// Latency figures in microseconds, read once from the run's histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub mean: f64,
    pub stdev: f64,
    pub max: u64,
    /// Share of samples within one standard deviation of the mean.
    pub within_stdev_pct: f64,
    pub percentiles: Vec<(u8, u64)>,
}

impl LatencySummary {
    pub fn from_histogram(h: &Histogram<u64>) -> Self {
        let mean = h.mean();
        let stdev = h.stdev();
        let band = (mean - stdev).max(0.0)..=(mean + stdev);
        let within: u64 = h
            .iter_recorded()
            .filter(|v| band.contains(&(v.value_iterated_to() as f64)))
            .map(|v| v.count_at_value())
            .sum();

        Self {
            mean,
            stdev,
            max: h.max(),
            within_stdev_pct: if h.is_empty() {
                0.0
            } else {
                within as f64 / h.len() as f64 * 100.0
            },
            percentiles: PERCENTILES
                .iter()
                .map(|&p| (p, h.value_at_quantile(f64::from(p) / 100.0)))
                .collect(),
        }
    }

    pub fn percentile(&self, p: u8) -> u64 {
        self.percentiles
            .iter()
            .find(|(q, _)| *q == p)
            .map_or(0, |&(_, v)| v)
    }
}

pub fn fmt_time(micros: f64) -> String {
    if micros >= 1_000_000.0 {
        format!("{:.2}s", micros / 1_000_000.0)
    } else if micros >= 1_000.0 {
        format!("{:.2}ms", micros / 1_000.0)
    } else {
        format!("{:.2}us", micros)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ErrorBreakdown {
    pub connect: u64,
    pub read: u64,
    pub write: u64,
    pub timeout: u64,
    pub panics: u64,
    pub other: u64,
}

impl ErrorBreakdown {
    pub fn from_errors(errors: &HashMap<String, u64>) -> Self {
        let mut b = Self::default();
        for (err, count) in errors {
            if err == "Request timeout" {
                b.timeout += count;
            } else if err.starts_with("Iteration panicked") {
                b.panics += count;
            } else {
                let err_lower = err.to_lowercase();
                if err_lower.contains("connect")
                    || err_lower.contains("dns")
                    || err_lower.contains("resolve")
                {
                    b.connect += count;
                } else if err_lower.contains("read")
                    || err_lower.contains("receive")
                    || err_lower.contains("closed")
                    || err_lower.contains("incomplete")
                    || err_lower.contains("response processing")
                {
                    b.read += count;
                } else if err_lower.contains("write") || err_lower.contains("send") {
                    b.write += count;
                } else {
                    b.other += count;
                }
            }
        }
        b
    }
}

pub fn check_line(label: &str, counts: &CheckCounts) -> String {
    let rate = counts.pass_rate() * 100.0;
    if counts.fails == 0 {
        format!(
            "     {} {}  {:.2}% ({} / {})",
            style("✓").green(),
            label,
            rate,
            counts.passes,
            counts.total()
        )
    } else {
        format!(
            "     {} {}  {:.2}% ({} passed, {} failed)",
            style("✗").red(),
            label,
            rate,
            counts.passes,
            counts.fails
        )
    }
}

/// Checks first, then latency, throughput and error counts.
pub fn text_summary(stats: &StatsSnapshot) -> String {
    // Writing into a String cannot fail
    let mut out = String::new();

    let totals = stats.check_totals();
    let _ = writeln!(out, "\n  Checks");
    for (label, counts) in &stats.checks {
        let _ = writeln!(out, "{}", check_line(label, counts));
    }
    let _ = writeln!(
        out,
        "     checks: {:.2}% ({} of {})",
        totals.pass_rate() * 100.0,
        totals.passes,
        totals.total()
    );

    let latency = LatencySummary::from_histogram(&stats.latency_histogram);
    let _ = writeln!(out, "  Request Stats   Avg      Stdev     Max   +/- Stdev");
    let _ = writeln!(
        out,
        "    Latency   {:>8} {:>8} {:>8} {:>8.2}%",
        fmt_time(latency.mean),
        fmt_time(latency.stdev),
        fmt_time(latency.max as f64),
        latency.within_stdev_pct
    );
    let _ = writeln!(out, "  Latency Distribution");
    for (p, value) in &latency.percentiles {
        let _ = writeln!(out, "     {}%   {:>8}", p, fmt_time(*value as f64));
    }

    let secs = stats.elapsed.as_secs_f64();
    let per_sec = |n: u64| if secs > 0.0 { n as f64 / secs } else { 0.0 };
    let _ = writeln!(
        out,
        "  {} iterations, {} requests in {:.2}s, {} read, {} VUs max",
        stats.total_iterations,
        stats.total_requests,
        secs,
        humanize_bytes_binary!(stats.total_bytes_received),
        stats.peak_vus
    );
    let _ = writeln!(out, "Requests/sec: {:.2}", per_sec(stats.total_requests));
    let _ = writeln!(
        out,
        "Transfer/sec: {}",
        humanize_bytes_binary!(per_sec(stats.total_bytes_received) as u64)
    );

    let errors = ErrorBreakdown::from_errors(&stats.errors);
    if errors.panics > 0 {
        let _ = writeln!(out, "  Panicked iterations: {}", errors.panics);
    }
    if errors.other > 0 {
        let _ = writeln!(out, "  Errors: {}", errors.other);
    }
    let _ = writeln!(
        out,
        "Socket errors: connect {}, read {}, write {}, timeout {}",
        errors.connect, errors.read, errors.write, errors.timeout
    );
    out
}

pub fn print_text_summary(stats: &StatsSnapshot) {
    print!("{}", text_summary(stats));
}

pub fn print_iteration(report: &IterationReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(&report.checks)?);
        return Ok(());
    }

    for check in &report.checks {
        let mark = if check.passed {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!("     {} {}", mark, check.label);
    }
    println!(
        "  {} requests in {}, {} errors",
        report.stats.total_requests,
        fmt_time(report.stats.elapsed.as_micros() as f64),
        report.stats.total_errors
    );
    Ok(())
}
