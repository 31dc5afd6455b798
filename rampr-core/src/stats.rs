use dashmap::DashMap;
use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::{
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

pub(crate) fn new_histogram() -> Histogram<u64> {
    // Only fails for more than 5 significant figures
    Histogram::new(3).expect("3 significant figures is a valid histogram precision")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckCounts {
    pub passes: u64,
    pub fails: u64,
}

impl CheckCounts {
    pub fn record(&mut self, passed: bool) {
        if passed {
            self.passes += 1;
        } else {
            self.fails += 1;
        }
    }

    pub fn add(&mut self, other: CheckCounts) {
        self.passes += other.passes;
        self.fails += other.fails;
    }

    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.passes as f64 / self.total() as f64
        }
    }
}

/// Run-wide counters shared by every VU.
#[derive(Debug)]
pub struct Stats {
    pub active_vus: AtomicU64,
    pub peak_vus: AtomicU64,
    pub total_iterations: AtomicU64,
    pub total_requests: AtomicU64,
    pub total_errors: AtomicU64,
    pub total_bytes_received: AtomicU64,
    pub errors_map: DashMap<String, u64>,
    pub checks_map: DashMap<String, CheckCounts>,
    pub latency_histogram: Mutex<Histogram<u64>>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            active_vus: AtomicU64::new(0),
            peak_vus: AtomicU64::new(0),
            total_iterations: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_bytes_received: AtomicU64::new(0),
            errors_map: DashMap::new(),
            checks_map: DashMap::new(),
            latency_histogram: Mutex::new(new_histogram()),
        }
    }

    pub fn vu_started(&self) {
        let active = self.active_vus.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_vus.fetch_max(active, Ordering::Relaxed);
    }

    pub fn vu_stopped(&self) {
        self.active_vus.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, error: String) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        *self.errors_map.entry(error).or_insert(0) += 1;
    }

    pub fn merge(&self, local: &LocalStats) {
        self.total_iterations
            .fetch_add(local.iterations, Ordering::Relaxed);
        self.total_requests.fetch_add(local.requests, Ordering::Relaxed);
        self.total_bytes_received
            .fetch_add(local.bytes_received, Ordering::Relaxed);

        let error_count: u64 = local.errors.values().sum();
        self.total_errors.fetch_add(error_count, Ordering::Relaxed);

        for (k, v) in &local.errors {
            *self.errors_map.entry(k.clone()).or_insert(0) += v;
        }

        for (k, v) in &local.checks {
            self.checks_map.entry(k.clone()).or_default().add(*v);
        }

        if let Ok(mut h) = self.latency_histogram.lock() {
            let _ = h.add(&local.histogram);
        }
    }

    pub fn snapshot(&self, elapsed: Duration, rps_samples: Vec<f64>) -> StatsSnapshot {
        StatsSnapshot {
            elapsed,
            active_vus: self.active_vus.load(Ordering::Relaxed),
            peak_vus: self.peak_vus.load(Ordering::Relaxed),
            total_iterations: self.total_iterations.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            total_bytes_received: self.total_bytes_received.load(Ordering::Relaxed),
            errors: self
                .errors_map
                .iter()
                .map(|r| (r.key().clone(), *r.value()))
                .collect(),
            checks: self
                .checks_map
                .iter()
                .map(|r| (r.key().clone(), *r.value()))
                .collect(),
            latency_histogram: match self.latency_histogram.lock() {
                Ok(hist) => hist.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            },
            rps_samples,
        }
    }
}

/// Per-VU counters, merged into [`Stats`] on flush.
#[derive(Debug)]
pub struct LocalStats {
    pub iterations: u64,
    pub requests: u64,
    pub bytes_received: u64,
    pub errors: HashMap<String, u64>,
    pub checks: HashMap<String, CheckCounts>,
    pub histogram: Histogram<u64>,
}

impl Default for LocalStats {
    fn default() -> Self {
        Self {
            iterations: 0,
            requests: 0,
            bytes_received: 0,
            errors: HashMap::new(),
            checks: HashMap::new(),
            histogram: new_histogram(),
        }
    }
}

impl LocalStats {
    pub fn is_empty(&self) -> bool {
        self.iterations == 0
            && self.requests == 0
            && self.bytes_received == 0
            && self.errors.is_empty()
            && self.checks.is_empty()
            && self.histogram.is_empty()
    }

    pub fn record_error(&mut self, error: String) {
        *self.errors.entry(error).or_insert(0) += 1;
    }

    pub fn reset(&mut self) {
        self.iterations = 0;
        self.requests = 0;
        self.bytes_received = 0;
        self.errors.clear();
        self.checks.clear();
        self.histogram.reset();
    }
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub elapsed: Duration,
    pub active_vus: u64,
    pub peak_vus: u64,
    pub total_iterations: u64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_bytes_received: u64,
    pub errors: HashMap<String, u64>,
    pub checks: BTreeMap<String, CheckCounts>,
    pub latency_histogram: Histogram<u64>,
    pub rps_samples: Vec<f64>,
}

impl StatsSnapshot {
    /// Passes and fails summed over every check label.
    pub fn check_totals(&self) -> CheckCounts {
        let mut totals = CheckCounts::default();
        for counts in self.checks.values() {
            totals.add(*counts);
        }
        totals
    }
}
