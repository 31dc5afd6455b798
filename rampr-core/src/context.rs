use crate::error::Result;
use crate::response::Response;
use crate::stats::{LocalStats, Stats};
use reqwest::Client;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Outcome of one named assertion made during an iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub label: String,
    pub passed: bool,
}

/// Handle given to every iteration of a VU: issues requests, records checks
/// and paces the loop. Counters are kept per VU and merged into the shared
/// [`Stats`] on [`VuContext::flush_stats`].
#[derive(Clone)]
pub struct VuContext {
    vu_id: u64,
    client: Client,
    stats: Arc<Stats>,
    local_stats: Arc<Mutex<LocalStats>>,
    iteration: Arc<AtomicU64>,
    iteration_checks: Arc<Mutex<Vec<CheckResult>>>,
}

impl VuContext {
    pub fn new(client: Client, stats: Arc<Stats>, vu_id: u64) -> Self {
        Self {
            vu_id,
            client,
            stats,
            local_stats: Arc::new(Mutex::new(LocalStats::default())),
            iteration: Arc::new(AtomicU64::new(0)),
            iteration_checks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// Zero-based index of the iteration currently running on this VU.
    pub fn iteration(&self) -> u64 {
        self.iteration.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    fn local(&self) -> MutexGuard<'_, LocalStats> {
        self.local_stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn begin_iteration(&self) {
        self.iteration_checks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub(crate) fn end_iteration(&self) {
        self.local().iterations += 1;
        self.iteration.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn take_checks(&self) -> Vec<CheckResult> {
        std::mem::take(
            &mut *self
                .iteration_checks
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        )
    }

    pub fn flush_stats(&self) {
        let mut local = self.local();
        if !local.is_empty() {
            self.stats.merge(&local);
            local.reset();
        }
    }

    /// Records a named assertion and returns `passed` unchanged.
    pub fn check(&self, label: impl Into<String>, passed: bool) -> bool {
        let label = label.into();
        self.local()
            .checks
            .entry(label.clone())
            .or_default()
            .record(passed);
        self.iteration_checks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(CheckResult { label, passed });
        passed
    }

    pub async fn sleep(&self, duration: Duration) {
        sleep(duration).await;
    }

    /// Issues a GET. Transport failures are counted as errors and returned;
    /// any status code, including 4xx/5xx, is a successful response here.
    pub async fn get(&self, url: &str) -> Result<Response> {
        let start = Instant::now();
        let resp = self.client.get(url).send().await;
        self.process_response(resp, start).await
    }

    async fn process_response(
        &self,
        resp: reqwest::Result<reqwest::Response>,
        start: Instant,
    ) -> Result<Response> {
        match resp {
            Ok(r) => match Response::new(r).await {
                Ok(response) => {
                    let duration = start.elapsed();
                    let mut local = self.local();
                    local.requests += 1;
                    local.bytes_received += response.total_size() as u64;
                    let _ = local.histogram.record(duration.as_micros() as u64);
                    Ok(response)
                }
                Err(e) => {
                    let mut local = self.local();
                    local.requests += 1;
                    local.record_error(format!("Response processing error: {}", e));
                    Err(e.into())
                }
            },
            Err(e) => {
                let mut local = self.local();
                local.requests += 1;
                if e.is_timeout() {
                    local.record_error("Request timeout".to_owned());
                } else {
                    local.record_error(format!("Request error: {}", e));
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context() -> VuContext {
        VuContext::new(Client::new(), Arc::new(Stats::new()), 1)
    }

    #[test]
    fn check_returns_outcome_and_keeps_order() {
        let ctx = context();
        ctx.begin_iteration();
        assert!(ctx.check("first", true));
        assert!(!ctx.check("second", false));

        let checks = ctx.take_checks();
        assert_eq!(
            checks,
            vec![
                CheckResult {
                    label: "first".to_owned(),
                    passed: true
                },
                CheckResult {
                    label: "second".to_owned(),
                    passed: false
                },
            ]
        );
        assert!(ctx.take_checks().is_empty());
    }

    #[test]
    fn flush_moves_local_counters_into_shared_stats() {
        let ctx = context();
        ctx.check("a", true);
        ctx.end_iteration();
        ctx.flush_stats();
        ctx.flush_stats();

        let snap = ctx.stats().snapshot(Duration::ZERO, Vec::new());
        assert_eq!(snap.total_iterations, 1);
        assert_eq!(snap.checks.get("a").map(|c| c.passes), Some(1));
        assert_eq!(ctx.iteration(), 1);
    }

    #[tokio::test]
    async fn get_records_request_and_keeps_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let ctx = context();
        let resp = ctx
            .get(&format!("{}/broken", server.uri()))
            .await
            .expect("request should reach the mock server");
        assert_eq!(resp.status(), 500);
        assert_eq!(resp.text(), "boom");

        ctx.flush_stats();
        let snap = ctx.stats().snapshot(Duration::ZERO, Vec::new());
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.total_errors, 0);
        assert!(snap.total_bytes_received >= 4);
        assert_eq!(snap.latency_histogram.len(), 1);
    }

    #[tokio::test]
    async fn get_counts_transport_failures_as_errors() {
        let ctx = context();
        // Nothing listens on the discard port
        let result = ctx.get("http://127.0.0.1:9/compute").await;
        assert!(result.is_err());

        ctx.flush_stats();
        let snap = ctx.stats().snapshot(Duration::ZERO, Vec::new());
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.total_errors, 1);
        assert!(snap.errors.keys().all(|k| k.starts_with("Request error")));
    }
}
