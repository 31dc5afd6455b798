use std::time::Duration;

use async_trait::async_trait;
use rampr_core::{Scenario, VuContext};

use crate::config::{ScenarioConfig, ServiceTarget};
use crate::consts::EXPECTED_STATUS;

/// Requests every service in order, checks for an exact 200 and pauses
/// after each one. Holds no state between iterations.
#[derive(Debug, Clone)]
pub struct ComputeScenario {
    services: Vec<ServiceTarget>,
    complexity: u64,
    pause: Duration,
}

impl ComputeScenario {
    pub fn new(services: Vec<ServiceTarget>, complexity: u64, pause: Duration) -> Self {
        Self {
            services,
            complexity,
            pause,
        }
    }

    pub fn from_config(config: &ScenarioConfig) -> Self {
        Self::new(config.services.clone(), config.complexity, config.pause)
    }

    pub fn request_url(&self, service: &ServiceTarget) -> String {
        let sep = if service.url.contains('?') { '&' } else { '?' };
        format!("{}{}complexity={}", service.url, sep, self.complexity)
    }
}

pub fn check_label(service_name: &str) -> String {
    format!("{} status {}", service_name, EXPECTED_STATUS)
}

#[async_trait]
impl Scenario for ComputeScenario {
    async fn iteration(&self, vu: &VuContext) {
        for service in &self.services {
            // Transport errors are already counted by the engine
            let passed = match vu.get(&self.request_url(service)).await {
                Ok(res) => res.status() == EXPECTED_STATUS,
                Err(_) => false,
            };
            vu.check(check_label(&service.name), passed);
            vu.sleep(self.pause).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampr_core::{HttpConfig, IterationReport, run_once};
    use wiremock::matchers::{method, path, query_param};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    async fn service(status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/compute"))
            .and(query_param("complexity", "50000"))
            .respond_with(ResponseTemplate::new(status).set_body_string("OK"))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    type Arrivals = Arc<Mutex<Vec<(&'static str, Instant)>>>;

    /// Answers 200 and notes when each request reached the service.
    struct RecordArrival {
        name: &'static str,
        arrivals: Arrivals,
    }

    impl Respond for RecordArrival {
        fn respond(&self, _: &Request) -> ResponseTemplate {
            self.arrivals
                .lock()
                .unwrap()
                .push((self.name, Instant::now()));
            ResponseTemplate::new(200).set_body_string("OK")
        }
    }

    async fn recording_service(name: &'static str, arrivals: &Arrivals) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/compute"))
            .respond_with(RecordArrival {
                name,
                arrivals: arrivals.clone(),
            })
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    fn targets(servers: &[&MockServer]) -> Vec<ServiceTarget> {
        ["Java17", "Java21", "Java25"]
            .iter()
            .zip(servers)
            .map(|(name, server)| ServiceTarget::new(*name, format!("{}/compute", server.uri())))
            .collect()
    }

    fn outcomes(report: &IterationReport) -> Vec<(&str, bool)> {
        report
            .checks
            .iter()
            .map(|c| (c.label.as_str(), c.passed))
            .collect()
    }

    #[test]
    fn labels_name_the_service_and_expected_status() {
        assert_eq!(check_label("Java17"), "Java17 status 200");
        assert_eq!(check_label("Java25"), "Java25 status 200");
    }

    #[test]
    fn appends_complexity_query() {
        let scenario = ComputeScenario::new(Vec::new(), 50_000, Duration::ZERO);
        let plain = ServiceTarget::new("Java17", "http://localhost:8081/compute");
        let with_query = ServiceTarget::new("X", "http://localhost:8081/compute?mode=fast");

        assert_eq!(
            scenario.request_url(&plain),
            "http://localhost:8081/compute?complexity=50000"
        );
        assert_eq!(
            scenario.request_url(&with_query),
            "http://localhost:8081/compute?mode=fast&complexity=50000"
        );
    }

    #[tokio::test]
    async fn all_services_healthy_pass_every_check_in_order() {
        let (a, b, c) = (service(200).await, service(200).await, service(200).await);
        let scenario = ComputeScenario::new(targets(&[&a, &b, &c]), 50_000, Duration::ZERO);

        let report = run_once(HttpConfig::default(), scenario).await.unwrap();

        assert_eq!(
            outcomes(&report),
            vec![
                ("Java17 status 200", true),
                ("Java21 status 200", true),
                ("Java25 status 200", true),
            ]
        );
        assert_eq!(report.stats.total_requests, 3);
    }

    #[tokio::test]
    async fn failing_middle_service_does_not_short_circuit() {
        let (a, b, c) = (service(200).await, service(500).await, service(200).await);
        let scenario = ComputeScenario::new(targets(&[&a, &b, &c]), 50_000, Duration::ZERO);

        let report = run_once(HttpConfig::default(), scenario).await.unwrap();

        let passed: Vec<bool> = report.checks.iter().map(|c| c.passed).collect();
        assert_eq!(passed, vec![true, false, true]);
        assert_eq!(report.stats.total_requests, 3);
        // Each mock verifies on drop that it saw exactly one request
    }

    #[tokio::test]
    async fn only_exact_200_passes() {
        let (a, b, c) = (service(201).await, service(204).await, service(200).await);
        let scenario = ComputeScenario::new(targets(&[&a, &b, &c]), 50_000, Duration::ZERO);

        let report = run_once(HttpConfig::default(), scenario).await.unwrap();

        let passed: Vec<bool> = report.checks.iter().map(|c| c.passed).collect();
        assert_eq!(passed, vec![false, false, true]);
    }

    #[tokio::test]
    async fn unreachable_service_fails_its_check_and_continues() {
        let (a, c) = (service(200).await, service(200).await);
        let services = vec![
            ServiceTarget::new("Java17", format!("{}/compute", a.uri())),
            // Nothing listens on the discard port
            ServiceTarget::new("Java21", "http://127.0.0.1:9/compute"),
            ServiceTarget::new("Java25", format!("{}/compute", c.uri())),
        ];
        let scenario = ComputeScenario::new(services, 50_000, Duration::ZERO);

        let report = run_once(HttpConfig::default(), scenario).await.unwrap();

        assert_eq!(
            outcomes(&report),
            vec![
                ("Java17 status 200", true),
                ("Java21 status 200", false),
                ("Java25 status 200", true),
            ]
        );
        assert_eq!(report.stats.total_errors, 1);
        assert_eq!(report.stats.total_requests, 3);
    }

    #[tokio::test]
    async fn pauses_after_every_request() {
        let arrivals = Arrivals::default();
        let a = recording_service("Java17", &arrivals).await;
        let b = recording_service("Java21", &arrivals).await;
        let c = recording_service("Java25", &arrivals).await;
        let pause = Duration::from_millis(100);
        let scenario = ComputeScenario::new(targets(&[&a, &b, &c]), 50_000, pause);

        let report = run_once(HttpConfig::default(), scenario).await.unwrap();

        let arrivals = arrivals.lock().unwrap().clone();
        let order: Vec<&str> = arrivals.iter().map(|(name, _)| *name).collect();
        assert_eq!(order, vec!["Java17", "Java21", "Java25"]);
        for pair in arrivals.windows(2) {
            let gap = pair[1].1.duration_since(pair[0].1);
            assert!(gap >= pause, "{} followed {} after {:?}", pair[1].0, pair[0].0, gap);
        }
        // The last request is paused after as well
        assert!(report.stats.elapsed >= pause * 3);
        assert_eq!(report.checks.len(), 3);
    }
}
