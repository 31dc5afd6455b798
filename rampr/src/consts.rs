use std::time::Duration;

pub const DEFAULT_COMPLEXITY: u64 = 50_000;
pub const DEFAULT_PAUSE: Duration = Duration::from_millis(100);
pub const EXPECTED_STATUS: u16 = 200;
/// VUs running when the first stage begins, as with k6's `stages` shortcut.
pub const DEFAULT_START_VUS: u64 = 1;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_GRACEFUL_STOP_SECS: u64 = 30;

/// (name, base url) of the services under test, in request order.
pub const DEFAULT_SERVICES: [(&str, &str); 3] = [
    ("Java17", "http://localhost:8081/compute"),
    ("Java21", "http://localhost:8082/compute"),
    ("Java25", "http://localhost:8083/compute"),
];

/// (duration in seconds, target VUs): ramp-up, sustain, ramp-down.
pub const DEFAULT_STAGES: [(u64, u64); 3] = [(3 * 60, 10), (5 * 60, 600), (3 * 60, 0)];
