//! Health probing: checks run through a pluggable capability set of
//! `{probeHTTP, probeTCP, probeExec}`.

use async_trait::async_trait;
use dashmap::DashMap;
use portal_executor::{CommandExecutor, ExecuteRequest, PortalCommand};
use portal_types::{HealthCheckResult, HealthStatus, ServerName, UserId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::warn;

/// Default per-server health-check interval.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Default per-check timeout.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
/// Default consecutive-failure count before health flips to `Unhealthy`.
pub const DEFAULT_RETRIES: u32 = 3;
/// Default bound on concurrent checks across the fleet.
pub const DEFAULT_FLEET_CONCURRENCY: usize = 5;

/// What a probe connects to, independent of which capability performs it.
#[derive(Debug, Clone)]
pub enum ProbeTarget {
    Http { url: String },
    Tcp { host: String, port: u16 },
    Exec { user_id: UserId },
}

/// One pluggable health-check capability. All three are selectable
/// per-server from `ServerConfig`/deployment metadata.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, server: &ServerName, target: &ProbeTarget, timeout: Duration) -> HealthCheckResult;
}

fn result(status: HealthStatus, started: Instant, status_code: Option<u16>, message: Option<String>, error: Option<String>) -> HealthCheckResult {
    HealthCheckResult {
        status,
        checked_at: chrono::Utc::now(),
        response_time_ms: Some(started.elapsed().as_millis() as u64),
        status_code,
        message,
        error_message: error,
    }
}

/// HTTP GET + status-code check via `reqwest`.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, _server: &ServerName, target: &ProbeTarget, timeout: Duration) -> HealthCheckResult {
        let started = Instant::now();
        let ProbeTarget::Http { url } = target else {
            return result(HealthStatus::Unknown, started, None, None, Some("wrong probe target for HttpProbe".into()));
        };
        match tokio::time::timeout(timeout, self.client.get(url).send()).await {
            Ok(Ok(resp)) => {
                let code = resp.status().as_u16();
                if resp.status().is_success() {
                    result(HealthStatus::Healthy, started, Some(code), None, None)
                } else {
                    result(HealthStatus::Unhealthy, started, Some(code), None, Some(format!("status {code}")))
                }
            }
            Ok(Err(e)) => result(HealthStatus::Unhealthy, started, None, None, Some(e.to_string())),
            Err(_) => result(HealthStatus::Unhealthy, started, None, None, Some("probe timed out".into())),
        }
    }
}

/// TCP connect probe via `tokio::net::TcpStream`.
#[derive(Default)]
pub struct TcpProbe;

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn probe(&self, _server: &ServerName, target: &ProbeTarget, timeout: Duration) -> HealthCheckResult {
        let started = Instant::now();
        let ProbeTarget::Tcp { host, port } = target else {
            return result(HealthStatus::Unknown, started, None, None, Some("wrong probe target for TcpProbe".into()));
        };
        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect((host.as_str(), *port))).await {
            Ok(Ok(_stream)) => result(HealthStatus::Healthy, started, None, None, None),
            Ok(Err(e)) => result(HealthStatus::Unhealthy, started, None, None, Some(e.to_string())),
            Err(_) => result(HealthStatus::Unhealthy, started, None, None, Some("probe timed out".into())),
        }
    }
}

/// Exec probe: delegates to `CommandExecutor`'s `status-probe` command
///.
pub struct ExecProbe {
    executor: Arc<dyn CommandExecutor>,
}

impl ExecProbe {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl HealthProbe for ExecProbe {
    async fn probe(&self, server: &ServerName, target: &ProbeTarget, timeout: Duration) -> HealthCheckResult {
        let started = Instant::now();
        let ProbeTarget::Exec { user_id } = target else {
            return result(HealthStatus::Unknown, started, None, None, Some("wrong probe target for ExecProbe".into()));
        };
        let outcome = self
            .executor
            .execute(ExecuteRequest {
                user_id: *user_id,
                command: PortalCommand::StatusProbe,
                args: vec![server.as_str().to_string()],
                timeout: Some(timeout),
            })
            .await;
        match outcome {
            Ok(o) if o.succeeded() => result(HealthStatus::Healthy, started, Some(0), Some(o.stdout), None),
            Ok(o) => result(HealthStatus::Unhealthy, started, Some(o.exit_code as u16), None, Some(o.stderr)),
            Err(e) => result(HealthStatus::Unhealthy, started, None, None, Some(e.to_string())),
        }
    }
}

/// Tracks consecutive-failure counts and runs bounded-concurrency checks
/// across the fleet.
pub struct HealthChecker {
    consecutive_failures: DashMap<ServerName, u32>,
    last_status: DashMap<ServerName, HealthStatus>,
    fleet_gate: Semaphore,
    retries: u32,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(fleet_concurrency: usize, retries: u32, timeout: Duration) -> Self {
        Self {
            consecutive_failures: DashMap::new(),
            last_status: DashMap::new(),
            fleet_gate: Semaphore::new(fleet_concurrency.max(1)),
            retries,
            timeout,
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(DEFAULT_FLEET_CONCURRENCY, DEFAULT_RETRIES, DEFAULT_CHECK_TIMEOUT)
    }
}

/// Outcome of one scheduled check: the raw probe result plus whether the
/// server's aggregate `HealthStatus` just changed — a change publishes an
/// event.
pub struct CheckOutcome {
    pub result: HealthCheckResult,
    pub aggregate_status: HealthStatus,
    pub status_changed: bool,
}

impl HealthChecker {
    /// Runs one probe for `server`, bounded by the fleet-wide semaphore, and
    /// folds the raw result into the consecutive-failure counter: a server
    /// only flips to `Unhealthy` after `retries` consecutive failures
    /// before health flips
    /// to Unhealthy").
    pub async fn check(&self, server: ServerName, probe: &dyn HealthProbe, target: &ProbeTarget) -> CheckOutcome {
        let _permit = self.fleet_gate.acquire().await.expect("semaphore not closed");
        let result = probe.probe(&server, target, self.timeout).await;

        let aggregate_status = match result.status {
            HealthStatus::Healthy => {
                self.consecutive_failures.remove(&server);
                HealthStatus::Healthy
            }
            HealthStatus::Unhealthy | HealthStatus::Degraded | HealthStatus::Unknown => {
                let mut entry = self.consecutive_failures.entry(server.clone()).or_insert(0);
                *entry += 1;
                if *entry >= self.retries {
                    HealthStatus::Unhealthy
                } else {
                    warn!(server = %server, failures = *entry, "health check failed, below retry threshold");
                    HealthStatus::Degraded
                }
            }
        };

        let status_changed = self
            .last_status
            .insert(server.clone(), aggregate_status)
            .map(|prev| prev != aggregate_status)
            .unwrap_or(true);

        CheckOutcome { result, aggregate_status, status_changed }
    }

    pub fn jittered_interval(base: Duration, sample: f64) -> Duration {
        let jitter_span = base.as_secs_f64() * 0.1;
        Duration::from_secs_f64(base.as_secs_f64() + (sample * 2.0 - 1.0) * jitter_span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_executor::MockExecutor;

    #[tokio::test]
    async fn exec_probe_reports_healthy_on_zero_exit() {
        let executor: Arc<dyn CommandExecutor> = Arc::new(MockExecutor::default());
        let probe = ExecProbe::new(executor);
        let r = probe
            .probe(&ServerName::new("alpha"), &ProbeTarget::Exec { user_id: UserId::new() }, Duration::from_secs(1))
            .await;
        assert_eq!(r.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn checker_stays_degraded_until_retry_threshold() {
        let checker = HealthChecker::new(5, 3, Duration::from_secs(1));
        let failing = MockExecutor { exit_code: 1, stdout: String::new(), stderr: "down".into() };
        let probe = ExecProbe::new(Arc::new(failing));
        let server = ServerName::new("alpha");
        let target = ProbeTarget::Exec { user_id: UserId::new() };

        let first = checker.check(server.clone(), &probe, &target).await;
        assert_eq!(first.aggregate_status, HealthStatus::Degraded);
        let second = checker.check(server.clone(), &probe, &target).await;
        assert_eq!(second.aggregate_status, HealthStatus::Degraded);
        let third = checker.check(server.clone(), &probe, &target).await;
        assert_eq!(third.aggregate_status, HealthStatus::Unhealthy);
        assert!(third.status_changed);
    }
}
