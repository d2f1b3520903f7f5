//! `CommandExecutor` — the single, sanitized entry point for invoking the
//! MCP CLI.

pub mod command;
pub mod error;
pub mod rate_limit;

pub use command::PortalCommand;
pub use error::{ExecutorError, ExecutorResult};
pub use rate_limit::{RateLimitConfig, RateLimiter};

use async_trait::async_trait;
use portal_types::{AuditEvent, AuditOutcome, AuditSink, UserId};
use sha2::{Digest, Sha256};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

/// Hard ceiling on any execution, regardless of caller request.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub user_id: UserId,
    pub command: PortalCommand,
    pub args: Vec<String>,
    /// Caller-requested timeout; clamped to `MAX_TIMEOUT`.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl ExecuteOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Narrow contract the rest of the core depends on; the CLI subprocess
/// itself is an external collaborator and this trait is the seam to it.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, request: ExecuteRequest) -> ExecutorResult<ExecuteOutcome>;
}

/// Spawns the real `portal` / MCP CLI binary as a child process, validating
/// and rate-limiting every invocation first.
pub struct SubprocessExecutor {
    binary_path: String,
    rate_limiter: RateLimiter,
    audit: Arc<dyn AuditSink>,
}

impl SubprocessExecutor {
    pub fn new(binary_path: impl Into<String>, rate_limit: RateLimitConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            binary_path: binary_path.into(),
            rate_limiter: RateLimiter::new(rate_limit),
            audit,
        }
    }

    fn args_hash(args: &[String]) -> String {
        use base64::Engine;
        let mut hasher = Sha256::new();
        for arg in args {
            hasher.update(arg.as_bytes());
            hasher.update([0u8]);
        }
        base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
    }

    async fn run_child(
        &self,
        command: PortalCommand,
        args: &[String],
        deadline: Duration,
    ) -> ExecutorResult<ExecuteOutcome> {
        let started = std::time::Instant::now();
        let mut child = TokioCommand::new(&self.binary_path)
            .arg(command.as_cli_subcommand())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecutorError::Spawn)?;

        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();

        let wait_fut = async {
            use tokio::io::AsyncReadExt;
            let mut stdout_buf = String::new();
            let mut stderr_buf = String::new();
            if let Some(mut h) = stdout_handle {
                let _ = h.read_to_string(&mut stdout_buf).await;
            }
            if let Some(mut h) = stderr_handle {
                let _ = h.read_to_string(&mut stderr_buf).await;
            }
            let status = child.wait().await;
            (status, stdout_buf, stderr_buf, child)
        };

        match timeout(deadline, wait_fut).await {
            Ok((status, stdout, stderr, _child)) => {
                let status = status.map_err(|e| ExecutorError::Internal(e.to_string()))?;
                Ok(ExecuteOutcome {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                    duration: started.elapsed(),
                })
            }
            Err(_) => {
                // Timed out: graceful signal, then kill after a grace period.
                if let Err(e) = child.start_kill() {
                    warn!("failed to signal timed-out child: {e}");
                }
                if timeout(SHUTDOWN_GRACE, child.wait()).await.is_err() {
                    let _ = child.kill().await;
                }
                Err(ExecutorError::Timeout(deadline))
            }
        }
    }
}

#[async_trait]
impl CommandExecutor for SubprocessExecutor {
    #[instrument(skip(self, request), fields(command = ?request.command))]
    async fn execute(&self, request: ExecuteRequest) -> ExecutorResult<ExecuteOutcome> {
        command::validate_args(request.command, &request.args)?;

        if let Err(retry_after) = self.rate_limiter.try_acquire(request.user_id) {
            self.audit.record(
                AuditEvent::new("audit.Execute", AuditOutcome::Denied)
                    .with_user(request.user_id)
                    .with_detail("rate limited"),
            );
            return Err(ExecutorError::RateLimited { retry_after });
        }

        let deadline = request.timeout.unwrap_or(MAX_TIMEOUT).min(MAX_TIMEOUT);
        let args_hash = Self::args_hash(&request.args);

        let result = self.run_child(request.command, &request.args, deadline).await;

        let outcome_label = match &result {
            Ok(o) if o.succeeded() => AuditOutcome::Success,
            Ok(_) => AuditOutcome::Failure,
            Err(_) => AuditOutcome::Failure,
        };
        info!(
            command = request.command.as_cli_subcommand(),
            args_hash,
            outcome = ?outcome_label,
            "audit.Execute"
        );
        self.audit.record(
            AuditEvent::new("audit.Execute", outcome_label)
                .with_user(request.user_id)
                .with_detail(format!("command={:?} args_hash={args_hash}", request.command)),
        );

        result
    }
}

/// An in-memory executor for tests and for `portal validate`: never spawns
/// a process, returns a scripted outcome.
#[derive(Clone)]
pub struct MockExecutor {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn execute(&self, request: ExecuteRequest) -> ExecutorResult<ExecuteOutcome> {
        command::validate_args(request.command, &request.args)?;
        Ok(ExecuteOutcome {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            exit_code: self.exit_code,
            duration: Duration::from_millis(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_types::audit::default_audit_sink;

    #[tokio::test]
    async fn mock_executor_rejects_unsafe_argument() {
        let exec = MockExecutor::default();
        let req = ExecuteRequest {
            user_id: UserId::new(),
            command: PortalCommand::ServerEnable,
            args: vec!["../evil".to_string()],
            timeout: None,
        };
        assert!(exec.execute(req).await.is_err());
    }

    #[tokio::test]
    async fn subprocess_executor_honors_rate_limit() {
        let exec = SubprocessExecutor::new(
            "/bin/true",
            RateLimitConfig { capacity: 1, period: Duration::from_secs(60) },
            default_audit_sink(),
        );
        let user = UserId::new();
        let make_req = || ExecuteRequest {
            user_id: user,
            command: PortalCommand::StatusProbe,
            args: vec![],
            timeout: Some(Duration::from_secs(1)),
        };
        let first = exec.execute(make_req()).await;
        assert!(first.is_ok());
        let second = exec.execute(make_req()).await;
        assert!(matches!(second, Err(ExecutorError::RateLimited { .. })));
    }
}
