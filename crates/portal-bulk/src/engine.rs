//! BulkEngine: validates a request, resolves targets, and drives a worker
//! pool of `CommandExecutor` invocations with progress tracking, stop
//! conditions, and a final-status decision.

use crate::error::{BulkError, BulkResult};
use crate::resolver::resolve_targets;
use crate::store::{BulkStore, DEFAULT_TTL};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use portal_events::EventFabric;
use portal_executor::{CommandExecutor, ExecuteRequest, PortalCommand};
use portal_state::StateManager;
use portal_types::{
    AuditEvent, AuditOutcome, AuditSink, BulkOperation, BulkOperationRequest, BulkOperationStatus,
    BulkOperationType, Channel, EventType, ServerName, ServerStatus, TargetProgress, TargetStatus,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Minimum interval between progress broadcasts for one operation:
/// published at most once per `progressInterval` (default 1s).
const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_WORKER_COUNT: usize = 10;

fn validate_request(req: &BulkOperationRequest) -> BulkResult<()> {
    if req.command.trim().is_empty() {
        return Err(BulkError::InvalidRequest("commandType is required".into()));
    }
    if req.targets.is_empty() && req.target_filter.is_none() {
        return Err(BulkError::InvalidRequest(
            "at least one of targets or targetFilter must be present".into(),
        ));
    }
    Ok(())
}

/// Pre/post transitions the engine attempts around a successful command.
/// `StatusProbe`/`CatalogSync`/`ConfigApply` are informational and carry
/// no transition.
fn transitions_for(command: PortalCommand) -> Option<(ServerStatus, ServerStatus)> {
    match command {
        PortalCommand::ServerEnable => Some((ServerStatus::Starting, ServerStatus::Running)),
        PortalCommand::ServerDisable => Some((ServerStatus::Stopping, ServerStatus::Stopped)),
        PortalCommand::ServerRestart => Some((ServerStatus::Restarting, ServerStatus::Running)),
        PortalCommand::StatusProbe | PortalCommand::CatalogSync | PortalCommand::ConfigApply => None,
    }
}

struct RunningOperation {
    op: Mutex<BulkOperation>,
    cancel: CancellationToken,
    last_progress_publish: Mutex<Instant>,
    started: Instant,
}

/// Tracks every in-flight and recently-finished operation by id.
pub struct BulkEngine {
    executor: Arc<dyn CommandExecutor>,
    state: Arc<StateManager>,
    fabric: Arc<EventFabric>,
    store: Arc<dyn BulkStore>,
    audit: Arc<dyn AuditSink>,
    operations: DashMap<Uuid, Arc<RunningOperation>>,
    progress_interval: Duration,
}

impl BulkEngine {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        state: Arc<StateManager>,
        fabric: Arc<EventFabric>,
        store: Arc<dyn BulkStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            executor,
            state,
            fabric,
            store,
            audit,
            operations: DashMap::new(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<BulkOperation> {
        self.operations.get(&id).map(|r| r.op.lock().clone())
    }

    /// Validates, resolves targets, persists the new `BulkOperation`, and
    /// spawns its execution.
    #[instrument(skip(self, req))]
    pub async fn submit(self: &Arc<Self>, req: BulkOperationRequest) -> BulkResult<Uuid> {
        validate_request(&req)?;

        let catalog = self.state.list();
        let resolved = resolve_targets(&req.targets, req.target_filter.as_ref(), &catalog);
        if resolved.is_empty() {
            return Err(BulkError::NoTargets);
        }

        let op = BulkOperation::new(req, resolved);
        let id = op.id;
        self.store.put(&op, DEFAULT_TTL).await;

        let running = Arc::new(RunningOperation {
            op: Mutex::new(op),
            cancel: CancellationToken::new(),
            last_progress_publish: Mutex::new(Instant::now() - DEFAULT_PROGRESS_INTERVAL),
            started: Instant::now(),
        });
        self.operations.insert(id, running);

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(id).await });
        Ok(id)
    }

    /// Requests cooperative cancellation; in-flight targets complete, no
    /// further targets are dispatched.
    pub fn cancel(&self, id: Uuid) -> BulkResult<()> {
        let running = self.operations.get(&id).ok_or(BulkError::UnknownOperation(id))?;
        running.cancel.cancel();
        Ok(())
    }

    /// `Retry(id)`: resets failed targets to `Pending` and re-enters
    /// `Running` via `Retrying`.
    pub async fn retry(self: &Arc<Self>, id: Uuid) -> BulkResult<()> {
        let running = self.operations.get(&id).map(|r| Arc::clone(&r)).ok_or(BulkError::UnknownOperation(id))?;

        {
            let mut op = running.op.lock();
            if !op.can_retry() {
                return Err(BulkError::NotRetryable(id));
            }
            op.status = BulkOperationStatus::Retrying;
            op.retry_count += 1;
            op.finished_at = None;
            for target in op.progress.per_target.values_mut() {
                if target.status == TargetStatus::Failed {
                    *target = TargetProgress::pending(target.name.clone());
                }
            }
            op.progress.failed = 0;
            op.progress.pending = op.progress.per_target.values().filter(|t| t.status == TargetStatus::Pending).count();
            op.updated_at = Utc::now();
        }
        running.cancel.cancel(); // drop the old token's descendants
        let fresh = CancellationToken::new();
        // Replace the cancellation token for the retried run.
        self.operations.insert(id, Arc::new(RunningOperation {
            op: Mutex::new(running.op.lock().clone()),
            cancel: fresh,
            last_progress_publish: Mutex::new(Instant::now() - DEFAULT_PROGRESS_INTERVAL),
            started: Instant::now(),
        }));

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(id).await });
        Ok(())
    }

    fn publish_progress(&self, running: &RunningOperation, op: &BulkOperation) {
        let mut last = running.last_progress_publish.lock();
        if last.elapsed() < self.progress_interval {
            return;
        }
        *last = Instant::now();

        let completed = op.progress.completed;
        let eta_seconds = if completed > 0 {
            let avg = running.started.elapsed().as_secs_f64() / completed as f64;
            Some(avg * op.progress.pending as f64)
        } else {
            None
        };

        self.fabric.broadcast(
            &Channel::System,
            EventType::BulkProgress,
            serde_json::json!({
                "operation_id": op.id.to_string(),
                "total": op.progress.total,
                "completed": op.progress.completed,
                "failed": op.progress.failed,
                "pending": op.progress.pending,
                "eta_seconds": eta_seconds,
            }),
            None,
        );
    }

    /// Executes one target with the pre-transition attempted first: on a
    /// successful command, constructs a `CommandExecutor` request, awaits
    /// its outcome, then attempts the post-transition.
    async fn run_one(&self, name: &ServerName, user_id: portal_types::UserId, command: PortalCommand) -> TargetStatus {
        if let Some((pre, _)) = transitions_for(command) {
            if let Err(e) = self.state.transition(name, pre, "bulk:dispatch").await {
                warn!(server = %name, error = %e, "pre-dispatch transition rejected, proceeding with command anyway");
            }
        }

        let outcome = self
            .executor
            .execute(ExecuteRequest { user_id, command, args: vec![name.to_string()], timeout: None })
            .await;

        match outcome {
            Ok(result) if result.succeeded() => {
                if let Some((_, post)) = transitions_for(command) {
                    if let Err(e) = self.state.transition(name, post, "bulk:complete").await {
                        warn!(server = %name, error = %e, "post-dispatch transition rejected");
                    }
                }
                TargetStatus::Completed
            }
            Ok(_) => TargetStatus::Failed,
            Err(e) => {
                warn!(server = %name, error = %e, "target command execution failed");
                TargetStatus::Failed
            }
        }
    }

    /// `RestartServers` composite action:
    /// sequential-only, disable then enable, success iff both steps succeed.
    async fn run_restart(&self, name: &ServerName, user_id: portal_types::UserId) -> TargetStatus {
        let disable = self.run_one(name, user_id, PortalCommand::ServerDisable).await;
        if disable != TargetStatus::Completed {
            return TargetStatus::Failed;
        }
        self.run_one(name, user_id, PortalCommand::ServerEnable).await
    }

    fn record_target_result(&self, running: &RunningOperation, name: &ServerName, status: TargetStatus, started_at: chrono::DateTime<Utc>) {
        let mut op = running.op.lock();
        if let Some(progress) = op.progress.per_target.get_mut(name.as_str()) {
            progress.status = status;
            progress.attempt += 1;
            progress.started_at = Some(started_at);
            progress.finished_at = Some(Utc::now());
        }
        match status {
            TargetStatus::Completed => {
                op.progress.completed += 1;
                op.progress.pending = op.progress.pending.saturating_sub(1);
            }
            TargetStatus::Failed => {
                op.progress.failed += 1;
                op.progress.pending = op.progress.pending.saturating_sub(1);
            }
            TargetStatus::Skipped => {
                op.progress.skipped += 1;
                op.progress.pending = op.progress.pending.saturating_sub(1);
            }
            TargetStatus::Cancelled => {
                op.progress.cancelled += 1;
                op.progress.pending = op.progress.pending.saturating_sub(1);
            }
            TargetStatus::Pending | TargetStatus::Running => {}
        }
        op.updated_at = Utc::now();
    }

    fn should_stop(&self, op: &BulkOperation) -> bool {
        if !op.config.continue_on_error {
            let any_failed = op.progress.per_target.values().any(|t| t.status == TargetStatus::Failed);
            if any_failed {
                return true;
            }
        }
        op.progress.error_rate() > op.config.max_error_rate && op.progress.failed > 0
    }

    /// Drives one operation to a terminal state.
    async fn run(self: Arc<Self>, id: Uuid) {
        let Some(running) = self.operations.get(&id).map(|r| Arc::clone(&r)) else { return };

        {
            let mut op = running.op.lock();
            op.status = BulkOperationStatus::Running;
            op.started_at = Some(Utc::now());
            op.updated_at = Utc::now();
        }
        self.store.put(&running.op.lock().clone(), DEFAULT_TTL).await;

        let targets: Vec<ServerName> = running.op.lock().targets.clone();
        let (user_id, operation_type, command, worker_count, parallel, delay_between_batches) = {
            let op = running.op.lock();
            (
                op.user_id,
                op.operation_type,
                PortalCommand::parse(&op.command).unwrap_or(PortalCommand::StatusProbe),
                op.config.max_concurrency.min(DEFAULT_WORKER_COUNT).max(1),
                op.config.parallel && op.operation_type != BulkOperationType::RestartServers,
                op.config.delay_between_batches,
            )
        };

        // Set only by `should_stop` (continueOnError=false failure, or
        // error rate exceeded) — distinct from `running.cancel`, which is
        // the caller's explicit cancellation. Undispatched targets under
        // an error stop stay Pending; only an explicit cancel drains them
        // as Cancelled.
        let stopped = Arc::new(AtomicBool::new(false));

        if parallel {
            let semaphore = Arc::new(Semaphore::new(worker_count));
            let mut handles = Vec::with_capacity(targets.len());
            for target in targets {
                if running.cancel.is_cancelled() {
                    self.record_target_result(&running, &target, TargetStatus::Cancelled, Utc::now());
                    continue;
                }
                if stopped.load(Ordering::SeqCst) {
                    continue;
                }
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                let this = Arc::clone(&self);
                let running = Arc::clone(&running);
                let stopped = Arc::clone(&stopped);
                let target = target.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    let started_at = Utc::now();
                    let outcome = if operation_type == BulkOperationType::RestartServers {
                        this.run_restart(&target, user_id).await
                    } else {
                        this.run_one(&target, user_id, command).await
                    };
                    this.record_target_result(&running, &target, outcome, started_at);
                    let op_snapshot = running.op.lock().clone();
                    this.publish_progress(&running, &op_snapshot);
                    if this.should_stop(&op_snapshot) {
                        stopped.store(true, Ordering::SeqCst);
                    }
                    this.store.put(&op_snapshot, DEFAULT_TTL).await;
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }
        } else {
            for (i, target) in targets.into_iter().enumerate() {
                if i > 0 && !delay_between_batches.is_zero() {
                    tokio::time::sleep(delay_between_batches).await;
                }
                if running.cancel.is_cancelled() {
                    self.record_target_result(&running, &target, TargetStatus::Cancelled, Utc::now());
                    continue;
                }
                if stopped.load(Ordering::SeqCst) {
                    continue;
                }
                let started_at = Utc::now();
                let outcome = if operation_type == BulkOperationType::RestartServers {
                    self.run_restart(&target, user_id).await
                } else {
                    self.run_one(&target, user_id, command).await
                };
                self.record_target_result(&running, &target, outcome, started_at);
                let op_snapshot = running.op.lock().clone();
                self.publish_progress(&running, &op_snapshot);
                if self.should_stop(&op_snapshot) {
                    stopped.store(true, Ordering::SeqCst);
                }
                self.store.put(&op_snapshot, DEFAULT_TTL).await;
            }
        }

        let final_status = {
            let mut op = running.op.lock();
            let computed = op.compute_final_status();
            op.status = if running.cancel.is_cancelled() && computed != BulkOperationStatus::Cancelled {
                BulkOperationStatus::Cancelled
            } else if stopped.load(Ordering::SeqCst) {
                BulkOperationStatus::Failed
            } else {
                computed
            };
            op.finished_at = Some(Utc::now());
            op.updated_at = Utc::now();
            op.clone()
        };
        self.store.put(&final_status, DEFAULT_TTL).await;
        self.audit.record(
            AuditEvent::new("bulk.complete", AuditOutcome::Success)
                .with_user(final_status.user_id)
                .with_detail(format!("operation_id={} status={:?}", final_status.id, final_status.status)),
        );
        self.fabric.broadcast(
            &Channel::System,
            EventType::BulkProgress,
            serde_json::json!({"operation_id": final_status.id.to_string(), "status": format!("{:?}", final_status.status)}),
            None,
        );
        info!(operation_id = %final_status.id, status = ?final_status.status, "bulk operation finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBulkStore;
    use async_trait::async_trait;
    use portal_executor::{CommandExecutor, ExecuteOutcome, ExecuteRequest, ExecutorResult, MockExecutor};
    use portal_state::InMemoryLongLivedCache;
    use portal_types::{audit::default_audit_sink, BulkTargetConfig, ServerState, TenantId, UserId};
    use std::time::Duration as StdDuration;

    /// Fails whenever the target's name (the sole positional arg bulk
    /// commands pass) appears in `failing`, succeeds otherwise.
    struct SelectiveExecutor {
        failing: Vec<String>,
    }

    #[async_trait]
    impl CommandExecutor for SelectiveExecutor {
        async fn execute(&self, request: ExecuteRequest) -> ExecutorResult<ExecuteOutcome> {
            let target = request.args.first().cloned().unwrap_or_default();
            let exit_code = if self.failing.contains(&target) { 1 } else { 0 };
            Ok(ExecuteOutcome {
                stdout: String::new(),
                stderr: String::new(),
                exit_code,
                duration: StdDuration::from_millis(1),
            })
        }
    }

    fn harness(executor: impl CommandExecutor + 'static) -> (Arc<BulkEngine>, Arc<StateManager>) {
        let state = Arc::new(StateManager::new(Arc::new(InMemoryLongLivedCache::default()), None));
        for name in ["alpha", "beta", "gamma"] {
            state.register(ServerState::new(
                ServerName::new(name),
                TenantId::new(),
                UserId::new(),
                chrono::Duration::seconds(60),
            ));
        }
        let fabric = Arc::new(EventFabric::default());
        let engine = Arc::new(BulkEngine::new(
            Arc::new(executor),
            Arc::clone(&state),
            fabric,
            Arc::new(InMemoryBulkStore::default()),
            default_audit_sink(),
        ));
        (engine, state)
    }

    fn request(command: &str, targets: Vec<&str>) -> BulkOperationRequest {
        BulkOperationRequest {
            operation_type: BulkOperationType::EnableServers,
            command: command.into(),
            targets: targets.into_iter().map(ServerName::new).collect(),
            target_filter: None,
            config: BulkTargetConfig { parallel: true, ..Default::default() },
            user_id: UserId::new(),
            tenant_id: TenantId::new(),
        }
    }

    fn request_with_config(command: &str, targets: Vec<&str>, config: BulkTargetConfig) -> BulkOperationRequest {
        BulkOperationRequest { config, ..request(command, targets) }
    }

    async fn wait_for_terminal(engine: &Arc<BulkEngine>, id: Uuid) -> BulkOperation {
        for _ in 0..200 {
            if let Some(op) = engine.get(id) {
                if !matches!(op.status, BulkOperationStatus::Pending | BulkOperationStatus::Running | BulkOperationStatus::Retrying) {
                    return op;
                }
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        panic!("operation did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn submit_without_targets_is_rejected() {
        let (engine, _state) = harness(MockExecutor::default());
        let err = engine.submit(request("server-enable", vec![])).await.unwrap_err();
        assert!(matches!(err, BulkError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn successful_run_marks_every_target_completed() {
        let (engine, _state) = harness(MockExecutor::default());
        let id = engine.submit(request("server-enable", vec!["alpha", "beta"])).await.unwrap();
        let op = wait_for_terminal(&engine, id).await;
        assert_eq!(op.status, BulkOperationStatus::Completed);
        assert_eq!(op.progress.completed, 2);
        assert!(op.progress.accounted_for());
    }

    #[tokio::test]
    async fn failing_executor_yields_failed_status_and_retry_eligibility() {
        let executor = MockExecutor { exit_code: 1, ..Default::default() };
        let (engine, _state) = harness(executor);
        let id = engine.submit(request("server-enable", vec!["alpha"])).await.unwrap();
        let op = wait_for_terminal(&engine, id).await;
        assert_eq!(op.status, BulkOperationStatus::Failed);
        assert!(op.can_retry());
    }

    #[tokio::test]
    async fn cancel_stops_further_dispatch() {
        let (engine, _state) = harness(MockExecutor::default());
        let id = engine.submit(request("server-enable", vec!["alpha", "beta"])).await.unwrap();
        engine.cancel(id).unwrap();
        let op = wait_for_terminal(&engine, id).await;
        assert!(op.progress.accounted_for());
    }

    #[tokio::test]
    async fn continue_on_error_false_stops_and_marks_operation_failed() {
        let executor = SelectiveExecutor { failing: vec!["beta".to_string()] };
        let (engine, _state) = harness(executor);
        let config = BulkTargetConfig { parallel: false, continue_on_error: false, ..Default::default() };
        let id = engine
            .submit(request_with_config("server-enable", vec!["alpha", "beta", "gamma"], config))
            .await
            .unwrap();
        let op = wait_for_terminal(&engine, id).await;

        // `continueOnError=false` plus a failure stops before `gamma` ever
        // dispatches: one success, one failure, and the operation as a
        // whole is Failed, not PartialSuccess and not Cancelled.
        assert_eq!(op.status, BulkOperationStatus::Failed);
        assert_eq!(op.progress.completed, 1);
        assert_eq!(op.progress.failed, 1);
        assert_eq!(op.progress.cancelled, 0);
        assert_eq!(
            op.progress.per_target.get("gamma").unwrap().status,
            TargetStatus::Pending
        );
        assert!(op.progress.accounted_for());
    }

    #[tokio::test]
    async fn error_rate_stop_marks_operation_failed_not_cancelled() {
        let executor = SelectiveExecutor { failing: vec!["alpha".to_string(), "beta".to_string()] };
        let (engine, _state) = harness(executor);
        let config = BulkTargetConfig {
            parallel: false,
            continue_on_error: true,
            max_error_rate: 0.1,
            ..Default::default()
        };
        let id = engine
            .submit(request_with_config("server-enable", vec!["alpha", "beta", "gamma"], config))
            .await
            .unwrap();
        let op = wait_for_terminal(&engine, id).await;

        assert_eq!(op.status, BulkOperationStatus::Failed);
        assert_eq!(op.progress.cancelled, 0);
        assert!(op.progress.accounted_for());
    }
}
