//! Process (§4.3): lifecycle of one upstream runtime. State transitions
//! are serialized by a per-Process `tokio::sync::Mutex`, grounded on the
//! materialize `ProcessState`/`ProcessStatus` pattern and the thymos
//! `ProcessSupervisor` start/stop split.

use std::time::Duration;

use chrono::Utc;
use fabric_model::{ManagedModel, ProcessSnapshot, ProcessState, StdioTail};
use tokio::sync::Mutex;

use crate::error::ProcessError;
use crate::exec::{Exec, ExecContext, ExecRequest, ERROR_BODY_MAX_BYTES};

/// Exponential backoff iterator for health polling: `100ms` initial,
/// `×2` factor, capped at `2s`.
pub struct Backoff {
    next: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self { next: Duration::from_millis(100), cap: Duration::from_secs(2) }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = (self.next * 2).min(self.cap);
        Some(current)
    }
}

/// A health-check prober: performs a single attempt and reports success.
/// Implemented over HTTP by the server crate (kept generic here so unit
/// tests don't need a real network stack).
#[async_trait::async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, endpoint: &str) -> bool;
}

struct Inner {
    state: ProcessState,
    proxy_target: Option<String>,
    health_endpoint: Option<String>,
    last_used_at: Option<chrono::DateTime<Utc>>,
    exit_reason: Option<String>,
    stdio_tail: StdioTail,
}

/// One Process per `ManagedModel`. `Ready` is the only state that accepts
/// proxied traffic (§4.3).
pub struct Process {
    pub name: String,
    inner: Mutex<Inner>,
}

impl Process {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: ProcessState::Stopped,
                proxy_target: None,
                health_endpoint: None,
                last_used_at: None,
                exit_reason: None,
                stdio_tail: StdioTail::default(),
            }),
        }
    }

    pub async fn state(&self) -> ProcessState {
        self.inner.lock().await.state
    }

    pub async fn snapshot(&self, model_id: &str) -> ProcessSnapshot {
        let inner = self.inner.lock().await;
        ProcessSnapshot {
            name: self.name.clone(),
            model_id: model_id.to_string(),
            state: inner.state,
            proxy_target: inner.proxy_target.clone(),
            health_endpoint: inner.health_endpoint.clone(),
            last_used_at: inner.last_used_at,
            exit_reason: inner.exit_reason.clone(),
        }
    }

    pub async fn mark_used(&self) {
        self.inner.lock().await.last_used_at = Some(Utc::now());
    }

    /// Start contract (§4.3): spawn the configured command via the Remote
    /// Exec Layer; in parallel, poll the health endpoint with exponential
    /// backoff bounded by `health_check_timeout`. First success transitions
    /// `Starting → Ready`; timeout or command exit before that transitions
    /// to `Failed`.
    pub async fn start(
        &self,
        exec: &dyn Exec,
        health: &dyn HealthCheck,
        model: &ManagedModel,
        host: &str,
        is_local: bool,
        proxy_target: String,
        health_endpoint: String,
        health_check_timeout: Duration,
    ) -> Result<(), ProcessError> {
        {
            let mut inner = self.inner.lock().await;
            inner.state = ProcessState::Starting;
            inner.proxy_target = Some(proxy_target);
            inner.health_endpoint = Some(health_endpoint.clone());
        }

        let cmd = model
            .rendered_cmd
            .clone()
            .expect("Recipe Command Builder must render cmd before start()");

        let exec_ctx = ExecContext::default();
        let exec_req = ExecRequest { host: host.to_string(), is_local, script: cmd };

        // §4.3: the command spawn and the health-poll loop race, not
        // sequence — a real rendered launch is a foreground long-lived
        // server, so `exec.run` only resolves when the process exits.
        // Whichever happens first decides the outcome: first 2xx wins
        // `Ready`; the exec future resolving first (the process exited,
        // successfully or not, before ever answering healthy) is `Failed`.
        let exec_fut = exec.run(&exec_ctx, exec_req);
        tokio::pin!(exec_fut);

        let deadline = tokio::time::Instant::now() + health_check_timeout;
        let mut backoff = Backoff::new();

        loop {
            if tokio::time::Instant::now() >= deadline {
                let mut inner = self.inner.lock().await;
                inner.state = ProcessState::Failed;
                inner.exit_reason = Some(format!("health check timed out after {health_check_timeout:?}"));
                return Err(ProcessError::HealthTimeout { endpoint: health_endpoint });
            }
            let delay = backoff.next().expect("Backoff never ends");
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let wait = delay.min(remaining);

            tokio::select! {
                biased;
                exec_result = &mut exec_fut => {
                    let mut inner = self.inner.lock().await;
                    inner.state = ProcessState::Failed;
                    return Err(match exec_result {
                        Ok(out) => {
                            inner.exit_reason = Some(format!("process exited with code {} before becoming healthy", out.exit_code));
                            ProcessError::ExitedBeforeReady { exit_code: out.exit_code }
                        }
                        Err(e) => {
                            inner.exit_reason = Some(e.to_string());
                            if let crate::error::ExecError::NonZeroExit { tail, .. } = &e {
                                inner.stdio_tail = tail_from_string(tail);
                            }
                            ProcessError::StartFailed(e)
                        }
                    });
                }
                _ = tokio::time::sleep(wait) => {
                    if health.check(&health_endpoint).await {
                        let mut inner = self.inner.lock().await;
                        inner.state = ProcessState::Ready;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Stop contract (§4.3): execute `cmd_stop` (idempotent by
    /// construction), wait, then mark `Stopped`.
    pub async fn stop(&self, exec: &dyn Exec, model: &ManagedModel, host: &str, is_local: bool) -> Result<(), ProcessError> {
        {
            let mut inner = self.inner.lock().await;
            inner.state = ProcessState::Stopping;
        }
        if let Some(cmd_stop) = &model.rendered_cmd_stop {
            let exec_ctx = ExecContext::default();
            let exec_req = ExecRequest { host: host.to_string(), is_local, script: cmd_stop.clone() };
            // cmd_stop is idempotent by construction; swallow exec errors
            // the way a best-effort stop-script invocation should (the
            // state machine always lands in Stopped regardless).
            let _ = exec.run(&exec_ctx, exec_req).await;
        }
        let mut inner = self.inner.lock().await;
        inner.state = ProcessState::Stopped;
        inner.proxy_target = None;
        Ok(())
    }

    pub async fn stdio_tail_str(&self) -> String {
        let inner = self.inner.lock().await;
        inner.stdio_tail.as_str_lossy().into_owned()
    }
}

fn tail_from_string(s: &str) -> StdioTail {
    let bytes = s.as_bytes();
    let start = bytes.len().saturating_sub(ERROR_BODY_MAX_BYTES);
    StdioTail { bytes: bytes[start..].to_vec(), truncated: start > 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use crate::exec::ExecOutput;
    use async_trait::async_trait;
    use fabric_model::ModelMode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// A real rendered launch is a foreground long-lived server: `run()`
    /// only resolves when the process exits, which for a healthy run
    /// never happens within the test's lifetime. Stands in for
    /// `AlwaysOkExec` in tests that expect the health poll to win the race.
    struct LongRunningExec;
    #[async_trait]
    impl Exec for LongRunningExec {
        async fn run(&self, _ctx: &ExecContext, _req: ExecRequest) -> Result<ExecOutput, ExecError> {
            std::future::pending().await
        }
    }

    struct FailingExec;
    #[async_trait]
    impl Exec for FailingExec {
        async fn run(&self, _ctx: &ExecContext, _req: ExecRequest) -> Result<ExecOutput, ExecError> {
            Err(ExecError::NonZeroExit { code: 1, tail: "boom".into() })
        }
    }

    /// A command that exits zero immediately, before the health check
    /// ever gets a chance to succeed.
    struct ImmediateExitExec;
    #[async_trait]
    impl Exec for ImmediateExitExec {
        async fn run(&self, _ctx: &ExecContext, _req: ExecRequest) -> Result<ExecOutput, ExecError> {
            Ok(ExecOutput { output_tail: String::new(), truncated: false, exit_code: 0 })
        }
    }

    struct AlwaysHealthy;
    #[async_trait]
    impl HealthCheck for AlwaysHealthy {
        async fn check(&self, _endpoint: &str) -> bool {
            true
        }
    }

    struct NeverHealthy;
    #[async_trait]
    impl HealthCheck for NeverHealthy {
        async fn check(&self, _endpoint: &str) -> bool {
            false
        }
    }

    struct HealthyAfterN(AtomicUsize, usize);
    #[async_trait]
    impl HealthCheck for HealthyAfterN {
        async fn check(&self, _endpoint: &str) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst) >= self.1
        }
    }

    fn model() -> ManagedModel {
        ManagedModel {
            model_id: "m1".into(),
            recipe_ref: "r".into(),
            mode: ModelMode::Solo,
            tensor_parallel: None,
            nodes: None,
            extra_args: vec![],
            container_image: None,
            non_privileged: false,
            mem_limit_gb: None,
            group_name: "g".into(),
            use_model_name: None,
            aliases: vec![],
            rendered_cmd: Some("true".into()),
            rendered_cmd_stop: Some("true".into()),
            rendered_group_id: None,
            rendered_host: None,
            metadata: Default::default(),
            schema_version: 1,
        }
    }

    #[tokio::test]
    async fn successful_start_reaches_ready() {
        let process = Process::new("p1");
        assert_eq!(process.state().await, ProcessState::Stopped);
        process
            .start(&LongRunningExec, &AlwaysHealthy, &model(), "local", true, "http://x".into(), "http://x/health".into(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(process.state().await, ProcessState::Ready);
    }

    #[tokio::test]
    async fn spawn_failure_transitions_to_failed() {
        let process = Process::new("p1");
        let err = process
            .start(&FailingExec, &AlwaysHealthy, &model(), "local", true, "http://x".into(), "http://x/health".into(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::StartFailed(_)));
        assert_eq!(process.state().await, ProcessState::Failed);
    }

    #[tokio::test]
    async fn health_timeout_transitions_to_failed() {
        let process = Process::new("p1");
        let err = process
            .start(&LongRunningExec, &NeverHealthy, &model(), "local", true, "http://x".into(), "http://x/health".into(), Duration::from_millis(150))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::HealthTimeout { .. }));
        assert_eq!(process.state().await, ProcessState::Failed);
    }

    #[tokio::test]
    async fn health_succeeds_after_a_few_polls() {
        let process = Process::new("p1");
        let health = HealthyAfterN(AtomicUsize::new(0), 2);
        process
            .start(&LongRunningExec, &health, &model(), "local", true, "http://x".into(), "http://x/health".into(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(process.state().await, ProcessState::Ready);
    }

    /// §4.3: a command that exits (even successfully) before the health
    /// endpoint ever answers must be `Failed`, not `Ready` — the exec
    /// future and the health-poll loop are racing, and the exec side won.
    #[tokio::test]
    async fn exec_exiting_before_healthy_transitions_to_failed() {
        let process = Process::new("p1");
        let err = process
            .start(&ImmediateExitExec, &NeverHealthy, &model(), "local", true, "http://x".into(), "http://x/health".into(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::ExitedBeforeReady { exit_code: 0 }));
        assert_eq!(process.state().await, ProcessState::Failed);
    }

    #[tokio::test]
    async fn stop_reaches_stopped_even_if_exec_errors() {
        let process = Process::new("p1");
        process
            .start(&LongRunningExec, &AlwaysHealthy, &model(), "local", true, "http://x".into(), "http://x/health".into(), Duration::from_secs(2))
            .await
            .unwrap();
        process.stop(&FailingExec, &model(), "local", true).await.unwrap();
        assert_eq!(process.state().await, ProcessState::Stopped);
    }

    #[tokio::test]
    async fn restart_after_failed_resets_to_ready_on_success() {
        let process = Process::new("p1");
        let _ = process
            .start(&FailingExec, &AlwaysHealthy, &model(), "local", true, "http://x".into(), "http://x/health".into(), Duration::from_secs(2))
            .await;
        assert_eq!(process.state().await, ProcessState::Failed);
        process
            .start(&LongRunningExec, &AlwaysHealthy, &model(), "local", true, "http://x".into(), "http://x/health".into(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(process.state().await, ProcessState::Ready);
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let mut b = Backoff::new();
        let first = b.next().unwrap();
        let second = b.next().unwrap();
        let third = b.next().unwrap();
        assert_eq!(first, Duration::from_millis(100));
        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(third, Duration::from_millis(400));
        let capped: Vec<_> = (0..20).map(|_| b.next().unwrap()).collect();
        assert!(capped.iter().all(|d| *d <= Duration::from_secs(2)));
    }
}
