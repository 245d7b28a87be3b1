//! `LocalExec`: runs a script via a local shell interpreter, capturing
//! combined stdout+stderr into a `BoundedBuffer`. Cancellation sends a
//! termination signal to the process group, waits a short grace period,
//! then force-kills (§4.1).

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use super::buffer::BoundedBuffer;
use super::{Exec, ExecContext, ExecOutput, ExecRequest, DEFAULT_MAX_BYTES};
use crate::error::ExecError;

/// Grace period between SIGTERM (group) and SIGKILL on cancellation.
const KILL_GRACE: Duration = Duration::from_millis(300);

pub struct LocalExec {
    max_bytes: usize,
}

impl LocalExec {
    pub fn new() -> Self {
        Self { max_bytes: DEFAULT_MAX_BYTES }
    }

    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

impl Default for LocalExec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn new_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: setsid() is async-signal-safe and touches only the child's
    // own process, which hasn't exec'd yet.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().map(|_| ()).map_err(std::io::Error::from)
        });
    }
}

#[cfg(unix)]
fn kill_group(pid: i32, sig: nix::sys::signal::Signal) {
    use nix::unistd::Pid;
    let _ = nix::sys::signal::killpg(Pid::from_raw(pid), sig);
}

#[cfg(not(unix))]
fn new_process_group(_cmd: &mut Command) {}

#[cfg(not(unix))]
fn kill_group(_pid: i32, _sig: ()) {}

/// Drains `reader` to EOF into an owned buffer, returning it. Spawned as
/// its own task so draining never blocks the `wait`/`cancel`/`deadline`
/// select below — a runtime that produces no output until it exits (the
/// common case: a foreground server) must still be cancellable while it
/// runs, not only after it closes its pipes.
async fn drain_into<R: AsyncRead + Unpin>(reader: Option<R>, mut buf: BoundedBuffer) -> BoundedBuffer {
    if let Some(mut reader) = reader {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buf.append(&chunk[..n]),
            }
        }
    }
    buf
}

#[async_trait]
impl Exec for LocalExec {
    async fn run(&self, ctx: &ExecContext, req: ExecRequest) -> Result<ExecOutput, ExecError> {
        let mut cmd = Command::new("bash");
        cmd.arg("-lc").arg(&req.script);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        new_process_group(&mut cmd);

        let mut child: Child = cmd.spawn()?;
        let pid = child.id().map(|p| p as i32);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = tokio::spawn(drain_into(stdout, BoundedBuffer::new(self.max_bytes)));
        let err_task = tokio::spawn(drain_into(stderr, BoundedBuffer::new(self.max_bytes)));

        let wait_fut = child.wait();
        tokio::pin!(wait_fut);

        let status = tokio::select! {
            status = &mut wait_fut => status?,
            _ = ctx.cancel.cancelled() => {
                return Err(self.cancel_and_collect(pid, &mut child, out_task, err_task).await);
            }
            _ = sleep_until_deadline(ctx) => {
                return Err(self.cancel_and_collect(pid, &mut child, out_task, err_task).await);
            }
        };

        let out_buf = out_task.await.unwrap_or_else(|_| BoundedBuffer::new(self.max_bytes));
        let err_buf = err_task.await.unwrap_or_else(|_| BoundedBuffer::new(self.max_bytes));
        let mut buf = out_buf;
        buf.append(err_buf.to_string_lossy().as_bytes());

        let exit_code = status.code().unwrap_or(-1);
        let output = ExecOutput {
            output_tail: buf.to_string_lossy(),
            truncated: buf.truncated(),
            exit_code,
        };
        if exit_code != 0 {
            return Err(ExecError::NonZeroExit { code: exit_code, tail: output.output_tail.clone() });
        }
        Ok(output)
    }
}

impl LocalExec {
    /// Kills the process group, then waits for the already-running drain
    /// tasks to observe EOF (the kill closes the pipes) so the partial
    /// output collected before cancellation is never discarded (§4.1:
    /// "output is always returned, even on error").
    #[cfg(unix)]
    async fn cancel_and_collect(
        &self,
        pid: Option<i32>,
        child: &mut Child,
        out_task: tokio::task::JoinHandle<BoundedBuffer>,
        err_task: tokio::task::JoinHandle<BoundedBuffer>,
    ) -> ExecError {
        if let Some(pid) = pid {
            kill_group(pid, nix::sys::signal::Signal::SIGTERM);
        }
        tokio::time::sleep(KILL_GRACE).await;
        let _ = child.kill().await;
        if let Some(pid) = pid {
            kill_group(pid, nix::sys::signal::Signal::SIGKILL);
        }
        let _ = child.wait().await;
        let out_buf = out_task.await.unwrap_or_else(|_| BoundedBuffer::new(self.max_bytes));
        let err_buf = err_task.await.unwrap_or_else(|_| BoundedBuffer::new(self.max_bytes));
        let mut buf = out_buf;
        buf.append(err_buf.to_string_lossy().as_bytes());
        ExecError::Cancelled { tail: buf.to_string_lossy() }
    }

    #[cfg(not(unix))]
    async fn cancel_and_collect(
        &self,
        _pid: Option<i32>,
        child: &mut Child,
        out_task: tokio::task::JoinHandle<BoundedBuffer>,
        err_task: tokio::task::JoinHandle<BoundedBuffer>,
    ) -> ExecError {
        tokio::time::sleep(KILL_GRACE).await;
        let _ = child.kill().await;
        let _ = child.wait().await;
        let out_buf = out_task.await.unwrap_or_else(|_| BoundedBuffer::new(self.max_bytes));
        let err_buf = err_task.await.unwrap_or_else(|_| BoundedBuffer::new(self.max_bytes));
        let mut buf = out_buf;
        buf.append(err_buf.to_string_lossy().as_bytes());
        ExecError::Cancelled { tail: buf.to_string_lossy() }
    }
}

async fn sleep_until_deadline(ctx: &ExecContext) {
    match ctx.remaining() {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_returns_output() {
        let exec = LocalExec::new();
        let ctx = ExecContext::default();
        let out = exec
            .run(&ctx, ExecRequest { host: "local".into(), is_local: true, script: "echo hi".into() })
            .await
            .unwrap();
        assert!(out.output_tail.contains("hi"));
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error_with_tail() {
        let exec = LocalExec::new();
        let ctx = ExecContext::default();
        let err = exec
            .run(&ctx, ExecRequest { host: "local".into(), is_local: true, script: "echo boom; exit 3".into() })
            .await
            .unwrap_err();
        match err {
            ExecError::NonZeroExit { code, tail } => {
                assert_eq!(code, 3);
                assert!(tail.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn long_output_is_truncated_to_max_bytes() {
        let exec = LocalExec::with_max_bytes(64);
        let ctx = ExecContext::default();
        let out = exec
            .run(&ctx, ExecRequest { host: "local".into(), is_local: true, script: "for i in $(seq 1 1000); do echo line$i; done".into() })
            .await
            .unwrap();
        assert!(out.truncated);
        assert!(out.output_tail.len() <= 64);
    }

    #[tokio::test]
    async fn cancellation_during_long_script_kills_and_errors() {
        let exec = LocalExec::new();
        let ctx = ExecContext::default();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let err = exec
            .run(&ctx, ExecRequest { host: "local".into(), is_local: true, script: "echo started; sleep 10".into() })
            .await
            .unwrap_err();
        match err {
            ExecError::Cancelled { tail } => assert!(tail.contains("started")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
