//! Remote Exec Layer (§4.1): a uniform `run(host, isLocal, script, ctx) →
//! (output, err)` abstraction over local shell execution and HTTP-agent
//! RPC, split the same way local/remote backends split elsewhere in this
//! workspace: one trait, one local implementation, one remote implementation.

mod auto;
mod buffer;
mod local;

pub use auto::AutoExec;
pub use buffer::{BoundedBuffer, DEFAULT_MAX_BYTES, ERROR_BODY_MAX_BYTES};
pub use local::LocalExec;

use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ExecError;

/// Explicit deadline + cancellation, threaded through every suspension
/// point — Rust has no implicit context propagation (§5), so this is the
/// idiomatic stand-in for Go's `context.Context`.
#[derive(Clone, Debug, Default)]
pub struct ExecContext {
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
}

impl ExecContext {
    pub fn with_timeout(dur: std::time::Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + dur),
            cancel: CancellationToken::new(),
        }
    }

    pub fn remaining(&self) -> Option<std::time::Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }
}

#[derive(Clone, Debug)]
pub struct ExecRequest {
    pub host: String,
    pub is_local: bool,
    pub script: String,
}

#[derive(Clone, Debug)]
pub struct ExecOutput {
    pub output_tail: String,
    pub truncated: bool,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Which backend `AutoExec` should dispatch to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExecMode {
    #[default]
    Auto,
    Local,
    Agent,
}

#[async_trait]
pub trait Exec: Send + Sync {
    async fn run(&self, ctx: &ExecContext, req: ExecRequest) -> Result<ExecOutput, ExecError>;
}
