//! Error taxonomy (§7) and the single HTTP-boundary mapping type.
//!
//! Each subsystem gets its own `thiserror` enum; `ApiError` is the only
//! place that knows about HTTP status codes, so the rest of the crate
//! stays transport-agnostic.

use uuid::Uuid;

/// One of the five taxonomy buckets from §7. Every leaf error implements
/// `kind()` so the HTTP layer can map without re-deriving the bucket from
/// the error's shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    TransientTransport,
    PermanentExec,
    Cancellation,
    InvariantViolation,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("exec timed out after deadline")]
    Timeout,
    #[error("exec cancelled")]
    Cancelled { tail: String },
    #[error("agent http error: {0}")]
    Http(String),
    #[error("agent returned non-2xx: {status}: {body}")]
    NonSuccess { status: u16, body: String },
    #[error("command exited with code {code}: {tail}")]
    NonZeroExit { code: i32, tail: String },
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
    #[error("no node route for host {0}")]
    UnknownHost(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::Timeout | ExecError::Cancelled { .. } => ErrorKind::Cancellation,
            ExecError::Http(_) | ExecError::NonSuccess { .. } => ErrorKind::TransientTransport,
            ExecError::NonZeroExit { .. } => ErrorKind::PermanentExec,
            ExecError::BodyTooLarge { .. } | ExecError::UnknownHost(_) => ErrorKind::Config,
            ExecError::Io(_) => ErrorKind::TransientTransport,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("inventory read error: {0}")]
    Read(String),
    #[error("inventory parse error: {0}")]
    Parse(String),
    #[error("duplicate node id: {0}")]
    DuplicateId(String),
    #[error("duplicate data_ip: {0}")]
    DuplicateDataIp(String),
    #[error("more than one node marked head")]
    MultipleHeads,
    #[error("unknown node: {0}")]
    NotFound(String),
}

impl InventoryError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("start failed: {0}")]
    StartFailed(#[source] ExecError),
    #[error("health check timed out waiting for {endpoint}")]
    HealthTimeout { endpoint: String },
    #[error("process exited with code {exit_code} before becoming healthy")]
    ExitedBeforeReady { exit_code: i32 },
    #[error("process is in state {state:?}, cannot {action}")]
    WrongState { state: fabric_model::ProcessState, action: &'static str },
}

impl ProcessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessError::StartFailed(e) => e.kind(),
            ProcessError::HealthTimeout { .. } => ErrorKind::Cancellation,
            ProcessError::ExitedBeforeReady { .. } => ErrorKind::PermanentExec,
            ProcessError::WrongState { .. } => ErrorKind::Config,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("group busy: a peer process is already ready")]
    Busy,
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    CommandBuild(#[from] CommandBuildError),
    #[error("invariant violated: two processes ready in exclusive scope (trace {trace_id})")]
    ExclusivityViolated { trace_id: Uuid },
}

impl GroupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GroupError::Busy => ErrorKind::Config,
            GroupError::Process(e) => e.kind(),
            GroupError::CommandBuild(e) => e.kind(),
            GroupError::ExclusivityViolated { .. } => ErrorKind::InvariantViolation,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandBuildError {
    #[error("unknown recipe ref: {0}")]
    UnknownRecipe(String),
    #[error("rendered command fails to re-tokenize (unbalanced quoting)")]
    UnbalancedQuoting,
    #[error("no node available for placement")]
    NoNodeForPlacement,
}

impl CommandBuildError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterStatusError {
    #[error("cluster status load failed: {0}")]
    LoadFailed(String),
}

impl ClusterStatusError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TransientTransport
    }
}

/// HTTP-boundary error. Constructed from any taxonomy error via `From`;
/// carries a `trace_id` only for `InvariantViolation` so operators can
/// correlate with the `error!(trace_id = …)` log line (§3 addition).
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub trace_id: Option<Uuid>,
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self.kind {
            ErrorKind::Config => 400,
            ErrorKind::TransientTransport => 502,
            ErrorKind::PermanentExec => 502,
            ErrorKind::Cancellation => 504,
            ErrorKind::InvariantViolation => 500,
        }
    }

    pub fn invariant_violation(message: impl Into<String>) -> Self {
        let trace_id = Uuid::new_v4();
        let message = message.into();
        tracing::error!(trace_id = %trace_id, %message, "invariant violation");
        Self {
            kind: ErrorKind::InvariantViolation,
            message,
            trace_id: Some(trace_id),
        }
    }
}

macro_rules! impl_from_taxonomy {
    ($ty:ty) => {
        impl From<$ty> for ApiError {
            fn from(e: $ty) -> Self {
                let kind = e.kind();
                let trace_id = matches!(kind, ErrorKind::InvariantViolation).then(Uuid::new_v4);
                if let Some(id) = trace_id {
                    tracing::error!(trace_id = %id, error = %e, "invariant violation");
                }
                ApiError {
                    kind,
                    message: e.to_string(),
                    trace_id,
                }
            }
        }
    };
}

impl_from_taxonomy!(ExecError);
impl_from_taxonomy!(InventoryError);
impl_from_taxonomy!(ProcessError);
impl_from_taxonomy!(GroupError);
impl_from_taxonomy!(CommandBuildError);
impl_from_taxonomy!(ClusterStatusError);
