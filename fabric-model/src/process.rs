//! ManagedModel, ProcessGroup spec, and Process state machine types.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placement mode for a `ManagedModel`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelMode {
    Solo,
    Cluster,
}

/// A mutable, persisted entry in the control-plane config. Rendered on
/// upsert and re-rendered whenever its recipe changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManagedModel {
    pub model_id: String,
    pub recipe_ref: String,
    pub mode: ModelMode,
    #[serde(default)]
    pub tensor_parallel: Option<u32>,
    /// Optional CSV of node ids/IPs this model is pinned to.
    #[serde(default)]
    pub nodes: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub container_image: Option<String>,
    #[serde(default)]
    pub non_privileged: bool,
    #[serde(default)]
    pub mem_limit_gb: Option<u32>,
    pub group_name: String,
    #[serde(default)]
    pub use_model_name: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// The authoritative shell payload to start the runtime. Set by the
    /// Recipe Command Builder on upsert; never hand-edited.
    #[serde(default)]
    pub rendered_cmd: Option<String>,
    /// Authoritative shell payload to stop the runtime. Idempotent by
    /// construction (§4.3 stop contract).
    #[serde(default)]
    pub rendered_cmd_stop: Option<String>,
    /// The group id the Command Builder resolved this model into — may
    /// differ from `group_name` when single-node pinning applies
    /// (`<group_name>-<sanitized-node>`). Set alongside `rendered_cmd`.
    #[serde(default)]
    pub rendered_group_id: Option<String>,
    /// The node `rendered_cmd` was pinned to via `ssh`, if placement chose
    /// one; `None` means the command runs on the local host. Set alongside
    /// `rendered_cmd` so admission doesn't have to re-derive placement.
    #[serde(default)]
    pub rendered_host: Option<String>,
    #[serde(default)]
    pub metadata: ManagedModelMetadata,
    /// Bumped whenever the persisted shape of this record changes so old
    /// entries can be migrated lazily on next upsert rather than rewritten
    /// in place on load.
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
}

/// Current `ManagedModel` persisted-schema version. Exposed so callers
/// constructing fresh entries don't have to hardcode it.
pub fn current_schema_version() -> u32 {
    1
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ManagedModelMetadata {
    #[serde(default)]
    pub recipe_meta: serde_json::Value,
    #[serde(default)]
    pub benchy_opts: serde_json::Value,
}

/// Identity of a `ProcessGroup`. Single-node pins append a sanitized node
/// suffix so two pinned models on different nodes run in parallel
/// (§4.6 "single-node placement").
pub type GroupId = String;

pub fn pinned_group_id(default_group: &str, node: &str) -> GroupId {
    let sanitized: String = node
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{default_group}-{sanitized}")
}

/// Declarative shape of a process group, as carried in config (the runtime
/// `ProcessGroup` in `fabric-core` wraps this with live `Process` handles).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessGroupSpec {
    pub group_id: GroupId,
    pub members: BTreeSet<String>,
    pub swap: bool,
    pub exclusive: bool,
    pub persistent: bool,
}

/// One runtime process's lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Stopped,
    Starting,
    Ready,
    Stopping,
    Failed,
}

impl ProcessState {
    /// Only `Ready` accepts proxied traffic.
    pub fn accepts_traffic(self) -> bool {
        matches!(self, ProcessState::Ready)
    }

    /// Identity-preserving states for config-reload diffing (I2).
    pub fn preserves_identity_across_reload(self) -> bool {
        matches!(self, ProcessState::Starting | ProcessState::Ready)
    }
}

/// Bounded tail of combined stdout+stderr, already truncated to the last
/// `max_bytes` (default 256 KiB per the Remote Exec Layer, widened to
/// 120 000 bytes for the error-body contract in §7).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StdioTail {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

impl StdioTail {
    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// A point-in-time snapshot of a `Process`, as exposed through the external
/// `/api/models/` surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub name: String,
    pub model_id: String,
    pub state: ProcessState,
    pub proxy_target: Option<String>,
    pub health_endpoint: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<String>,
}
