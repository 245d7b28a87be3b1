//! Atomic, file-backed persistence for the control plane's mutable state:
//! the `ManagedModel` config file and the `RuntimeOverride` sidecar (§5,
//! §6). Both are written with write-temp-then-rename and `0600`
//! permissions, and guarded by an exclusive `flock` while held open so
//! concurrent CLI/server processes on the same host don't interleave
//! writes.

mod atomic;
mod group_policy;
mod models;
mod overrides;

pub use atomic::StoreError;
pub use group_policy::{GroupPolicy, GroupPolicyStore};
pub use models::ManagedModelStore;
pub use overrides::{ExecModeOverride, OverrideStore, RuntimeOverride};
