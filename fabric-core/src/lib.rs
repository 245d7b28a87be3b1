//! # fabric-core
//!
//! The cluster control plane's runtime engine: everything that schedules,
//! probes, and proxies traffic to the GPU-backend processes a node runs.
//! `fabric-model` defines the data; this crate is where it moves.
//!
//! ## Main modules
//!
//! - [`exec`]: Remote Exec Layer — [`exec::Exec`] trait, [`exec::LocalExec`],
//!   [`exec::AutoExec`], the output ring buffer ([`exec::BoundedBuffer`]).
//! - [`agent_rpc`]: [`agent_rpc::AgentClient`] — HTTP RPC to the out-of-scope
//!   agent binary, implementing the `Exec` trait over `fabric-agent-proto`.
//! - [`inventory`]: [`inventory::Inventory`] — node routing table, head
//!   election, local/remote resolution.
//! - [`process`]: [`process::Process`] — one runtime's start/stop state
//!   machine, [`process::Backoff`] health-poll scheduling.
//! - [`group`]: [`group::ProcessGroup`] — swap/exclusivity admission policy
//!   for a set of mutually-constrained processes.
//! - [`manager`]: [`manager::ProxyManager`] — owns every `ProcessGroup`,
//!   the cross-group exclusivity registry, and config-reload diffing
//!   ([`manager::diff`]).
//! - [`node_selector`]: [`node_selector::NodeSelector`] — GPU-aware
//!   best-fit placement across a candidate pool.
//! - [`command_builder`]: [`command_builder::CommandBuilder`] — typed
//!   command-tree rendering for `cmd`/`cmdStop`.
//! - [`cluster_status`]: [`cluster_status::ClusterStatusAggregator`] — TTL
//!   + stale-while-revalidate cache over the multi-stage node probe.
//! - [`catalog`]: [`catalog::StaticRecipeCatalog`],
//!   [`catalog::FlatFileRecipeCatalog`] — `RecipeCatalog` implementations.
//! - [`error`]: the crate's `thiserror` taxonomy and the HTTP-boundary
//!   [`error::ApiError`].

pub mod agent_rpc;
pub mod catalog;
pub mod cluster_status;
pub mod command_builder;
pub mod error;
pub mod exec;
pub mod group;
pub mod inventory;
pub mod manager;
pub mod node_selector;
pub mod process;

pub use agent_rpc::AgentClient;
pub use catalog::{FlatFileRecipeCatalog, StaticRecipeCatalog};
pub use cluster_status::{CacheState, ClusterStatusAggregator, StatusResponse};
pub use command_builder::{CommandBuilder, CommandNode, Placement, RenderedCommand};
pub use error::ApiError;
pub use exec::{AutoExec, BoundedBuffer, Exec, ExecContext, ExecMode, ExecOutput, ExecRequest, LocalExec};
pub use group::{ProcessGroup, StartSpec};
pub use inventory::{AgentConfig, Inventory, InventoryFile, RdmaConfig};
pub use manager::{diff, ProxyManager, ReloadPlan};
pub use node_selector::{DeviceMemory, GpuProbe, NodeFit, NodeSelector, NvidiaSmiProbe};
pub use process::{Backoff, HealthCheck, Process};
