//! Process Group (§4.4): exclusivity, swap policy, persistence, and
//! per-group admission serialization.

use std::collections::HashMap;
use std::sync::Arc;

use fabric_model::{ManagedModel, ProcessGroupSpec, ProcessState};
use tokio::sync::Mutex;

use crate::error::GroupError;
use crate::exec::Exec;
use crate::process::{HealthCheck, Process};

/// Runtime wrapper around a `ProcessGroupSpec`: owns live `Process`
/// handles keyed by `model_id`. Admission is serialized by `admission_lock`
/// so a request cannot observe a peer in `Ready` after its own admission
/// returned (§5 ordering guarantee).
pub struct ProcessGroup {
    pub spec: ProcessGroupSpec,
    processes: Mutex<HashMap<String, Arc<Process>>>,
    admission_lock: Mutex<()>,
    last_used_process: Mutex<Option<String>>,
}

/// What the caller needs to actually spawn the winning process: the
/// command execution host/locality and health endpoint are supplied by
/// the caller (Proxy Manager), since the group doesn't know about node
/// placement.
pub struct StartSpec {
    pub host: String,
    pub is_local: bool,
    pub proxy_target: String,
    pub health_endpoint: String,
    pub health_check_timeout: std::time::Duration,
}

impl ProcessGroup {
    pub fn new(spec: ProcessGroupSpec) -> Self {
        Self {
            spec,
            processes: Mutex::new(HashMap::new()),
            admission_lock: Mutex::new(()),
            last_used_process: Mutex::new(None),
        }
    }

    pub async fn process_states(&self) -> HashMap<String, ProcessState> {
        let procs = self.processes.lock().await;
        let mut out = HashMap::new();
        for (id, p) in procs.iter() {
            out.insert(id.clone(), p.state().await);
        }
        out
    }

    async fn ready_peer_other_than(&self, model_id: &str) -> Option<(String, Arc<Process>)> {
        let procs = self.processes.lock().await;
        for (id, p) in procs.iter() {
            if id != model_id && p.state().await == ProcessState::Ready {
                return Some((id.clone(), Arc::clone(p)));
            }
        }
        None
    }

    async fn get_or_create(&self, model_id: &str) -> Arc<Process> {
        let mut procs = self.processes.lock().await;
        procs
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(Process::new(model_id)))
            .clone()
    }

    /// Admission (§4.4): stop peers → render command (caller's job,
    /// `model.rendered_cmd` must already be set) → start → wait health →
    /// mark `last_used_process`. If any step fails, partially-started
    /// processes are driven to `Stopped` before returning the error.
    pub async fn acquire(
        &self,
        exec: &dyn Exec,
        health: &dyn HealthCheck,
        model: &ManagedModel,
        start: StartSpec,
    ) -> Result<Arc<Process>, GroupError> {
        let _admission = self.admission_lock.lock().await;

        let process = self.get_or_create(&model.model_id).await;
        if process.state().await == ProcessState::Ready {
            process.mark_used().await;
            *self.last_used_process.lock().await = Some(model.model_id.clone());
            return Ok(process);
        }

        if let Some((peer_id, peer)) = self.ready_peer_other_than(&model.model_id).await {
            if self.spec.swap {
                peer.stop(exec, model, &start.host, start.is_local).await.map_err(GroupError::Process)?;
            } else {
                let _ = peer_id;
                return Err(GroupError::Busy);
            }
        }

        let result = process
            .start(
                exec,
                health,
                model,
                &start.host,
                start.is_local,
                start.proxy_target,
                start.health_endpoint,
                start.health_check_timeout,
            )
            .await;

        match result {
            Ok(()) => {
                *self.last_used_process.lock().await = Some(model.model_id.clone());
                Ok(process)
            }
            Err(e) => {
                let _ = process.stop(exec, model, &start.host, start.is_local).await;
                Err(GroupError::Process(e))
            }
        }
    }

    pub async fn release(&self, exec: &dyn Exec, model: &ManagedModel, host: &str, is_local: bool) -> Result<(), GroupError> {
        let procs = self.processes.lock().await;
        if let Some(process) = procs.get(&model.model_id) {
            process.stop(exec, model, host, is_local).await.map_err(GroupError::Process)?;
        }
        Ok(())
    }

    /// Shuts down every member process. Used on config reload for groups
    /// absent from the new config, and for removed members of a retained
    /// group (§4.4 reload semantics).
    pub async fn shutdown_all(&self, exec: &dyn Exec, model_lookup: &dyn Fn(&str) -> Option<ManagedModel>) {
        let ids: Vec<String> = self.processes.lock().await.keys().cloned().collect();
        for id in ids {
            if let Some(model) = model_lookup(&id) {
                let _ = self.release(exec, &model, "local", true).await;
            }
        }
    }

    pub async fn process(&self, model_id: &str) -> Option<Arc<Process>> {
        self.processes.lock().await.get(model_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use crate::exec::{ExecContext, ExecOutput, ExecRequest};
    use async_trait::async_trait;
    use fabric_model::ModelMode;
    use std::collections::BTreeSet;

    /// The launch script (`rendered_cmd`) is a foreground long-lived
    /// server and never returns; the stop script (`rendered_cmd_stop`) is
    /// a quick `docker stop`-style command that exits immediately. Mirror
    /// that split here rather than resolving every script instantly,
    /// since `Process::start` now races the launch against health polling.
    struct AlwaysOkExec;
    #[async_trait]
    impl Exec for AlwaysOkExec {
        async fn run(&self, _ctx: &ExecContext, req: ExecRequest) -> Result<ExecOutput, ExecError> {
            if req.script == "true" {
                return Ok(ExecOutput { output_tail: String::new(), truncated: false, exit_code: 0 });
            }
            std::future::pending().await
        }
    }

    struct AlwaysHealthy;
    #[async_trait]
    impl HealthCheck for AlwaysHealthy {
        async fn check(&self, _endpoint: &str) -> bool {
            true
        }
    }

    fn spec(members: &[&str], swap: bool, exclusive: bool) -> ProcessGroupSpec {
        ProcessGroupSpec {
            group_id: "g".into(),
            members: members.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            swap,
            exclusive,
            persistent: false,
        }
    }

    fn model(id: &str) -> ManagedModel {
        ManagedModel {
            model_id: id.into(),
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
            rendered_cmd: Some("exec some-runtime serve".into()),
            rendered_cmd_stop: Some("true".into()),
            rendered_group_id: None,
            rendered_host: None,
            metadata: Default::default(),
            schema_version: 1,
        }
    }

    fn start_spec() -> StartSpec {
        StartSpec {
            host: "local".into(),
            is_local: true,
            proxy_target: "http://localhost:9000".into(),
            health_endpoint: "http://localhost:9000/health".into(),
            health_check_timeout: std::time::Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn swap_stops_peer_before_starting_new_model() {
        let group = ProcessGroup::new(spec(&["a", "b"], true, false));
        group.acquire(&AlwaysOkExec, &AlwaysHealthy, &model("a"), start_spec()).await.unwrap();
        assert_eq!(group.process("a").await.unwrap().state().await, ProcessState::Ready);

        group.acquire(&AlwaysOkExec, &AlwaysHealthy, &model("b"), start_spec()).await.unwrap();
        assert_eq!(group.process("a").await.unwrap().state().await, ProcessState::Stopped);
        assert_eq!(group.process("b").await.unwrap().state().await, ProcessState::Ready);
    }

    #[tokio::test]
    async fn without_swap_a_ready_peer_fails_admission() {
        let group = ProcessGroup::new(spec(&["a", "b"], false, false));
        group.acquire(&AlwaysOkExec, &AlwaysHealthy, &model("a"), start_spec()).await.unwrap();

        let err = group.acquire(&AlwaysOkExec, &AlwaysHealthy, &model("b"), start_spec()).await.unwrap_err();
        assert!(matches!(err, GroupError::Busy));
    }

    #[tokio::test]
    async fn reacquiring_the_same_ready_model_is_a_noop() {
        let group = ProcessGroup::new(spec(&["a"], true, false));
        group.acquire(&AlwaysOkExec, &AlwaysHealthy, &model("a"), start_spec()).await.unwrap();
        group.acquire(&AlwaysOkExec, &AlwaysHealthy, &model("a"), start_spec()).await.unwrap();
        assert_eq!(group.process("a").await.unwrap().state().await, ProcessState::Ready);
    }
}
