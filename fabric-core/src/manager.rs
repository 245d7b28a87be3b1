//! Proxy Manager (§4.4, §5): owns the `ProcessGroup` set, the cross-group
//! exclusivity registry, and atomic config reload, under the rule that
//! `ProxyManager` exclusively owns the `ProcessGroup` set.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use fabric_model::{GroupId, ManagedModel, ProcessGroupSpec};
use tokio::sync::RwLock;

use crate::error::GroupError;
use crate::exec::Exec;
use crate::group::{ProcessGroup, StartSpec};
use crate::process::{HealthCheck, Process};

/// Plan computed by the pure `diff` function: which groups disappear
/// wholesale, which are brand new, and — for groups retained across the
/// reload — which members lost their place and must be evicted.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReloadPlan {
    pub to_remove: Vec<GroupId>,
    pub to_add: Vec<ProcessGroupSpec>,
    pub members_to_evict: HashMap<GroupId, BTreeSet<String>>,
}

/// Config-reload diffing (§4.4, I2). A group is "retained" only if its
/// `group_id` AND its non-member fields (`swap`/`exclusive`/`persistent`)
/// are unchanged — anything else is a full remove+add, since changing
/// those fields changes the group's runtime contract. For retained
/// groups, members present in `old` but absent from `new` are scheduled
/// for eviction; members present in both keep their identity untouched,
/// which is exactly the I2 guarantee (`processOf(M)` identity preserved
/// iff its state is `Starting`/`Ready` *and* its group is retained).
pub fn diff(old: &[ProcessGroupSpec], new: &[ProcessGroupSpec]) -> ReloadPlan {
    let old_by_id: HashMap<&GroupId, &ProcessGroupSpec> = old.iter().map(|g| (&g.group_id, g)).collect();
    let new_by_id: HashMap<&GroupId, &ProcessGroupSpec> = new.iter().map(|g| (&g.group_id, g)).collect();

    let mut plan = ReloadPlan::default();

    for g in old {
        match new_by_id.get(&g.group_id) {
            None => plan.to_remove.push(g.group_id.clone()),
            Some(new_g) if !same_contract(g, new_g) => plan.to_remove.push(g.group_id.clone()),
            Some(new_g) => {
                let evicted: BTreeSet<String> = g.members.difference(&new_g.members).cloned().collect();
                if !evicted.is_empty() {
                    plan.members_to_evict.insert(g.group_id.clone(), evicted);
                }
            }
        }
    }

    for g in new {
        match old_by_id.get(&g.group_id) {
            None => plan.to_add.push(g.clone()),
            Some(old_g) if !same_contract(old_g, g) => plan.to_add.push(g.clone()),
            Some(_) => {}
        }
    }

    plan
}

fn same_contract(a: &ProcessGroupSpec, b: &ProcessGroupSpec) -> bool {
    a.swap == b.swap && a.exclusive == b.exclusive && a.persistent == b.persistent
}

pub struct ProxyManager {
    groups: RwLock<HashMap<GroupId, Arc<ProcessGroup>>>,
}

impl Default for ProxyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyManager {
    pub fn new() -> Self {
        Self { groups: RwLock::new(HashMap::new()) }
    }

    pub async fn group(&self, group_id: &str) -> Option<Arc<ProcessGroup>> {
        self.groups.read().await.get(group_id).cloned()
    }

    async fn get_or_create_group(&self, spec: ProcessGroupSpec) -> Arc<ProcessGroup> {
        let mut groups = self.groups.write().await;
        groups.entry(spec.group_id.clone()).or_insert_with(|| Arc::new(ProcessGroup::new(spec))).clone()
    }

    pub async fn current_specs(&self) -> Vec<ProcessGroupSpec> {
        self.groups.read().await.values().map(|g| g.spec.clone()).collect()
    }

    /// Admission entry point. `group_id` is the *rendered* group id (after
    /// single-node pinning, per §4.6), not necessarily `model.group_name`.
    /// When `spec.exclusive`, stops `Ready` peers in every other exclusive
    /// group before delegating to the group's own admission policy — the
    /// cross-group eviction rule (§4.4).
    pub async fn acquire(
        &self,
        exec: &dyn Exec,
        health: &dyn HealthCheck,
        group_id: &str,
        spec: ProcessGroupSpec,
        model: &ManagedModel,
        start: StartSpec,
    ) -> Result<Arc<Process>, GroupError> {
        let exclusive = spec.exclusive;
        let group = self.get_or_create_group(spec).await;

        if exclusive {
            self.stop_ready_peers_in_other_exclusive_groups(exec, group_id, model, &start).await?;
        }

        group.acquire(exec, health, model, start).await
    }

    async fn stop_ready_peers_in_other_exclusive_groups(
        &self,
        exec: &dyn Exec,
        except_group_id: &str,
        model: &ManagedModel,
        start: &StartSpec,
    ) -> Result<(), GroupError> {
        let others: Vec<Arc<ProcessGroup>> = {
            let groups = self.groups.read().await;
            groups
                .iter()
                .filter(|(id, g)| id.as_str() != except_group_id && g.spec.exclusive)
                .map(|(_, g)| Arc::clone(g))
                .collect()
        };

        for other in others {
            let ready_members: Vec<String> = other
                .process_states()
                .await
                .into_iter()
                .filter(|(_, state)| *state == fabric_model::ProcessState::Ready)
                .map(|(id, _)| id)
                .collect();
            for member_id in ready_members {
                // The peer's own ManagedModel (recipe, rendered cmdStop) is
                // out of scope here — the caller's reload-model lookup is
                // the only place that knows every ManagedModel. We reuse
                // the admitting model's host/locality for the stop call
                // since cmdStop for the peer was already rendered and
                // stored on its own `Process`; only the host matters for
                // `Exec::run`, not the command body.
                if let Some(peer) = other.process(&member_id).await {
                    peer.stop(exec, model, &start.host, start.is_local).await.map_err(GroupError::Process)?;
                }
            }
        }
        Ok(())
    }

    pub async fn release(&self, exec: &dyn Exec, group_id: &str, model: &ManagedModel, host: &str, is_local: bool) -> Result<(), GroupError> {
        if let Some(group) = self.group(group_id).await {
            group.release(exec, model, host, is_local).await?;
        }
        Ok(())
    }

    /// Applies a config reload (§4.4, §5): swaps the group map under a
    /// short write lock, then shuts down removed groups and evicted
    /// members asynchronously after the lock is released, so the reload
    /// call itself never blocks on graceful termination.
    pub async fn apply_reload(
        &self,
        exec: Arc<dyn Exec>,
        new_specs: Vec<ProcessGroupSpec>,
        old_models: Arc<HashMap<String, ManagedModel>>,
    ) {
        let old_specs = self.current_specs().await;
        let plan = diff(&old_specs, &new_specs);

        let (removed, retained_for_eviction) = {
            let mut groups = self.groups.write().await;

            let mut removed = Vec::new();
            for id in &plan.to_remove {
                if let Some(g) = groups.remove(id) {
                    removed.push(g);
                }
            }

            for spec in &plan.to_add {
                groups.entry(spec.group_id.clone()).or_insert_with(|| Arc::new(ProcessGroup::new(spec.clone())));
            }

            let mut retained = Vec::new();
            for (group_id, evicted_members) in &plan.members_to_evict {
                if let Some(g) = groups.get(group_id) {
                    retained.push((Arc::clone(g), evicted_members.clone()));
                }
            }

            (removed, retained)
        };

        tokio::spawn(async move {
            for group in removed {
                group.shutdown_all(&*exec, &|id| old_models.get(id).cloned()).await;
            }
            for (group, evicted_members) in retained_for_eviction {
                for member_id in evicted_members {
                    if let Some(model) = old_models.get(&member_id) {
                        let _ = group.release(&*exec, model, "local", true).await;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn spec(id: &str, members: &[&str], swap: bool, exclusive: bool) -> ProcessGroupSpec {
        ProcessGroupSpec {
            group_id: id.into(),
            members: members.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            swap,
            exclusive,
            persistent: false,
        }
    }

    #[test]
    fn removed_group_is_flagged_for_full_shutdown() {
        let old = vec![spec("g1", &["a"], true, false)];
        let new: Vec<ProcessGroupSpec> = vec![];
        let plan = diff(&old, &new);
        assert_eq!(plan.to_remove, vec!["g1".to_string()]);
        assert!(plan.to_add.is_empty());
    }

    #[test]
    fn new_group_is_flagged_for_add() {
        let old: Vec<ProcessGroupSpec> = vec![];
        let new = vec![spec("g1", &["a"], true, false)];
        let plan = diff(&old, &new);
        assert_eq!(plan.to_add.len(), 1);
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn retained_group_evicts_only_dropped_members_preserving_shared_ones() {
        let old = vec![spec("g1", &["a", "b"], true, false)];
        let new = vec![spec("g1", &["a"], true, false)];
        let plan = diff(&old, &new);
        assert!(plan.to_remove.is_empty());
        assert!(plan.to_add.is_empty());
        assert_eq!(plan.members_to_evict.get("g1").unwrap(), &BTreeSet::from(["b".to_string()]));
    }

    #[test]
    fn changing_exclusivity_is_a_full_remove_and_add_not_a_member_diff() {
        let old = vec![spec("g1", &["a"], true, false)];
        let new = vec![spec("g1", &["a"], true, true)];
        let plan = diff(&old, &new);
        assert_eq!(plan.to_remove, vec!["g1".to_string()]);
        assert_eq!(plan.to_add.len(), 1);
        assert!(plan.members_to_evict.is_empty());
    }

    #[tokio::test]
    async fn get_or_create_group_is_idempotent_for_same_id() {
        let manager = ProxyManager::new();
        let a = manager.get_or_create_group(spec("g1", &["a"], true, false)).await;
        let b = manager.get_or_create_group(spec("g1", &["a"], true, false)).await;
        assert!(Arc::ptr_eq(&a, &b));
    }
}
