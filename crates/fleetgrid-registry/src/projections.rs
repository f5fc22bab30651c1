//! Read-only joined views over the registry tables.
//!
//! An empty result is success. Only storage failures surface as errors.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use fleetgrid_state::*;

use crate::error::RegistryResult;
use crate::permissions::{resource, Caller};
use crate::registry::Registry;

/// A process group together with the names of the caller-visible
/// environments it is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessGroupWithEnvironments {
    #[serde(flatten)]
    pub group: ProcessGroup,
    /// Distinct environment names, sorted.
    pub environments: Vec<String>,
}

/// One (group, environment) membership of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerProcessGroup {
    #[serde(flatten)]
    pub group: ProcessGroup,
    pub environment_id: EnvironmentId,
}

/// Operator-facing view of an activation key. The digest is not included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationKeyView {
    pub tail: String,
    pub worker_id: WorkerId,
    pub expires_at: Option<u64>,
}

impl From<ActivationKey> for ActivationKeyView {
    fn from(key: ActivationKey) -> Self {
        Self {
            tail: key.tail,
            worker_id: key.worker_id,
            expires_at: key.expires_at,
        }
    }
}

impl Registry {
    /// Fetch a group visible to the caller in `environment_id`.
    ///
    /// Visibility is membership based: the caller must belong to the
    /// environment and the group must be bound in it.
    pub fn get_process_group(
        &self,
        caller: &Caller,
        environment_id: &str,
        group_id: &str,
    ) -> RegistryResult<Option<ProcessGroup>> {
        let context = "get remote process group";
        let member = self
            .state
            .is_environment_member(environment_id, &caller.user_id)
            .map_err(|e| self.storage_error(context, e))?;
        if !member {
            return Ok(None);
        }
        let bound = self
            .state
            .bindings_for_group(group_id)
            .map_err(|e| self.storage_error(context, e))?
            .iter()
            .any(|b| b.environment_id == environment_id);
        if !bound {
            return Ok(None);
        }
        self.state
            .get_process_group(group_id)
            .map_err(|e| self.storage_error(context, e))
    }

    /// Every group bound to an environment the caller belongs to, with the
    /// names of those environments. Sorted by group name.
    pub fn list_process_groups(
        &self,
        caller: &Caller,
        environment_id: &str,
    ) -> RegistryResult<Vec<ProcessGroupWithEnvironments>> {
        self.authorize(caller, environment_id, resource::VIEW_PROCESS_GROUPS, Access::Read)?;
        let context = "list remote process groups";

        let visible: BTreeSet<EnvironmentId> = self
            .state
            .environments_for_user(&caller.user_id)
            .map_err(|e| self.storage_error(context, e))?
            .into_iter()
            .collect();
        let names: BTreeMap<EnvironmentId, String> = self
            .state
            .list_environments()
            .map_err(|e| self.storage_error(context, e))?
            .into_iter()
            .filter(|env| visible.contains(&env.id))
            .map(|env| (env.id, env.name))
            .collect();

        let mut per_group: BTreeMap<ProcessGroupId, BTreeSet<String>> = BTreeMap::new();
        for binding in self
            .state
            .list_bindings()
            .map_err(|e| self.storage_error(context, e))?
        {
            if let Some(name) = names.get(&binding.environment_id) {
                per_group
                    .entry(binding.process_group_id)
                    .or_default()
                    .insert(name.clone());
            }
        }

        let mut groups = Vec::with_capacity(per_group.len());
        for (group_id, environments) in per_group {
            // Bindings may outlive their group.
            let Some(group) = self
                .state
                .get_process_group(&group_id)
                .map_err(|e| self.storage_error(context, e))?
            else {
                continue;
            };
            groups.push(ProcessGroupWithEnvironments {
                group,
                environments: environments.into_iter().collect(),
            });
        }
        groups.sort_by(|a, b| a.group.name.cmp(&b.group.name).then(a.group.id.cmp(&b.group.id)));
        Ok(groups)
    }

    /// Distinct groups bound to one environment, sorted by name.
    pub fn list_process_groups_for_environment(
        &self,
        caller: &Caller,
        environment_id: &str,
    ) -> RegistryResult<Vec<ProcessGroup>> {
        self.authorize(caller, environment_id, resource::VIEW_PROCESS_GROUPS, Access::Read)?;
        let context = "list remote process groups";

        let ids: BTreeSet<ProcessGroupId> = self
            .state
            .bindings_for_environment(environment_id)
            .map_err(|e| self.storage_error(context, e))?
            .into_iter()
            .map(|b| b.process_group_id)
            .collect();

        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(group) = self
                .state
                .get_process_group(&id)
                .map_err(|e| self.storage_error(context, e))?
            {
                groups.push(group);
            }
        }
        groups.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(groups)
    }

    /// Distinct workers bound in an environment, optionally narrowed to one
    /// group. Sorted by name.
    pub fn list_workers(
        &self,
        caller: &Caller,
        environment_id: &str,
        group_id: Option<&str>,
    ) -> RegistryResult<Vec<Worker>> {
        self.authorize(caller, environment_id, resource::VIEW_REMOTE_WORKERS, Access::Read)?;
        let context = "list remote workers";

        let ids: BTreeSet<WorkerId> = self
            .state
            .bindings_for_environment(environment_id)
            .map_err(|e| self.storage_error(context, e))?
            .into_iter()
            .filter(|b| b.has_worker())
            .filter(|b| group_id.is_none_or(|g| b.process_group_id == g))
            .map(|b| b.worker_id)
            .collect();

        let mut workers = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(worker) = self
                .state
                .get_worker(&id)
                .map_err(|e| self.storage_error(context, e))?
            {
                workers.push(worker);
            }
        }
        workers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(workers)
    }

    pub fn get_worker(
        &self,
        caller: &Caller,
        environment_id: &str,
        worker_id: &str,
    ) -> RegistryResult<Option<Worker>> {
        self.authorize(caller, environment_id, resource::VIEW_REMOTE_WORKERS, Access::Read)?;
        self.state
            .get_worker(worker_id)
            .map_err(|e| self.storage_error("get remote worker", e))
    }

    /// Distinct, sorted ids of the environments a group is bound to.
    pub fn list_group_environments(
        &self,
        caller: &Caller,
        environment_id: &str,
        group_id: &str,
    ) -> RegistryResult<Vec<EnvironmentId>> {
        self.authorize(caller, environment_id, resource::VIEW_PROCESS_GROUPS, Access::Read)?;

        let ids: BTreeSet<EnvironmentId> = self
            .state
            .bindings_for_group(group_id)
            .map_err(|e| self.storage_error("list remote worker environments", e))?
            .into_iter()
            .map(|b| b.environment_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// The groups a worker belongs to, per environment, limited to the
    /// environments the caller is a member of.
    pub fn list_worker_groups(
        &self,
        caller: &Caller,
        environment_id: &str,
        worker_id: &str,
    ) -> RegistryResult<Vec<WorkerProcessGroup>> {
        self.authorize(caller, environment_id, resource::VIEW_REMOTE_WORKERS, Access::Read)?;
        let context = "list remote worker process groups";

        let visible: BTreeSet<EnvironmentId> = self
            .state
            .environments_for_user(&caller.user_id)
            .map_err(|e| self.storage_error(context, e))?
            .into_iter()
            .collect();

        let mut rows = Vec::new();
        for binding in self
            .state
            .bindings_for_worker(worker_id)
            .map_err(|e| self.storage_error(context, e))?
        {
            if !visible.contains(&binding.environment_id) {
                continue;
            }
            if let Some(group) = self
                .state
                .get_process_group(&binding.process_group_id)
                .map_err(|e| self.storage_error(context, e))?
            {
                rows.push(WorkerProcessGroup {
                    group,
                    environment_id: binding.environment_id,
                });
            }
        }
        rows.sort_by(|a, b| {
            (a.environment_id.as_str(), a.group.name.as_str())
                .cmp(&(b.environment_id.as_str(), b.group.name.as_str()))
        });
        Ok(rows)
    }

    /// Activation keys issued to a worker, without their digests.
    pub fn list_activation_keys(
        &self,
        caller: &Caller,
        environment_id: &str,
        worker_id: &str,
    ) -> RegistryResult<Vec<ActivationKeyView>> {
        self.authorize(caller, environment_id, resource::VIEW_REMOTE_WORKERS, Access::Read)?;

        let mut keys: Vec<ActivationKeyView> = self
            .state
            .activation_keys_for_worker(worker_id)
            .map_err(|e| self.storage_error("list activation keys", e))?
            .into_iter()
            .map(ActivationKeyView::from)
            .collect();
        keys.sort_by(|a, b| a.tail.cmp(&b.tail));
        Ok(keys)
    }

}
