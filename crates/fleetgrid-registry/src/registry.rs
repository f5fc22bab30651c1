//! Fleet registry — permission-gated mutations over process groups, workers,
//! bindings and activation keys.
//!
//! Every operation takes the [`Caller`] explicitly and asks the permission
//! gate before touching the store; a denial returns
//! [`RegistryError::Authorization`] with nothing written. Multi-row writes
//! are single store transactions. Membership and configuration changes are
//! announced to the [`ChangeNotifier`] only after the transaction commits,
//! and a dropped notification never fails the mutation.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use fleetgrid_state::*;

use crate::config::RegistryConfig;
use crate::credentials;
use crate::error::{self, RegistryError, RegistryResult};
use crate::notifier::ChangeNotifier;
use crate::permissions::{environment_checks, resource, Caller, Decision, PermissionGate};

/// Partial update of a process group. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessGroupUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub packages: Option<String>,
    pub active: Option<bool>,
}

impl ProcessGroupUpdate {
    fn validate(&self) -> RegistryResult<()> {
        validate_name("process group name", self.name.as_deref())
    }

    fn apply(self, group: &mut ProcessGroup) {
        if let Some(name) = self.name {
            group.name = name;
        }
        if let Some(description) = self.description {
            group.description = description;
        }
        if let Some(language) = self.language {
            group.language = language;
        }
        if let Some(packages) = self.packages {
            group.packages = packages;
        }
        if let Some(active) = self.active {
            group.active = active;
        }
    }
}

/// Partial update of a worker. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<WorkerStatus>,
    pub active: Option<bool>,
}

impl WorkerUpdate {
    fn validate(&self) -> RegistryResult<()> {
        validate_name("worker name", self.name.as_deref())
    }

    fn apply(self, worker: &mut Worker) {
        if let Some(name) = self.name {
            worker.name = name;
        }
        if let Some(description) = self.description {
            worker.description = description;
        }
        if let Some(status) = self.status {
            worker.status = status;
        }
        if let Some(active) = self.active {
            worker.active = active;
        }
    }
}

/// The fleet registry. `Clone` + `Send` + `Sync`; share one per process.
#[derive(Clone)]
pub struct Registry {
    pub(crate) state: StateStore,
    gate: Arc<dyn PermissionGate>,
    notifier: ChangeNotifier,
    config: RegistryConfig,
}

impl Registry {
    pub fn new(state: StateStore, gate: Arc<dyn PermissionGate>, notifier: ChangeNotifier) -> Self {
        Self {
            state,
            gate,
            notifier,
            config: RegistryConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// The underlying store, for seeding environments and grants.
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    // ── Process groups ─────────────────────────────────────────────

    /// Create a process group and make it available in `bind_environment_id`.
    ///
    /// The group row and its binding are written atomically. Returns the new
    /// group id.
    pub fn create_process_group(
        &self,
        caller: &Caller,
        environment_id: &str,
        bind_environment_id: &str,
        name: &str,
        description: &str,
    ) -> RegistryResult<ProcessGroupId> {
        self.authorize(caller, environment_id, resource::ADD_PROCESS_GROUP, Access::Write)?;
        validate_id("environment id", bind_environment_id)?;
        validate_name("process group name", Some(name))?;

        let group = ProcessGroup {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            language: "python".to_string(),
            packages: String::new(),
            lb: String::new(),
            worker_type: String::new(),
            active: true,
        };
        self.state
            .create_process_group(&group, &Binding::group(bind_environment_id, &group.id))
            .map_err(|e| self.storage_error("add remote process group", e))?;

        info!(group_id = %group.id, %bind_environment_id, user = %caller.user_id, "process group created");
        Ok(group.id)
    }

    /// Update the mutable fields of a process group and notify its workers.
    pub fn update_process_group(
        &self,
        caller: &Caller,
        environment_id: &str,
        group_id: &str,
        update: ProcessGroupUpdate,
    ) -> RegistryResult<ProcessGroup> {
        self.authorize(caller, environment_id, resource::EDIT_PROCESS_GROUPS, Access::Write)?;
        update.validate()?;

        let updated = self
            .state
            .update_process_group(group_id, |group| update.apply(group))
            .map_err(|e| self.storage_error("update remote process group", e))?
            .ok_or_else(|| RegistryError::NotFound(format!("process group {group_id}")))?;

        info!(%group_id, user = %caller.user_id, "process group updated");
        self.notifier.notify_group_changed(group_id);
        Ok(updated)
    }

    /// Delete a process group. Its bindings are not removed.
    pub fn delete_process_group(
        &self,
        caller: &Caller,
        environment_id: &str,
        group_id: &str,
    ) -> RegistryResult<()> {
        self.authorize(caller, environment_id, resource::EDIT_PROCESS_GROUPS, Access::Write)?;

        let existed = self
            .state
            .delete_process_group(group_id)
            .map_err(|e| self.storage_error("remote process group", e))?;
        if !existed {
            return Err(RegistryError::NotFound(format!("process group {group_id}")));
        }

        info!(%group_id, user = %caller.user_id, "process group deleted");
        match self.state.bindings_for_group(group_id) {
            Ok(orphans) if !orphans.is_empty() => {
                warn!(%group_id, bindings = orphans.len(), "bindings still reference deleted process group");
            }
            Ok(_) => {}
            Err(e) => debug!(%group_id, error = %e, "could not count bindings of deleted process group"),
        }
        Ok(())
    }

    /// Make a group available in an environment, optionally naming a worker.
    pub fn bind_group_to_environment(
        &self,
        caller: &Caller,
        environment_id: &str,
        group_id: &str,
        worker_id: &str,
    ) -> RegistryResult<()> {
        self.authorize(caller, environment_id, resource::EDIT_PROCESS_GROUPS, Access::Write)?;
        validate_id("environment id", environment_id)?;
        validate_id("process group id", group_id)?;
        if !worker_id.is_empty() {
            validate_id("worker id", worker_id)?;
        }

        let binding = Binding::worker(environment_id, group_id, worker_id);
        self.state
            .insert_binding(&binding)
            .map_err(|e| self.storage_error("add remote worker environment", e))?;

        info!(%environment_id, %group_id, %worker_id, "process group bound to environment");
        self.notifier.notify_group_changed(group_id);
        Ok(())
    }

    /// Remove every binding of a group in an environment. Returns how many
    /// bindings were removed.
    pub fn unbind_group_from_environment(
        &self,
        caller: &Caller,
        environment_id: &str,
        group_id: &str,
    ) -> RegistryResult<u32> {
        self.authorize(caller, environment_id, resource::EDIT_PROCESS_GROUPS, Access::Write)?;
        validate_id("environment id", environment_id)?;
        validate_id("process group id", group_id)?;

        let removed = self
            .state
            .delete_group_bindings(environment_id, group_id)
            .map_err(|e| self.storage_error("remote worker environment", e))?;
        if removed == 0 {
            return Err(RegistryError::NotFound(format!(
                "process group {group_id} in environment {environment_id}"
            )));
        }

        info!(%environment_id, %group_id, removed, "process group unbound from environment");
        Ok(removed)
    }

    // ── Workers ────────────────────────────────────────────────────

    /// Create a worker attached to `group_id` in `environment_id`.
    ///
    /// The worker row and its binding are written atomically. New workers
    /// start offline. Returns the new worker id.
    pub fn create_worker(
        &self,
        caller: &Caller,
        environment_id: &str,
        name: &str,
        group_id: &str,
    ) -> RegistryResult<WorkerId> {
        self.authorize(caller, environment_id, resource::ADD_REMOTE_WORKERS, Access::Write)?;
        validate_id("environment id", environment_id)?;
        validate_id("process group id", group_id)?;
        validate_name("worker name", Some(name))?;

        let worker = Worker {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: String::new(),
            status: WorkerStatus::Offline,
            lb: String::new(),
            worker_type: String::new(),
            active: true,
            last_ping: None,
        };
        self.state
            .create_worker(&worker, &Binding::worker(environment_id, group_id, &worker.id))
            .map_err(|e| self.storage_error("add remote worker", e))?;

        info!(worker_id = %worker.id, %group_id, %environment_id, "worker created");
        self.notifier.notify_group_changed(group_id);
        Ok(worker.id)
    }

    /// Update the mutable fields of a worker.
    pub fn update_worker(
        &self,
        caller: &Caller,
        environment_id: &str,
        worker_id: &str,
        update: WorkerUpdate,
    ) -> RegistryResult<Worker> {
        self.authorize(caller, environment_id, resource::EDIT_REMOTE_WORKERS, Access::Write)?;
        update.validate()?;

        let updated = self
            .state
            .update_worker(worker_id, |worker| update.apply(worker))
            .map_err(|e| self.storage_error("update remote worker", e))?
            .ok_or_else(|| RegistryError::NotFound(format!("remote worker {worker_id}")))?;

        info!(%worker_id, status = updated.status.as_str(), "worker updated");
        Ok(updated)
    }

    /// Delete a worker. Its bindings and activation keys are not removed.
    pub fn delete_worker(
        &self,
        caller: &Caller,
        environment_id: &str,
        worker_id: &str,
    ) -> RegistryResult<()> {
        self.authorize(caller, environment_id, resource::EDIT_REMOTE_WORKERS, Access::Write)?;

        let existed = self
            .state
            .delete_worker(worker_id)
            .map_err(|e| self.storage_error("remote worker", e))?;
        if !existed {
            return Err(RegistryError::NotFound(format!("remote worker {worker_id}")));
        }

        info!(%worker_id, user = %caller.user_id, "worker deleted");
        let bindings = self.state.bindings_for_worker(worker_id).map(|b| b.len());
        let keys = self.state.activation_keys_for_worker(worker_id).map(|k| k.len());
        match (bindings, keys) {
            (Ok(0), Ok(0)) => {}
            (Ok(bindings), Ok(keys)) => {
                warn!(%worker_id, bindings, keys, "rows still reference deleted worker");
            }
            (Err(e), _) | (_, Err(e)) => {
                debug!(%worker_id, error = %e, "could not count rows of deleted worker");
            }
        }
        Ok(())
    }

    /// Attach an existing worker to a group within an environment.
    pub fn attach_worker_to_group(
        &self,
        caller: &Caller,
        environment_id: &str,
        group_id: &str,
        worker_id: &str,
    ) -> RegistryResult<()> {
        self.authorize(caller, environment_id, resource::EDIT_REMOTE_WORKERS, Access::Write)?;
        validate_id("environment id", environment_id)?;
        validate_id("process group id", group_id)?;
        validate_id("worker id", worker_id)?;

        self.state
            .insert_binding(&Binding::worker(environment_id, group_id, worker_id))
            .map_err(|e| self.storage_error("add remote worker environment", e))?;

        info!(%worker_id, %group_id, %environment_id, "worker attached to process group");
        self.notifier.notify_group_changed(group_id);
        Ok(())
    }

    /// Remove a worker from a group in `binding_environment_id`.
    ///
    /// `environment_id` scopes the permission check; `binding_environment_id`
    /// selects the binding.
    pub fn detach_worker_from_group(
        &self,
        caller: &Caller,
        environment_id: &str,
        binding_environment_id: &str,
        group_id: &str,
        worker_id: &str,
    ) -> RegistryResult<()> {
        self.authorize(caller, environment_id, resource::EDIT_REMOTE_WORKERS, Access::Write)?;
        validate_id("worker id", worker_id)?;

        let existed = self
            .state
            .delete_binding(binding_environment_id, group_id, worker_id)
            .map_err(|e| self.storage_error("remote worker environment", e))?;
        if !existed {
            return Err(RegistryError::NotFound(format!(
                "worker {worker_id} in process group {group_id}"
            )));
        }

        info!(%worker_id, %group_id, %binding_environment_id, "worker detached from process group");
        Ok(())
    }

    /// Record a liveness ping from a worker's connection.
    ///
    /// Not permission gated; the liveness channel authenticates the worker.
    pub fn record_worker_ping(&self, worker_id: &str, status: WorkerStatus, at: u64) -> RegistryResult<()> {
        let known = self
            .state
            .record_worker_ping(worker_id, status, at)
            .map_err(|e| self.storage_error("remote worker ping", e))?;
        if !known {
            return Err(RegistryError::NotFound(format!("remote worker {worker_id}")));
        }
        debug!(%worker_id, status = status.as_str(), at, "worker ping recorded");
        Ok(())
    }

    // ── Activation keys ────────────────────────────────────────────

    /// Issue an activation key for a worker. Returns the display tail.
    pub fn issue_activation_key(
        &self,
        caller: &Caller,
        environment_id: &str,
        worker_id: &str,
        clear_key: &str,
        expires_at: Option<u64>,
    ) -> RegistryResult<String> {
        self.authorize(caller, environment_id, resource::EDIT_REMOTE_WORKERS, Access::Write)?;

        let key = credentials::new_activation_key(worker_id, clear_key, expires_at)?;
        self.state
            .insert_activation_key(&key)
            .map_err(|e| self.storage_error("add activation key", e))?;

        info!(%worker_id, tail = %key.tail, ?expires_at, "activation key issued");
        Ok(key.tail)
    }

    /// Revoke an activation key by its clear value.
    pub fn revoke_activation_key(
        &self,
        caller: &Caller,
        environment_id: &str,
        clear_key: &str,
    ) -> RegistryResult<()> {
        self.authorize(caller, environment_id, resource::EDIT_REMOTE_WORKERS, Access::Write)?;

        let removed = self
            .state
            .take_activation_key(&credentials::hash_activation_key(clear_key))
            .map_err(|e| self.storage_error("delete activation key", e))?
            .ok_or_else(|| RegistryError::NotFound("activation key".to_string()))?;

        info!(worker_id = %removed.worker_id, tail = %removed.tail, "activation key revoked");
        Ok(())
    }

    /// Redeem an activation key on a worker's first contact.
    ///
    /// The key is consumed whether or not it has expired. Returns the id of
    /// the worker the key was issued to.
    pub fn redeem_activation_key(&self, clear_key: &str, now: u64) -> RegistryResult<WorkerId> {
        let key = self
            .state
            .take_activation_key(&credentials::hash_activation_key(clear_key))
            .map_err(|e| self.storage_error("redeem activation key", e))?
            .ok_or_else(|| RegistryError::NotFound("activation key".to_string()))?;

        if key.is_expired(now) {
            warn!(worker_id = %key.worker_id, tail = %key.tail, "expired activation key presented");
            return Err(RegistryError::Validation("activation key expired".to_string()));
        }

        info!(worker_id = %key.worker_id, tail = %key.tail, "activation key redeemed");
        Ok(key.worker_id)
    }

    // ── Shared helpers ─────────────────────────────────────────────

    /// Ask the permission gate about an environment-scoped operation.
    pub(crate) fn authorize(
        &self,
        caller: &Caller,
        environment_id: &str,
        operation_resource: &str,
        access: Access,
    ) -> RegistryResult<()> {
        let checks = environment_checks(caller, environment_id, operation_resource, access);
        match self.gate.decide(&checks) {
            Decision::Granted => Ok(()),
            Decision::Denied => {
                info!(user = %caller.user_id, %environment_id, resource = %operation_resource, "permission denied");
                Err(RegistryError::Authorization)
            }
        }
    }

    pub(crate) fn storage_error(&self, context: &str, err: StateError) -> RegistryError {
        error::from_state(context, err, self.config.debug)
    }
}

fn validate_name(what: &str, name: Option<&str>) -> RegistryResult<()> {
    match name {
        Some(name) if name.trim().is_empty() => {
            Err(RegistryError::Validation(format!("{what} is empty")))
        }
        _ => Ok(()),
    }
}

/// Identifiers become table key segments, so they must be non-empty and
/// free of the key separator.
fn validate_id(what: &str, id: &str) -> RegistryResult<()> {
    if id.is_empty() {
        return Err(RegistryError::Validation(format!("{what} is empty")));
    }
    if id.contains(KEY_SEPARATOR) {
        return Err(RegistryError::Validation(format!(
            "{what} must not contain '{KEY_SEPARATOR}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::permissions::PermissionCheck;

    fn allow_all() -> Arc<dyn PermissionGate> {
        Arc::new(|_: &[PermissionCheck]| Decision::Granted)
    }

    fn test_registry() -> (Registry, tokio::sync::mpsc::Receiver<ProcessGroupId>) {
        let state = StateStore::open_in_memory().unwrap();
        for env in ["env-1", "env-2"] {
            state
                .put_environment(&Environment {
                    id: env.to_string(),
                    name: env.to_uppercase(),
                })
                .unwrap();
        }
        let (notifier, queue) = ChangeNotifier::channel(64);
        (Registry::new(state, allow_all(), notifier), queue)
    }

    fn caller() -> Caller {
        Caller::new("alice", "platform-1")
    }

    #[test]
    fn create_group_defaults() {
        let (registry, _queue) = test_registry();
        let id = registry
            .create_process_group(&caller(), "env-1", "env-1", "etl", "nightly jobs")
            .unwrap();

        let group = registry.state().get_process_group(&id).unwrap().unwrap();
        assert_eq!(group.name, "etl");
        assert_eq!(group.language, "python");
        assert!(group.active);
        assert!(registry.state().has_binding("env-1", &id, "").unwrap());
    }

    #[test]
    fn create_group_unknown_environment_is_validation() {
        let (registry, _queue) = test_registry();
        let err = registry
            .create_process_group(&caller(), "env-1", "env-9", "etl", "")
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(registry.state().list_process_groups().unwrap().is_empty());
    }

    #[test]
    fn update_group_is_partial_and_notifies() {
        let (registry, mut queue) = test_registry();
        let id = registry
            .create_process_group(&caller(), "env-1", "env-1", "etl", "desc")
            .unwrap();

        let updated = registry
            .update_process_group(
                &caller(),
                "env-1",
                &id,
                ProcessGroupUpdate {
                    packages: Some("numpy".to_string()),
                    active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.name, "etl");
        assert_eq!(updated.description, "desc");
        assert_eq!(updated.packages, "numpy");
        assert!(!updated.active);
        assert_eq!(queue.try_recv().unwrap(), id);
    }

    #[test]
    fn update_missing_group_is_not_found() {
        let (registry, mut queue) = test_registry();
        let err = registry
            .update_process_group(&caller(), "env-1", "nope", ProcessGroupUpdate::default())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(queue.try_recv().is_err());
    }

    #[test]
    fn blank_names_are_rejected_on_update() {
        let (registry, mut queue) = test_registry();
        let group_id = registry
            .create_process_group(&caller(), "env-1", "env-1", "etl", "")
            .unwrap();
        let worker_id = registry
            .create_worker(&caller(), "env-1", "worker-a", &group_id)
            .unwrap();
        while queue.try_recv().is_ok() {}

        let err = registry
            .update_process_group(
                &caller(),
                "env-1",
                &group_id,
                ProcessGroupUpdate {
                    name: Some("  ".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(queue.try_recv().is_err());

        let err = registry
            .update_worker(
                &caller(),
                "env-1",
                &worker_id,
                WorkerUpdate {
                    name: Some(String::new()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert_eq!(registry.state().get_process_group(&group_id).unwrap().unwrap().name, "etl");
        assert_eq!(registry.state().get_worker(&worker_id).unwrap().unwrap().name, "worker-a");
    }

    #[test]
    fn environment_with_separator_is_validation() {
        let (registry, _queue) = test_registry();
        let err = registry
            .state()
            .put_environment(&Environment {
                id: "eu/prod".to_string(),
                name: "EU".to_string(),
            })
            .map_err(|e| registry.storage_error("put environment", e))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn bind_rejects_separator_in_ids() {
        let (registry, _queue) = test_registry();
        let err = registry
            .bind_group_to_environment(&caller(), "env-1", "a/b", "")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn create_worker_starts_offline_and_notifies() {
        let (registry, mut queue) = test_registry();
        let group_id = registry
            .create_process_group(&caller(), "env-1", "env-1", "etl", "")
            .unwrap();

        let worker_id = registry
            .create_worker(&caller(), "env-1", "worker-a", &group_id)
            .unwrap();

        let worker = registry.state().get_worker(&worker_id).unwrap().unwrap();
        assert_eq!(worker.status, WorkerStatus::Offline);
        assert!(worker.last_ping.is_none());
        assert_eq!(queue.try_recv().unwrap(), group_id);
    }

    #[test]
    fn update_worker_fields() {
        let (registry, _queue) = test_registry();
        let group_id = registry
            .create_process_group(&caller(), "env-1", "env-1", "etl", "")
            .unwrap();
        let worker_id = registry
            .create_worker(&caller(), "env-1", "worker-a", &group_id)
            .unwrap();

        let updated = registry
            .update_worker(
                &caller(),
                "env-1",
                &worker_id,
                WorkerUpdate {
                    description: Some("gpu box".to_string()),
                    status: Some(WorkerStatus::Online),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "worker-a");
        assert_eq!(updated.description, "gpu box");
        assert_eq!(updated.status, WorkerStatus::Online);

        let err = registry
            .update_worker(&caller(), "env-1", "nope", WorkerUpdate::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn attach_and_detach_worker() {
        let (registry, mut queue) = test_registry();
        let group_id = registry
            .create_process_group(&caller(), "env-1", "env-1", "etl", "")
            .unwrap();
        let worker_id = registry
            .create_worker(&caller(), "env-1", "worker-a", &group_id)
            .unwrap();
        let _ = queue.try_recv();

        registry
            .attach_worker_to_group(&caller(), "env-2", &group_id, &worker_id)
            .unwrap();
        assert_eq!(queue.try_recv().unwrap(), group_id);

        registry
            .detach_worker_from_group(&caller(), "env-1", "env-2", &group_id, &worker_id)
            .unwrap();
        let err = registry
            .detach_worker_from_group(&caller(), "env-1", "env-2", &group_id, &worker_id)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        // The env-1 attachment is untouched.
        assert!(registry.state().has_binding("env-1", &group_id, &worker_id).unwrap());
    }

    #[test]
    fn delete_worker_keeps_bindings_and_keys() {
        let (registry, _queue) = test_registry();
        let group_id = registry
            .create_process_group(&caller(), "env-1", "env-1", "etl", "")
            .unwrap();
        let worker_id = registry
            .create_worker(&caller(), "env-1", "worker-a", &group_id)
            .unwrap();
        registry
            .issue_activation_key(&caller(), "env-1", &worker_id, "AAAA-BBBB-CCCC-DDDD", None)
            .unwrap();

        registry.delete_worker(&caller(), "env-1", &worker_id).unwrap();

        assert!(registry.state().get_worker(&worker_id).unwrap().is_none());
        assert_eq!(registry.state().bindings_for_worker(&worker_id).unwrap().len(), 1);
        assert_eq!(registry.state().activation_keys_for_worker(&worker_id).unwrap().len(), 1);
    }

    #[test]
    fn ping_marks_worker_online() {
        let (registry, _queue) = test_registry();
        let group_id = registry
            .create_process_group(&caller(), "env-1", "env-1", "etl", "")
            .unwrap();
        let worker_id = registry
            .create_worker(&caller(), "env-1", "worker-a", &group_id)
            .unwrap();

        registry
            .record_worker_ping(&worker_id, WorkerStatus::Online, 1_700_000_000)
            .unwrap();
        let worker = registry.state().get_worker(&worker_id).unwrap().unwrap();
        assert_eq!(worker.status, WorkerStatus::Online);
        assert_eq!(worker.last_ping, Some(1_700_000_000));

        let err = registry
            .record_worker_ping("ghost", WorkerStatus::Online, 1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn issue_key_validation_and_unknown_worker() {
        let (registry, _queue) = test_registry();
        let err = registry
            .issue_activation_key(&caller(), "env-1", "w-1", "not-a-key", None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = registry
            .issue_activation_key(&caller(), "env-1", "w-1", "AAAA-BBBB-CCCC-DDDD", None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("unknown worker"));
    }

    #[test]
    fn redeem_key_is_one_time_and_checks_expiry() {
        let (registry, _queue) = test_registry();
        let group_id = registry
            .create_process_group(&caller(), "env-1", "env-1", "etl", "")
            .unwrap();
        let worker_id = registry
            .create_worker(&caller(), "env-1", "worker-a", &group_id)
            .unwrap();
        registry
            .issue_activation_key(&caller(), "env-1", &worker_id, "AAAA-BBBB-CCCC-0001", Some(100))
            .unwrap();
        registry
            .issue_activation_key(&caller(), "env-1", &worker_id, "AAAA-BBBB-CCCC-0002", Some(100))
            .unwrap();

        assert_eq!(
            registry.redeem_activation_key("AAAA-BBBB-CCCC-0001", 50).unwrap(),
            worker_id
        );
        let again = registry.redeem_activation_key("AAAA-BBBB-CCCC-0001", 50).unwrap_err();
        assert_eq!(again.kind(), ErrorKind::NotFound);

        let expired = registry.redeem_activation_key("AAAA-BBBB-CCCC-0002", 100).unwrap_err();
        assert_eq!(expired.kind(), ErrorKind::Validation);
        assert!(registry.state().activation_keys_for_worker(&worker_id).unwrap().is_empty());
    }

    #[test]
    fn duplicate_key_conflicts() {
        let (registry, _queue) = test_registry();
        let group_id = registry
            .create_process_group(&caller(), "env-1", "env-1", "etl", "")
            .unwrap();
        let worker_id = registry
            .create_worker(&caller(), "env-1", "worker-a", &group_id)
            .unwrap();
        registry
            .issue_activation_key(&caller(), "env-1", &worker_id, "AAAA-BBBB-CCCC-DDDD", None)
            .unwrap();

        let err = registry
            .issue_activation_key(&caller(), "env-1", &worker_id, "AAAA-BBBB-CCCC-DDDD", None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!err.to_string().contains("AAAA"));
    }
}
