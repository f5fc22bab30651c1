//! StateStore — redb-backed persistence for the fleet registry.
//!
//! Provides typed operations over process groups, workers, bindings,
//! activation keys, environments and grants. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! Writes that span tables (group + binding, worker + binding) happen in one
//! write transaction. Referential checks run inside that transaction, so a
//! failed check aborts every row written before it.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type RowTable<'txn> = Table<'txn, &'static str, &'static [u8]>;
type RowDefinition = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [
            PROCESS_GROUPS,
            WORKERS,
            BINDINGS,
            ACTIVATION_KEYS,
            ENVIRONMENTS,
            ENVIRONMENT_MEMBERS,
            GRANTS,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Process groups ─────────────────────────────────────────────

    /// Insert a new process group together with its first binding.
    ///
    /// Both rows are written in one transaction: if the binding is rejected
    /// (duplicate, unknown environment) the group row is not persisted either.
    pub fn create_process_group(&self, group: &ProcessGroup, binding: &Binding) -> StateResult<()> {
        let value = encode(group)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut groups = txn.open_table(PROCESS_GROUPS).map_err(map_err!(Table))?;
            if groups.get(group.id.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Conflict(format!("process group {}", group.id)));
            }
            groups
                .insert(group.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let workers = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            let environments = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
            let mut bindings = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
            insert_binding_checked(&mut bindings, &groups, &workers, &environments, binding)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(group_id = %group.id, "process group stored");
        Ok(())
    }

    /// Get a process group by ID.
    pub fn get_process_group(&self, id: &str) -> StateResult<Option<ProcessGroup>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROCESS_GROUPS).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    /// List all process groups.
    pub fn list_process_groups(&self) -> StateResult<Vec<ProcessGroup>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROCESS_GROUPS).map_err(map_err!(Table))?;
        scan_rows(&table, |_| true)
    }

    /// Apply `change` to a stored process group and write it back.
    ///
    /// Returns the updated group, or `None` if no group has this ID.
    pub fn update_process_group(
        &self,
        id: &str,
        change: impl FnOnce(&mut ProcessGroup),
    ) -> StateResult<Option<ProcessGroup>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(PROCESS_GROUPS).map_err(map_err!(Table))?;
            update_row(&mut table, id, change)?
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    /// Delete a process group by ID. Returns true if it existed.
    ///
    /// Bindings referencing the group are left in place.
    pub fn delete_process_group(&self, id: &str) -> StateResult<bool> {
        let existed = self.remove_key(PROCESS_GROUPS, id)?;
        debug!(group_id = %id, existed, "process group deleted");
        Ok(existed)
    }

    // ── Workers ────────────────────────────────────────────────────

    /// Insert a new worker together with the binding attaching it to a group.
    ///
    /// Same all-or-nothing guarantee as [`StateStore::create_process_group`].
    pub fn create_worker(&self, worker: &Worker, binding: &Binding) -> StateResult<()> {
        let value = encode(worker)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut workers = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            if workers.get(worker.id.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Conflict(format!("worker {}", worker.id)));
            }
            workers
                .insert(worker.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let groups = txn.open_table(PROCESS_GROUPS).map_err(map_err!(Table))?;
            let environments = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
            let mut bindings = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
            insert_binding_checked(&mut bindings, &groups, &workers, &environments, binding)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(worker_id = %worker.id, "worker stored");
        Ok(())
    }

    /// Get a worker by ID.
    pub fn get_worker(&self, id: &str) -> StateResult<Option<Worker>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    /// List all workers.
    pub fn list_workers(&self) -> StateResult<Vec<Worker>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
        scan_rows(&table, |_| true)
    }

    /// Apply `change` to a stored worker and write it back.
    ///
    /// Returns the updated worker, or `None` if no worker has this ID.
    pub fn update_worker(
        &self,
        id: &str,
        change: impl FnOnce(&mut Worker),
    ) -> StateResult<Option<Worker>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            update_row(&mut table, id, change)?
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    /// Record a liveness ping: set the worker's status and last-ping time.
    ///
    /// Returns false if the worker is unknown.
    pub fn record_worker_ping(&self, id: &str, status: WorkerStatus, at: u64) -> StateResult<bool> {
        let updated = self.update_worker(id, |worker| {
            worker.status = status;
            worker.last_ping = Some(at);
        })?;
        Ok(updated.is_some())
    }

    /// Delete a worker by ID. Returns true if it existed.
    ///
    /// Bindings and activation keys of the worker are left in place.
    pub fn delete_worker(&self, id: &str) -> StateResult<bool> {
        let existed = self.remove_key(WORKERS, id)?;
        debug!(worker_id = %id, existed, "worker deleted");
        Ok(existed)
    }

    // ── Bindings ───────────────────────────────────────────────────

    /// Insert a binding after checking the rows it references exist.
    pub fn insert_binding(&self, binding: &Binding) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let groups = txn.open_table(PROCESS_GROUPS).map_err(map_err!(Table))?;
            let workers = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            let environments = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
            let mut bindings = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
            insert_binding_checked(&mut bindings, &groups, &workers, &environments, binding)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %binding.table_key(), "binding stored");
        Ok(())
    }

    /// Delete a single binding. Returns true if it existed.
    pub fn delete_binding(
        &self,
        environment_id: &str,
        process_group_id: &str,
        worker_id: &str,
    ) -> StateResult<bool> {
        let key = binding_key(environment_id, process_group_id, worker_id);
        let existed = self.remove_key(BINDINGS, &key)?;
        debug!(%key, existed, "binding deleted");
        Ok(existed)
    }

    /// Delete every binding of a group in an environment, with or without
    /// a worker. Returns the number deleted.
    pub fn delete_group_bindings(
        &self,
        environment_id: &str,
        process_group_id: &str,
    ) -> StateResult<u32> {
        let prefix = format!("{environment_id}/{process_group_id}/");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                let key = key.value();
                if !key.starts_with(&prefix) {
                    break;
                }
                keys.push(key.to_string());
            }
            count = keys.len() as u32;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%environment_id, %process_group_id, count, "group bindings deleted");
        Ok(count)
    }

    /// Check whether an exact binding exists.
    pub fn has_binding(
        &self,
        environment_id: &str,
        process_group_id: &str,
        worker_id: &str,
    ) -> StateResult<bool> {
        let key = binding_key(environment_id, process_group_id, worker_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
        Ok(table.get(key.as_str()).map_err(map_err!(Read))?.is_some())
    }

    /// List all bindings.
    pub fn list_bindings(&self) -> StateResult<Vec<Binding>> {
        self.bindings_where(|_| true)
    }

    /// List all bindings in an environment.
    pub fn bindings_for_environment(&self, environment_id: &str) -> StateResult<Vec<Binding>> {
        self.bindings_where(|b| b.environment_id == environment_id)
    }

    /// List all bindings of a process group, across environments.
    pub fn bindings_for_group(&self, process_group_id: &str) -> StateResult<Vec<Binding>> {
        self.bindings_where(|b| b.process_group_id == process_group_id)
    }

    /// List all bindings naming a worker, across environments and groups.
    pub fn bindings_for_worker(&self, worker_id: &str) -> StateResult<Vec<Binding>> {
        self.bindings_where(|b| b.worker_id == worker_id)
    }

    fn bindings_where(&self, keep: impl Fn(&Binding) -> bool) -> StateResult<Vec<Binding>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
        scan_rows(&table, keep)
    }

    // ── Activation keys ────────────────────────────────────────────

    /// Store an activation key for an existing worker.
    pub fn insert_activation_key(&self, key: &ActivationKey) -> StateResult<()> {
        let value = encode(key)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let workers = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            if workers.get(key.worker_id.as_str()).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::MissingReference(format!("worker {}", key.worker_id)));
            }
            let mut keys = txn.open_table(ACTIVATION_KEYS).map_err(map_err!(Table))?;
            if keys.get(key.hashed_key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Conflict(format!("activation key ...{}", key.tail)));
            }
            keys.insert(key.hashed_key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(worker_id = %key.worker_id, tail = %key.tail, "activation key stored");
        Ok(())
    }

    /// Get an activation key by its digest.
    pub fn get_activation_key(&self, hashed_key: &str) -> StateResult<Option<ActivationKey>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACTIVATION_KEYS).map_err(map_err!(Table))?;
        read_row(&table, hashed_key)
    }

    /// List the activation keys issued to a worker.
    pub fn activation_keys_for_worker(&self, worker_id: &str) -> StateResult<Vec<ActivationKey>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACTIVATION_KEYS).map_err(map_err!(Table))?;
        scan_rows(&table, |k: &ActivationKey| k.worker_id == worker_id)
    }

    /// Delete an activation key by its digest. Returns true if it existed.
    pub fn delete_activation_key(&self, hashed_key: &str) -> StateResult<bool> {
        Ok(self.take_activation_key(hashed_key)?.is_some())
    }

    /// Remove an activation key and return it.
    pub fn take_activation_key(&self, hashed_key: &str) -> StateResult<Option<ActivationKey>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let taken = {
            let mut table = txn.open_table(ACTIVATION_KEYS).map_err(map_err!(Table))?;
            match table.remove(hashed_key).map_err(map_err!(Write))? {
                Some(guard) => Some(decode::<ActivationKey>(guard.value())?),
                None => None,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(taken)
    }

    // ── Environments ───────────────────────────────────────────────

    /// Insert or update an environment.
    ///
    /// The id becomes a segment of binding and membership keys, so it must be
    /// non-empty and free of the key separator.
    pub fn put_environment(&self, environment: &Environment) -> StateResult<()> {
        check_key_segment("environment id", &environment.id)?;
        self.put_row(ENVIRONMENTS, &environment.id, environment)?;
        debug!(environment_id = %environment.id, "environment stored");
        Ok(())
    }

    /// Get an environment by ID.
    pub fn get_environment(&self, id: &str) -> StateResult<Option<Environment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    /// List all environments.
    pub fn list_environments(&self) -> StateResult<Vec<Environment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
        scan_rows(&table, |_| true)
    }

    /// Add a user to an existing environment.
    pub fn add_environment_member(&self, environment_id: &str, user_id: &str) -> StateResult<()> {
        check_key_segment("user id", user_id)?;
        let member = EnvironmentMember {
            environment_id: environment_id.to_string(),
            user_id: user_id.to_string(),
        };
        let key = member.table_key();
        let value = encode(&member)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let environments = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
            if environments.get(environment_id).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::MissingReference(format!(
                    "environment {environment_id}"
                )));
            }
            let mut members = txn.open_table(ENVIRONMENT_MEMBERS).map_err(map_err!(Table))?;
            members
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%environment_id, %user_id, "environment member added");
        Ok(())
    }

    /// Remove a user from an environment. Returns true if they were a member.
    pub fn remove_environment_member(&self, environment_id: &str, user_id: &str) -> StateResult<bool> {
        self.remove_key(ENVIRONMENT_MEMBERS, &format!("{environment_id}/{user_id}"))
    }

    /// Whether a user belongs to an environment.
    pub fn is_environment_member(&self, environment_id: &str, user_id: &str) -> StateResult<bool> {
        let key = format!("{environment_id}/{user_id}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENVIRONMENT_MEMBERS).map_err(map_err!(Table))?;
        Ok(table.get(key.as_str()).map_err(map_err!(Read))?.is_some())
    }

    /// IDs of every environment the user belongs to.
    pub fn environments_for_user(&self, user_id: &str) -> StateResult<Vec<EnvironmentId>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENVIRONMENT_MEMBERS).map_err(map_err!(Table))?;
        let members: Vec<EnvironmentMember> =
            scan_rows(&table, |m: &EnvironmentMember| m.user_id == user_id)?;
        Ok(members.into_iter().map(|m| m.environment_id).collect())
    }

    // ── Grants ─────────────────────────────────────────────────────

    /// Insert or replace a permission grant.
    pub fn put_grant(&self, grant: &Grant) -> StateResult<()> {
        self.put_row(GRANTS, &grant.table_key(), grant)
    }

    /// Look up the grant a subject holds on a resource in an environment.
    pub fn get_grant(
        &self,
        subject_id: &str,
        resource: &str,
        resource_id: &str,
        environment_id: &str,
    ) -> StateResult<Option<Grant>> {
        let key = grant_key(subject_id, resource, resource_id, environment_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(GRANTS).map_err(map_err!(Table))?;
        read_row(&table, &key)
    }

    /// Delete a grant. Returns true if it existed.
    pub fn delete_grant(
        &self,
        subject_id: &str,
        resource: &str,
        resource_id: &str,
        environment_id: &str,
    ) -> StateResult<bool> {
        let key = grant_key(subject_id, resource, resource_id, environment_id);
        self.remove_key(GRANTS, &key)
    }

    // ── Shared helpers ─────────────────────────────────────────────

    fn put_row<T: Serialize>(
        &self,
        definition: RowDefinition,
        key: &str,
        row: &T,
    ) -> StateResult<()> {
        let value = encode(row)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(definition).map_err(map_err!(Table))?;
            table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn remove_key(&self, definition: RowDefinition, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(definition).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}

/// Insert a binding inside an open write transaction.
///
/// Fails with `MissingReference` if the environment, group or (non-empty)
/// worker does not exist, and with `Conflict` if the triple is already bound.
fn insert_binding_checked(
    bindings: &mut RowTable<'_>,
    groups: &impl ReadableTable<&'static str, &'static [u8]>,
    workers: &impl ReadableTable<&'static str, &'static [u8]>,
    environments: &impl ReadableTable<&'static str, &'static [u8]>,
    binding: &Binding,
) -> StateResult<()> {
    if environments
        .get(binding.environment_id.as_str())
        .map_err(map_err!(Read))?
        .is_none()
    {
        return Err(StateError::MissingReference(format!(
            "environment {}",
            binding.environment_id
        )));
    }
    if groups
        .get(binding.process_group_id.as_str())
        .map_err(map_err!(Read))?
        .is_none()
    {
        return Err(StateError::MissingReference(format!(
            "process group {}",
            binding.process_group_id
        )));
    }
    if binding.has_worker()
        && workers
            .get(binding.worker_id.as_str())
            .map_err(map_err!(Read))?
            .is_none()
    {
        return Err(StateError::MissingReference(format!(
            "worker {}",
            binding.worker_id
        )));
    }

    let key = binding.table_key();
    if bindings.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
        return Err(StateError::Conflict(format!("binding {key}")));
    }
    let value = encode(binding)?;
    bindings
        .insert(key.as_str(), value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn check_key_segment(what: &str, segment: &str) -> StateResult<()> {
    if segment.is_empty() || segment.contains(KEY_SEPARATOR) {
        return Err(StateError::InvalidKey(format!(
            "{what} must be non-empty and must not contain '{KEY_SEPARATOR}'"
        )));
    }
    Ok(())
}

fn update_row<T: Serialize + DeserializeOwned>(
    table: &mut RowTable<'_>,
    key: &str,
    change: impl FnOnce(&mut T),
) -> StateResult<Option<T>> {
    let Some(mut row) = read_row::<T>(&*table, key)? else {
        return Ok(None);
    };
    change(&mut row);
    let value = encode(&row)?;
    table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
    Ok(Some(row))
}

fn read_row<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StateResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn scan_rows<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    keep: impl Fn(&T) -> bool,
) -> StateResult<Vec<T>> {
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let row: T = decode(value.value())?;
        if keep(&row) {
            results.push(row);
        }
    }
    Ok(results)
}

fn encode<T: Serialize>(row: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(row).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_group(id: &str) -> ProcessGroup {
        ProcessGroup {
            id: id.to_string(),
            name: format!("{id}-name"),
            description: String::new(),
            language: "python".to_string(),
            packages: String::new(),
            lb: String::new(),
            worker_type: String::new(),
            active: true,
        }
    }

    fn test_worker(id: &str) -> Worker {
        Worker {
            id: id.to_string(),
            name: format!("{id}-name"),
            description: String::new(),
            status: WorkerStatus::Offline,
            lb: String::new(),
            worker_type: String::new(),
            active: true,
            last_ping: None,
        }
    }

    fn store_with_envs(envs: &[&str]) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        for env in envs {
            store
                .put_environment(&Environment {
                    id: env.to_string(),
                    name: format!("{env}-name"),
                })
                .unwrap();
        }
        store
    }

    // ── Process groups ─────────────────────────────────────────────

    #[test]
    fn group_create_and_get() {
        let store = store_with_envs(&["env-1"]);
        let group = test_group("pg-1");

        store
            .create_process_group(&group, &Binding::group("env-1", "pg-1"))
            .unwrap();

        assert_eq!(store.get_process_group("pg-1").unwrap(), Some(group));
        assert!(store.has_binding("env-1", "pg-1", "").unwrap());
    }

    #[test]
    fn group_create_rolls_back_when_binding_rejected() {
        let store = store_with_envs(&[]);

        let err = store
            .create_process_group(&test_group("pg-1"), &Binding::group("missing", "pg-1"))
            .unwrap_err();

        assert!(matches!(err, StateError::MissingReference(_)));
        assert!(store.get_process_group("pg-1").unwrap().is_none());
        assert!(store.list_bindings().unwrap().is_empty());
    }

    #[test]
    fn group_create_duplicate_id_conflicts() {
        let store = store_with_envs(&["env-1"]);
        store
            .create_process_group(&test_group("pg-1"), &Binding::group("env-1", "pg-1"))
            .unwrap();

        let err = store
            .create_process_group(&test_group("pg-1"), &Binding::group("env-1", "pg-1"))
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
    }

    #[test]
    fn group_update_in_place() {
        let store = store_with_envs(&["env-1"]);
        store
            .create_process_group(&test_group("pg-1"), &Binding::group("env-1", "pg-1"))
            .unwrap();

        let updated = store
            .update_process_group("pg-1", |g| {
                g.packages = "pandas".to_string();
                g.active = false;
            })
            .unwrap()
            .unwrap();
        assert_eq!(updated.packages, "pandas");

        let stored = store.get_process_group("pg-1").unwrap().unwrap();
        assert!(!stored.active);
        assert!(store.update_process_group("nope", |_| {}).unwrap().is_none());
    }

    #[test]
    fn group_delete_leaves_bindings() {
        let store = store_with_envs(&["env-1"]);
        store
            .create_process_group(&test_group("pg-1"), &Binding::group("env-1", "pg-1"))
            .unwrap();

        assert!(store.delete_process_group("pg-1").unwrap());
        assert!(!store.delete_process_group("pg-1").unwrap());
        assert_eq!(store.bindings_for_group("pg-1").unwrap().len(), 1);
    }

    // ── Workers ────────────────────────────────────────────────────

    #[test]
    fn worker_create_rolls_back_when_group_missing() {
        let store = store_with_envs(&["env-1"]);

        let err = store
            .create_worker(&test_worker("w-1"), &Binding::worker("env-1", "pg-x", "w-1"))
            .unwrap_err();

        assert!(matches!(err, StateError::MissingReference(_)));
        assert!(store.get_worker("w-1").unwrap().is_none());
    }

    #[test]
    fn worker_ping_updates_status() {
        let store = store_with_envs(&["env-1"]);
        store
            .create_process_group(&test_group("pg-1"), &Binding::group("env-1", "pg-1"))
            .unwrap();
        store
            .create_worker(&test_worker("w-1"), &Binding::worker("env-1", "pg-1", "w-1"))
            .unwrap();

        assert!(store.record_worker_ping("w-1", WorkerStatus::Online, 1700).unwrap());
        assert!(!store.record_worker_ping("w-2", WorkerStatus::Online, 1700).unwrap());

        let worker = store.get_worker("w-1").unwrap().unwrap();
        assert_eq!(worker.status, WorkerStatus::Online);
        assert_eq!(worker.last_ping, Some(1700));
    }

    // ── Bindings ───────────────────────────────────────────────────

    #[test]
    fn binding_duplicate_conflicts_and_keeps_one_row() {
        let store = store_with_envs(&["env-1", "env-2"]);
        store
            .create_process_group(&test_group("pg-1"), &Binding::group("env-1", "pg-1"))
            .unwrap();

        store.insert_binding(&Binding::group("env-2", "pg-1")).unwrap();
        let err = store.insert_binding(&Binding::group("env-2", "pg-1")).unwrap_err();

        assert!(matches!(err, StateError::Conflict(_)));
        assert_eq!(store.bindings_for_environment("env-2").unwrap().len(), 1);
    }

    #[test]
    fn delete_group_bindings_scoped_to_pair() {
        let store = store_with_envs(&["env-1", "env-2"]);
        store
            .create_process_group(&test_group("pg-1"), &Binding::group("env-1", "pg-1"))
            .unwrap();
        store
            .create_worker(&test_worker("w-1"), &Binding::worker("env-1", "pg-1", "w-1"))
            .unwrap();
        store.insert_binding(&Binding::group("env-2", "pg-1")).unwrap();

        assert_eq!(store.delete_group_bindings("env-1", "pg-1").unwrap(), 2);
        assert_eq!(store.delete_group_bindings("env-1", "pg-1").unwrap(), 0);
        // env-2 untouched
        assert_eq!(store.bindings_for_group("pg-1").unwrap().len(), 1);
    }

    #[test]
    fn delete_group_bindings_ignores_neighbouring_keys() {
        let store = store_with_envs(&["env-1"]);
        for id in ["pg-1", "pg-10", "pg-2"] {
            store
                .create_process_group(&test_group(id), &Binding::group("env-1", id))
                .unwrap();
        }
        store
            .create_worker(&test_worker("w-1"), &Binding::worker("env-1", "pg-1", "w-1"))
            .unwrap();
        store
            .create_worker(&test_worker("w-2"), &Binding::worker("env-1", "pg-10", "w-2"))
            .unwrap();

        assert_eq!(store.delete_group_bindings("env-1", "pg-1").unwrap(), 2);

        let remaining: Vec<String> = store
            .bindings_for_environment("env-1")
            .unwrap()
            .iter()
            .map(Binding::table_key)
            .collect();
        assert_eq!(remaining, vec!["env-1/pg-10/", "env-1/pg-10/w-2", "env-1/pg-2/"]);
    }

    #[test]
    fn bindings_for_worker_across_environments() {
        let store = store_with_envs(&["env-1", "env-2"]);
        store
            .create_process_group(&test_group("pg-1"), &Binding::group("env-1", "pg-1"))
            .unwrap();
        store
            .create_worker(&test_worker("w-1"), &Binding::worker("env-1", "pg-1", "w-1"))
            .unwrap();
        store
            .insert_binding(&Binding::worker("env-2", "pg-1", "w-1"))
            .unwrap();

        assert_eq!(store.bindings_for_worker("w-1").unwrap().len(), 2);
        assert!(store.delete_binding("env-2", "pg-1", "w-1").unwrap());
        assert!(!store.delete_binding("env-2", "pg-1", "w-1").unwrap());
    }

    // ── Activation keys ────────────────────────────────────────────

    #[test]
    fn activation_key_requires_worker() {
        let store = store_with_envs(&[]);
        let key = ActivationKey {
            hashed_key: "abc".to_string(),
            tail: "5678".to_string(),
            worker_id: "w-1".to_string(),
            expires_at: None,
        };

        let err = store.insert_activation_key(&key).unwrap_err();
        assert!(matches!(err, StateError::MissingReference(_)));
    }

    #[test]
    fn activation_key_take_removes() {
        let store = store_with_envs(&["env-1"]);
        store
            .create_process_group(&test_group("pg-1"), &Binding::group("env-1", "pg-1"))
            .unwrap();
        store
            .create_worker(&test_worker("w-1"), &Binding::worker("env-1", "pg-1", "w-1"))
            .unwrap();
        let key = ActivationKey {
            hashed_key: "abc".to_string(),
            tail: "5678".to_string(),
            worker_id: "w-1".to_string(),
            expires_at: Some(2000),
        };

        store.insert_activation_key(&key).unwrap();
        assert_eq!(store.activation_keys_for_worker("w-1").unwrap().len(), 1);
        assert_eq!(store.take_activation_key("abc").unwrap(), Some(key));
        assert!(!store.delete_activation_key("abc").unwrap());
    }

    // ── Environments and grants ────────────────────────────────────

    #[test]
    fn membership_requires_environment() {
        let store = store_with_envs(&["env-1"]);

        store.add_environment_member("env-1", "alice").unwrap();
        assert!(store.is_environment_member("env-1", "alice").unwrap());
        assert_eq!(store.environments_for_user("alice").unwrap(), vec!["env-1"]);

        let err = store.add_environment_member("env-9", "alice").unwrap_err();
        assert!(matches!(err, StateError::MissingReference(_)));

        assert!(store.remove_environment_member("env-1", "alice").unwrap());
        assert!(store.environments_for_user("alice").unwrap().is_empty());
    }

    #[test]
    fn environment_ids_must_be_key_segments() {
        let store = store_with_envs(&[]);
        for bad in ["", "prod/eu"] {
            let err = store
                .put_environment(&Environment {
                    id: bad.to_string(),
                    name: "bad".to_string(),
                })
                .unwrap_err();
            assert!(matches!(err, StateError::InvalidKey(_)), "{bad}");
        }
        assert!(store.list_environments().unwrap().is_empty());

        store
            .put_environment(&Environment {
                id: "env-1".to_string(),
                name: "Development".to_string(),
            })
            .unwrap();
        let err = store.add_environment_member("env-1", "a/b").unwrap_err();
        assert!(matches!(err, StateError::InvalidKey(_)));
    }

    #[test]
    fn grant_put_and_get() {
        let store = store_with_envs(&[]);
        let grant = Grant {
            subject_id: "alice".to_string(),
            resource: "admin_environment".to_string(),
            resource_id: "env-1".to_string(),
            environment_id: "env-1".to_string(),
            access: Access::Write,
        };

        store.put_grant(&grant).unwrap();
        let found = store
            .get_grant("alice", "admin_environment", "env-1", "env-1")
            .unwrap();
        assert_eq!(found, Some(grant));
        assert!(store.delete_grant("alice", "admin_environment", "env-1", "env-1").unwrap());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store
                .put_environment(&Environment {
                    id: "env-1".to_string(),
                    name: "Development".to_string(),
                })
                .unwrap();
            store
                .create_process_group(&test_group("pg-1"), &Binding::group("env-1", "pg-1"))
                .unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let group = store.get_process_group("pg-1").unwrap();
        assert_eq!(group.unwrap().name, "pg-1-name");
        assert_eq!(store.list_bindings().unwrap().len(), 1);
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_process_groups().unwrap().is_empty());
        assert!(store.list_workers().unwrap().is_empty());
        assert!(store.list_bindings().unwrap().is_empty());
        assert!(store.list_environments().unwrap().is_empty());
        assert!(!store.delete_process_group("nope").unwrap());
        assert!(!store.delete_worker("nope").unwrap());
        assert!(!store.delete_binding("a", "b", "").unwrap());
        assert_eq!(store.delete_group_bindings("a", "b").unwrap(), 0);
    }
}
