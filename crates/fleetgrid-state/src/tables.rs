//! redb table definitions for the registry store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Process groups keyed by `{process_group_id}`.
pub const PROCESS_GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("process_groups");

/// Workers keyed by `{worker_id}`.
pub const WORKERS: TableDefinition<&str, &[u8]> = TableDefinition::new("workers");

/// Group/environment/worker bindings keyed by `{environment_id}/{process_group_id}/{worker_id}`.
/// The worker segment is empty for a group-only binding.
pub const BINDINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("bindings");

/// Activation keys keyed by the hex SHA-256 of the clear key.
pub const ACTIVATION_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("activation_keys");

/// Environments keyed by `{environment_id}`.
pub const ENVIRONMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("environments");

/// Environment membership keyed by `{environment_id}/{user_id}`.
pub const ENVIRONMENT_MEMBERS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("environment_members");

/// Permission grants keyed by `{subject_id}/{resource}/{resource_id}/{environment_id}`.
pub const GRANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("grants");
