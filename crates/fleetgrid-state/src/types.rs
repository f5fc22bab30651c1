//! Domain types for the registry store.
//!
//! These types represent the persisted state of process groups, workers,
//! bindings, activation keys, and the environment/permission data the
//! registry consults. All types are serializable to/from JSON for storage
//! in redb tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a process group.
pub type ProcessGroupId = String;

/// Unique identifier for a remote worker.
pub type WorkerId = String;

/// Unique identifier for an environment.
pub type EnvironmentId = String;

/// Separator used in composite table keys.
pub const KEY_SEPARATOR: char = '/';

// ── Process group ──────────────────────────────────────────────────

/// Named grouping of remote workers sharing a runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessGroup {
    pub id: ProcessGroupId,
    pub name: String,
    pub description: String,
    /// Runtime language tag, e.g. "python".
    pub language: String,
    /// Package specification installed on every worker of the group.
    pub packages: String,
    /// Load-balancing policy.
    pub lb: String,
    pub worker_type: String,
    pub active: bool,
}

// ── Worker ─────────────────────────────────────────────────────────

/// A remote execution agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub description: String,
    pub status: WorkerStatus,
    pub lb: String,
    pub worker_type: String,
    pub active: bool,
    /// Unix timestamp (seconds) of the last liveness ping.
    pub last_ping: Option<u64>,
}

/// Connectivity status reported by a worker's liveness channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Offline,
    Online,
    Busy,
    Unknown,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Offline => "offline",
            WorkerStatus::Online => "online",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(WorkerStatus::Offline),
            "online" => Ok(WorkerStatus::Online),
            "busy" => Ok(WorkerStatus::Busy),
            "unknown" => Ok(WorkerStatus::Unknown),
            other => Err(format!("unknown worker status: {other}")),
        }
    }
}

// ── Binding ────────────────────────────────────────────────────────

/// Join record associating an environment, a process group and optionally
/// a specific worker.
///
/// An empty `worker_id` means the group is available in the environment
/// without naming a worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Binding {
    pub environment_id: EnvironmentId,
    pub worker_id: WorkerId,
    pub process_group_id: ProcessGroupId,
}

impl Binding {
    /// Binding that makes a group available in an environment.
    pub fn group(environment_id: &str, process_group_id: &str) -> Self {
        Self {
            environment_id: environment_id.to_string(),
            worker_id: String::new(),
            process_group_id: process_group_id.to_string(),
        }
    }

    /// Binding that attaches a worker to a group within an environment.
    pub fn worker(environment_id: &str, process_group_id: &str, worker_id: &str) -> Self {
        Self {
            environment_id: environment_id.to_string(),
            worker_id: worker_id.to_string(),
            process_group_id: process_group_id.to_string(),
        }
    }

    pub fn has_worker(&self) -> bool {
        !self.worker_id.is_empty()
    }

    /// Build the composite key for the bindings table.
    pub fn table_key(&self) -> String {
        binding_key(&self.environment_id, &self.process_group_id, &self.worker_id)
    }
}

/// Composite bindings key for an (environment, group, worker) triple.
pub fn binding_key(environment_id: &str, process_group_id: &str, worker_id: &str) -> String {
    format!("{environment_id}/{process_group_id}/{worker_id}")
}

// ── Activation key ─────────────────────────────────────────────────

/// A one-time credential a worker presents on first contact.
///
/// Only the digest of the clear key is stored; `tail` is the non-secret
/// fragment shown to operators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivationKey {
    /// Hex SHA-256 of the clear key.
    pub hashed_key: String,
    pub tail: String,
    pub worker_id: WorkerId,
    /// Unix timestamp (seconds) after which the key is rejected. `None` never expires.
    pub expires_at: Option<u64>,
}

impl ActivationKey {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

// ── Environments and permissions ───────────────────────────────────

/// Deployment/access scope under which groups and workers are organized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Environment {
    pub id: EnvironmentId,
    pub name: String,
}

/// A user's membership in an environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentMember {
    pub environment_id: EnvironmentId,
    pub user_id: String,
}

impl EnvironmentMember {
    /// Build the composite key for the environment members table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.environment_id, self.user_id)
    }
}

/// Access level of a permission grant or check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    Write,
}

impl Access {
    /// Whether a grant at this level satisfies a check at `required`.
    pub fn satisfies(&self, required: Access) -> bool {
        *self >= required
    }
}

impl std::str::FromStr for Access {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Access::Read),
            "write" => Ok(Access::Write),
            other => Err(format!("unknown access level: {other} (expected read or write)")),
        }
    }
}

/// A stored permission granted to a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Grant {
    pub subject_id: String,
    pub resource: String,
    pub resource_id: String,
    pub environment_id: EnvironmentId,
    pub access: Access,
}

impl Grant {
    /// Build the composite key for the grants table.
    pub fn table_key(&self) -> String {
        grant_key(
            &self.subject_id,
            &self.resource,
            &self.resource_id,
            &self.environment_id,
        )
    }
}

/// Composite grants key.
pub fn grant_key(
    subject_id: &str,
    resource: &str,
    resource_id: &str,
    environment_id: &str,
) -> String {
    format!("{subject_id}/{resource}/{resource_id}/{environment_id}")
}
