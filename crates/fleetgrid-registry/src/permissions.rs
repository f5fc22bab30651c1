//! Permission gate integration.
//!
//! The registry never evaluates permissions itself. Each operation builds a
//! set of [`PermissionCheck`] tuples and hands them to a [`PermissionGate`],
//! which answers granted or denied for the whole set.

use tracing::warn;

use fleetgrid_state::{Access, StateStore};

/// Environment id used for platform-wide checks.
pub const PLATFORM_ENVIRONMENT: &str = "d_platform";

/// Subject type of every check the registry issues.
pub const SUBJECT_USER: &str = "user";

/// Resource names understood by the permission gate.
pub mod resource {
    pub const ADMIN_PLATFORM: &str = "admin_platform";
    pub const ADMIN_ENVIRONMENT: &str = "admin_environment";
    pub const ADD_PROCESS_GROUP: &str = "environment_add_process_group";
    pub const EDIT_PROCESS_GROUPS: &str = "environment_edit_remote_process_groups";
    pub const VIEW_PROCESS_GROUPS: &str = "environment_view_remote_process_groups";
    pub const ADD_REMOTE_WORKERS: &str = "environment_add_remote_workers";
    pub const EDIT_REMOTE_WORKERS: &str = "environment_edit_remote_workers";
    pub const VIEW_REMOTE_WORKERS: &str = "environment_view_remote_workers";
}

/// Identity of the user a request is made on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub platform_id: String,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, platform_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            platform_id: platform_id.into(),
        }
    }
}

/// One (resource, access, subject, scope) tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCheck {
    pub resource: String,
    pub resource_id: String,
    pub access: Access,
    pub subject: String,
    pub subject_id: String,
    pub environment_id: String,
}

/// Outcome of a permission gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Granted,
    Denied,
}

/// Black-box permission evaluation.
///
/// Implementations grant the request if any one of the checks is satisfied.
pub trait PermissionGate: Send + Sync {
    fn decide(&self, checks: &[PermissionCheck]) -> Decision;
}

impl<F> PermissionGate for F
where
    F: Fn(&[PermissionCheck]) -> Decision + Send + Sync,
{
    fn decide(&self, checks: &[PermissionCheck]) -> Decision {
        self(checks)
    }
}

/// Build the checks for an environment-scoped operation: platform admin,
/// environment admin, and the operation's own resource.
pub fn environment_checks(
    caller: &Caller,
    environment_id: &str,
    operation_resource: &str,
    access: Access,
) -> Vec<PermissionCheck> {
    let check = |name: &str, resource_id: &str, access: Access, environment_id: &str| {
        PermissionCheck {
            resource: name.to_string(),
            resource_id: resource_id.to_string(),
            access,
            subject: SUBJECT_USER.to_string(),
            subject_id: caller.user_id.clone(),
            environment_id: environment_id.to_string(),
        }
    };
    vec![
        check(
            resource::ADMIN_PLATFORM,
            &caller.platform_id,
            Access::Write,
            PLATFORM_ENVIRONMENT,
        ),
        check(
            resource::ADMIN_ENVIRONMENT,
            environment_id,
            Access::Write,
            environment_id,
        ),
        check(operation_resource, environment_id, access, environment_id),
    ]
}

/// Permission gate backed by the grants table of the state store.
///
/// A write grant satisfies a read check. A failed lookup counts as not
/// granted.
#[derive(Clone)]
pub struct StoreGate {
    state: StateStore,
}

impl StoreGate {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }
}

impl PermissionGate for StoreGate {
    fn decide(&self, checks: &[PermissionCheck]) -> Decision {
        let granted = checks.iter().any(|check| {
            match self.state.get_grant(
                &check.subject_id,
                &check.resource,
                &check.resource_id,
                &check.environment_id,
            ) {
                Ok(Some(grant)) => grant.access.satisfies(check.access),
                Ok(None) => false,
                Err(e) => {
                    warn!(resource = %check.resource, error = %e, "grant lookup failed");
                    false
                }
            }
        });
        if granted {
            Decision::Granted
        } else {
            Decision::Denied
        }
    }
}
