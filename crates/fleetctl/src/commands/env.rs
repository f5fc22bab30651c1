//! `fleetctl env` and `fleetctl grant` — seed environments, memberships and
//! permission grants.
//!
//! These write straight to the store and are not permission gated; they are
//! the bootstrap path for a fresh registry.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::json;
use tracing::info;

use fleetgrid_state::{Access, Environment, Grant};

use super::{print_json, Context};

#[derive(Subcommand)]
pub enum EnvAction {
    /// Register an environment (or rename an existing one)
    Add {
        id: String,
        name: String,
    },
    /// List environments
    List,
    /// Add a user to an environment
    Member {
        env: String,
        user: String,
        /// Remove the membership instead
        #[arg(long)]
        remove: bool,
    },
}

#[derive(Args)]
pub struct GrantArgs {
    /// User the grant applies to
    pub subject: String,
    /// Resource name, e.g. environment_edit_remote_workers
    pub resource: String,
    /// Resource id (default: the environment id)
    #[arg(long)]
    pub resource_id: Option<String>,
    /// Environment scope of the grant
    #[arg(long, default_value = "d_platform")]
    pub env: String,
    /// read or write
    #[arg(long, default_value = "write")]
    pub access: Access,
    /// Revoke the grant instead
    #[arg(long)]
    pub revoke: bool,
}

pub fn run(ctx: &Context, action: EnvAction) -> Result<()> {
    let state = ctx.registry.state();
    match action {
        EnvAction::Add { id, name } => {
            let environment = Environment { id, name };
            state.put_environment(&environment)?;
            info!(environment_id = %environment.id, "environment registered");
            print_json(&environment)
        }
        EnvAction::List => {
            let mut environments = state.list_environments()?;
            environments.sort_by(|a, b| a.id.cmp(&b.id));
            print_json(&environments)
        }
        EnvAction::Member { env, user, remove } => {
            if remove {
                let removed = state.remove_environment_member(&env, &user)?;
                print_json(&json!({ "environment_id": env, "user_id": user, "removed": removed }))
            } else {
                state.add_environment_member(&env, &user)?;
                print_json(&json!({ "environment_id": env, "user_id": user }))
            }
        }
    }
}

pub fn grant(ctx: &Context, args: GrantArgs) -> Result<()> {
    let state = ctx.registry.state();
    let resource_id = args.resource_id.unwrap_or_else(|| args.env.clone());

    if args.revoke {
        let removed = state.delete_grant(&args.subject, &args.resource, &resource_id, &args.env)?;
        return print_json(&json!({ "revoked": removed }));
    }

    let grant = Grant {
        subject_id: args.subject,
        resource: args.resource,
        resource_id,
        environment_id: args.env,
        access: args.access,
    };
    state.put_grant(&grant)?;
    info!(subject = %grant.subject_id, resource = %grant.resource, "grant stored");
    print_json(&grant)
}
