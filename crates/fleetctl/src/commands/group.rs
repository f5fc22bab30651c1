//! `fleetctl group` — process group lifecycle and environment bindings.

use anyhow::{anyhow, Result};
use clap::Subcommand;
use serde_json::json;

use fleetgrid_registry::ProcessGroupUpdate;

use super::{print_json, Context};

#[derive(Subcommand)]
pub enum GroupAction {
    /// Create a process group
    Create {
        /// Environment the request is scoped to
        #[arg(long)]
        env: String,
        /// Environment to bind the new group in (default: --env)
        #[arg(long)]
        bind_env: Option<String>,
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Change a process group's settings
    Update {
        #[arg(long)]
        env: String,
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        packages: Option<String>,
        #[arg(long)]
        active: Option<bool>,
    },
    /// Delete a process group
    Delete {
        #[arg(long)]
        env: String,
        id: String,
    },
    /// Make a process group available in an environment
    Bind {
        #[arg(long)]
        env: String,
        id: String,
        /// Bind a specific worker
        #[arg(long, default_value = "")]
        worker: String,
    },
    /// Remove a process group from an environment
    Unbind {
        #[arg(long)]
        env: String,
        id: String,
    },
    /// List process groups bound to an environment
    List {
        #[arg(long)]
        env: String,
        /// List groups across every environment you belong to
        #[arg(long)]
        all: bool,
    },
    /// Show one process group
    Show {
        #[arg(long)]
        env: String,
        id: String,
    },
    /// List the environments a process group is bound to
    Environments {
        #[arg(long)]
        env: String,
        id: String,
    },
}

pub fn run(ctx: &Context, action: GroupAction) -> Result<()> {
    let registry = &ctx.registry;
    let caller = &ctx.caller;
    match action {
        GroupAction::Create {
            env,
            bind_env,
            name,
            description,
        } => {
            let bind_env = bind_env.unwrap_or_else(|| env.clone());
            let id = registry.create_process_group(caller, &env, &bind_env, &name, &description)?;
            print_json(&json!({ "id": id }))
        }
        GroupAction::Update {
            env,
            id,
            name,
            description,
            language,
            packages,
            active,
        } => {
            let update = ProcessGroupUpdate {
                name,
                description,
                language,
                packages,
                active,
            };
            let group = registry.update_process_group(caller, &env, &id, update)?;
            print_json(&group)
        }
        GroupAction::Delete { env, id } => {
            registry.delete_process_group(caller, &env, &id)?;
            print_json(&json!({ "deleted": id }))
        }
        GroupAction::Bind { env, id, worker } => {
            registry.bind_group_to_environment(caller, &env, &id, &worker)?;
            print_json(&json!({ "environment_id": env, "process_group_id": id, "worker_id": worker }))
        }
        GroupAction::Unbind { env, id } => {
            let removed = registry.unbind_group_from_environment(caller, &env, &id)?;
            print_json(&json!({ "removed": removed }))
        }
        GroupAction::List { env, all } => {
            if all {
                print_json(&registry.list_process_groups(caller, &env)?)
            } else {
                print_json(&registry.list_process_groups_for_environment(caller, &env)?)
            }
        }
        GroupAction::Show { env, id } => {
            let group = registry
                .get_process_group(caller, &env, &id)?
                .ok_or_else(|| anyhow!("process group {id} not found in environment {env}"))?;
            print_json(&group)
        }
        GroupAction::Environments { env, id } => {
            print_json(&registry.list_group_environments(caller, &env, &id)?)
        }
    }
}
