//! `fleetctl worker` — remote worker lifecycle and group membership.

use anyhow::{anyhow, Result};
use clap::Subcommand;
use serde_json::json;

use fleetgrid_registry::credentials::epoch_secs;
use fleetgrid_registry::WorkerUpdate;
use fleetgrid_state::WorkerStatus;

use super::{print_json, Context};

#[derive(Subcommand)]
pub enum WorkerAction {
    /// Create a worker in a process group
    Create {
        #[arg(long)]
        env: String,
        #[arg(long)]
        group: String,
        name: String,
    },
    /// Change a worker's settings
    Update {
        #[arg(long)]
        env: String,
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// offline, online, busy or unknown
        #[arg(long)]
        status: Option<WorkerStatus>,
        #[arg(long)]
        active: Option<bool>,
    },
    /// Delete a worker
    Delete {
        #[arg(long)]
        env: String,
        id: String,
    },
    /// Attach a worker to a process group
    Attach {
        #[arg(long)]
        env: String,
        #[arg(long)]
        group: String,
        id: String,
    },
    /// Detach a worker from a process group
    Detach {
        #[arg(long)]
        env: String,
        /// Environment of the binding to remove (default: --env)
        #[arg(long)]
        binding_env: Option<String>,
        #[arg(long)]
        group: String,
        id: String,
    },
    /// List workers bound in an environment
    List {
        #[arg(long)]
        env: String,
        #[arg(long)]
        group: Option<String>,
    },
    /// Show one worker
    Show {
        #[arg(long)]
        env: String,
        id: String,
    },
    /// List the process groups a worker belongs to
    Groups {
        #[arg(long)]
        env: String,
        id: String,
    },
    /// Record a liveness ping for a worker
    Ping {
        id: String,
        #[arg(long, default_value = "online")]
        status: WorkerStatus,
    },
}

pub fn run(ctx: &Context, action: WorkerAction) -> Result<()> {
    let registry = &ctx.registry;
    let caller = &ctx.caller;
    match action {
        WorkerAction::Create { env, group, name } => {
            let id = registry.create_worker(caller, &env, &name, &group)?;
            print_json(&json!({ "id": id }))
        }
        WorkerAction::Update {
            env,
            id,
            name,
            description,
            status,
            active,
        } => {
            let update = WorkerUpdate {
                name,
                description,
                status,
                active,
            };
            print_json(&registry.update_worker(caller, &env, &id, update)?)
        }
        WorkerAction::Delete { env, id } => {
            registry.delete_worker(caller, &env, &id)?;
            print_json(&json!({ "deleted": id }))
        }
        WorkerAction::Attach { env, group, id } => {
            registry.attach_worker_to_group(caller, &env, &group, &id)?;
            print_json(&json!({ "environment_id": env, "process_group_id": group, "worker_id": id }))
        }
        WorkerAction::Detach {
            env,
            binding_env,
            group,
            id,
        } => {
            let binding_env = binding_env.unwrap_or_else(|| env.clone());
            registry.detach_worker_from_group(caller, &env, &binding_env, &group, &id)?;
            print_json(&json!({ "detached": id }))
        }
        WorkerAction::List { env, group } => {
            print_json(&registry.list_workers(caller, &env, group.as_deref())?)
        }
        WorkerAction::Show { env, id } => {
            let worker = registry
                .get_worker(caller, &env, &id)?
                .ok_or_else(|| anyhow!("remote worker {id} not found"))?;
            print_json(&worker)
        }
        WorkerAction::Groups { env, id } => {
            print_json(&registry.list_worker_groups(caller, &env, &id)?)
        }
        WorkerAction::Ping { id, status } => {
            let at = epoch_secs();
            registry.record_worker_ping(&id, status, at)?;
            print_json(&json!({ "worker_id": id, "status": status, "last_ping": at }))
        }
    }
}
