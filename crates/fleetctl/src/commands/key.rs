//! `fleetctl key` — worker activation keys.

use anyhow::Result;
use clap::Subcommand;
use serde_json::json;

use fleetgrid_registry::credentials::epoch_secs;

use super::{print_json, Context};

#[derive(Subcommand)]
pub enum KeyAction {
    /// Issue an activation key for a worker
    Issue {
        #[arg(long)]
        env: String,
        #[arg(long)]
        worker: String,
        /// Clear key, e.g. ABCD-1234-EFGH-5678
        key: String,
        /// Seconds until the key expires
        #[arg(long)]
        expires_in: Option<u64>,
    },
    /// Revoke an activation key
    Revoke {
        #[arg(long)]
        env: String,
        key: String,
    },
    /// List a worker's activation keys
    List {
        #[arg(long)]
        env: String,
        #[arg(long)]
        worker: String,
    },
    /// Redeem an activation key as the worker would on first contact
    Redeem {
        key: String,
    },
}

pub fn run(ctx: &Context, action: KeyAction) -> Result<()> {
    let registry = &ctx.registry;
    let caller = &ctx.caller;
    match action {
        KeyAction::Issue {
            env,
            worker,
            key,
            expires_in,
        } => {
            let expires_at = expires_in.map(|secs| epoch_secs().saturating_add(secs));
            let tail = registry.issue_activation_key(caller, &env, &worker, &key, expires_at)?;
            print_json(&json!({ "worker_id": worker, "tail": tail, "expires_at": expires_at }))
        }
        KeyAction::Revoke { env, key } => {
            registry.revoke_activation_key(caller, &env, &key)?;
            print_json(&json!({ "revoked": true }))
        }
        KeyAction::List { env, worker } => {
            print_json(&registry.list_activation_keys(caller, &env, &worker)?)
        }
        KeyAction::Redeem { key } => {
            let worker_id = registry.redeem_activation_key(&key, epoch_secs())?;
            print_json(&json!({ "worker_id": worker_id }))
        }
    }
}
