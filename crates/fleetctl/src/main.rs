//! fleetctl — operator CLI for the fleetgrid registry.
//!
//! Opens the registry database directly, runs one command on behalf of
//! `--user`, prints the result as JSON and exits. Group change
//! notifications raised by the command are dispatched before exit.
//!
//! # Usage
//!
//! ```text
//! fleetctl env add E1 Development
//! fleetctl grant admin admin_platform --resource-id platform-1 --env d_platform
//! fleetctl --user admin group create --env E1 etl
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{debug, info};

use fleetgrid_registry::{
    Caller, ChangeNotifier, ConnectionHub, Dispatcher, FleetConfig, Registry, StoreGate,
};
use fleetgrid_state::StateStore;

mod commands;

use commands::Context;

const DEFAULT_DB: &str = "fleetgrid.redb";

#[derive(Parser)]
#[command(
    name = "fleetctl",
    about = "fleetgrid — remote worker fleet registry",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Registry database file. Overrides [store].path from the config.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to fleetgrid.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// User the command runs on behalf of.
    #[arg(long, global = true, default_value = "admin")]
    user: String,

    /// Platform id for platform-admin checks. Overrides [registry].platform_id.
    #[arg(long, global = true)]
    platform: Option<String>,

    /// Verbose logging, including raw storage errors.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage environments and their members
    Env {
        #[command(subcommand)]
        action: commands::env::EnvAction,
    },
    /// Grant or revoke a permission
    Grant(commands::env::GrantArgs),
    /// Manage process groups
    Group {
        #[command(subcommand)]
        action: commands::group::GroupAction,
    },
    /// Manage remote workers
    Worker {
        #[command(subcommand)]
        action: commands::worker::WorkerAction,
    },
    /// Manage worker activation keys
    Key {
        #[command(subcommand)]
        action: commands::key::KeyAction,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug { "fleetctl=debug,fleetgrid=debug" } else { "fleetctl=info,fleetgrid=info" };
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in default_directive.split(',') {
        filter = filter.add_directive(directive.parse()?);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => FleetConfig::from_file(path)?,
        None => FleetConfig::default(),
    };
    if cli.debug {
        config.registry.debug = true;
    }
    if let Some(platform) = cli.platform {
        config.registry.platform_id = platform;
    }

    let db_path = cli
        .db
        .or_else(|| config.store.path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB));
    let state = StateStore::open(&db_path)
        .with_context(|| format!("failed to open registry database {}", db_path.display()))?;
    debug!(path = ?db_path, "registry database opened");

    // ── Registry and notifier ──────────────────────────────────

    let (notifier, queue) = ChangeNotifier::channel(config.notifier.queue_capacity);
    let gate = Arc::new(StoreGate::new(state.clone()));
    let registry = Registry::new(state.clone(), gate, notifier).with_config(config.registry.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = Dispatcher::new(state, Arc::new(ConnectionHub::new()), queue);
    let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown_rx));

    let ctx = Context {
        registry,
        caller: Caller::new(cli.user, config.registry.platform_id),
    };

    let result = match cli.command {
        Commands::Env { action } => commands::env::run(&ctx, action),
        Commands::Grant(args) => commands::env::grant(&ctx, args),
        Commands::Group { action } => commands::group::run(&ctx, action),
        Commands::Worker { action } => commands::worker::run(&ctx, action),
        Commands::Key { action } => commands::key::run(&ctx, action),
    };

    // Drain queued notifications before exiting.
    let _ = shutdown_tx.send(true);
    let _ = dispatcher_handle.await;
    info!("fleetctl done");

    result
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "fleetctl", "group", "list", "--env", "E1", "--user", "bob", "--debug",
        ])
        .unwrap();
        assert_eq!(cli.user, "bob");
        assert!(cli.debug);
        assert!(matches!(cli.command, Commands::Group { .. }));
    }

    #[test]
    fn grant_access_is_parsed() {
        let cli = Cli::try_parse_from([
            "fleetctl", "grant", "bob", "environment_view_remote_workers", "--env", "E1", "--access", "read",
        ])
        .unwrap();
        let Commands::Grant(args) = cli.command else {
            panic!("expected grant command");
        };
        assert_eq!(args.access, fleetgrid_state::Access::Read);

        assert!(
            Cli::try_parse_from(["fleetctl", "grant", "bob", "x", "--access", "admin"]).is_err()
        );
    }

    #[test]
    fn commands_run_against_a_database_file() {
        use commands::env::{EnvAction, GrantArgs};
        use commands::group::GroupAction;
        use fleetgrid_registry::permissions::{resource, PLATFORM_ENVIRONMENT};

        let dir = tempfile::tempdir().unwrap();
        let state = StateStore::open(&dir.path().join("fleet.redb")).unwrap();
        let (notifier, _queue) = ChangeNotifier::channel(8);
        let gate = Arc::new(StoreGate::new(state.clone()));
        let ctx = Context {
            registry: Registry::new(state.clone(), gate, notifier),
            caller: Caller::new("admin", "platform-1"),
        };

        commands::env::run(
            &ctx,
            EnvAction::Add {
                id: "E1".to_string(),
                name: "Development".to_string(),
            },
        )
        .unwrap();
        assert!(
            commands::env::run(
                &ctx,
                EnvAction::Add {
                    id: "E1/eu".to_string(),
                    name: "bad".to_string(),
                },
            )
            .is_err()
        );

        // Denied until the platform-admin grant exists.
        let create = || GroupAction::Create {
            env: "E1".to_string(),
            bind_env: None,
            name: "etl".to_string(),
            description: String::new(),
        };
        assert!(commands::group::run(&ctx, create()).is_err());

        commands::env::grant(
            &ctx,
            GrantArgs {
                subject: "admin".to_string(),
                resource: resource::ADMIN_PLATFORM.to_string(),
                resource_id: Some("platform-1".to_string()),
                env: PLATFORM_ENVIRONMENT.to_string(),
                access: fleetgrid_state::Access::Write,
                revoke: false,
            },
        )
        .unwrap();
        commands::group::run(&ctx, create()).unwrap();

        let groups = state.list_process_groups().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "etl");
        assert!(state.has_binding("E1", &groups[0].id, "").unwrap());
    }

    #[test]
    fn worker_status_is_parsed() {
        let cli = Cli::try_parse_from([
            "fleetctl", "worker", "update", "--env", "E1", "w-1", "--status", "busy",
        ])
        .unwrap();
        let Commands::Worker { action } = cli.command else {
            panic!("expected worker command");
        };
        assert!(matches!(
            action,
            commands::worker::WorkerAction::Update {
                status: Some(fleetgrid_state::WorkerStatus::Busy),
                ..
            }
        ));

        assert!(
            Cli::try_parse_from(["fleetctl", "worker", "update", "--env", "E1", "w-1", "--status", "asleep"])
                .is_err()
        );
    }
}
