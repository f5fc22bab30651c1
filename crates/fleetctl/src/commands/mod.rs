pub mod env;
pub mod group;
pub mod key;
pub mod worker;

use serde::Serialize;

use fleetgrid_registry::{Caller, Registry};

/// Everything a command needs: the registry and who is asking.
pub struct Context {
    pub registry: Registry,
    pub caller: Caller,
}

/// Print a command result as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
