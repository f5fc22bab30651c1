//! fleetgrid-registry — registry of remote worker fleets.
//!
//! Manages process groups, the remote workers that serve them, the
//! environment bindings that make a group available in an environment, and
//! the one-time activation keys workers present on first contact.
//!
//! # Architecture
//!
//! ```text
//! Registry
//!   ├── PermissionGate (every mutation and gated read)
//!   ├── StateStore (transactional writes, projection scans)
//!   └── ChangeNotifier ──mpsc──▶ Dispatcher task
//!                                  ├── load group snapshot
//!                                  ├── select online + active bound workers
//!                                  └── WorkerTransport::deliver (concurrent)
//! ```
//!
//! # Notifications
//!
//! Mutations that change a group's configuration or membership enqueue the
//! group id after their transaction commits. Delivery is best effort: a full
//! queue or an unreachable worker is logged and never fails the mutation.

pub mod config;
pub mod credentials;
pub mod error;
pub mod notifier;
pub mod permissions;
pub mod projections;
pub mod registry;

pub use config::{ConfigError, FleetConfig};
pub use error::{ErrorKind, RegistryError, RegistryResult};
pub use notifier::{ChangeNotifier, ConnectionHub, Dispatcher, GroupUpdate, WorkerTransport};
pub use permissions::{Caller, Decision, PermissionCheck, PermissionGate, StoreGate};
pub use projections::{ActivationKeyView, ProcessGroupWithEnvironments, WorkerProcessGroup};
pub use registry::{ProcessGroupUpdate, Registry, WorkerUpdate};
