//! fleetgrid-state — embedded registry store for remote worker fleets.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for process groups, workers, their environment bindings, and
//! worker activation keys, plus the environments, memberships and grants
//! the registry scopes them by.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Bindings use the composite key `{environment}/{group}/{worker}`, which
//! makes the triple unique and lets related rows be found by prefix scan.
//!
//! Every operation that touches more than one table runs inside a single
//! redb write transaction. A transaction that is dropped without commit is
//! aborted, so an early `?` return leaves nothing behind.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
