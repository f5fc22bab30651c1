//! Registry error types.
//!
//! Callers branch on [`RegistryError::kind`]; the display text is a
//! human-readable detail and never contains raw storage error output.

use thiserror::Error;
use tracing::debug;

use fleetgrid_state::StateError;

/// Category of a registry failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The permission gate denied the request. Nothing was written.
    Authorization,
    /// A delete or update matched zero rows.
    NotFound,
    /// A uniqueness constraint was violated.
    Conflict,
    /// The input was malformed or referenced rows that do not exist.
    Validation,
    /// Any other persistence failure.
    Storage,
}

/// Errors returned by registry mutations and projections.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("requires permissions")]
    Authorization,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{0} database error")]
    Storage(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Authorization => ErrorKind::Authorization,
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::Conflict(_) => ErrorKind::Conflict,
            RegistryError::Validation(_) => ErrorKind::Validation,
            RegistryError::Storage(_) => ErrorKind::Storage,
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Translate a store failure into a registry error.
///
/// Constraint failures keep their detail. Everything else collapses to a
/// `Storage` error carrying only `context`; the raw store error reaches the
/// diagnostic log when `debug` is set and is dropped otherwise.
pub(crate) fn from_state(context: &str, err: StateError, debug: bool) -> RegistryError {
    match err {
        StateError::Conflict(what) => RegistryError::Conflict(what),
        StateError::MissingReference(what) => RegistryError::Validation(format!("unknown {what}")),
        StateError::InvalidKey(what) => RegistryError::Validation(what),
        other => {
            if debug {
                debug!(%context, error = %other, "storage failure");
            }
            RegistryError::Storage(context.to_string())
        }
    }
}
