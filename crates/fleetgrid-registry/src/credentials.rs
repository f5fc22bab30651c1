//! Activation key issuing.
//!
//! Clear keys look like `ABCD-1234-EFGH-5678`. Only the SHA-256 digest is
//! persisted; the fourth segment is kept as a display tail.

use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use fleetgrid_state::ActivationKey;

use crate::error::{RegistryError, RegistryResult};

/// Hex SHA-256 digest of a clear activation key.
pub fn hash_activation_key(clear_key: &str) -> String {
    hex::encode(Sha256::digest(clear_key.as_bytes()))
}

/// Display tail: the fourth dash-delimited segment of the clear key.
pub fn activation_key_tail(clear_key: &str) -> RegistryResult<String> {
    match clear_key.split('-').nth(3) {
        Some(tail) if !tail.is_empty() => Ok(tail.to_string()),
        _ => Err(RegistryError::Validation(
            "activation key must have at least four dash-separated segments".to_string(),
        )),
    }
}

/// Build the stored form of a clear activation key.
pub fn new_activation_key(
    worker_id: &str,
    clear_key: &str,
    expires_at: Option<u64>,
) -> RegistryResult<ActivationKey> {
    let tail = activation_key_tail(clear_key)?;
    Ok(ActivationKey {
        hashed_key: hash_activation_key(clear_key),
        tail,
        worker_id: worker_id.to_string(),
        expires_at,
    })
}

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
