//! Updater error types

use std::time::Duration;
use thiserror::Error;

use crate::state::UpdateState;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] vessel_fetch::FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] vessel_storage::StorageError),

    #[error("Bus error: {0}")]
    Bus(#[from] vessel_bus::BusError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed release feed: {0}")]
    Feed(String),

    #[error("Release {version} has no asset for this platform")]
    NoAsset { version: String },

    #[error("Checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to launch installer: {0}")]
    Install(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Cannot go from {from} to {to}")]
    InvalidTransition { from: UpdateState, to: UpdateState },

    #[error("Updater is shut down")]
    ShutDown,
}
