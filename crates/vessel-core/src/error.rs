//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] vessel_storage::StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] vessel_fetch::FetchError),

    #[error("Bus error: {0}")]
    Bus(#[from] vessel_bus::BusError),

    #[error("Status error: {0}")]
    Status(#[from] vessel_status::StatusError),

    #[error("Update error: {0}")]
    Update(#[from] vessel_updater::UpdateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
