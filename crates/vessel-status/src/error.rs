//! Status error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown tray variant: {0}")]
    UnknownVariant(String),

    #[error("No async runtime available for status timers")]
    NoRuntime,

    #[error("Bus error: {0}")]
    Bus(#[from] vessel_bus::BusError),
}
