//! Bus error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Handler for command {0} already exists")]
    DuplicateHandler(String),

    /// The core answered with `ok = false`
    #[error("Command {name} failed: {message}")]
    Command { name: String, message: String },

    #[error("Failed to establish command bus transport: {0}")]
    Transport(String),

    #[error("Command bus disconnected")]
    Disconnected,

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("View {0} is not open")]
    ViewNotOpen(String),
}
