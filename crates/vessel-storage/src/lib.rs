//! Vessel Storage Layer
//!
//! SQLite-backed key/value settings that survive process restarts.
//! The core process owns the only connection.

mod database;
mod error;
mod migrations;

pub use database::Database;
pub use error::StorageError;

pub type Result<T> = std::result::Result<T, StorageError>;
