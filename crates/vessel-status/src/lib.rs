//! Vessel Status Sync
//!
//! Two ways live state reaches a view:
//! - [`StatusMonitor`] polls a source and pushes a snapshot only when it
//!   differs from the last one sent to that view
//! - [`Debouncer`] coalesces bursts of changes, with an immediate path for
//!   states that must never wait ([`VoiceTracker`] uses it for speaking)

mod debounce;
mod error;
mod monitor;
mod snapshot;
mod tray;
mod voice;

pub use debounce::Debouncer;
pub use error::StatusError;
pub use monitor::{StatusMonitor, StatusSource};
pub use snapshot::SnapshotGate;
pub use tray::{IconSink, TrayIndicator};
pub use voice::{BusVoiceSink, TrayVariant, VoiceEvent, VoiceSink, VoiceTracker};

pub type Result<T> = std::result::Result<T, StatusError>;
