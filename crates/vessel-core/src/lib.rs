//! Vessel Core
//!
//! The privileged side of the shell. [`Shell`] owns every process-wide
//! piece of state (handler registry, view table, update cycle, tray) and
//! hands views a bus connection; nothing is shared with them otherwise.

mod config;
mod error;
mod shell;

pub use config::Config;
pub use error::CoreError;
pub use shell::{Services, Shell, STATUS_VIEW};

pub use vessel_bus::{
    vocabulary, BusClient, BusError, Command, CommandResult, HandlerRegistry, Subscription,
    ViewHost, ViewId, ViewOpen, ViewSpec, ViewTable,
};
pub use vessel_fetch::{DownloadJob, Downloaded, FetchError, FetchRequest, Fetcher, RetryPolicy};
pub use vessel_status::{
    IconSink, StatusSource, TrayIndicator, TrayVariant, VoiceEvent, VoiceSink, VoiceTracker,
};
pub use vessel_storage::{Database, StorageError};
pub use vessel_updater::{
    CheckTrigger, UpdateBackend, UpdateDecision, UpdateError, UpdateInfo, UpdateOrchestrator,
    UpdateState,
};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging. Returns false if a global subscriber was already set.
pub fn init_logging() -> bool {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
