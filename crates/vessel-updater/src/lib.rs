//! Vessel Update Orchestrator
//!
//! Drives one update cycle at a time through [`UpdateState`]:
//! check, surface a prompt view unless the user snoozed or ignored the
//! version, download on request and hand off to the installer.

mod backend;
mod decision;
mod error;
mod feed;
mod orchestrator;
mod state;

pub use backend::{ListenerSet, UpdateAsset, UpdateBackend, UpdateInfo};
pub use decision::UpdateDecision;
pub use error::UpdateError;
pub use feed::{is_newer, ReleaseFeedBackend};
pub use orchestrator::{CheckTrigger, UpdateOrchestrator, UpdaterSettings, UPDATER_VIEW};
pub use state::UpdateState;

pub type Result<T> = std::result::Result<T, UpdateError>;
