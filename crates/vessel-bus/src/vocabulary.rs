//! Command names agreed between the core and its views.
//!
//! Bump [`VERSION`] whenever a name is added, removed or changes meaning.

pub const VERSION: u32 = 1;

// Main window
pub const NAVIGATE_SETTINGS: &str = "navigate-settings";
pub const GET_LANGUAGES: &str = "get-languages";
pub const SCREEN_SHARE_PICKER: &str = "screen-share-picker";
pub const QUERY_IS_IN_CALL: &str = "query-is-in-call";

// Updater, from any view
pub const UPDATER_IS_OUTDATED: &str = "updater-is-outdated";
pub const UPDATER_OPEN: &str = "updater-open";

// Updater window only; bound while that window exists
pub const UPDATER_GET_DATA: &str = "get-data";
pub const UPDATER_INSTALL: &str = "install";
pub const UPDATER_SNOOZE: &str = "snooze";
pub const UPDATER_IGNORE: &str = "ignore";

// Voice status reported by the main view
pub const VOICE_STATE_CHANGED: &str = "voice-state-changed";
pub const VOICE_CALL_STATE_CHANGED: &str = "voice-call-state-changed";

/// Events pushed from the core to views.
pub mod events {
    pub const DOWNLOAD_PROGRESS: &str = "download-progress";
    pub const ERROR: &str = "error";
    pub const STATUS: &str = "status";
}
