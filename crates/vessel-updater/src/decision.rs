//! The user's standing answer to update prompts

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use vessel_storage::Database;

use crate::Result;

const IGNORED_VERSION_KEY: &str = "updater.ignored_version";
const SNOOZE_UNTIL_KEY: &str = "updater.snooze_until";

/// Written only by explicit snooze/ignore commands, read before every prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDecision {
    pub ignored_version: Option<String>,
    pub snooze_until: Option<DateTime<Utc>>,
}

impl UpdateDecision {
    pub fn load(db: &Database) -> Result<Self> {
        let ignored_version = db.get_setting(IGNORED_VERSION_KEY)?;
        let snooze_until = match db.get_setting(SNOOZE_UNTIL_KEY)? {
            Some(raw) => match DateTime::parse_from_rfc3339(&raw) {
                Ok(at) => Some(at.with_timezone(&Utc)),
                Err(e) => {
                    tracing::warn!(value = %raw, error = %e, "Discarding unreadable snooze time");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            ignored_version,
            snooze_until,
        })
    }

    /// Writes both fields together; an unset field removes its key.
    pub fn save(&self, db: &Database) -> Result<()> {
        let snooze_until = self.snooze_until.map(|until| until.to_rfc3339());
        db.update_settings(&[
            (IGNORED_VERSION_KEY, self.ignored_version.as_deref()),
            (SNOOZE_UNTIL_KEY, snooze_until.as_deref()),
        ])?;
        Ok(())
    }

    /// Whether a prompt for `version` should stay hidden at `now`.
    pub fn suppresses(&self, version: &str, now: DateTime<Utc>) -> bool {
        self.ignored_version.as_deref() == Some(version)
            || self.snooze_until.is_some_and(|until| now < until)
    }

    pub fn snooze(&mut self, now: DateTime<Utc>, duration: Duration) {
        self.snooze_until = Some(now + duration);
    }

    pub fn ignore(&mut self, version: impl Into<String>) {
        self.ignored_version = Some(version.into());
    }
}
