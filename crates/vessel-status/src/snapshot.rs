//! Per-view record of the last snapshot actually sent

use serde::Serialize;

/// Remembers what one view last received. Never shared between views.
#[derive(Debug, Default)]
pub struct SnapshotGate {
    last_sent: Option<String>,
}

impl SnapshotGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes `snapshot` and returns it if it differs from the last
    /// recorded push.
    pub fn changed<T: Serialize>(&self, snapshot: &T) -> crate::Result<Option<String>> {
        let json = serde_json::to_string(snapshot)?;
        if self.last_sent.as_deref() == Some(json.as_str()) {
            return Ok(None);
        }
        Ok(Some(json))
    }

    /// Records a push that went through.
    pub fn record(&mut self, json: String) {
        self.last_sent = Some(json);
    }
}
