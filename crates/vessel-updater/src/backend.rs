//! The version-check primitive the orchestrator drives

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use vessel_bus::Subscription;

use crate::Result;

/// A release newer than the running build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub version: String,
    pub release_name: Option<String>,
    pub release_notes: Option<String>,
    pub release_date: Option<DateTime<Utc>>,
    /// Human-readable release page
    pub url: String,
    pub asset: Option<UpdateAsset>,
}

impl UpdateInfo {
    pub fn new(version: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            release_name: None,
            release_notes: None,
            release_date: None,
            url: url.into(),
            asset: None,
        }
    }
}

/// The installer to fetch for this platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAsset {
    pub name: String,
    pub url: String,
    pub size: Option<u64>,
    /// Expected lowercase hex SHA-256, when the feed publishes one
    pub sha256: Option<String>,
}

#[async_trait]
pub trait UpdateBackend: Send + Sync + 'static {
    /// `Some` if a newer release exists.
    async fn check(&self) -> Result<Option<UpdateInfo>>;

    /// Fetches the installer for `update`. Progress goes to the progress
    /// listeners; a failure is both returned and sent to the error listeners.
    async fn download(&self, update: &UpdateInfo) -> Result<PathBuf>;

    /// Hands over to the installer. On success the process is expected to
    /// exit shortly.
    fn quit_and_install(&self, installer: &Path) -> Result<()>;

    /// Download progress as a 0-100 percentage.
    fn on_progress(&self, listener: Box<dyn Fn(&f64) + Send + Sync>) -> Subscription;

    fn on_error(&self, listener: Box<dyn Fn(&str) + Send + Sync>) -> Subscription;
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Listeners<T> = Arc<Mutex<Vec<(u64, Listener<T>)>>>;

/// Event listeners for one kind of backend event.
pub struct ListenerSet<T: ?Sized> {
    label: &'static str,
    next_id: AtomicU64,
    listeners: Listeners<T>,
}

impl<T: ?Sized + 'static> ListenerSet<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            next_id: AtomicU64::new(0),
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Adds `listener` until the returned subscription is released.
    pub fn subscribe(&self, listener: Box<dyn Fn(&T) + Send + Sync>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::from(listener)));

        let listeners = Arc::downgrade(&self.listeners);
        let label = self.label;
        Subscription::new(format!("{label}#{id}"), move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().retain(|(existing, _)| *existing != id);
                tracing::trace!(event = %label, id, "Listener removed");
            }
        })
    }

    pub fn emit(&self, value: &T) {
        let listeners: Vec<Listener<T>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_removes_only_that_listener() {
        let set: ListenerSet<str> = ListenerSet::new("error");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let seen = Arc::clone(&seen);
            set.subscribe(Box::new(move |message: &str| seen.lock().push(format!("a:{message}"))))
        };
        let _second = {
            let seen = Arc::clone(&seen);
            set.subscribe(Box::new(move |message: &str| seen.lock().push(format!("b:{message}"))))
        };
        assert_eq!(set.len(), 2);

        assert!(first.release());
        assert!(!first.release());
        set.emit("boom");

        assert_eq!(set.len(), 1);
        assert_eq!(*seen.lock(), vec!["b:boom".to_string()]);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let set: ListenerSet<f64> = ListenerSet::new("download-progress");
        {
            let _subscription = set.subscribe(Box::new(|_percent: &f64| {}));
            assert!(!set.is_empty());
        }
        assert!(set.is_empty());
    }
}
