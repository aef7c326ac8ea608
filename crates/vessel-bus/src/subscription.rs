//! Release handles for anything registered on someone else's behalf

use parking_lot::Mutex;
use std::fmt;

type Release = Box<dyn FnOnce() + Send>;

/// Undoes one registration (a handler, a listener, a timer) when released.
///
/// Releasing is idempotent: the first call runs the release action, later
/// calls and the eventual drop do nothing.
pub struct Subscription {
    label: String,
    release: Mutex<Option<Release>>,
}

impl Subscription {
    pub fn new(label: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    /// A handle with nothing to release.
    pub fn noop(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            release: Mutex::new(None),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns true if this call performed the release.
    pub fn release(&self) -> bool {
        let action = self.release.lock().take();
        match action {
            Some(action) => {
                action();
                tracing::trace!(subscription = %self.label, "Released");
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.lock().is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("released", &self.is_released())
            .finish()
    }
}
