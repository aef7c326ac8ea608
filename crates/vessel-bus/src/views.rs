//! Views as named actors
//!
//! Each concern (updater prompt, status panel, ...) owns at most one view.
//! Opening an already open view focuses it. Everything bound to a view is
//! released exactly once when it closes, whoever closed it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::BusError;
use crate::subscription::Subscription;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewId(pub u64);

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view-{}", self.0)
    }
}

/// What the host needs to create a view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSpec {
    pub title: String,
    /// Page to load, relative to the bundled view directory
    pub page: String,
    pub width: u32,
    pub height: u32,
    pub min_size: Option<(u32, u32)>,
    pub resizable: bool,
    /// Initial data handed to the page on load
    #[serde(default)]
    pub params: Value,
}

impl ViewSpec {
    pub fn new(title: impl Into<String>, page: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            page: page.into(),
            width: 800,
            height: 600,
            min_size: None,
            resizable: true,
            params: Value::Null,
        }
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn min_size(mut self, width: u32, height: u32) -> Self {
        self.min_size = Some((width, height));
        self
    }

    pub fn resizable(mut self, resizable: bool) -> Self {
        self.resizable = resizable;
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// The window system. Implementations must not call back into the
/// [`ViewTable`] from `create`.
pub trait ViewHost: Send + Sync {
    fn create(&self, spec: &ViewSpec) -> Result<ViewId>;
    fn focus(&self, id: ViewId) -> Result<()>;
    fn close(&self, id: ViewId) -> Result<()>;
    /// False once the view has been destroyed, even if nobody told us yet.
    fn is_alive(&self, id: ViewId) -> bool;
    /// Delivers an event to the view on `channel`.
    fn push(&self, id: ViewId, channel: &str, payload: Value) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOpen {
    Created(ViewId),
    /// The view already existed and was brought to the front
    Focused(ViewId),
}

impl ViewOpen {
    pub fn id(&self) -> ViewId {
        match self {
            ViewOpen::Created(id) | ViewOpen::Focused(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, ViewOpen::Created(_))
    }
}

struct ViewActor {
    id: ViewId,
    resources: Vec<Subscription>,
}

/// Lookup table of open views, keyed by actor name.
#[derive(Clone)]
pub struct ViewTable {
    host: Arc<dyn ViewHost>,
    actors: Arc<Mutex<HashMap<String, ViewActor>>>,
}

impl ViewTable {
    pub fn new(host: Arc<dyn ViewHost>) -> Self {
        Self {
            host,
            actors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Opens the view named `name`, or focuses it if it is already open.
    pub fn open(&self, name: &str, spec: &ViewSpec) -> Result<ViewOpen> {
        let (stale, id) = {
            let mut actors = self.actors.lock();

            if let Some(actor) = actors.get(name) {
                if self.host.is_alive(actor.id) {
                    let id = actor.id;
                    drop(actors);
                    if let Err(e) = self.host.focus(id) {
                        tracing::warn!(view = %name, error = %e, "Failed to focus view");
                    }
                    return Ok(ViewOpen::Focused(id));
                }
            }

            let id = self.host.create(spec)?;
            let stale = actors.insert(
                name.to_string(),
                ViewActor {
                    id,
                    resources: Vec::new(),
                },
            );
            tracing::info!(view = %name, id = %id, "Opened view");

            (stale, id)
        };

        if let Some(actor) = stale {
            tracing::debug!(view = %name, id = %actor.id, "Releasing resources of destroyed view");
            release_all(actor.resources);
        }

        Ok(ViewOpen::Created(id))
    }

    /// Ties `resource` to the open view `name`. If the view is not open the
    /// resource is released immediately and `false` is returned.
    pub fn bind(&self, name: &str, resource: Subscription) -> bool {
        let mut actors = self.actors.lock();
        match actors.get_mut(name) {
            Some(actor) => {
                actor.resources.push(resource);
                true
            }
            None => {
                drop(actors);
                tracing::debug!(view = %name, resource = %resource.label(), "View gone, releasing resource");
                resource.release();
                false
            }
        }
    }

    pub fn focus(&self, name: &str) -> Result<()> {
        let id = self
            .view_id(name)
            .ok_or_else(|| BusError::ViewNotOpen(name.to_string()))?;
        self.host.focus(id)
    }

    /// Closes the view and releases everything bound to it.
    /// Returns false if it was not open.
    pub fn close(&self, name: &str) -> bool {
        let actor = self.actors.lock().remove(name);
        let Some(actor) = actor else {
            return false;
        };

        release_all(actor.resources);
        if let Err(e) = self.host.close(actor.id) {
            tracing::warn!(view = %name, error = %e, "Failed to close view");
        }
        tracing::info!(view = %name, id = %actor.id, "Closed view");
        true
    }

    /// Called by the host whenever a view is gone, however it was closed.
    pub fn notify_closed(&self, id: ViewId) -> bool {
        let actor = {
            let mut actors = self.actors.lock();
            let name = actors
                .iter()
                .find(|(_, actor)| actor.id == id)
                .map(|(name, _)| name.clone());
            name.and_then(|name| actors.remove(&name).map(|actor| (name, actor)))
        };

        match actor {
            Some((name, actor)) => {
                release_all(actor.resources);
                tracing::info!(view = %name, id = %id, "View closed");
                true
            }
            None => false,
        }
    }

    pub fn close_all(&self) {
        let names: Vec<String> = self.actors.lock().keys().cloned().collect();
        for name in names {
            self.close(&name);
        }
    }

    pub fn push(&self, name: &str, channel: &str, payload: Value) -> Result<()> {
        let id = self
            .view_id(name)
            .ok_or_else(|| BusError::ViewNotOpen(name.to_string()))?;
        self.host.push(id, channel, payload)
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.view_id(name)
            .is_some_and(|id| self.host.is_alive(id))
    }

    pub fn view_id(&self, name: &str) -> Option<ViewId> {
        self.actors.lock().get(name).map(|actor| actor.id)
    }

    pub fn bound_resources(&self, name: &str) -> usize {
        self.actors
            .lock()
            .get(name)
            .map(|actor| actor.resources.len())
            .unwrap_or(0)
    }
}

fn release_all(resources: Vec<Subscription>) {
    for resource in resources.into_iter().rev() {
        resource.release();
    }
}
