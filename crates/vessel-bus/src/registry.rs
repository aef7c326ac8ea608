//! Handler registry: one handler per command name

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::command::{Command, CommandResult};
use crate::error::BusError;
use crate::subscription::Subscription;
use crate::Result;

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Value>>;

pub trait Handler: Send + Sync + 'static {
    fn call(&self, payload: Value) -> HandlerFuture;
}

struct FnHandler<F>(F);

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn call(&self, payload: Value) -> HandlerFuture {
        (self.0)(payload).boxed()
    }
}

/// Wraps an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

type HandlerMap = HashMap<String, Arc<dyn Handler>>;

/// Process-wide mapping from command name to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HandlerMap>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`.
    ///
    /// A second registration for the same name is rejected and leaves the
    /// existing handler in place.
    pub fn register(&self, name: &str, handler: Arc<dyn Handler>) -> Result<()> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(name) {
            tracing::error!(command = %name, "Duplicate handler registration");
            return Err(BusError::DuplicateHandler(name.to_string()));
        }
        handlers.insert(name.to_string(), handler);

        tracing::debug!(command = %name, "Registered handler");
        Ok(())
    }

    pub fn register_fn<F, Fut>(&self, name: &str, f: F) -> Result<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(name, handler_fn(f))
    }

    /// Registers a handler that lives only as long as the returned
    /// [`Subscription`]. Releasing it removes exactly this handler, never one
    /// registered later under the same name.
    pub fn register_scoped(&self, name: &str, handler: Arc<dyn Handler>) -> Result<Subscription> {
        self.register(name, Arc::clone(&handler))?;

        let handlers = Arc::downgrade(&self.handlers);
        let command = name.to_string();
        Ok(Subscription::new(format!("handler:{name}"), move || {
            let Some(handlers) = handlers.upgrade() else {
                return;
            };
            let mut handlers = handlers.write();
            if handlers
                .get(&command)
                .is_some_and(|current| Arc::ptr_eq(current, &handler))
            {
                handlers.remove(&command);
                tracing::debug!(command = %command, "Unregistered scoped handler");
            }
        }))
    }

    /// Removes the handler for `name`. Unknown names are a no-op.
    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.write().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolves a command to exactly one result with the same nonce.
    ///
    /// Missing handlers, handler errors and handler panics all become
    /// `ok = false` results; none of them escape this call.
    pub async fn dispatch(&self, command: Command) -> CommandResult {
        let Command {
            name,
            nonce,
            payload,
        } = command;

        let handler = self.handlers.read().get(&name).cloned();
        let Some(handler) = handler else {
            tracing::warn!(command = %name, nonce = %nonce, "No handler for command");
            return CommandResult::err(nonce, format!("No handler for message: {name}"));
        };

        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(payload))) {
            Ok(future) => future,
            Err(panic) => return panicked(&name, nonce, panic),
        };

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(data)) => CommandResult::ok(nonce, data),
            Ok(Err(err)) => {
                tracing::warn!(command = %name, nonce = %nonce, error = %err, "Handler failed");
                CommandResult::err(nonce, format!("{err:#}"))
            }
            Err(panic) => panicked(&name, nonce, panic),
        }
    }
}

fn panicked(name: &str, nonce: String, panic: Box<dyn Any + Send>) -> CommandResult {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string());

    tracing::error!(command = %name, nonce = %nonce, panic = %message, "Handler panicked");
    CommandResult::err(nonce, message)
}
