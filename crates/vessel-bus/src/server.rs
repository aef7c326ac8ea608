//! Core side of the bus: one dispatch loop per connected view

use serde_json::Value;
use tokio::sync::mpsc;

use crate::client::BusClient;
use crate::command::{Command, CommandResult};
use crate::error::BusError;
use crate::registry::HandlerRegistry;
use crate::Result;

/// Resolves commands from any number of views against one registry.
#[derive(Clone)]
pub struct CommandServer {
    registry: HandlerRegistry,
}

impl CommandServer {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Opens a new connection and returns the view's end of it.
    ///
    /// Fails only when there is no async runtime to carry the transport.
    pub fn connect(&self) -> Result<BusClient> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BusError::Transport(e.to_string()))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel::<Command>();
        let (result_tx, result_rx) = mpsc::unbounded_channel::<CommandResult>();

        let registry = self.registry.clone();
        runtime.spawn(serve(registry, command_rx, result_tx));

        let _enter = runtime.enter();
        Ok(BusClient::spawn(command_tx, result_rx))
    }

    /// Handles one raw JSON frame from a view.
    ///
    /// Returns `None` only when the frame has no nonce to answer to.
    pub async fn handle_frame(&self, raw: &str) -> Option<CommandResult> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unparseable frame");
                return None;
            }
        };

        let Some(nonce) = value.get("nonce").and_then(Value::as_str).map(str::to_string) else {
            tracing::warn!("Dropping frame without nonce");
            return None;
        };

        match serde_json::from_value::<Command>(value) {
            Ok(command) => Some(self.registry.dispatch(command).await),
            Err(e) => Some(CommandResult::err(nonce, format!("Malformed command: {e}"))),
        }
    }
}

async fn serve(
    registry: HandlerRegistry,
    mut commands: mpsc::UnboundedReceiver<Command>,
    results: mpsc::UnboundedSender<CommandResult>,
) {
    while let Some(command) = commands.recv().await {
        tracing::trace!(command = %command.name, nonce = %command.nonce, "Dispatching");

        // Handlers run concurrently; results go back in completion order
        let registry = registry.clone();
        let results = results.clone();
        tokio::spawn(async move {
            let result = registry.dispatch(command).await;
            if results.send(result).is_err() {
                tracing::debug!("View went away before its result was ready");
            }
        });
    }
}
