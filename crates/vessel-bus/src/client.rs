//! View side of the bus: issue commands and await their correlated results

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::command::{Command, CommandResult};
use crate::error::BusError;
use crate::Result;

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<CommandResult>>>>;

/// Handle a view uses to call into the core. Cheap to clone; clones share
/// the same connection.
///
/// There is no built-in timeout: wrap [`BusClient::invoke`] in
/// `tokio::time::timeout` when a deadline matters.
#[derive(Clone)]
pub struct BusClient {
    outbound: mpsc::UnboundedSender<Command>,
    pending: Pending,
}

impl BusClient {
    pub(crate) fn spawn(
        outbound: mpsc::UnboundedSender<Command>,
        mut inbound: mpsc::UnboundedReceiver<CommandResult>,
    ) -> Self {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let routing = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(result) = inbound.recv().await {
                let waiter = routing.lock().remove(&result.nonce);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => {
                        tracing::debug!(nonce = %result.nonce, "Dropping result nobody is waiting for");
                    }
                }
            }
            // Connection gone: wake every waiter with a disconnect
            routing.lock().clear();
        });

        Self { outbound, pending }
    }

    /// Sends `name` with `payload` and waits for its result.
    pub async fn invoke(&self, name: &str, payload: Value) -> Result<Value> {
        let command = Command::new(name, payload);
        let nonce = command.nonce.clone();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(nonce.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            nonce: &nonce,
        };

        if self.outbound.send(command).is_err() {
            return Err(BusError::Disconnected);
        }

        let result = rx.await.map_err(|_| BusError::Disconnected)?;
        result.into_result().map_err(|message| BusError::Command {
            name: name.to_string(),
            message,
        })
    }

    /// Like [`BusClient::invoke`], deserializing the handler's value.
    pub async fn invoke_as<T: DeserializeOwned>(&self, name: &str, payload: Value) -> Result<T> {
        let value = self.invoke(name, payload).await?;
        serde_json::from_value(value).map_err(|e| BusError::Malformed(e.to_string()))
    }

    /// Number of commands still waiting for a result.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }
}

/// Forgets the waiter if the caller stops caring before the result arrives.
struct PendingGuard<'a> {
    pending: &'a Pending,
    nonce: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.nonce);
    }
}
