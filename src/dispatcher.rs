//! The dispatcher owns the authoritative mapping from function name to live
//! process instance. Lookups are cheap and concurrent, while reloads funnel
//! through a single-consumer restart loop, so a lost update can never drop a
//! live instance.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{error, info};

use crate::{
    data_model::{InvokeRequest, InvokeResponse},
    supervisor::{FunctionProcess, InvokeError},
};

/// Restart notifications outstanding at once are bounded well above anything
/// a single machine of functions produces, so producers never stall.
pub const RESTART_QUEUE_DEPTH: usize = 20;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("function {0} is not running")]
    UnknownFunction(String),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

/// Looks up a function by name and invokes it. The gateway and the rpc
/// listener depend on this seam rather than on the dispatcher directly.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        function: &str,
        request: InvokeRequest,
    ) -> Result<InvokeResponse, DispatchError>;
}

pub struct Dispatcher {
    functions: RwLock<HashMap<String, Arc<FunctionProcess>>>,
    restart_tx: mpsc::Sender<String>,
    restart_rx: std::sync::Mutex<Option<mpsc::Receiver<String>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (restart_tx, restart_rx) = mpsc::channel(RESTART_QUEUE_DEPTH);
        Self {
            functions: RwLock::new(HashMap::new()),
            restart_tx,
            restart_rx: std::sync::Mutex::new(Some(restart_rx)),
        }
    }

    /// The sender every supervised instance signals its stop through.
    pub fn notifier(&self) -> mpsc::Sender<String> {
        self.restart_tx.clone()
    }

    /// Registers a ready instance as the current one for its name. The
    /// caller (boot or the restart loop) guarantees any predecessor was
    /// already removed.
    pub async fn install(&self, instance: Arc<FunctionProcess>) {
        self.functions
            .write()
            .await
            .insert(instance.name().to_string(), instance);
    }

    pub async fn remove(&self, function: &str) -> Option<Arc<FunctionProcess>> {
        self.functions.write().await.remove(function)
    }

    pub async fn get(&self, function: &str) -> Option<Arc<FunctionProcess>> {
        self.functions.read().await.get(function).cloned()
    }

    /// Stops every registered instance and empties the registry.
    pub async fn stop_all(&self) {
        let instances: Vec<_> = {
            let mut functions = self.functions.write().await;
            functions.drain().map(|(_, instance)| instance).collect()
        };
        for instance in instances {
            if let Err(err) = instance.stop().await {
                error!(function = %instance.name(), error = %err, "stop failed during shutdown");
            }
        }
    }

    /// Consumes restart notifications until shutdown. Runs once per process;
    /// a second call is a lifecycle bug and panics.
    pub async fn run_restart_loop(self: Arc<Self>, mut shutdown: watch::Receiver<()>) {
        let mut restart_rx = self
            .restart_rx
            .lock()
            .expect("restart receiver lock poisoned")
            .take()
            .expect("restart loop may only be started once");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("restart loop shutting down");
                    return;
                }
                name = restart_rx.recv() => {
                    let Some(name) = name else { return };
                    self.restart(&name).await;
                }
            }
        }
    }

    async fn restart(&self, name: &str) {
        // The write lock is held across the replacement start, keeping all
        // map mutation single-threaded; the name is simply absent for the
        // duration of the swap.
        let mut functions = self.functions.write().await;
        let Some(old) = functions.remove(name) else {
            // Stop-then-restart signals can race manual removal; a stale
            // notification is expected, not an error.
            info!(function = %name, "restart signal for unregistered function, ignoring");
            return;
        };
        info!(function = %name, instance = %old.instance_id(), "restarting");

        let definition = old.definition().clone();
        drop(old);
        match FunctionProcess::start(definition, self.restart_tx.clone()).await {
            Ok(instance) => {
                functions.insert(name.to_string(), instance);
            }
            Err(err) => {
                error!(
                    function = %name,
                    error = %err,
                    "restart failed, function unregistered"
                );
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Invoker for Dispatcher {
    async fn invoke(
        &self,
        function: &str,
        request: InvokeRequest,
    ) -> Result<InvokeResponse, DispatchError> {
        // Copy the Arc out so the lock is not held across the round trip.
        let instance = self
            .functions
            .read()
            .await
            .get(function)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownFunction(function.to_string()))?;
        Ok(instance.invoke(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn dispatch_to_unregistered_name_fails() {
        let dispatcher = Dispatcher::new();
        let result = dispatcher.invoke("Ghost", InvokeRequest::default()).await;
        assert!(matches!(result, Err(DispatchError::UnknownFunction(name)) if name == "Ghost"));
    }

    #[tokio::test]
    async fn stale_restart_signal_is_ignored() {
        let dispatcher = Arc::new(Dispatcher::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let notifier = dispatcher.notifier();
        let loop_handle = tokio::spawn(dispatcher.clone().run_restart_loop(shutdown_rx));

        // No such function is registered; the loop must log and keep going.
        notifier.send("Ghost".to_string()).await.unwrap();
        notifier.send("Ghost".to_string()).await.unwrap();

        shutdown_tx.send(()).unwrap();
        loop_handle.await.unwrap();
        assert!(dispatcher.get("Ghost").await.is_none());
    }
}
